use std::sync::Arc;

use fleetmap_shared::diff::MarkerDelta;
use fleetmap_shared::models::{
    attr, Attributes, Category, Entity, EntityKind, FilterState, OfficeLocation, PositionSample,
    Snapshot,
};
use fleetmap_shared::store::TrackedVehicle;
use fleetmap_shared::{FleetMap, Ingest, SnapshotReport};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::poller::Poller;
use crate::push::{LocationUpdate, PushHub, Subscription};
use crate::sources::{PositionProvider, SnapshotSource, SourceError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("map service is not running")]
    Stopped,
    #[error("no snapshot has been loaded yet")]
    NotInitialized,
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Read-only copy of the map state, taken between two events.
#[derive(Debug, Clone, Default)]
pub struct MapView {
    pub markers: Vec<Entity>,
    pub selection: Option<String>,
    pub filter: FilterState,
    pub stats: MapStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapStats {
    pub offices: usize,
    pub vehicles: usize,
    pub drivers: usize,
    pub trips: usize,
    pub held: usize,
    pub tracked_vehicles: usize,
    pub rejected_samples: u64,
    pub store_version: u64,
    /// RFC 3339 time of the last successful snapshot load.
    pub last_snapshot_at: Option<String>,
}

type Reply<T> = oneshot::Sender<T>;

/// Everything the service reacts to. Processed strictly one at a time, in arrival order.
#[derive(Debug)]
pub enum MapCommand {
    Reload {
        reply: Option<Reply<Result<SnapshotReport, ServiceError>>>,
    },
    SnapshotFetched {
        result: Result<Snapshot, SourceError>,
        reply: Option<Reply<Result<SnapshotReport, ServiceError>>>,
    },
    Office(OfficeLocation),
    Location(LocationUpdate),
    Poll {
        generation: u64,
        vehicle_id: String,
        samples: Vec<PositionSample>,
    },
    SetFilter {
        category: Category,
        query: String,
        reply: Reply<FilterState>,
    },
    Select {
        id: String,
        reply: Reply<Result<bool, ServiceError>>,
    },
    ClearSelection {
        reply: Reply<()>,
    },
    View {
        reply: Reply<MapView>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Cheap, cloneable front door to the map service.
#[derive(Debug, Clone)]
pub struct MapHandle {
    tx: mpsc::UnboundedSender<MapCommand>,
    changes: watch::Receiver<u64>,
}

impl MapHandle {
    /// Queue a command without waiting for it to be processed.
    pub fn enqueue(&self, command: MapCommand) -> Result<(), ServiceError> {
        self.tx.send(command).map_err(|_| ServiceError::Stopped)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> MapCommand) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(make(reply))?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    pub async fn view(&self) -> Result<MapView, ServiceError> {
        self.request(|reply| MapCommand::View { reply }).await
    }

    pub async fn set_filter(
        &self,
        category: Category,
        query: String,
    ) -> Result<FilterState, ServiceError> {
        self.request(|reply| MapCommand::SetFilter {
            category,
            query,
            reply,
        })
        .await
    }

    pub async fn select(&self, id: String) -> Result<bool, ServiceError> {
        self.request(|reply| MapCommand::Select { id, reply })
            .await?
    }

    pub async fn clear_selection(&self) -> Result<(), ServiceError> {
        self.request(|reply| MapCommand::ClearSelection { reply })
            .await
    }

    pub async fn reload(&self) -> Result<SnapshotReport, ServiceError> {
        self.request(|reply| MapCommand::Reload { reply: Some(reply) })
            .await?
    }

    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.request(|reply| MapCommand::Shutdown { reply }).await
    }

    /// Revision of the visible marker list; bumps whenever renderers should redraw.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    pub fn visible_revision(&self) -> u64 {
        *self.changes.borrow()
    }
}

/// Owns the `FleetMap` and its collaborators.
pub struct MapService<P: PositionProvider> {
    map: FleetMap,
    source: Arc<SnapshotSource>,
    poller: Option<Poller<P>>,
    subscriptions: Vec<Subscription>,
    handle: MapHandle,
    last_snapshot_at: Option<String>,
}

impl<P: PositionProvider> MapService<P> {
    /// Start the service task, subscribe to `hub`, and queue the initial snapshot load.
    ///
    /// `provider` of `None` disables external polling.
    pub fn spawn(
        source: SnapshotSource,
        provider: Option<(Arc<P>, std::time::Duration)>,
        hub: &PushHub,
    ) -> (MapHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (changes_tx, changes_rx) = watch::channel(0u64);
        let handle = MapHandle {
            tx,
            changes: changes_rx,
        };

        let mut map = FleetMap::new();
        map.on_visible_markers_changed(move |change| {
            let (added, updated, removed) = count_deltas(change.deltas);
            tracing::debug!(
                markers = change.markers.len(),
                added,
                updated,
                removed,
                "Visible markers changed"
            );
            changes_tx.send_modify(|rev| *rev += 1);
        });

        let office_handle = handle.clone();
        let location_handle = handle.clone();
        let subscriptions = vec![
            hub.subscribe_office_updates(move |office| {
                let _ = office_handle.enqueue(MapCommand::Office(office));
            }),
            hub.subscribe_location_updates(move |update| {
                let _ = location_handle.enqueue(MapCommand::Location(update));
            }),
        ];

        let poller = provider.map(|(provider, interval)| Poller::new(provider, interval, handle.clone()));

        let service = MapService {
            map,
            source: Arc::new(source),
            poller,
            subscriptions,
            handle: handle.clone(),
            last_snapshot_at: None,
        };
        let _ = handle.enqueue(MapCommand::Reload { reply: None });
        let task = tokio::spawn(service.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MapCommand>) {
        let mut stopped_by = None;
        while let Some(command) = rx.recv().await {
            if let MapCommand::Shutdown { reply } = command {
                stopped_by = Some(reply);
                break;
            }
            self.handle_command(command);
        }
        self.teardown();
        tracing::info!("Map service stopped");
        if let Some(reply) = stopped_by {
            let _ = reply.send(());
        }
    }

    fn handle_command(&mut self, command: MapCommand) {
        match command {
            MapCommand::Reload { reply } => self.start_fetch(reply),
            MapCommand::SnapshotFetched { result, reply } => {
                let outcome = self.apply_snapshot(result);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            MapCommand::Office(office) => {
                let outcome = self.map.apply_office_update(&office);
                log_ingest("office", "office", outcome);
            }
            MapCommand::Location(update) => {
                let mut patch = Attributes::new();
                if let Some(ts) = &update.timestamp {
                    patch.insert(attr::LAST_UPDATE.to_string(), ts.clone().into());
                }
                let outcome = self.map.apply_location_update(
                    &update.vehicle_id,
                    &update.trip_id,
                    update.position,
                    patch,
                );
                log_ingest("location", &update.trip_id, outcome);
            }
            MapCommand::Poll {
                generation,
                vehicle_id,
                samples,
            } => {
                let current = self.poller.as_ref().is_some_and(|p| p.is_current(generation));
                if !current {
                    tracing::debug!(vehicle_id = %vehicle_id, generation, "Discarding stale poll response");
                    return;
                }
                let outcome = self.map.apply_poll_samples(&vehicle_id, &samples);
                log_ingest("poll", &vehicle_id, outcome);
            }
            MapCommand::SetFilter {
                category,
                query,
                reply,
            } => {
                self.map.set_filter(category, query);
                let _ = reply.send(self.map.filter().clone());
            }
            MapCommand::Select { id, reply } => {
                let result = if self.map.store().is_initialized() {
                    Ok(self.map.select_marker(&id))
                } else {
                    Err(ServiceError::NotInitialized)
                };
                let _ = reply.send(result);
            }
            MapCommand::ClearSelection { reply } => {
                self.map.clear_selection();
                let _ = reply.send(());
            }
            MapCommand::View { reply } => {
                let _ = reply.send(self.view());
            }
            // Intercepted by `run`.
            MapCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Fetch off the queue; the result comes back as `SnapshotFetched`.
    fn start_fetch(&self, reply: Option<Reply<Result<SnapshotReport, ServiceError>>>) {
        let source = Arc::clone(&self.source);
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let result = source.fetch_snapshot().await;
            let _ = handle.enqueue(MapCommand::SnapshotFetched { result, reply });
        });
    }

    fn apply_snapshot(
        &mut self,
        result: Result<Snapshot, SourceError>,
    ) -> Result<SnapshotReport, ServiceError> {
        let snapshot = result.map_err(|e| {
            tracing::warn!(error = %e, "Snapshot fetch failed");
            e
        })?;
        let report = self.map.load_snapshot(&snapshot);
        self.last_snapshot_at = Some(chrono::Utc::now().to_rfc3339());
        tracing::info!(
            entities = report.entities,
            held = report.held,
            vehicles_on_trip = report.vehicles_on_trip,
            trips_dropped = report.trips_dropped,
            duplicates = report.duplicates,
            "Snapshot loaded"
        );

        let tracked: Vec<TrackedVehicle> = self.map.tracked_vehicles().to_vec();
        if let Some(poller) = self.poller.as_mut() {
            poller.start(tracked);
            tracing::debug!(loops = poller.active_loops(), "Polling restarted");
        }
        Ok(report)
    }

    fn view(&self) -> MapView {
        let store = self.map.store();
        MapView {
            markers: self.map.visible_markers().to_vec(),
            selection: self.map.selection().map(str::to_string),
            filter: self.map.filter().clone(),
            stats: MapStats {
                offices: store.count_by_kind(EntityKind::Office),
                vehicles: store.count_by_kind(EntityKind::Vehicle),
                drivers: store.count_by_kind(EntityKind::Driver),
                trips: store.count_by_kind(EntityKind::Trip),
                held: store.held_len(),
                tracked_vehicles: store.tracked_vehicles().len(),
                rejected_samples: store.rejected_count(),
                store_version: store.version(),
                last_snapshot_at: self.last_snapshot_at.clone(),
            },
        }
    }

    fn teardown(&mut self) {
        if let Some(poller) = self.poller.as_mut() {
            poller.stop();
        }
        for sub in self.subscriptions.drain(..).filter(|s| !s.is_closed()) {
            sub.close();
        }
    }
}

fn count_deltas(deltas: &[MarkerDelta]) -> (usize, usize, usize) {
    deltas.iter().fold((0, 0, 0), |(a, u, r), d| match d {
        MarkerDelta::Added(_) => (a + 1, u, r),
        MarkerDelta::Updated(_) => (a, u + 1, r),
        MarkerDelta::Removed { .. } => (a, u, r + 1),
    })
}

fn log_ingest(stream: &str, id: &str, outcome: Ingest) {
    match outcome {
        Ingest::Rejected(reason) => {
            tracing::warn!(stream, id, ?reason, "Rejected malformed update")
        }
        other => tracing::trace!(stream, id, outcome = ?other, "Applied update"),
    }
}
