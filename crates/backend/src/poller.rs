use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleetmap_shared::store::TrackedVehicle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::service::{MapCommand, MapHandle};
use crate::sources::PositionProvider;

/// Periodically asks the tracking provider for each tracked vehicle's latest fix.
///
/// Every response is tagged with the generation that was current when its loop was
/// started. `stop` retires the generation, so responses still in flight are discarded
/// by the map service instead of resurrecting state.
pub struct Poller<P> {
    provider: Arc<P>,
    interval: Duration,
    handle: MapHandle,
    generation: Arc<AtomicU64>,
    tasks: Vec<JoinHandle<()>>,
}

impl<P: PositionProvider> Poller<P> {
    pub fn new(provider: Arc<P>, interval: Duration, handle: MapHandle) -> Self {
        Poller {
            provider,
            interval,
            handle,
            generation: Arc::new(AtomicU64::new(0)),
            tasks: Vec::new(),
        }
    }

    /// (Re)start polling for exactly `vehicles`.
    pub fn start(&mut self, vehicles: Vec<TrackedVehicle>) {
        self.stop();
        let generation = self.generation.load(Ordering::Acquire);
        tracing::info!(vehicles = vehicles.len(), generation, "Starting position polling");

        for vehicle in vehicles {
            let provider = Arc::clone(&self.provider);
            let handle = self.handle.clone();
            let current = Arc::clone(&self.generation);
            let period = self.interval;
            self.tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if current.load(Ordering::Acquire) != generation {
                        break;
                    }
                    match provider.positions(&vehicle.device_id).await {
                        Ok(samples) => {
                            let command = MapCommand::Poll {
                                generation,
                                vehicle_id: vehicle.vehicle_id.clone(),
                                samples,
                            };
                            if handle.enqueue(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                vehicle_id = %vehicle.vehicle_id,
                                device_id = %vehicle.device_id,
                                error = %e,
                                "Position poll failed"
                            );
                        }
                    }
                }
            }));
        }
    }

    /// Cancel all loops and retire the current generation.
    pub fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    pub fn active_loops(&self) -> usize {
        self.tasks.len()
    }
}

impl<P> Drop for Poller<P> {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
