use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fleetmap_shared::models::{LngLat, OfficeLocation};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 256;

/// A live position for the vehicle driving a trip.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationUpdate {
    pub vehicle_id: String,
    pub trip_id: String,
    pub position: LngLat,
    /// Provider timestamp, stored as the trip's `lastUpdate` when present.
    pub timestamp: Option<String>,
}

/// In-process fan-out for the two push streams.
///
/// The push transport publishes here; the map service subscribes.
#[derive(Debug, Clone)]
pub struct PushHub {
    office: broadcast::Sender<OfficeLocation>,
    location: broadcast::Sender<LocationUpdate>,
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PushHub {
    pub fn new() -> Self {
        let (office, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (location, _) = broadcast::channel(CHANNEL_CAPACITY);
        PushHub { office, location }
    }

    /// Returns the number of subscribers the event reached.
    pub fn publish_office(&self, office: OfficeLocation) -> usize {
        self.office.send(office).unwrap_or(0)
    }

    pub fn publish_location(&self, update: LocationUpdate) -> usize {
        self.location.send(update).unwrap_or(0)
    }

    pub fn subscribe_office_updates(
        &self,
        handler: impl FnMut(OfficeLocation) + Send + 'static,
    ) -> Subscription {
        Subscription::spawn("office", self.office.subscribe(), handler)
    }

    pub fn subscribe_location_updates(
        &self,
        handler: impl FnMut(LocationUpdate) + Send + 'static,
    ) -> Subscription {
        Subscription::spawn("location", self.location.subscribe(), handler)
    }
}

/// Handle to one push subscription. Closing (or dropping) it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Subscription {
    fn spawn<T: Clone + Send + 'static>(
        stream: &'static str,
        mut rx: broadcast::Receiver<T>,
        mut handler: impl FnMut(T) + Send + 'static,
    ) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if flag.load(Ordering::Acquire) {
                            break;
                        }
                        handler(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(stream, skipped, "Push subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { closed, task }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.task.abort();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn location(trip_id: &str) -> LocationUpdate {
        LocationUpdate {
            vehicle_id: "1".to_string(),
            trip_id: trip_id.to_string(),
            position: LngLat {
                longitude: 10.0,
                latitude: 10.0,
            },
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let hub = PushHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = hub.subscribe_location_updates(move |u| {
            let _ = tx.send(u.trip_id);
        });

        assert_eq!(hub.publish_location(location("1")), 1);
        hub.publish_location(location("2"));
        assert_eq!(rx.recv().await.unwrap(), "1");
        assert_eq!(rx.recv().await.unwrap(), "2");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_reaches_nobody() {
        let hub = PushHub::new();
        assert_eq!(hub.publish_office(OfficeLocation::default()), 0);
    }

    #[tokio::test]
    async fn test_no_delivery_after_close() {
        let hub = PushHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = hub.subscribe_office_updates(move |o| {
            let _ = tx.send(o);
        });
        sub.close();
        assert!(sub.is_closed());
        hub.publish_office(OfficeLocation::default());

        let got = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        // Either the handler (and its sender) is gone, or nothing arrives in time.
        assert!(matches!(got, Ok(None) | Err(_)));
    }
}
