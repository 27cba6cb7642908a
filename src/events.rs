//! Change-notification feed
//!
//! Every mutation through the persistence gateway broadcasts a
//! [`DeliveryEvent`]. Live views (tour lists, stop lists, the dispatch map)
//! subscribe to this feed for immediate refresh; the SSE endpoint re-exports
//! it to connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Row-level change events, keyed by entity
///
/// Events carry identifiers rather than full rows; subscribers re-read the
/// entity they care about, so a lossy feed only ever costs an extra fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeliveryEvent {
    /// A tour was created, updated, or changed status
    TourChanged {
        tour_id: Uuid,
        pharmacy_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A tour was deleted
    TourDeleted {
        tour_id: Uuid,
        pharmacy_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A stop was added, updated, deleted, or changed status
    StopsChanged {
        tour_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// The visiting order of a tour was rewritten
    StopsReordered {
        tour_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A customer was created or updated
    CustomerChanged {
        customer_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A new driver position sample was appended
    PositionRecorded {
        driver_id: Uuid,
        tour_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// Completion evidence (photo or signature) was attached to a stop
    EvidenceChanged {
        stop_id: Uuid,
        tour_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// An import batch finished or was cancelled
    ImportFinished {
        tour_id: Uuid,
        imported: usize,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl DeliveryEvent {
    /// Event name used on the SSE wire
    pub fn name(&self) -> &'static str {
        match self {
            DeliveryEvent::TourChanged { .. } => "tour_changed",
            DeliveryEvent::TourDeleted { .. } => "tour_deleted",
            DeliveryEvent::StopsChanged { .. } => "stops_changed",
            DeliveryEvent::StopsReordered { .. } => "stops_reordered",
            DeliveryEvent::CustomerChanged { .. } => "customer_changed",
            DeliveryEvent::PositionRecorded { .. } => "position_recorded",
            DeliveryEvent::EvidenceChanged { .. } => "evidence_changed",
            DeliveryEvent::ImportFinished { .. } => "import_finished",
        }
    }
}

/// Shared change feed handle
///
/// Cheap to clone; senders ignore the no-receivers case.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<DeliveryEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event, ignoring if no subscribers are connected
    pub fn publish(&self, event: DeliveryEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let feed = ChangeFeed::new(16);
        let mut rx = feed.subscribe();

        let tour_id = Uuid::new_v4();
        feed.publish(DeliveryEvent::StopsReordered {
            tour_id,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            DeliveryEvent::StopsReordered { tour_id: got, .. } => assert_eq!(got, tour_id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let feed = ChangeFeed::new(16);
        feed.publish(DeliveryEvent::CustomerChanged {
            customer_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = DeliveryEvent::PositionRecorded {
            driver_id: Uuid::new_v4(),
            tour_id: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PositionRecorded");
    }
}
