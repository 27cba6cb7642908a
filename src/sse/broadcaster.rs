//! SSE bridge for the change-notification feed

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::events::ChangeFeed;

/// Bridges the broadcast change feed onto SSE client connections
#[derive(Clone)]
pub struct SseBroadcaster {
    feed: ChangeFeed,
}

impl SseBroadcaster {
    pub fn new(feed: ChangeFeed) -> Self {
        Self { feed }
    }

    /// Number of currently connected subscribers
    pub fn client_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    /// Event stream for a new client connection
    pub fn subscribe_stream(&self) -> impl Stream<Item = Result<Event, Infallible>> {
        let rx = self.feed.subscribe();
        let stream = BroadcastStream::new(rx);

        stream.filter_map(|result| async move {
            match result {
                Ok(delivery_event) => {
                    let event = Event::default()
                        .event(delivery_event.name())
                        .json_data(&delivery_event)
                        .ok();
                    event.map(Ok)
                }
                Err(e) => {
                    // Slow client lagged behind the buffer; skip and continue
                    warn!("SSE client lagged: {:?}", e);
                    None
                }
            }
        })
    }

    /// Axum SSE response for GET /events
    pub fn handle_connection(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        debug!("New SSE client, total clients: {}", self.client_count() + 1);

        Sse::new(self.subscribe_stream()).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(30))
                .text("keep-alive"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DeliveryEvent;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn events_reach_the_stream() {
        let feed = ChangeFeed::new(16);
        let broadcaster = SseBroadcaster::new(feed.clone());
        let mut stream = Box::pin(broadcaster.subscribe_stream());

        feed.publish(DeliveryEvent::TourChanged {
            tour_id: Uuid::new_v4(),
            pharmacy_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });

        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(event.is_some());
    }
}
