//! Push/poll live view
//!
//! One abstraction over "refresh on change notifications, fall back to a
//! timer". The view reacts to relevant feed events immediately; the timer
//! covers feed gaps and a closed feed. Subscribers get a watch channel and
//! never care which path produced the refresh.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::DeliveryEvent;

/// A derived value kept fresh by events and a fallback timer
pub struct LiveView<T> {
    rx: watch::Receiver<T>,
    handle: JoinHandle<()>,
}

impl<T: Clone + Send + Sync + 'static> LiveView<T> {
    /// Spawn the refresh loop.
    ///
    /// `relevant` filters the feed; `refresh` recomputes the value and may
    /// return `None` on a failed recompute, which keeps the previous value.
    pub fn spawn<P, F, Fut>(
        initial: T,
        mut feed: broadcast::Receiver<DeliveryEvent>,
        poll_interval: Duration,
        relevant: P,
        refresh: F,
    ) -> Self
    where
        P: Fn(&DeliveryEvent) -> bool + Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Option<T>> + Send,
    {
        let (tx, rx) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            // The first tick fires immediately and seeds the view
            let mut feed_open = true;

            loop {
                let triggered = tokio::select! {
                    event = feed.recv(), if feed_open => match event {
                        Ok(event) => relevant(&event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!("Live view lagged {} events, refreshing", missed);
                            true
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // Timer keeps the view alive without the feed
                            feed_open = false;
                            false
                        }
                    },
                    _ = interval.tick() => true,
                };

                if !triggered {
                    continue;
                }
                if let Some(value) = refresh().await {
                    if tx.send(value).is_err() {
                        break;
                    }
                }
            }
        });

        Self { rx, handle }
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.rx.clone()
    }

    pub fn latest(&self) -> T {
        self.rx.borrow().clone()
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
