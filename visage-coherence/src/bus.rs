//! In-process broadcast transport for cache-mutation events.

use crate::handler::NotificationHandler;
use std::sync::Arc;
use tokio::sync::broadcast;
use visage_core::{CacheNotification, CoherenceError, CoherencePublisher};

/// Fan-out bus carrying serialized [`CacheNotification`] frames between
/// cache instances in the same process.
///
/// Frames travel as JSON strings, the same encoding an external broker
/// would carry, so the handler path is identical in tests and production.
/// Delivery is best effort: a subscriber that falls more than the channel
/// capacity behind loses the oldest frames and logs how many.
#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<String>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Raw subscription, for transports bridging frames elsewhere.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Spawn a task feeding every frame on the bus to `handler`. The task
    /// ends when the bus is dropped.
    pub fn attach(&self, handler: Arc<NotificationHandler>) -> tokio::task::JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(raw) => handler.handle_raw(&raw),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            skipped,
                            "Coherence subscriber lagged; affected tenants stay stale until reload"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Coherence bus closed; subscriber stopping");
                        break;
                    }
                }
            }
        })
    }
}

impl CoherencePublisher for BroadcastBus {
    fn publish(&self, notification: &CacheNotification) -> Result<(), CoherenceError> {
        let raw =
            serde_json::to_string(notification).map_err(|error| CoherenceError::PublishFailed {
                reason: error.to_string(),
            })?;
        // A send error only means nobody is subscribed right now.
        if self.tx.send(raw).is_err() {
            tracing::debug!(
                action = ?notification.cache_action,
                "No coherence subscribers; event dropped"
            );
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
