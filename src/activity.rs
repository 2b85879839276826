//! Typed subscription over a tenant's lifecycle notifications.

use std::sync::Arc;

use futures::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::events::JobEvent;
use crate::storage::StoreAdapter;

/// Narrow a subscription to one queue and/or one job id.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub queue: Option<String>,
    pub id: Option<String>,
}

impl ActivityFilter {
    fn accepts(&self, event: &JobEvent) -> bool {
        if let Some(queue) = &self.queue {
            if event.queue() != Some(queue.as_str()) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if event.id() != Some(id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A live replay of one tenant's lifecycle events.
pub struct Activity {
    tenant: String,
    filter: ActivityFilter,
    stream: BroadcastStream<String>,
}

impl Activity {
    pub fn subscribe(
        store: &Arc<dyn StoreAdapter>,
        tenant: impl Into<String>,
        filter: ActivityFilter,
    ) -> Self {
        let tenant = tenant.into();
        let stream = BroadcastStream::new(store.subscribe(&tenant));
        Self {
            tenant,
            filter,
            stream,
        }
    }

    /// Next matching event; `None` once the store side is gone.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        loop {
            match self.stream.next().await? {
                Ok(payload) => {
                    let Some(event) = JobEvent::parse(&self.tenant, &payload) else {
                        warn!(tenant = %self.tenant, payload = %payload, "unparseable notification");
                        continue;
                    };
                    if self.filter.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(tenant = %self.tenant, skipped, "activity stream lagged");
                }
            }
        }
    }
}
