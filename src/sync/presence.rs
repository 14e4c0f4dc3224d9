use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::errors::AppError;
use crate::gateway::{bounded, Gateway};
use crate::models::PresenceRecord;
use crate::state::{InboxEvent, SharedState};

/// Polls online/last-seen status of the open conversation's visitor.
#[derive(Clone)]
pub struct PresenceTracker {
    gateway: Arc<dyn Gateway>,
    shared: SharedState,
    timeout: Duration,
}

impl PresenceTracker {
    pub fn new(gateway: Arc<dyn Gateway>, shared: SharedState, timeout: Duration) -> Self {
        Self { gateway, shared, timeout }
    }

    /// A failed poll keeps the previous record until a later poll succeeds.
    pub async fn poll(&self, conversation_id: &str) -> Result<PresenceRecord, AppError> {
        let record = bounded(self.timeout, self.gateway.presence(conversation_id))
            .await
            .inspect_err(|e| debug!("Presence poll for {conversation_id} failed: {e}"))?;

        let applied = self.shared.with(|s| {
            let tracked = s
                .active_conversation()
                .is_some_and(|c| c.id == conversation_id && c.has_visitor_counterpart());
            if tracked {
                s.presence = Some(record.clone());
            }
            tracked
        });
        if applied {
            self.shared.emit(InboxEvent::PresenceUpdated {
                conversation_id: conversation_id.to_string(),
                is_online: record.is_online,
            });
        }
        Ok(record)
    }
}
