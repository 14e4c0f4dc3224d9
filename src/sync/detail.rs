use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::errors::AppError;
use crate::gateway::{bounded, Gateway};
use crate::models::{Conversation, Message};
use crate::state::{InboxEvent, Selection, SharedState};

/// Per-conversation refresh bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncGuard {
    pub in_flight: bool,
    /// Confirmed message count seen on the last applied refresh.
    pub last_message_count: usize,
}

type Guards = Arc<Mutex<HashMap<String, SyncGuard>>>;

/// Holds a conversation's in-flight flag; releasing happens on drop so every
/// exit path clears it.
struct InFlight {
    guards: Guards,
    conversation_id: String,
}

impl InFlight {
    fn acquire(guards: &Guards, conversation_id: &str) -> Option<Self> {
        let mut map = guards.lock();
        let guard = map.entry(conversation_id.to_string()).or_default();
        if guard.in_flight {
            return None;
        }
        guard.in_flight = true;
        Some(Self { guards: guards.clone(), conversation_id: conversation_id.to_string() })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(guard) = self.guards.lock().get_mut(&self.conversation_id) {
            guard.in_flight = false;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetailRefresh {
    /// The snapshot was committed; `changed` is false when nothing differed.
    Applied { conversation: Conversation, changed: bool },
    /// Another refresh for this conversation is still outstanding.
    InFlight,
    /// The user moved to another conversation before the response arrived.
    Stale,
}

/// Merges a fetched message set into the current one.
///
/// Returns `None` when the confirmed messages are deep-equal to `incoming`.
/// Otherwise the incoming set (sorted by creation time, ties in arrival
/// order) replaces the confirmed messages and unresolved optimistic entries
/// are kept at the tail.
pub fn reconcile(current: &[Message], mut incoming: Vec<Message>) -> Option<Vec<Message>> {
    incoming.sort_by_key(|m| m.created_at);
    let confirmed = current.iter().filter(|m| !m.is_pending());
    let unchanged = confirmed.clone().count() == incoming.len()
        && confirmed.zip(incoming.iter()).all(|(a, b)| a == b);
    if unchanged {
        return None;
    }
    incoming.extend(current.iter().filter(|m| m.is_pending()).cloned());
    Some(incoming)
}

/// True when everything except the message list is identical.
fn same_metadata(a: &Conversation, b: &Conversation) -> bool {
    a.id == b.id
        && a.reference == b.reference
        && a.participant == b.participant
        && a.is_important == b.is_important
        && a.unread_count == b.unread_count
        && a.last_message_snapshot == b.last_message_snapshot
        && a.last_message_at == b.last_message_at
        && a.created_at == b.created_at
}

#[derive(Clone)]
pub struct DetailSynchronizer {
    gateway: Arc<dyn Gateway>,
    shared: SharedState,
    timeout: Duration,
    guards: Guards,
}

impl DetailSynchronizer {
    pub fn new(gateway: Arc<dyn Gateway>, shared: SharedState, timeout: Duration) -> Self {
        Self { gateway, shared, timeout, guards: Arc::default() }
    }

    pub fn guard(&self, conversation_id: &str) -> Option<SyncGuard> {
        self.guards.lock().get(conversation_id).copied()
    }

    /// Drops bookkeeping for a conversation that was closed. An entry with a
    /// refresh still outstanding is kept so its guard is released normally.
    pub fn forget(&self, conversation_id: &str) {
        self.guards.lock().retain(|id, guard| id != conversation_id || guard.in_flight);
    }

    /// Fetches one conversation and reconciles it into the open one.
    ///
    /// A refresh requested while another is outstanding for the same
    /// conversation is dropped. Results are only committed if the
    /// conversation is still the selected one.
    pub async fn refresh(&self, conversation_id: &str, silent: bool) -> Result<DetailRefresh, AppError> {
        let Some(_in_flight) = InFlight::acquire(&self.guards, conversation_id) else {
            debug!("Refresh of {conversation_id} already in flight, dropping");
            return Ok(DetailRefresh::InFlight);
        };

        if !silent {
            self.shared.with(|s| {
                if s.active_conversation_id() == Some(conversation_id) {
                    s.detail_loading = true;
                    s.detail_error = None;
                }
            });
        }

        let result = bounded(self.timeout, self.gateway.get_conversation(conversation_id)).await;

        let fetched = match result {
            Ok(conversation) => conversation,
            Err(e) => {
                self.report_failure(conversation_id, silent, &e);
                return Err(e);
            }
        };

        let committed = self.shared.with(|s| {
            let Selection::Conversation(active) = &mut s.selection else {
                return None;
            };
            if active.id != conversation_id {
                return None;
            }
            if !silent {
                s.detail_loading = false;
            }

            let mut fetched = fetched;
            let incoming = std::mem::take(&mut fetched.messages);
            let merged = reconcile(&active.messages, incoming);
            let metadata_changed = !same_metadata(active, &fetched);
            if metadata_changed {
                let messages = std::mem::take(&mut active.messages);
                *active = Conversation { messages, ..fetched };
            }
            let changed = merged.is_some() || metadata_changed;
            if let Some(messages) = merged {
                active.messages = messages;
            }
            let confirmed = active.messages.iter().filter(|m| !m.is_pending()).count();
            let snapshot = active.clone();

            if !silent {
                s.list.clear_unread(conversation_id);
            }
            Some((snapshot, changed, confirmed))
        });

        let Some((conversation, changed, confirmed)) = committed else {
            debug!("Discarding refresh of {conversation_id}, no longer selected");
            return Ok(DetailRefresh::Stale);
        };

        let previous_count = {
            let mut guards = self.guards.lock();
            let guard = guards.entry(conversation_id.to_string()).or_default();
            std::mem::replace(&mut guard.last_message_count, confirmed)
        };

        if changed {
            self.shared.emit(InboxEvent::ConversationUpdated {
                conversation_id: conversation_id.to_string(),
            });
        }
        if confirmed > previous_count && previous_count > 0 {
            self.shared.emit(InboxEvent::NewMessages {
                conversation_id: conversation_id.to_string(),
                count: confirmed - previous_count,
            });
        }
        if !silent {
            self.mark_read_in_background(conversation_id);
        }

        Ok(DetailRefresh::Applied { conversation, changed })
    }

    fn report_failure(&self, conversation_id: &str, silent: bool, e: &AppError) {
        if silent {
            debug!("Background refresh of {conversation_id} failed: {e}");
            return;
        }
        error!("Failed to load conversation {conversation_id}: {e}");
        let message = e.user_message();
        self.shared.with(|s| {
            if s.active_conversation_id() == Some(conversation_id) {
                s.detail_loading = false;
                s.detail_error = Some(message.clone());
            }
        });
        self.shared.emit(InboxEvent::DetailError {
            conversation_id: conversation_id.to_string(),
            message,
        });
    }

    /// Best effort; a failure is only logged.
    fn mark_read_in_background(&self, conversation_id: &str) {
        let gateway = self.gateway.clone();
        let timeout = self.timeout;
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = bounded(timeout, gateway.mark_read(&conversation_id)).await {
                warn!("Failed to mark {conversation_id} as read: {e}");
            }
        });
    }
}
