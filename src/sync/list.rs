use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::errors::AppError;
use crate::gateway::{bounded, Gateway};
use crate::models::{Conversation, ConversationCounts, ConversationFilter, Message};
use crate::state::{InboxEvent, InboxState, Selection, SharedState};

/// Conversation list as shown in the sidebar.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListState {
    /// Sorted by latest activity; messages are never populated here.
    pub conversations: Vec<Conversation>,
    pub counts: ConversationCounts,
    /// Counters came from the server and cover rows the current filter hides,
    /// so local changes adjust them instead of recounting.
    pub server_counts: bool,
    pub filter: ConversationFilter,
    /// Client-side text search, applied on top of `filter`.
    pub search: String,
    pub loading: bool,
    /// Set once any list load has succeeded.
    pub loaded: bool,
    /// Retryable banner for a failed explicit load.
    pub banner: Option<String>,
    /// Inline error for a failed important toggle: (conversation id, message).
    pub important_error: Option<(String, String)>,
}

impl ListState {
    /// Conversations matching the search text, in list order.
    pub fn visible(&self) -> Vec<&Conversation> {
        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return self.conversations.iter().collect();
        }
        self.conversations
            .iter()
            .filter(|c| {
                c.participant.display_name().to_lowercase().contains(&needle)
                    || c.reference.as_deref().is_some_and(|r| r.to_lowercase().contains(&needle))
                    || c.last_message_snapshot
                        .as_deref()
                        .is_some_and(|p| p.to_lowercase().contains(&needle))
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn recount(&mut self) {
        self.counts = ConversationCounts::from_conversations(&self.conversations);
    }

    /// Zeroes a row's unread count after it was read locally.
    pub fn clear_unread(&mut self, conversation_id: &str) {
        let Some(row) = self.conversations.iter_mut().find(|c| c.id == conversation_id) else {
            return;
        };
        if row.unread_count == 0 {
            return;
        }
        row.unread_count = 0;
        if self.server_counts {
            self.counts.unread = self.counts.unread.saturating_sub(1);
        } else {
            self.recount();
        }
    }

    pub fn set_important(&mut self, conversation_id: &str, flag: bool) {
        let Some(row) = self.conversations.iter_mut().find(|c| c.id == conversation_id) else {
            return;
        };
        if row.is_important == flag {
            return;
        }
        row.is_important = flag;
        if !self.server_counts {
            self.recount();
        } else if flag {
            self.counts.important += 1;
        } else {
            self.counts.important = self.counts.important.saturating_sub(1);
        }
    }

    /// Refreshes the row for a conversation after a message was sent from it.
    pub fn touch(&mut self, conversation_id: &str, message: &Message) {
        if let Some(row) = self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            row.last_message_snapshot = Some(message.preview());
            row.last_message_at = Some(message.created_at);
        }
        let prior = std::mem::take(&mut self.conversations);
        self.conversations = sort_conversations(&prior, prior.clone());
    }

    /// Inserts or replaces a row, keeping at most one row per reference.
    pub fn upsert(&mut self, conversation: Conversation) {
        let mut row = conversation;
        row.messages.clear();
        let (replaced, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.conversations)
            .into_iter()
            .partition(|c| c.id == row.id || (row.reference.is_some() && c.reference == row.reference));
        if self.server_counts {
            let removed = ConversationCounts::from_conversations(&replaced);
            let added = ConversationCounts::from_conversations(std::slice::from_ref(&row));
            self.counts.total = (self.counts.total + added.total).saturating_sub(removed.total);
            self.counts.unread = (self.counts.unread + added.unread).saturating_sub(removed.unread);
            self.counts.important =
                (self.counts.important + added.important).saturating_sub(removed.important);
        }
        let mut rows = kept.clone();
        rows.push(row);
        self.conversations = sort_conversations(&kept, rows);
        if !self.server_counts {
            self.recount();
        }
    }
}

/// Orders by latest activity (last message, else creation), newest first.
/// Ties keep their relative order from `prior`; rows unknown to `prior`
/// keep their incoming order after the known ones.
pub fn sort_conversations(prior: &[Conversation], incoming: Vec<Conversation>) -> Vec<Conversation> {
    let rank: HashMap<&str, usize> =
        prior.iter().enumerate().map(|(i, c)| (c.id.as_str(), i)).collect();
    let mut keyed: Vec<(usize, Conversation)> = incoming
        .into_iter()
        .map(|c| (rank.get(c.id.as_str()).copied().unwrap_or(usize::MAX), c))
        .collect();
    keyed.sort_by_key(|(rank, c)| (Reverse(c.activity_at()), *rank));
    keyed.into_iter().map(|(_, c)| c).collect()
}

/// Keeps the first (most recent) conversation for each reference.
fn dedupe_by_reference(sorted: Vec<Conversation>) -> Vec<Conversation> {
    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|c| match &c.reference {
            Some(reference) => seen.insert(reference.clone()),
            None => true,
        })
        .collect()
}

#[derive(Clone)]
pub struct ListSynchronizer {
    gateway: Arc<dyn Gateway>,
    shared: SharedState,
    timeout: Duration,
}

impl ListSynchronizer {
    pub fn new(gateway: Arc<dyn Gateway>, shared: SharedState, timeout: Duration) -> Self {
        Self { gateway, shared, timeout }
    }

    /// Fetches the list for `filter`.
    ///
    /// A silent refresh never touches loading/banner state and leaves the
    /// previous list in place on failure. A result that arrives after the
    /// filter was changed is returned but not applied.
    pub async fn refresh(
        &self,
        filter: ConversationFilter,
        silent: bool,
    ) -> Result<Vec<Conversation>, AppError> {
        if !silent {
            self.shared.with(|s| {
                s.list.loading = true;
                s.list.banner = None;
            });
        }

        let result = bounded(self.timeout, self.gateway.list_conversations(filter)).await;

        match result {
            Ok(list) => {
                let applied = self.shared.with(|s| {
                    if s.list.filter != filter {
                        debug!("Discarding list for stale filter {}", filter.as_str());
                        if !silent {
                            s.list.loading = false;
                        }
                        return None;
                    }
                    let sorted = sort_conversations(&s.list.conversations, list.conversations.clone());
                    let rows = dedupe_by_reference(sorted);
                    s.list.server_counts = list.counts.is_some();
                    s.list.counts = list
                        .counts
                        .unwrap_or_else(|| ConversationCounts::from_conversations(&rows));
                    s.list.conversations = rows;
                    s.list.loaded = true;
                    if !silent {
                        s.list.loading = false;
                        s.list.banner = None;
                    }
                    Some((s.list.conversations.clone(), s.list.counts))
                });
                match applied {
                    Some((rows, counts)) => {
                        self.shared.emit(InboxEvent::ListUpdated {
                            total: counts.total,
                            unread: counts.unread,
                            important: counts.important,
                        });
                        Ok(rows)
                    }
                    None => Ok(list.conversations),
                }
            }
            Err(e) if silent => {
                debug!("Background list refresh failed: {e}");
                Err(e)
            }
            Err(e) => {
                error!("Failed to load conversations: {e}");
                let message = e.user_message();
                self.shared.with(|s| {
                    s.list.loading = false;
                    s.list.banner = Some(message.clone());
                });
                self.shared.emit(InboxEvent::ListError { message });
                Err(e)
            }
        }
    }

    /// Flips the important flag optimistically, then settles on the server's
    /// answer or rolls back.
    pub async fn toggle_important(&self, conversation_id: &str) -> Result<bool, AppError> {
        let previous = self
            .shared
            .with(|s| {
                let previous = current_flag(s, conversation_id)?;
                set_flag(s, conversation_id, !previous);
                s.list.important_error = None;
                Some(previous)
            })
            .ok_or_else(|| AppError::ConversationNotFound { id: conversation_id.to_string() })?;

        match bounded(self.timeout, self.gateway.toggle_important(conversation_id)).await {
            Ok(flag) => {
                self.shared.with(|s| set_flag(s, conversation_id, flag));
                self.shared.emit(InboxEvent::ImportantToggled {
                    conversation_id: conversation_id.to_string(),
                    is_important: flag,
                });
                Ok(flag)
            }
            Err(e) => {
                warn!("Failed to toggle important on {conversation_id}: {e}");
                self.shared.with(|s| {
                    set_flag(s, conversation_id, previous);
                    s.list.important_error = Some((conversation_id.to_string(), e.user_message()));
                });
                Err(e)
            }
        }
    }
}

fn current_flag(s: &InboxState, conversation_id: &str) -> Option<bool> {
    s.list
        .get(conversation_id)
        .or_else(|| s.active_conversation().filter(|c| c.id == conversation_id))
        .map(|c| c.is_important)
}

fn set_flag(s: &mut InboxState, conversation_id: &str, flag: bool) {
    s.list.set_important(conversation_id, flag);
    if let Selection::Conversation(active) = &mut s.selection {
        if active.id == conversation_id {
            active.is_important = flag;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::gateway::wire::parse_timestamp;
    use crate::models::Participant;

    fn conv(id: &str, last: Option<&str>, created: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            reference: None,
            participant: Participant::Visitor { name: Some(format!("Visitor {id}")), is_anonymous: false },
            is_important: false,
            unread_count: 0,
            last_message_snapshot: None,
            last_message_at: last.and_then(parse_timestamp),
            created_at: parse_timestamp(created).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            messages: Vec::new(),
        }
    }

    fn ids(list: &[Conversation]) -> Vec<&str> {
        list.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn newest_activity_first() {
        let a = conv("a", Some("2024-01-02T10:00:00Z"), "2024-01-01T00:00:00Z");
        let b = conv("b", Some("2024-01-03T09:00:00Z"), "2024-01-01T00:00:00Z");
        let sorted = sort_conversations(&[], vec![a, b]);
        assert_eq!(ids(&sorted), vec!["b", "a"]);
    }

    #[test]
    fn falls_back_to_creation_time() {
        let a = conv("a", None, "2024-02-01T00:00:00Z");
        let b = conv("b", Some("2024-01-15T00:00:00Z"), "2024-01-01T00:00:00Z");
        assert_eq!(ids(&sort_conversations(&[], vec![b, a])), vec!["a", "b"]);
    }

    #[test]
    fn ties_keep_prior_relative_order() {
        let ts = Some("2024-01-02T10:00:00Z");
        let prior = vec![conv("y", ts, "2024-01-01T00:00:00Z"), conv("x", ts, "2024-01-01T00:00:00Z")];
        let incoming = vec![conv("x", ts, "2024-01-01T00:00:00Z"), conv("y", ts, "2024-01-01T00:00:00Z")];
        assert_eq!(ids(&sort_conversations(&prior, incoming)), vec!["y", "x"]);
    }

    #[test]
    fn search_matches_name_reference_and_preview() {
        let mut with_ref = conv("a", None, "2024-01-01T00:00:00Z");
        with_ref.reference = Some("DOS-2024-001".to_string());
        let mut with_preview = conv("b", None, "2024-01-01T00:00:00Z");
        with_preview.last_message_snapshot = Some("Question about enrolment".to_string());
        let mut state = ListState { conversations: vec![with_ref, with_preview], ..ListState::default() };

        state.search = "dos-2024".to_string();
        assert_eq!(state.visible().len(), 1);
        state.search = "ENROL".to_string();
        assert_eq!(state.visible()[0].id, "b");
        state.search = "  ".to_string();
        assert_eq!(state.visible().len(), 2);
    }

    #[test]
    fn upsert_keeps_one_row_per_reference() {
        let mut old = conv("old", Some("2024-01-01T00:00:00Z"), "2024-01-01T00:00:00Z");
        old.reference = Some("DOS-1".to_string());
        let mut new = conv("new", Some("2024-01-05T00:00:00Z"), "2024-01-05T00:00:00Z");
        new.reference = Some("DOS-1".to_string());
        let mut state = ListState { conversations: vec![old], ..ListState::default() };
        state.upsert(new);
        assert_eq!(ids(&state.conversations), vec!["new"]);
        assert_eq!(state.counts.total, 1);
    }

    #[test]
    fn server_counters_are_adjusted_not_rebuilt() {
        let mut unread = conv("a", Some("2024-01-02T10:00:00Z"), "2024-01-01T00:00:00Z");
        unread.unread_count = 2;
        unread.is_important = true;
        let mut state = ListState {
            conversations: vec![unread],
            counts: ConversationCounts { total: 50, unread: 10, important: 5 },
            server_counts: true,
            ..ListState::default()
        };

        state.clear_unread("a");
        state.clear_unread("a");
        assert_eq!(state.counts, ConversationCounts { total: 50, unread: 9, important: 5 });

        state.set_important("a", false);
        assert_eq!(state.counts.important, 4);

        let mut created = conv("b", Some("2024-01-05T00:00:00Z"), "2024-01-05T00:00:00Z");
        created.reference = Some("DOS-9".to_string());
        state.upsert(created);
        assert_eq!(state.counts, ConversationCounts { total: 51, unread: 9, important: 4 });
        assert_eq!(ids(&state.conversations), vec!["b", "a"]);
    }

    #[test]
    fn local_counters_follow_the_rows() {
        let mut state = ListState {
            conversations: vec![conv("a", None, "2024-01-01T00:00:00Z")],
            ..ListState::default()
        };
        state.set_important("a", true);
        assert_eq!(state.counts, ConversationCounts { total: 1, unread: 0, important: 1 });
    }
}
