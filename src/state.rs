//! Shared inbox state and the event channel the host UI listens on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::compose::ComposerState;
use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::gallery::GalleryNavigator;
use crate::models::{Conversation, Message, MessageId, PendingShell, PresenceRecord};
use crate::sync::list::ListState;

/// Events published to the host UI.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxEvent {
    ListUpdated { total: usize, unread: usize, important: usize },
    ListError { message: String },
    ConversationUpdated { conversation_id: String },
    DetailError { conversation_id: String, message: String },
    NewMessages { conversation_id: String, count: usize },
    MessageSent { conversation_id: String, message_id: String },
    SendFailed { conversation_id: Option<String>, message: String },
    UploadProgress { message_id: String, percent: u8 },
    PresenceUpdated { conversation_id: String, is_online: bool },
    ImportantToggled { conversation_id: String, is_important: bool },
    ShellCreated { reference: String },
    ShellPromoted { reference: String, conversation_id: String },
    FullScreenRequested { conversation_id: Option<String> },
}

/// What the inbox currently has open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    #[default]
    None,
    Conversation(Conversation),
    Pending(PendingShell),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewState {
    pub open: bool,
    pub minimized: bool,
    pub list_visible: bool,
    pub full_screen: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InboxState {
    pub list: ListState,
    pub selection: Selection,
    pub composer: ComposerState,
    pub presence: Option<PresenceRecord>,
    #[serde(skip)]
    pub gallery: Option<GalleryNavigator>,
    pub detail_loading: bool,
    pub detail_error: Option<String>,
    /// Deep link waiting for the first list load.
    pub deferred_link: Option<String>,
    pub view: ViewState,
    /// Text whose send failed after its conversation was closed, keyed by
    /// [`selection_key`]. Handed back when that conversation is reopened.
    #[serde(skip)]
    pub unsent: HashMap<String, UnsentText>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsentText {
    pub text: String,
    pub error: String,
}

pub fn selection_key(conversation_id: Option<&str>, reference: Option<&str>) -> Option<String> {
    match (conversation_id, reference) {
        (Some(id), _) => Some(format!("conversation:{id}")),
        (None, Some(reference)) => Some(format!("reference:{reference}")),
        (None, None) => None,
    }
}

impl InboxState {
    pub fn active_conversation_id(&self) -> Option<&str> {
        match &self.selection {
            Selection::Conversation(c) => Some(c.id.as_str()),
            _ => None,
        }
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        match &self.selection {
            Selection::Conversation(c) => Some(c),
            _ => None,
        }
    }

    pub fn pending_reference(&self) -> Option<&str> {
        match &self.selection {
            Selection::Pending(shell) => Some(shell.reference.as_str()),
            _ => None,
        }
    }

    /// Messages of whatever is open, conversation or shell.
    pub fn messages(&self) -> &[Message] {
        match &self.selection {
            Selection::Conversation(c) => &c.messages,
            Selection::Pending(shell) => &shell.messages,
            Selection::None => &[],
        }
    }

    pub fn messages_mut(&mut self) -> Option<&mut Vec<Message>> {
        match &mut self.selection {
            Selection::Conversation(c) => Some(&mut c.messages),
            Selection::Pending(shell) => Some(&mut shell.messages),
            Selection::None => None,
        }
    }

    pub fn find_message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages_mut()?.iter_mut().find(|m| &m.id == id)
    }

    fn active_key(&self) -> Option<String> {
        selection_key(self.active_conversation_id(), self.pending_reference())
    }

    /// Puts failed text back into the composer without losing what the
    /// operator typed meanwhile.
    pub fn give_back_draft(&mut self, text: String) {
        self.composer.draft = if self.composer.draft.trim().is_empty() {
            text
        } else {
            format!("{text}\n{}", self.composer.draft)
        };
    }

    /// Hands back text that failed to send while another conversation was open.
    pub fn restore_unsent(&mut self) {
        let Some(key) = self.active_key() else {
            return;
        };
        if let Some(unsent) = self.unsent.remove(&key) {
            self.give_back_draft(unsent.text);
            self.composer.error = Some(unsent.error);
        }
    }

    /// Drops everything tied to the open conversation.
    pub fn clear_selection(&mut self) {
        self.selection = Selection::None;
        self.presence = None;
        self.gallery = None;
        self.detail_loading = false;
        self.detail_error = None;
        self.composer.reset();
    }
}

/// Inbox state plus its event channel. Cloning shares both.
///
/// The lock is only ever taken inside [`SharedState::with`], never across an
/// `.await`.
#[derive(Clone)]
pub struct SharedState {
    state: Arc<Mutex<InboxState>>,
    events: broadcast::Sender<InboxEvent>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { state: Arc::new(Mutex::new(InboxState::default())), events }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut InboxState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn snapshot(&self) -> InboxState {
        self.state.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: InboxEvent) {
        // No receivers is fine; the host may only read snapshots.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsent_text_waits_for_its_own_conversation() {
        let mut state = InboxState::default();
        state.unsent.insert(
            "reference:DOS-3".to_string(),
            UnsentText { text: "Bonjour".to_string(), error: "Network unavailable, please retry".to_string() },
        );

        state.selection = Selection::Pending(PendingShell::new("DOS-4"));
        state.restore_unsent();
        assert!(state.composer.draft.is_empty());

        state.selection = Selection::Pending(PendingShell::new("DOS-3"));
        state.composer.draft = "merci".to_string();
        state.restore_unsent();
        assert_eq!(state.composer.draft, "Bonjour\nmerci");
        assert!(state.composer.error.is_some());
        assert!(state.unsent.is_empty());
    }
}
