//! Optimistic message delivery: text, attachments, and the first message of
//! a deep-linked conversation.

pub mod attachment;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::errors::AppError;
use crate::gateway::{bounded, Gateway, LocalFile, ProgressFn};
use crate::models::{AttachmentMetadata, Conversation, Message, MessageId};
use crate::state::{selection_key, InboxEvent, InboxState, Selection, SharedState, UnsentText};

pub use attachment::{AttachmentDraft, Preview};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposerMode {
    #[default]
    Reply,
    /// The next text send creates the conversation for a pending shell.
    NewConversation,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComposerState {
    pub draft: String,
    pub mode: ComposerMode,
    /// Inline error for the last failed text send.
    pub error: Option<String>,
    /// Validated file waiting for confirmation.
    pub attachment: Option<AttachmentDraft>,
    pub attachment_error: Option<String>,
}

impl ComposerState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent(Message),
    /// A pending shell became a real conversation. `selected` is false if the
    /// user had already moved away from the shell.
    Created { conversation: Conversation, selected: bool },
}

/// Where a send attempt was aimed; used to check it is still on screen
/// before touching state.
enum Target {
    Conversation(String),
    Shell(String),
}

impl Target {
    fn is_current(&self, s: &InboxState) -> bool {
        match self {
            Target::Conversation(id) => s.active_conversation_id() == Some(id.as_str()),
            Target::Shell(reference) => s.pending_reference() == Some(reference.as_str()),
        }
    }

    fn conversation_id(&self) -> Option<String> {
        match self {
            Target::Conversation(id) => Some(id.clone()),
            Target::Shell(_) => None,
        }
    }

    fn key(&self) -> Option<String> {
        match self {
            Target::Conversation(id) => selection_key(Some(id), None),
            Target::Shell(reference) => selection_key(None, Some(reference)),
        }
    }
}

/// Swaps an optimistic entry for its confirmed record, keeping its position.
/// If a refresh already delivered the confirmed record, the optimistic entry
/// is dropped instead so the message never shows twice.
pub fn settle(messages: &mut Vec<Message>, slot: &MessageId, confirmed: Message) {
    let already_present = messages.iter().any(|m| m.id == confirmed.id);
    let position = messages.iter().position(|m| &m.id == slot);
    match (position, already_present) {
        (Some(index), false) => messages[index] = confirmed,
        (Some(index), true) => {
            messages.remove(index);
        }
        (None, false) => messages.push(confirmed),
        (None, true) => {}
    }
}

#[derive(Clone)]
pub struct Composer {
    gateway: Arc<dyn Gateway>,
    shared: SharedState,
    timeout: Duration,
    upload_timeout: Duration,
    max_attachment_bytes: u64,
}

impl Composer {
    pub fn new(gateway: Arc<dyn Gateway>, shared: SharedState, config: &SyncConfig) -> Self {
        Self {
            gateway,
            shared,
            timeout: config.request_timeout,
            upload_timeout: config.upload_timeout,
            max_attachment_bytes: config.max_attachment_bytes,
        }
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.shared.with(|s| {
            s.composer.draft = text;
            s.composer.error = None;
        });
    }

    /// Sends the draft. The optimistic entry is appended right away and the
    /// draft cleared; on failure the entry is removed and the draft restored.
    pub async fn send_text(&self) -> Result<SendOutcome, AppError> {
        let (target, slot, text, draft) = self.shared.with(|s| {
            let text = s.composer.draft.trim().to_string();
            if text.is_empty() {
                return Err(AppError::EmptyField { field_name: "message".to_string() });
            }
            let target = match &s.selection {
                Selection::Conversation(c) => Target::Conversation(c.id.clone()),
                // Only one creation attempt per shell at a time.
                Selection::Pending(shell) if shell.messages.iter().any(Message::is_pending) => {
                    return Err(AppError::ConversationRequired);
                }
                Selection::Pending(shell) => Target::Shell(shell.reference.clone()),
                Selection::None => return Err(AppError::NoSelection),
            };
            let optimistic =
                Message::pending_text(target.conversation_id().unwrap_or_default(), text.clone());
            let slot = optimistic.id.clone();
            if let Some(messages) = s.messages_mut() {
                messages.push(optimistic);
            }
            let draft = std::mem::take(&mut s.composer.draft);
            s.composer.error = None;
            Ok((target, slot, text, draft))
        })?;

        if let Some(id) = target.conversation_id() {
            self.shared.emit(InboxEvent::ConversationUpdated { conversation_id: id });
        }

        match &target {
            Target::Conversation(id) => {
                match bounded(self.timeout, self.gateway.send_text(id, &text)).await {
                    Ok(message) => {
                        self.shared.with(|s| {
                            if target.is_current(s) {
                                if let Some(messages) = s.messages_mut() {
                                    settle(messages, &slot, message.clone());
                                }
                            }
                            s.list.touch(id, &message);
                        });
                        self.shared.emit(InboxEvent::MessageSent {
                            conversation_id: id.clone(),
                            message_id: message.id.to_string(),
                        });
                        Ok(SendOutcome::Sent(message))
                    }
                    Err(e) => {
                        self.roll_back_text(&target, &slot, draft, &e);
                        Err(e)
                    }
                }
            }
            Target::Shell(reference) => {
                match bounded(self.timeout, self.gateway.create_from_reference(reference, &text)).await {
                    Ok(mut conversation) => {
                        if conversation.reference.is_none() {
                            conversation.reference = Some(reference.clone());
                        }
                        let selected = self.shared.with(|s| {
                            let selected = target.is_current(s);
                            if selected {
                                s.selection = Selection::Conversation(conversation.clone());
                                s.composer.mode = ComposerMode::Reply;
                            }
                            s.list.upsert(conversation.clone());
                            selected
                        });
                        info!("Conversation {} created for {reference}", conversation.id);
                        self.shared.emit(InboxEvent::ShellPromoted {
                            reference: reference.clone(),
                            conversation_id: conversation.id.clone(),
                        });
                        Ok(SendOutcome::Created { conversation, selected })
                    }
                    Err(e) => {
                        self.roll_back_text(&target, &slot, draft, &e);
                        Err(e)
                    }
                }
            }
        }
    }

    fn roll_back_text(&self, target: &Target, slot: &MessageId, draft: String, e: &AppError) {
        error!("Failed to send message: {e}");
        let message = e.user_message();
        self.shared.with(|s| {
            if target.is_current(s) {
                if let Some(messages) = s.messages_mut() {
                    messages.retain(|m| &m.id != slot);
                }
                s.give_back_draft(draft);
                s.composer.error = Some(message.clone());
                return;
            }
            let Some(key) = target.key() else {
                return;
            };
            let unsent = s.unsent.entry(key).or_insert_with(|| UnsentText {
                text: String::new(),
                error: message.clone(),
            });
            unsent.text = if unsent.text.is_empty() { draft } else { format!("{}\n{draft}", unsent.text) };
            unsent.error = message.clone();
        });
        self.shared.emit(InboxEvent::SendFailed { conversation_id: target.conversation_id(), message });
    }

    /// Validates a picked file and keeps it, with its preview, until the user
    /// confirms. A rejected file leaves nothing selected.
    pub fn pick_attachment(&self, file: LocalFile) -> Result<(), AppError> {
        let prepared = AttachmentDraft::prepare(file, self.max_attachment_bytes);
        self.shared.with(|s| match prepared {
            Ok(draft) => {
                s.composer.attachment = Some(draft);
                s.composer.attachment_error = None;
                Ok(())
            }
            Err(e) => {
                s.composer.attachment = None;
                s.composer.attachment_error = Some(e.user_message());
                Err(e)
            }
        })
    }

    pub fn clear_attachment(&self) {
        self.shared.with(|s| {
            s.composer.attachment = None;
            s.composer.attachment_error = None;
        });
    }

    /// Uploads the confirmed attachment. Requires a real conversation.
    /// On failure the optimistic entry goes away and the picker gets the same
    /// file and preview back for a retry.
    pub async fn send_attachment(&self) -> Result<Message, AppError> {
        let prepared = self.shared.with(|s| {
            let conversation_id = match &s.selection {
                Selection::Conversation(c) => c.id.clone(),
                Selection::Pending(_) => return Err(AppError::ConversationRequired),
                Selection::None => return Err(AppError::NoSelection),
            };
            let draft = s
                .composer
                .attachment
                .take()
                .ok_or_else(|| AppError::EmptyField { field_name: "attachment".to_string() })?;
            let optimistic = Message::pending_upload(
                conversation_id.clone(),
                AttachmentMetadata {
                    name: draft.name.clone(),
                    size: draft.file.size(),
                    category: draft.kind,
                    remote_id: String::new(),
                },
            );
            let slot = optimistic.id.clone();
            if let Some(messages) = s.messages_mut() {
                messages.push(optimistic);
            }
            s.composer.attachment_error = None;
            Ok((conversation_id, draft, slot))
        });
        let (conversation_id, draft, slot) = prepared.inspect_err(|e| {
            self.shared.with(|s| s.composer.attachment_error = Some(e.user_message()));
        })?;
        let target = Target::Conversation(conversation_id.clone());
        self.shared.emit(InboxEvent::ConversationUpdated { conversation_id: conversation_id.clone() });

        let upload = self.gateway.upload_attachment(
            &conversation_id,
            draft.file.clone(),
            draft.kind,
            self.progress_sink(slot.clone()),
        );
        match bounded(self.upload_timeout, upload).await {
            Ok(message) => {
                self.shared.with(|s| {
                    if target.is_current(s) {
                        if let Some(messages) = s.messages_mut() {
                            settle(messages, &slot, message.clone());
                        }
                    }
                    s.list.touch(&conversation_id, &message);
                });
                self.shared.emit(InboxEvent::MessageSent {
                    conversation_id,
                    message_id: message.id.to_string(),
                });
                Ok(message)
            }
            Err(e) => {
                error!("Failed to upload {}: {e}", draft.name);
                let message = e.user_message();
                self.shared.with(|s| {
                    if !target.is_current(s) {
                        return;
                    }
                    if let Some(messages) = s.messages_mut() {
                        messages.retain(|m| m.id != slot);
                    }
                    if s.composer.attachment.is_none() {
                        s.composer.attachment = Some(draft);
                    }
                    s.composer.attachment_error = Some(message.clone());
                });
                self.shared.emit(InboxEvent::SendFailed {
                    conversation_id: Some(conversation_id),
                    message,
                });
                Err(e)
            }
        }
    }

    /// Progress callback for one upload. Values are clamped to 100 and never
    /// go backwards.
    fn progress_sink(&self, slot: MessageId) -> ProgressFn {
        let shared = self.shared.clone();
        Arc::new(move |percent| {
            let reported = shared.with(|s| {
                let message = s.find_message_mut(&slot)?;
                let next = message.upload_progress.unwrap_or(0).max(percent.min(100));
                if message.upload_progress == Some(next) {
                    return None;
                }
                message.upload_progress = Some(next);
                Some(next)
            });
            if let Some(percent) = reported {
                shared.emit(InboxEvent::UploadProgress { message_id: slot.to_string(), percent });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{DeliveryStatus, MessageType, SenderRole};

    fn server(id: &str) -> Message {
        Message {
            id: MessageId::Confirmed(id.to_string()),
            conversation_id: "c1".into(),
            sender: SenderRole::Support,
            kind: MessageType::Text,
            content: Some("hello".into()),
            attachment: None,
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            upload_progress: None,
        }
    }

    #[test]
    fn settle_replaces_in_place() {
        let optimistic = Message::pending_text("c1".into(), "hello".into());
        let slot = optimistic.id.clone();
        let trailing = Message::pending_text("c1".into(), "second".into());
        let mut messages = vec![server("0"), optimistic, trailing.clone()];
        settle(&mut messages, &slot, server("1"));
        assert_eq!(messages[1].id, MessageId::Confirmed("1".into()));
        assert_eq!(messages[2], trailing);
    }

    #[test]
    fn settle_drops_slot_when_refresh_won_the_race() {
        let optimistic = Message::pending_text("c1".into(), "hello".into());
        let slot = optimistic.id.clone();
        let mut messages = vec![server("1"), optimistic];
        settle(&mut messages, &slot, server("1"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, MessageId::Confirmed("1".into()));
    }
}
