//! Scripted in-memory backend for driving the engine in tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use console_chat_sync::gateway::{Gateway, LocalFile, ProgressFn};
use console_chat_sync::models::{
    AttachmentMetadata, Conversation, ConversationCounts, ConversationFilter, ConversationList, DeliveryStatus,
    Message, MessageId, MessageType, Participant, PresenceRecord, SenderRole,
};
use console_chat_sync::{AppError, ChatEngine, SyncConfig};

#[derive(Default)]
pub struct MockGateway {
    /// Server-side truth, messages included.
    pub conversations: Mutex<Vec<Conversation>>,
    /// Operations that fail with a transport error until removed.
    pub failing: Mutex<HashSet<&'static str>>,
    /// Artificial latency for `get_conversation`, per conversation id.
    pub detail_delays: Mutex<HashMap<String, Duration>>,
    pub upload_delay: Mutex<Duration>,
    pub send_delay: Mutex<Duration>,
    /// Counters reported with the list, when the backend supplies them.
    pub counts: Mutex<Option<ConversationCounts>>,
    pub presence: Mutex<Option<PresenceRecord>>,
    pub calls: Mutex<Vec<&'static str>>,
    next_id: AtomicU64,
}

impl MockGateway {
    pub fn with(conversations: Vec<Conversation>) -> Arc<Self> {
        let gateway = Self::default();
        *gateway.conversations.lock() = conversations;
        Arc::new(gateway)
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        self.failing.lock().remove(op);
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == op).count()
    }

    /// Appends a message on the server side, as if the visitor wrote it.
    pub fn push_visitor_message(&self, conversation_id: &str, content: &str) {
        let id = self.next_message_id();
        let mut conversations = self.conversations.lock();
        if let Some(c) = conversations.iter_mut().find(|c| c.id == conversation_id) {
            let message = text(&id, conversation_id, SenderRole::Visitor, content, Utc::now());
            c.last_message_snapshot = Some(content.to_string());
            c.last_message_at = Some(message.created_at);
            c.messages.push(message);
        }
    }

    fn enter(&self, op: &'static str) -> Result<(), AppError> {
        self.calls.lock().push(op);
        if self.failing.lock().contains(op) {
            return Err(AppError::transport("connect", format!("{op} unreachable")));
        }
        Ok(())
    }

    fn next_message_id(&self) -> String {
        format!("srv-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn store_message(&self, conversation_id: &str, message: Message) -> Result<Message, AppError> {
        let mut conversations = self.conversations.lock();
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| AppError::Backend { status: 404, message: "Conversation not found".into() })?;
        conversation.last_message_snapshot = Some(message.preview());
        conversation.last_message_at = Some(message.created_at);
        conversation.messages.push(message.clone());
        Ok(message)
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn list_conversations(&self, filter: ConversationFilter) -> Result<ConversationList, AppError> {
        self.enter("list")?;
        let conversations = self
            .conversations
            .lock()
            .iter()
            .filter(|c| match filter {
                ConversationFilter::All => true,
                ConversationFilter::Unread => c.unread_count > 0,
                ConversationFilter::Important => c.is_important,
            })
            .map(|c| Conversation { messages: Vec::new(), ..c.clone() })
            .collect();
        Ok(ConversationList { conversations, counts: *self.counts.lock() })
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, AppError> {
        self.enter("detail")?;
        let delay = self.detail_delays.lock().get(conversation_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.conversations
            .lock()
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(|| AppError::Backend { status: 404, message: "Conversation not found".into() })
    }

    async fn send_text(&self, conversation_id: &str, text_body: &str) -> Result<Message, AppError> {
        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.enter("send_text")?;
        let message = text(&self.next_message_id(), conversation_id, SenderRole::Support, text_body, Utc::now());
        self.store_message(conversation_id, message)
    }

    async fn upload_attachment(
        &self,
        conversation_id: &str,
        file: LocalFile,
        kind: MessageType,
        progress: ProgressFn,
    ) -> Result<Message, AppError> {
        self.enter("upload")?;
        let delay = *self.upload_delay.lock();
        for percent in [10u8, 55, 40, 100] {
            tokio::time::sleep(delay / 4).await;
            progress(percent);
        }
        let id = self.next_message_id();
        let message = Message {
            id: MessageId::Confirmed(id.clone()),
            conversation_id: conversation_id.to_string(),
            sender: SenderRole::Support,
            kind,
            content: None,
            attachment: Some(AttachmentMetadata {
                name: file.name.clone(),
                size: file.size(),
                category: kind,
                remote_id: format!("att-{id}"),
            }),
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            upload_progress: None,
        };
        self.store_message(conversation_id, message)
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<(), AppError> {
        self.enter("mark_read")?;
        if let Some(c) = self.conversations.lock().iter_mut().find(|c| c.id == conversation_id) {
            c.unread_count = 0;
        }
        Ok(())
    }

    async fn toggle_important(&self, conversation_id: &str) -> Result<bool, AppError> {
        self.enter("important")?;
        let mut conversations = self.conversations.lock();
        let c = conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| AppError::Backend { status: 404, message: "Conversation not found".into() })?;
        c.is_important = !c.is_important;
        Ok(c.is_important)
    }

    async fn presence(&self, _conversation_id: &str) -> Result<PresenceRecord, AppError> {
        self.enter("presence")?;
        Ok(self.presence.lock().clone().unwrap_or(PresenceRecord { is_online: false, last_seen: None }))
    }

    async fn create_from_reference(&self, reference: &str, text_body: &str) -> Result<Conversation, AppError> {
        self.enter("create")?;
        let conversation_id = format!("conv-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let first = text(&self.next_message_id(), &conversation_id, SenderRole::Support, text_body, Utc::now());
        let mut created = conversation(&conversation_id, Some(reference), None);
        created.last_message_snapshot = Some(text_body.to_string());
        created.last_message_at = Some(first.created_at);
        created.messages.push(first);
        self.conversations.lock().push(created.clone());
        Ok(created)
    }

    fn resolve_attachment_url(&self, remote_id: &str) -> Option<String> {
        (!remote_id.is_empty()).then(|| format!("https://files.test/{remote_id}"))
    }
}

pub fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).expect("valid timestamp").with_timezone(&Utc)
}

pub fn conversation(id: &str, reference: Option<&str>, last_message_at: Option<&str>) -> Conversation {
    Conversation {
        id: id.to_string(),
        reference: reference.map(str::to_string),
        participant: Participant::Visitor { name: Some(format!("Visitor {id}")), is_anonymous: false },
        is_important: false,
        unread_count: 0,
        last_message_snapshot: None,
        last_message_at: last_message_at.map(ts),
        created_at: ts("2024-01-01T08:00:00Z"),
        messages: Vec::new(),
    }
}

pub fn text(id: &str, conversation_id: &str, sender: SenderRole, content: &str, at: DateTime<Utc>) -> Message {
    Message {
        id: MessageId::Confirmed(id.to_string()),
        conversation_id: conversation_id.to_string(),
        sender,
        kind: MessageType::Text,
        content: Some(content.to_string()),
        attachment: None,
        created_at: at,
        status: DeliveryStatus::Sent,
        upload_progress: None,
    }
}

/// A conversation with one visitor message, tied to a registry reference.
pub fn seeded(id: &str, reference: &str, last_message_at: &str) -> Conversation {
    let mut c = conversation(id, Some(reference), Some(last_message_at));
    c.messages.push(text(&format!("{id}-m1"), id, SenderRole::Visitor, "Hello", ts(last_message_at)));
    c.last_message_snapshot = Some("Hello".to_string());
    c.unread_count = 1;
    c
}

pub fn engine(gateway: Arc<MockGateway>) -> ChatEngine {
    ChatEngine::new(gateway, SyncConfig::default())
}
