use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

static NEXT_TEMPORARY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a message. Temporary ids live in their own id space and can
/// never compare equal to a server id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageId {
    Confirmed(String),
    Temporary(u64),
}

impl MessageId {
    /// Allocates the next temporary id for an optimistic send attempt.
    pub fn next_temporary() -> Self {
        MessageId::Temporary(NEXT_TEMPORARY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, MessageId::Temporary(_))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Confirmed(id) => f.write_str(id),
            MessageId::Temporary(n) => write!(f, "temp-{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Visitor,
    Support,
    Admin,
    /// Automated notices written by the backend itself.
    System,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::Visitor => "visitor",
            SenderRole::Support => "support",
            SenderRole::Admin => "admin",
            SenderRole::System => "system",
        }
    }

    /// True for messages written by the console side.
    pub fn is_staff(&self) -> bool {
        matches!(self, SenderRole::Support | SenderRole::Admin)
    }
}

impl TryFrom<&str> for SenderRole {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "visitor" | "user" | "client" => Ok(SenderRole::Visitor),
            "support" | "agent" => Ok(SenderRole::Support),
            "admin" => Ok(SenderRole::Admin),
            "system" | "bot" | "notice" => Ok(SenderRole::System),
            other => Err(format!("Unknown sender role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::File => "file",
        }
    }
}

impl TryFrom<&str> for MessageType {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "video" => Ok(MessageType::Video),
            "file" | "document" => Ok(MessageType::File),
            other => Err(format!("Unknown message type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    Uploading,
    Sent,
    Delivered,
    Read,
}

impl TryFrom<&str> for DeliveryStatus {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "sending" => Ok(DeliveryStatus::Sending),
            "uploading" => Ok(DeliveryStatus::Uploading),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" | "seen" => Ok(DeliveryStatus::Read),
            other => Err(format!("Unknown delivery status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub name: String,
    pub size: u64,
    pub category: MessageType,
    /// Opaque identifier, turned into a URL by the gateway at render time.
    pub remote_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Empty while the owning conversation is still a pending shell.
    pub conversation_id: String,
    pub sender: SenderRole,
    pub kind: MessageType,
    pub content: Option<String>,
    pub attachment: Option<AttachmentMetadata>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_progress: Option<u8>,
}

impl Message {
    /// Optimistic text message written by the console side.
    pub fn pending_text(conversation_id: String, content: String) -> Self {
        Self {
            id: MessageId::next_temporary(),
            conversation_id,
            sender: SenderRole::Support,
            kind: MessageType::Text,
            content: Some(content),
            attachment: None,
            created_at: Utc::now(),
            status: DeliveryStatus::Sending,
            upload_progress: None,
        }
    }

    /// Optimistic attachment message, shown while the upload runs.
    pub fn pending_upload(conversation_id: String, attachment: AttachmentMetadata) -> Self {
        Self {
            id: MessageId::next_temporary(),
            conversation_id,
            sender: SenderRole::Support,
            kind: attachment.category,
            content: None,
            attachment: Some(attachment),
            created_at: Utc::now(),
            status: DeliveryStatus::Uploading,
            upload_progress: Some(0),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_temporary()
    }

    /// One-line preview used for list rows.
    pub fn preview(&self) -> String {
        match (self.kind, &self.attachment) {
            (MessageType::Image, _) => "📷 Image".to_string(),
            (MessageType::Video, _) => "🎬 Video".to_string(),
            (MessageType::File, Some(att)) => format!("📎 {}", att.name),
            (MessageType::File, None) => "📎 File".to_string(),
            (MessageType::Text, _) => self.content.clone().unwrap_or_default(),
        }
    }
}

/// Who the console is talking to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Participant {
    Visitor { name: Option<String>, is_anonymous: bool },
    Staff { name: String, role_label: String },
}

impl Participant {
    pub fn display_name(&self) -> String {
        match self {
            Participant::Visitor { is_anonymous: true, .. } => "Anonymous visitor".to_string(),
            Participant::Visitor { name: Some(name), .. } => name.clone(),
            Participant::Visitor { name: None, .. } => "Visitor".to_string(),
            Participant::Staff { name, role_label } if role_label.is_empty() => name.clone(),
            Participant::Staff { name, role_label } => format!("{name} ({role_label})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub reference: Option<String>,
    pub participant: Participant,
    pub is_important: bool,
    pub unread_count: u32,
    /// Cached preview for list rows, never authoritative.
    pub last_message_snapshot: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Ascending by creation time; filled only once the conversation is opened.
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Stand-in shown while a conversation not present in the list loads.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reference: None,
            participant: Participant::Visitor { name: None, is_anonymous: false },
            is_important: false,
            unread_count: 0,
            last_message_snapshot: None,
            last_message_at: None,
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }

    /// Presence only makes sense when the counterpart is a visitor tied to a registry record.
    pub fn has_visitor_counterpart(&self) -> bool {
        self.reference.is_some()
    }
}

/// Client-only placeholder for a deep-linked reference with no conversation yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingShell {
    pub reference: String,
    pub messages: Vec<Message>,
}

impl PendingShell {
    pub fn new(reference: impl Into<String>) -> Self {
        Self { reference: reference.into(), messages: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceRecord {
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationFilter {
    #[default]
    All,
    Unread,
    Important,
}

impl ConversationFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationFilter::All => "all",
            ConversationFilter::Unread => "unread",
            ConversationFilter::Important => "important",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversationCounts {
    pub total: usize,
    pub unread: usize,
    pub important: usize,
}

impl ConversationCounts {
    pub fn from_conversations(conversations: &[Conversation]) -> Self {
        Self {
            total: conversations.len(),
            unread: conversations.iter().filter(|c| c.unread_count > 0).count(),
            important: conversations.iter().filter(|c| c.is_important).count(),
        }
    }
}

/// What the gateway returns for a list call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationList {
    pub conversations: Vec<Conversation>,
    /// Server-reported counters, when the backend provides them.
    pub counts: Option<ConversationCounts>,
}
