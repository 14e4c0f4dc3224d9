//! Upstream payload shapes and their normalisation into [`crate::models`].
//!
//! The backend is not consistent about field names (camelCase, snake_case,
//! all-lowercase, legacy names) or timestamp encodings. This is the only place
//! that knows about those variants; everything past this module sees the
//! single schema from `models.rs`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::errors::AppError;
use crate::models::{
    AttachmentMetadata, Conversation, ConversationCounts, ConversationList, DeliveryStatus,
    Message, MessageId, MessageType, Participant, PresenceRecord, SenderRole,
};

/// Numbers and strings both show up as ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    EpochMillis(i64),
}

impl RawTimestamp {
    pub fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::EpochMillis(ms) => DateTime::from_timestamp_millis(*ms),
            RawTimestamp::Text(raw) => parse_timestamp(raw),
        }
    }
}

/// Accepts RFC 3339 and the space-separated SQL form (assumed UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAttachment {
    #[serde(default, alias = "fileName", alias = "file_name", alias = "filename", alias = "originalName")]
    pub name: Option<String>,
    #[serde(default, alias = "fileSize", alias = "file_size", alias = "bytes")]
    pub size: Option<u64>,
    #[serde(default, alias = "mimeType", alias = "mime_type", alias = "contentType")]
    pub mime: Option<String>,
    #[serde(default, alias = "fileId", alias = "file_id", alias = "key", alias = "url", alias = "path")]
    pub id: Option<RawId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default, alias = "_id", alias = "messageId", alias = "message_id")]
    pub id: Option<RawId>,
    #[serde(default, alias = "conversationId", alias = "conversation")]
    pub conversation_id: Option<RawId>,
    #[serde(default, alias = "senderRole", alias = "sender_role", alias = "senderType", alias = "role")]
    pub sender: Option<String>,
    #[serde(default, rename = "type", alias = "messageType", alias = "message_type", alias = "kind")]
    pub kind: Option<String>,
    #[serde(default, alias = "text", alias = "body")]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment: Option<RawAttachment>,
    #[serde(default, alias = "fileName")]
    pub file_name: Option<String>,
    #[serde(default, alias = "fileSize")]
    pub file_size: Option<u64>,
    #[serde(default, alias = "fileId", alias = "fileUrl", alias = "file_url")]
    pub file_id: Option<RawId>,
    #[serde(default, alias = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(
        default,
        alias = "createdAt",
        alias = "createdat",
        alias = "timestamp",
        alias = "sentAt",
        alias = "date"
    )]
    pub created_at: Option<RawTimestamp>,
    #[serde(default, alias = "deliveryStatus")]
    pub status: Option<String>,
    #[serde(default, alias = "isRead")]
    pub is_read: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStaff {
    #[serde(default, alias = "fullName", alias = "username")]
    pub name: Option<String>,
    #[serde(default, alias = "roleLabel", alias = "role_label")]
    pub role: Option<String>,
}

/// The preview arrives either as plain text or as a full message object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSnapshot {
    Text(String),
    Message(Box<RawMessage>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawConversation {
    #[serde(alias = "_id", alias = "conversationId")]
    pub id: RawId,
    #[serde(default, alias = "referenceCode", alias = "reference_code", alias = "ref")]
    pub reference: Option<String>,
    #[serde(default, alias = "visitorName", alias = "visitor_name", alias = "name")]
    pub visitor_name: Option<String>,
    #[serde(default, alias = "isAnonymous", alias = "anonymous")]
    pub is_anonymous: Option<bool>,
    #[serde(default, alias = "participant", alias = "staff")]
    pub user: Option<RawStaff>,
    #[serde(default, alias = "isImportant", alias = "important")]
    pub is_important: Option<bool>,
    #[serde(default, alias = "unreadCount", alias = "unread")]
    pub unread_count: Option<u32>,
    #[serde(default, alias = "lastMessage", alias = "lastMessageSnapshot", alias = "last_message_snapshot")]
    pub last_message: Option<RawSnapshot>,
    #[serde(default, alias = "lastMessageAt", alias = "lastmessageat", alias = "updatedAt", alias = "updated_at")]
    pub last_message_at: Option<RawTimestamp>,
    #[serde(default, alias = "createdAt", alias = "createdat")]
    pub created_at: Option<RawTimestamp>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCounts {
    #[serde(default, alias = "all")]
    pub total: Option<usize>,
    #[serde(default, alias = "unreadCount", alias = "unread_count")]
    pub unread: Option<usize>,
    #[serde(default, alias = "importantCount", alias = "important_count")]
    pub important: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawConversationList {
    Wrapped {
        #[serde(alias = "items", alias = "results", alias = "data")]
        conversations: Vec<RawConversation>,
        #[serde(default, alias = "stats", alias = "counters")]
        counts: Option<RawCounts>,
    },
    Bare(Vec<RawConversation>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPresence {
    #[serde(default, alias = "isOnline", alias = "online")]
    pub is_online: Option<bool>,
    #[serde(default, alias = "lastSeen", alias = "lastSeenAt", alias = "last_seen_at")]
    pub last_seen: Option<RawTimestamp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawImportant {
    Flag(bool),
    Object {
        #[serde(alias = "isImportant", alias = "important")]
        is_important: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCreated {
    WithMessage { conversation: RawConversation, message: Option<RawMessage> },
    Plain(RawConversation),
}

/// Many endpoints wrap their payload as `{ "success": true, "data": … }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Data { data: T },
    Plain(T),
}

impl<T> Envelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Envelope::Data { data } => data,
            Envelope::Plain(inner) => inner,
        }
    }
}

/// Decodes a response body, unwrapping the optional `data` envelope.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice::<Envelope<T>>(body)
        .map(Envelope::into_inner)
        .map_err(|e| AppError::Decode(e.to_string()))
}

// ── Normalisation ────────────────────────────────────────────────────────────

fn category_from_mime_or_name(mime: Option<&str>, name: &str) -> MessageType {
    let mime = mime.unwrap_or_default().to_lowercase();
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_lowercase()).unwrap_or_default();
    if mime.starts_with("image/") || matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "gif" | "webp") {
        MessageType::Image
    } else if mime.starts_with("video/") || matches!(ext.as_str(), "mp4" | "mov" | "avi" | "wmv") {
        MessageType::Video
    } else {
        MessageType::File
    }
}

impl RawMessage {
    pub fn normalize(self, fallback_conversation_id: &str) -> Result<Message, AppError> {
        let id = self
            .id
            .map(RawId::into_string)
            .ok_or_else(|| AppError::Decode("message without id".to_string()))?;
        let conversation_id = self
            .conversation_id
            .map(RawId::into_string)
            .unwrap_or_else(|| fallback_conversation_id.to_string());
        let sender = match self.sender.as_deref().map(SenderRole::try_from) {
            Some(Ok(role)) => role,
            Some(Err(e)) => {
                warn!("Message {id}: {e}, shown as a system notice");
                SenderRole::System
            }
            None => SenderRole::Visitor,
        };
        // An unknown type is ignored; the attachment, if any, decides the kind.
        let declared = match self.kind.as_deref().map(MessageType::try_from) {
            Some(Ok(kind)) => Some(kind),
            Some(Err(e)) => {
                warn!("Message {id}: {e}");
                None
            }
            None => None,
        };

        let attachment = match self.attachment {
            Some(raw) => Some((raw.name, raw.size, raw.mime, raw.id)),
            None if self.file_id.is_some() || self.file_name.is_some() => {
                Some((self.file_name, self.file_size, self.mime_type, self.file_id))
            }
            None => None,
        }
        .and_then(|(name, size, mime, remote)| {
            let remote_id = remote.map(RawId::into_string)?;
            let name = name.unwrap_or_else(|| {
                remote_id.rsplit('/').next().unwrap_or(&remote_id).to_string()
            });
            let category = match declared {
                Some(kind) if kind != MessageType::Text => kind,
                _ => category_from_mime_or_name(mime.as_deref(), &name),
            };
            Some(AttachmentMetadata { name, size: size.unwrap_or(0), category, remote_id })
        });

        // Non-text messages without a usable attachment degrade to text.
        let kind = attachment.as_ref().map(|att| att.category).unwrap_or(MessageType::Text);
        let content = if attachment.is_some() { None } else { self.content };

        let status = match (self.status.as_deref(), self.is_read) {
            (_, Some(true)) => DeliveryStatus::Read,
            (Some(raw), _) => DeliveryStatus::try_from(raw).unwrap_or(DeliveryStatus::Sent),
            (None, _) => DeliveryStatus::Sent,
        };

        Ok(Message {
            id: MessageId::Confirmed(id),
            conversation_id,
            sender,
            kind,
            content,
            attachment,
            created_at: self
                .created_at
                .and_then(|ts| ts.parse())
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            status,
            upload_progress: None,
        })
    }
}

impl RawConversation {
    pub fn normalize(self) -> Result<Conversation, AppError> {
        let id = self.id.into_string();

        let participant = match self.user {
            Some(staff) if staff.name.is_some() => Participant::Staff {
                name: staff.name.unwrap_or_default(),
                role_label: staff.role.unwrap_or_default(),
            },
            _ => Participant::Visitor {
                is_anonymous: self.is_anonymous.unwrap_or(self.visitor_name.is_none()),
                name: self.visitor_name,
            },
        };

        let mut messages = self
            .messages
            .into_iter()
            .map(|m| m.normalize(&id))
            .collect::<Result<Vec<_>, _>>()?;
        messages.sort_by_key(|m| m.created_at);

        let (snapshot_message, snapshot_text) = match self.last_message {
            Some(RawSnapshot::Message(raw)) => (Some((*raw).normalize(&id)?), None),
            Some(RawSnapshot::Text(text)) => (None, Some(text)),
            None => (None, None),
        };
        let last_message_snapshot = snapshot_message
            .as_ref()
            .map(Message::preview)
            .or(snapshot_text)
            .or_else(|| messages.last().map(Message::preview));

        let last_message_at = self
            .last_message_at
            .and_then(|ts| ts.parse())
            .or_else(|| snapshot_message.as_ref().map(|m| m.created_at))
            .or_else(|| messages.last().map(|m| m.created_at));
        let created_at = self
            .created_at
            .and_then(|ts| ts.parse())
            .or_else(|| messages.first().map(|m| m.created_at))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Ok(Conversation {
            id,
            reference: self.reference.filter(|r| !r.trim().is_empty()),
            participant,
            is_important: self.is_important.unwrap_or(false),
            unread_count: self.unread_count.unwrap_or(0),
            last_message_snapshot,
            last_message_at,
            created_at,
            messages,
        })
    }
}

impl RawConversationList {
    pub fn normalize(self) -> Result<ConversationList, AppError> {
        let (raw, counts) = match self {
            RawConversationList::Wrapped { conversations, counts } => (conversations, counts),
            RawConversationList::Bare(conversations) => (conversations, None),
        };
        let conversations = raw
            .into_iter()
            .map(RawConversation::normalize)
            .collect::<Result<Vec<_>, _>>()?;
        let local = ConversationCounts::from_conversations(&conversations);
        let counts = counts.map(|c| ConversationCounts {
            total: c.total.unwrap_or(local.total),
            unread: c.unread.unwrap_or(local.unread),
            important: c.important.unwrap_or(local.important),
        });
        Ok(ConversationList { conversations, counts })
    }
}

impl From<RawPresence> for PresenceRecord {
    fn from(raw: RawPresence) -> Self {
        PresenceRecord {
            is_online: raw.is_online.unwrap_or(false),
            last_seen: raw.last_seen.and_then(|ts| ts.parse()),
        }
    }
}

impl RawImportant {
    pub fn flag(&self) -> bool {
        match self {
            RawImportant::Flag(flag) => *flag,
            RawImportant::Object { is_important } => *is_important,
        }
    }
}

impl RawCreated {
    /// The returned conversation always carries the requested reference and
    /// includes the first message when the server sent it separately.
    pub fn normalize(self, reference: &str) -> Result<Conversation, AppError> {
        let (raw, message) = match self {
            RawCreated::WithMessage { conversation, message } => (conversation, message),
            RawCreated::Plain(conversation) => (conversation, None),
        };
        let mut conversation = raw.normalize()?;
        if conversation.reference.is_none() {
            conversation.reference = Some(reference.to_string());
        }
        if let Some(raw_message) = message {
            let message = raw_message.normalize(&conversation.id)?;
            if !conversation.messages.iter().any(|m| m.id == message.id) {
                conversation.last_message_snapshot = Some(message.preview());
                conversation.last_message_at = Some(message.created_at);
                conversation.messages.push(message);
            }
        }
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_heterogeneous_timestamp_field_names() {
        let body = br#"[
            {"id": 1, "lastmessageat": "2024-01-02T10:00:00Z", "createdAt": "2024-01-01 08:00:00"},
            {"_id": "b", "last_message_at": 1704272400000, "created_at": "2024-01-01T08:00:00Z"}
        ]"#;
        let list = decode::<RawConversationList>(body).unwrap().normalize().unwrap();
        assert_eq!(list.conversations[0].id, "1");
        assert_eq!(
            list.conversations[0].last_message_at,
            parse_timestamp("2024-01-02T10:00:00Z")
        );
        assert_eq!(
            list.conversations[1].last_message_at,
            parse_timestamp("2024-01-03T09:00:00Z")
        );
        assert!(list.counts.is_none());
    }

    #[test]
    fn unwraps_data_envelope_and_counts() {
        let body = br#"{"success": true, "data": {"conversations": [
            {"id": "c1", "unreadCount": 3, "isImportant": true, "reference": "DOS-1"}
        ], "stats": {"unread": 5}}}"#;
        let list = decode::<RawConversationList>(body).unwrap().normalize().unwrap();
        let counts = list.counts.unwrap();
        assert_eq!(counts.unread, 5);
        assert_eq!(counts.important, 1);
        assert_eq!(list.conversations[0].reference.as_deref(), Some("DOS-1"));
    }

    #[test]
    fn flat_file_fields_become_attachment() {
        let raw: RawMessage = serde_json::from_str(
            r#"{"id": "m1", "conversationId": "c1", "senderRole": "admin", "messageType": "file",
                "fileName": "report.pdf", "fileSize": 4194304, "fileUrl": "uploads/abc.pdf",
                "timestamp": "2024-03-01T12:00:00Z"}"#,
        )
        .unwrap();
        let msg = raw.normalize("ignored").unwrap();
        assert_eq!(msg.kind, MessageType::File);
        assert_eq!(msg.content, None);
        let att = msg.attachment.unwrap();
        assert_eq!(att.name, "report.pdf");
        assert_eq!(att.remote_id, "uploads/abc.pdf");
        assert_eq!(msg.sender, SenderRole::Admin);
    }

    #[test]
    fn image_without_attachment_degrades_to_text() {
        let raw: RawMessage =
            serde_json::from_str(r#"{"id": "m2", "type": "image", "content": "hi"}"#).unwrap();
        let msg = raw.normalize("c9").unwrap();
        assert_eq!(msg.kind, MessageType::Text);
        assert_eq!(msg.conversation_id, "c9");
        assert_eq!(msg.content.as_deref(), Some("hi"));
    }

    #[test]
    fn unknown_roles_and_types_do_not_sink_the_conversation() {
        let body = br#"{"data": {"id": "c1", "messages": [
            {"id": "m1", "senderRole": "visitor", "content": "Hello", "createdAt": "2024-01-02T10:00:00Z"},
            {"id": "m2", "senderRole": "system", "content": "Conversation transferred", "createdAt": "2024-01-02T10:01:00Z"},
            {"id": "m3", "senderRole": "robot", "type": "poll", "content": "Rate us", "createdAt": "2024-01-02T10:02:00Z"}
        ]}}"#;
        let conv = decode::<RawConversation>(body).unwrap().normalize().unwrap();
        assert_eq!(conv.messages.len(), 3);
        assert_eq!(conv.messages[0].sender, SenderRole::Visitor);
        assert_eq!(conv.messages[1].sender, SenderRole::System);
        assert!(!conv.messages[1].sender.is_staff());
        assert_eq!(conv.messages[2].sender, SenderRole::System);
        assert_eq!(conv.messages[2].kind, MessageType::Text);
        assert_eq!(conv.messages[2].content.as_deref(), Some("Rate us"));
    }

    #[test]
    fn created_conversation_keeps_reference_and_first_message() {
        let body = br#"{"conversation": {"id": "c7"},
                        "message": {"id": "m1", "content": "Bonjour", "createdAt": "2024-01-05T09:00:00Z"}}"#;
        let conv = decode::<RawCreated>(body).unwrap().normalize("DOS-2024-001").unwrap();
        assert_eq!(conv.reference.as_deref(), Some("DOS-2024-001"));
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.last_message_snapshot.as_deref(), Some("Bonjour"));
    }
}
