//! Boundary to the backend API.
//!
//! Everything behind [`Gateway`] is a collaborator: the engine only relies on
//! the operations below and on every failure being an [`AppError::Backend`]
//! or [`AppError::Transport`].

pub mod http;
pub mod wire;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::AppError;
use crate::models::{
    Conversation, ConversationFilter, ConversationList, Message, MessageType, PresenceRecord,
};

pub use http::HttpGateway;

/// Upload progress sink, called with a percentage in `0..=100`.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// File picked by the user, held in memory until sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self { name: name.into(), mime_type: mime_type.into(), bytes: bytes.into() }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn list_conversations(&self, filter: ConversationFilter)
        -> Result<ConversationList, AppError>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, AppError>;

    async fn send_text(&self, conversation_id: &str, text: &str) -> Result<Message, AppError>;

    async fn upload_attachment(
        &self,
        conversation_id: &str,
        file: LocalFile,
        kind: MessageType,
        progress: ProgressFn,
    ) -> Result<Message, AppError>;

    async fn mark_read(&self, conversation_id: &str) -> Result<(), AppError>;

    /// Returns the flag as stored by the server after the toggle.
    async fn toggle_important(&self, conversation_id: &str) -> Result<bool, AppError>;

    async fn presence(&self, conversation_id: &str) -> Result<PresenceRecord, AppError>;

    async fn create_from_reference(&self, reference: &str, text: &str)
        -> Result<Conversation, AppError>;

    /// Turns an attachment identifier into a fetchable URL, or `None` if it
    /// cannot be resolved.
    fn resolve_attachment_url(&self, remote_id: &str) -> Option<String>;
}

/// Runs a gateway call with an upper bound on how long it may take.
/// A timeout surfaces as a transport failure so it takes the same rollback path.
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_turns_a_stall_into_a_transport_timeout() {
        let stalled = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, AppError>(())
        };
        let err = bounded(Duration::from_secs(12), stalled).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err, AppError::timeout(12));
    }

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let value = bounded(Duration::from_secs(1), async { Ok::<_, AppError>(7) }).await;
        assert_eq!(value, Ok(7));
    }
}
