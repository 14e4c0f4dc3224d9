use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt as _};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use tracing::{debug, error, Instrument as _};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::errors::AppError;
use crate::gateway::wire::{
    decode, RawConversation, RawConversationList, RawCreated, RawImportant, RawMessage,
    RawPresence,
};
use crate::gateway::{Gateway, LocalFile, ProgressFn};
use crate::models::{
    Conversation, ConversationFilter, ConversationList, Message, MessageType, PresenceRecord,
};

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// [`Gateway`] backed by the console's REST API.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &SyncConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Unexpected(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends the request and returns the body of a successful response.
    async fn execute(&self, builder: RequestBuilder, what: &'static str) -> Result<Bytes, AppError> {
        let request_id = Uuid::new_v4();
        let mut builder = builder.header("X-Request-Id", request_id.to_string());
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let span = tracing::debug_span!("gateway", %request_id, call = what);

        async move {
            let response = builder.send().await.map_err(|e| {
                debug!("{what} failed before a response: {e}");
                transport_error(&e)
            })?;

            let status = response.status();
            let body = response.bytes().await.map_err(|e| transport_error(&e))?;
            if status.is_success() {
                return Ok(body);
            }
            let message = backend_message(status, &body);
            error!("{what} rejected with {status}: {message}");
            Err(AppError::Backend { status: status.as_u16(), message })
        }
        .instrument(span)
        .await
    }
}

fn transport_error(e: &reqwest::Error) -> AppError {
    let code = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_body() || e.is_decode() {
        "body"
    } else {
        "request"
    };
    AppError::transport(code, e.to_string())
}

/// Pulls `message`/`error` out of a JSON error body, falling back to the raw text.
fn backend_message(status: StatusCode, body: &[u8]) -> String {
    let parsed = serde_json::from_slice::<serde_json::Value>(body).ok();
    parsed
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("error")))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string())
}

fn split_chunks(bytes: &Bytes) -> Vec<Bytes> {
    (0..bytes.len())
        .step_by(UPLOAD_CHUNK_BYTES)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_BYTES).min(bytes.len())))
        .collect()
}

fn percent(sent: usize, total: usize) -> u8 {
    ((sent * 100) / total.max(1)).min(100) as u8
}

/// Wraps the file in a chunked body that reports progress as chunks leave.
fn progress_body(bytes: Bytes, progress: ProgressFn) -> reqwest::Body {
    let total = bytes.len();
    let mut sent = 0usize;
    let body = stream::iter(split_chunks(&bytes)).map(move |chunk| {
        sent += chunk.len();
        progress(percent(sent, total));
        Ok::<Bytes, std::io::Error>(chunk)
    });
    reqwest::Body::wrap_stream(body)
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn list_conversations(
        &self,
        filter: ConversationFilter,
    ) -> Result<ConversationList, AppError> {
        let builder = self
            .client
            .get(self.url("conversations"))
            .query(&[("filter", filter.as_str())]);
        let body = self.execute(builder, "list_conversations").await?;
        decode::<RawConversationList>(&body)?.normalize()
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, AppError> {
        let builder = self.client.get(self.url(&format!("conversations/{conversation_id}")));
        let body = self.execute(builder, "get_conversation").await?;
        decode::<RawConversation>(&body)?.normalize()
    }

    async fn send_text(&self, conversation_id: &str, text: &str) -> Result<Message, AppError> {
        let builder = self
            .client
            .post(self.url(&format!("conversations/{conversation_id}/messages")))
            .json(&json!({ "content": text, "type": MessageType::Text.as_str() }));
        let body = self.execute(builder, "send_text").await?;
        decode::<RawMessage>(&body)?.normalize(conversation_id)
    }

    async fn upload_attachment(
        &self,
        conversation_id: &str,
        file: LocalFile,
        kind: MessageType,
        progress: ProgressFn,
    ) -> Result<Message, AppError> {
        let length = file.size();
        let part = Part::stream_with_length(progress_body(file.bytes, progress.clone()), length)
            .file_name(file.name)
            .mime_str(if file.mime_type.is_empty() { "application/octet-stream" } else { &file.mime_type })
            .map_err(|e| AppError::transport("request", e.to_string()))?;
        let form = Form::new().text("type", kind.as_str()).part("file", part);
        let builder = self
            .client
            .post(self.url(&format!("conversations/{conversation_id}/attachments")))
            .multipart(form);
        let body = self.execute(builder, "upload_attachment").await?;
        progress(100);
        decode::<RawMessage>(&body)?.normalize(conversation_id)
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<(), AppError> {
        let builder = self.client.post(self.url(&format!("conversations/{conversation_id}/read")));
        self.execute(builder, "mark_read").await.map(|_| ())
    }

    async fn toggle_important(&self, conversation_id: &str) -> Result<bool, AppError> {
        let builder =
            self.client.patch(self.url(&format!("conversations/{conversation_id}/important")));
        let body = self.execute(builder, "toggle_important").await?;
        Ok(decode::<RawImportant>(&body)?.flag())
    }

    async fn presence(&self, conversation_id: &str) -> Result<PresenceRecord, AppError> {
        let builder =
            self.client.get(self.url(&format!("conversations/{conversation_id}/presence")));
        let body = self.execute(builder, "presence").await?;
        Ok(decode::<RawPresence>(&body)?.into())
    }

    async fn create_from_reference(
        &self,
        reference: &str,
        text: &str,
    ) -> Result<Conversation, AppError> {
        let builder = self
            .client
            .post(self.url("conversations"))
            .json(&json!({ "reference": reference, "content": text }));
        let body = self.execute(builder, "create_from_reference").await?;
        decode::<RawCreated>(&body)?.normalize(reference)
    }

    fn resolve_attachment_url(&self, remote_id: &str) -> Option<String> {
        let remote_id = remote_id.trim();
        if remote_id.is_empty() {
            return None;
        }
        if remote_id.starts_with("http://") || remote_id.starts_with("https://") {
            return Some(remote_id.to_string());
        }
        Some(self.url(&format!("files/{}", remote_id.trim_start_matches('/'))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> HttpGateway {
        let config = SyncConfig {
            api_base_url: "https://console.example/api/".to_string(),
            ..SyncConfig::default()
        };
        HttpGateway::new(&config).unwrap()
    }

    #[test]
    fn resolves_identifiers_through_the_files_endpoint() {
        let gw = gateway();
        assert_eq!(
            gw.resolve_attachment_url("/uploads/a.png").as_deref(),
            Some("https://console.example/api/files/uploads/a.png")
        );
        assert_eq!(
            gw.resolve_attachment_url("https://cdn.example/a.png").as_deref(),
            Some("https://cdn.example/a.png")
        );
        assert_eq!(gw.resolve_attachment_url("  "), None);
    }

    #[test]
    fn backend_message_prefers_json_message_field() {
        let msg = backend_message(StatusCode::BAD_REQUEST, br#"{"message": "Conversation closed"}"#);
        assert_eq!(msg, "Conversation closed");
        let msg = backend_message(StatusCode::BAD_GATEWAY, b"");
        assert_eq!(msg, "Bad Gateway");
    }

    #[test]
    fn chunks_cover_the_whole_file_and_end_at_one_hundred() {
        let bytes = Bytes::from(vec![0u8; UPLOAD_CHUNK_BYTES * 2 + 10]);
        let chunks = split_chunks(&bytes);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), bytes.len());

        let mut sent = 0;
        let reported: Vec<u8> = chunks
            .iter()
            .map(|c| {
                sent += c.len();
                percent(sent, bytes.len())
            })
            .collect();
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reported.last(), Some(&100));
    }
}
