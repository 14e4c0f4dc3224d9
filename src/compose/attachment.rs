//! Client-side checks and previews for files picked in the composer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use crate::display::format_size;
use crate::errors::AppError;
use crate::gateway::LocalFile;
use crate::models::MessageType;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "gif", "webp"];
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "xls", "xlsx"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "wmv"];

/// Lowercased extension from the file name, falling back to the MIME subtype.
pub fn extension_of(file: &LocalFile) -> String {
    if let Some((_, ext)) = file.name.rsplit_once('.') {
        if !ext.is_empty() {
            return ext.to_lowercase();
        }
    }
    let subtype = file.mime_type.split('/').nth(1).unwrap_or_default().to_lowercase();
    match subtype.as_str() {
        "quicktime" => "mov".to_string(),
        "x-msvideo" => "avi".to_string(),
        "x-ms-wmv" => "wmv".to_string(),
        "msword" => "doc".to_string(),
        "plain" => "txt".to_string(),
        "vnd.ms-excel" => "xls".to_string(),
        "vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx".to_string(),
        "vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx".to_string(),
        other => other.to_string(),
    }
}

/// Checks format and size. Returns the message type the file will be sent as.
pub fn validate(file: &LocalFile, max_bytes: u64) -> Result<MessageType, AppError> {
    let extension = extension_of(file);
    let kind = if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        MessageType::Image
    } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        MessageType::Video
    } else if DOCUMENT_EXTENSIONS.contains(&extension.as_str()) {
        MessageType::File
    } else {
        return Err(AppError::UnsupportedFormat { extension });
    };
    if file.size() > max_bytes {
        return Err(AppError::AttachmentTooLarge { size: file.size(), max: max_bytes });
    }
    Ok(kind)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Preview {
    /// Rendered from the file itself, no network involved.
    Inline { data_url: String },
    /// Icon plus name and size for documents.
    Generic { icon: &'static str, name: String, size: String },
}

impl Preview {
    pub fn for_file(file: &LocalFile, kind: MessageType) -> Self {
        match kind {
            MessageType::Image | MessageType::Video => Preview::Inline {
                data_url: format!("data:{};base64,{}", file.mime_type, STANDARD.encode(&file.bytes)),
            },
            MessageType::File | MessageType::Text => Preview::Generic {
                icon: document_icon(&extension_of(file)),
                name: file.name.clone(),
                size: format_size(file.size()),
            },
        }
    }
}

fn document_icon(extension: &str) -> &'static str {
    match extension {
        "pdf" => "file-pdf",
        "doc" | "docx" => "file-word",
        "xls" | "xlsx" => "file-excel",
        "txt" => "file-text",
        _ => "file",
    }
}

/// A validated file waiting for the user to confirm the send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentDraft {
    #[serde(skip)]
    pub file: LocalFile,
    pub name: String,
    pub kind: MessageType,
    pub preview: Preview,
}

impl AttachmentDraft {
    pub fn prepare(file: LocalFile, max_bytes: u64) -> Result<Self, AppError> {
        let kind = validate(&file, max_bytes)?;
        let preview = Preview::for_file(&file, kind);
        Ok(Self { name: file.name.clone(), file, kind, preview })
    }
}
