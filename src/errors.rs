use thiserror::Error;

/// Top-level error for the sync engine.
/// Gateway failures arrive already normalised into `Backend` or `Transport`,
/// so callers never look at transport-specific detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    // ── Gateway errors ───────────────────────────────────────────────────────
    #[error("Server responded with {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Network failure ({code}): {message}")]
    Transport { code: String, message: String },

    #[error("Could not decode server payload: {0}")]
    Decode(String),

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("File is too large ({size} bytes, max {max} bytes)")]
    AttachmentTooLarge { size: u64, max: u64 },

    #[error("Unsupported file format '{extension}'")]
    UnsupportedFormat { extension: String },

    #[error("A conversation must exist before files can be sent")]
    ConversationRequired,

    #[error("No conversation is selected")]
    NoSelection,

    // ── Conversation errors ──────────────────────────────────────────────────
    #[error("Conversation '{id}' not found")]
    ConversationNotFound { id: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Transport { code: code.into(), message: message.into() }
    }

    pub fn timeout(after_secs: u64) -> Self {
        AppError::transport("timeout", format!("no response after {after_secs}s"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::ConversationNotFound { .. } | AppError::Backend { status: 404, .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::AttachmentTooLarge { .. }
                | AppError::UnsupportedFormat { .. }
                | AppError::ConversationRequired
                | AppError::NoSelection
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, AppError::Transport { .. })
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, AppError::Backend { .. })
    }

    /// Short text shown inline next to the control that triggered the failure.
    pub fn user_message(&self) -> String {
        match self {
            AppError::AttachmentTooLarge { max, .. } => {
                format!("File exceeds the {} MB limit", max / (1024 * 1024))
            }
            AppError::UnsupportedFormat { extension } if extension.is_empty() => {
                "File format not allowed".to_string()
            }
            AppError::UnsupportedFormat { extension } => {
                format!("File format .{extension} is not allowed")
            }
            AppError::EmptyField { .. } => "Message cannot be empty".to_string(),
            AppError::Transport { code, .. } if code == "timeout" => {
                "The server took too long to respond".to_string()
            }
            AppError::Transport { .. } => "Network unavailable, please retry".to_string(),
            AppError::Backend { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }
}
