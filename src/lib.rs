//! Conversation synchronization for the support console chat: polled list
//! and detail views, optimistic sends with rollback, attachment uploads,
//! presence, deep links and an image gallery.

pub mod compose;
pub mod config;
pub mod deep_link;
pub mod display;
pub mod engine;
pub mod errors;
pub mod gallery;
pub mod gateway;
pub mod models;
pub mod state;
pub mod sync;

pub use config::SyncConfig;
pub use engine::ChatEngine;
pub use errors::AppError;
pub use gateway::{Gateway, HttpGateway, LocalFile};
pub use state::{InboxEvent, InboxState, SharedState};
