//! Polling synchronizers: conversation list, open conversation, presence.

pub mod detail;
pub mod list;
pub mod presence;

pub use detail::{reconcile, DetailRefresh, DetailSynchronizer, SyncGuard};
pub use list::{sort_conversations, ListState, ListSynchronizer};
pub use presence::PresenceTracker;
