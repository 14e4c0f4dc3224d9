//! Opening the inbox on an external reference code.

use tracing::{debug, info};

use crate::compose::ComposerMode;
use crate::models::PendingShell;
use crate::state::{InboxEvent, Selection, SharedState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResolution {
    /// A loaded conversation carries the reference; the caller selects it.
    Selected(String),
    /// No conversation yet. A pending shell is open in "new conversation" mode.
    ShellCreated,
    /// The list has not loaded; retried once after the next list refresh.
    Deferred,
}

#[derive(Clone)]
pub struct DeepLinkResolver {
    shared: SharedState,
}

impl DeepLinkResolver {
    pub fn new(shared: SharedState) -> Self {
        Self { shared }
    }

    /// Opens the widget and resolves `reference` against the loaded list.
    pub fn resolve(&self, reference: &str) -> LinkResolution {
        let reference = reference.trim();
        let resolution = self.shared.with(|s| {
            s.view.open = true;
            s.view.minimized = false;
            if !s.list.loaded {
                s.deferred_link = Some(reference.to_string());
                return LinkResolution::Deferred;
            }
            s.deferred_link = None;
            let existing = s
                .list
                .conversations
                .iter()
                .find(|c| c.reference.as_deref() == Some(reference))
                .map(|c| c.id.clone());
            if let Some(id) = existing {
                return LinkResolution::Selected(id);
            }
            if s.pending_reference() != Some(reference) {
                s.clear_selection();
                s.selection = Selection::Pending(PendingShell::new(reference));
                s.restore_unsent();
            }
            s.composer.mode = ComposerMode::NewConversation;
            LinkResolution::ShellCreated
        });

        match &resolution {
            LinkResolution::Deferred => debug!("Deferring deep link {reference} until the list loads"),
            LinkResolution::Selected(id) => info!("Deep link {reference} resolved to {id}"),
            LinkResolution::ShellCreated => {
                info!("No conversation for {reference} yet, opening a new one");
                self.shared.emit(InboxEvent::ShellCreated { reference: reference.to_string() });
            }
        }
        resolution
    }

    /// Retries a deferred link once. Whatever the outcome, the link is no
    /// longer deferred afterwards; a list that still has not loaded gets a
    /// pending shell.
    pub fn retry_deferred(&self) -> Option<LinkResolution> {
        let reference = self.shared.with(|s| {
            let reference = s.deferred_link.take()?;
            Some((reference, s.list.loaded))
        });
        let (reference, loaded) = reference?;
        if loaded {
            return Some(self.resolve(&reference));
        }
        self.shared.with(|s| {
            s.clear_selection();
            s.selection = Selection::Pending(PendingShell::new(reference.as_str()));
            s.restore_unsent();
            s.composer.mode = ComposerMode::NewConversation;
        });
        self.shared.emit(InboxEvent::ShellCreated { reference });
        Some(LinkResolution::ShellCreated)
    }
}
