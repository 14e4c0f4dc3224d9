//! Full-screen browsing over the images of the open conversation.

use serde::Serialize;

use crate::models::{Message, MessageId, MessageType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryImage {
    pub url: String,
    pub name: String,
    /// Position of the owning message in the conversation.
    pub message_index: usize,
    pub message_id: MessageId,
}

/// Circular cursor over a conversation's images. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryNavigator {
    images: Vec<GalleryImage>,
    cursor: usize,
}

impl GalleryNavigator {
    /// Image messages whose attachment resolves to a URL, in message order.
    pub fn derive(messages: &[Message], resolve: impl Fn(&str) -> Option<String>) -> Vec<GalleryImage> {
        messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.kind == MessageType::Image)
            .filter_map(|(index, m)| {
                let attachment = m.attachment.as_ref()?;
                let url = resolve(&attachment.remote_id)?;
                Some(GalleryImage {
                    url,
                    name: attachment.name.clone(),
                    message_index: index,
                    message_id: m.id.clone(),
                })
            })
            .collect()
    }

    /// Opens on the image of `selected`, or the first image if it is not
    /// part of the gallery. `None` when there is nothing to show.
    pub fn open(
        messages: &[Message],
        resolve: impl Fn(&str) -> Option<String>,
        selected: &MessageId,
    ) -> Option<Self> {
        let images = Self::derive(messages, resolve);
        if images.is_empty() {
            return None;
        }
        let cursor = images.iter().position(|img| &img.message_id == selected).unwrap_or(0);
        Some(Self { images, cursor })
    }

    pub fn current(&self) -> &GalleryImage {
        &self.images[self.cursor]
    }

    pub fn next(&mut self) -> &GalleryImage {
        self.cursor = (self.cursor + 1) % self.images.len();
        self.current()
    }

    pub fn prev(&mut self) -> &GalleryImage {
        let n = self.images.len();
        self.cursor = (self.cursor + n - 1) % n;
        self.current()
    }

    /// Zero-based cursor and total, for "3 / 7" style counters.
    pub fn position(&self) -> (usize, usize) {
        (self.cursor, self.images.len())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[GalleryImage] {
        &self.images
    }
}
