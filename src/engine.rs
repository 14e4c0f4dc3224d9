//! Wires the synchronizers together and owns the background pollers.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::compose::{Composer, SendOutcome};
use crate::config::SyncConfig;
use crate::deep_link::{DeepLinkResolver, LinkResolution};
use crate::display::DisplayClock;
use crate::errors::AppError;
use crate::gallery::{GalleryImage, GalleryNavigator};
use crate::gateway::{Gateway, LocalFile};
use crate::models::{Conversation, ConversationFilter, Message, MessageId};
use crate::state::{InboxEvent, InboxState, Selection, SharedState};
use crate::sync::{DetailRefresh, DetailSynchronizer, ListSynchronizer, PresenceTracker};

/// Host callback for "switch to full screen", given the open conversation id.
pub type FullScreenFn = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Background task that is aborted when dropped.
struct Poller(JoinHandle<()>);

impl Poller {
    fn spawn(task: impl Future<Output = ()> + Send + 'static) -> Self {
        Self(tokio::spawn(task))
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Default)]
struct Pollers {
    list: Option<Poller>,
    detail: Option<Poller>,
    presence: Option<Poller>,
}

struct EngineInner {
    config: SyncConfig,
    gateway: Arc<dyn Gateway>,
    shared: SharedState,
    list: ListSynchronizer,
    detail: DetailSynchronizer,
    presence: PresenceTracker,
    composer: Composer,
    links: DeepLinkResolver,
    clock: DisplayClock,
    pollers: Mutex<Pollers>,
    /// Bumped on every selection change; a poller is only started if the
    /// selection it was started for is still current.
    selection_epoch: AtomicU64,
    full_screen: Mutex<Option<FullScreenFn>>,
}

/// Entry point for the host UI. Cloning is cheap and shares everything;
/// pollers stop once the last clone is dropped.
#[derive(Clone)]
pub struct ChatEngine {
    inner: Arc<EngineInner>,
}

impl ChatEngine {
    pub fn new(gateway: Arc<dyn Gateway>, config: SyncConfig) -> Self {
        let shared = SharedState::new();
        let timeout = config.request_timeout;
        let inner = EngineInner {
            list: ListSynchronizer::new(gateway.clone(), shared.clone(), timeout),
            detail: DetailSynchronizer::new(gateway.clone(), shared.clone(), timeout),
            presence: PresenceTracker::new(gateway.clone(), shared.clone(), timeout),
            composer: Composer::new(gateway.clone(), shared.clone(), &config),
            links: DeepLinkResolver::new(shared.clone()),
            clock: DisplayClock::new(config.display_offset),
            pollers: Mutex::new(Pollers::default()),
            selection_epoch: AtomicU64::new(0),
            full_screen: Mutex::new(None),
            config,
            gateway,
            shared,
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.inner.shared.subscribe()
    }

    pub fn snapshot(&self) -> InboxState {
        self.inner.shared.snapshot()
    }

    pub fn clock(&self) -> DisplayClock {
        self.inner.clock
    }

    pub fn resolve_attachment_url(&self, message: &Message) -> Option<String> {
        let attachment = message.attachment.as_ref()?;
        self.inner.gateway.resolve_attachment_url(&attachment.remote_id)
    }

    // ── View lifecycle ──────────────────────────────────────────────────────

    /// Opens the inbox: one explicit list load, then background polling.
    pub async fn activate(&self) -> Result<Vec<Conversation>, AppError> {
        self.inner.shared.with(|s| {
            s.view.open = true;
            s.view.list_visible = true;
            s.view.minimized = false;
        });
        let result = self.refresh_list(false).await;
        self.update_list_poller();
        result
    }

    pub fn set_list_visible(&self, visible: bool) {
        self.inner.shared.with(|s| s.view.list_visible = visible);
        self.update_list_poller();
    }

    pub fn set_minimized(&self, minimized: bool) {
        self.inner.shared.with(|s| s.view.minimized = minimized);
        self.update_list_poller();
    }

    pub fn on_full_screen(&self, callback: impl Fn(Option<&str>) + Send + Sync + 'static) {
        *self.inner.full_screen.lock() = Some(Arc::new(callback));
    }

    pub fn switch_to_full_screen(&self) {
        let conversation_id = self.inner.shared.with(|s| {
            s.view.full_screen = true;
            s.active_conversation_id().map(str::to_string)
        });
        let callback = self.inner.full_screen.lock().clone();
        if let Some(callback) = callback {
            callback(conversation_id.as_deref());
        }
        self.inner.shared.emit(InboxEvent::FullScreenRequested { conversation_id });
    }

    /// Stops every poller and closes the view. State stays readable.
    pub fn shutdown(&self) {
        self.inner.selection_epoch.fetch_add(1, Ordering::SeqCst);
        *self.inner.pollers.lock() = Pollers::default();
        self.inner.shared.with(|s| s.view.open = false);
        info!("Chat engine stopped");
    }

    // ── List ────────────────────────────────────────────────────────────────

    /// Loads the list for the current filter. Afterwards a deferred deep link,
    /// if any, gets its single retry.
    pub async fn refresh_list(&self, silent: bool) -> Result<Vec<Conversation>, AppError> {
        let filter = self.inner.shared.with(|s| s.list.filter);
        let result = self.inner.list.refresh(filter, silent).await;
        if let Some(resolution) = self.inner.links.retry_deferred() {
            if let Err(e) = self.follow_link(&resolution).await {
                warn!("Deferred deep link could not be opened: {e}");
            }
        }
        result
    }

    pub async fn set_filter(&self, filter: ConversationFilter) -> Result<Vec<Conversation>, AppError> {
        self.inner.shared.with(|s| s.list.filter = filter);
        self.refresh_list(false).await
    }

    pub fn set_search(&self, text: impl Into<String>) {
        let text = text.into();
        self.inner.shared.with(|s| s.list.search = text);
    }

    pub async fn toggle_important(&self, conversation_id: &str) -> Result<bool, AppError> {
        self.inner.list.toggle_important(conversation_id).await
    }

    fn update_list_poller(&self) {
        let wanted = self.inner.shared.with(|s| s.view.open && s.view.list_visible && !s.view.minimized);
        let mut pollers = self.inner.pollers.lock();
        match (wanted, pollers.list.is_some()) {
            (true, false) => {
                debug!("Starting list polling");
                pollers.list = Some(self.spawn_list_poller());
            }
            (false, true) => {
                debug!("Pausing list polling");
                pollers.list = None;
            }
            _ => {}
        }
    }

    fn spawn_list_poller(&self) -> Poller {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.list_poll_interval;
        Poller::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = upgrade(&weak) else { break };
                // Failures are logged by the synchronizer; the previous list stays.
                let _ = engine.refresh_list(true).await;
            }
        })
    }

    // ── Selection ───────────────────────────────────────────────────────────

    /// Opens a conversation: stops the previous one's pollers, loads the
    /// detail explicitly, then starts detail and presence polling.
    pub async fn select_conversation(&self, conversation_id: &str) -> Result<DetailRefresh, AppError> {
        let epoch = self.begin_selection();
        let previous = self.inner.shared.with(|s| {
            let previous = s.active_conversation_id().map(str::to_string);
            if previous.as_deref() != Some(conversation_id) {
                let opened = s
                    .list
                    .get(conversation_id)
                    .cloned()
                    .unwrap_or_else(|| Conversation::placeholder(conversation_id));
                s.clear_selection();
                s.selection = Selection::Conversation(opened);
                s.restore_unsent();
            }
            previous
        });
        if let Some(previous) = previous.filter(|p| p != conversation_id) {
            self.inner.detail.forget(&previous);
        }

        let result = self.inner.detail.refresh(conversation_id, false).await;
        self.start_conversation_pollers(epoch, conversation_id);
        result
    }

    pub fn close_conversation(&self) {
        self.begin_selection();
        let closed = self.inner.shared.with(|s| {
            let closed = s.active_conversation_id().map(str::to_string);
            s.clear_selection();
            closed
        });
        if let Some(id) = closed {
            self.inner.detail.forget(&id);
        }
    }

    /// Deep link entry point. Activates the inbox first if needed.
    pub async fn open_reference(&self, reference: &str) -> Result<LinkResolution, AppError> {
        if !self.inner.shared.with(|s| s.view.open) {
            if let Err(e) = self.activate().await {
                debug!("List not available for deep link {reference}: {e}");
            }
        }
        let resolution = self.inner.links.resolve(reference);
        self.follow_link(&resolution).await?;
        Ok(resolution)
    }

    async fn follow_link(&self, resolution: &LinkResolution) -> Result<(), AppError> {
        match resolution {
            LinkResolution::Selected(id) => self.select_conversation(id).await.map(|_| ()),
            LinkResolution::ShellCreated => {
                self.begin_selection();
                Ok(())
            }
            LinkResolution::Deferred => Ok(()),
        }
    }

    fn begin_selection(&self) -> u64 {
        let epoch = self.inner.selection_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pollers = self.inner.pollers.lock();
        pollers.detail = None;
        pollers.presence = None;
        epoch
    }

    fn start_conversation_pollers(&self, epoch: u64, conversation_id: &str) {
        let (active, with_presence) = self.inner.shared.with(|s| match s.active_conversation() {
            Some(c) if c.id == conversation_id => (true, c.has_visitor_counterpart()),
            _ => (false, false),
        });
        let mut pollers = self.inner.pollers.lock();
        if !active || self.inner.selection_epoch.load(Ordering::SeqCst) != epoch {
            debug!("Selection moved on from {conversation_id}, not polling it");
            return;
        }
        pollers.detail = Some(self.spawn_detail_poller(conversation_id.to_string()));
        pollers.presence = with_presence.then(|| self.spawn_presence_poller(conversation_id.to_string()));
    }

    fn spawn_detail_poller(&self, conversation_id: String) -> Poller {
        let detail = self.inner.detail.clone();
        let period = self.inner.config.detail_poll_interval;
        Poller::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Ok(DetailRefresh::Stale) = detail.refresh(&conversation_id, true).await {
                    break;
                }
            }
        })
    }

    fn spawn_presence_poller(&self, conversation_id: String) -> Poller {
        let presence = self.inner.presence.clone();
        let period = self.inner.config.presence_poll_interval;
        Poller::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = presence.poll(&conversation_id).await;
            }
        })
    }

    // ── Composer ────────────────────────────────────────────────────────────

    pub fn set_draft(&self, text: impl Into<String>) {
        self.inner.composer.set_draft(text);
    }

    /// Sends the draft. When this creates the conversation for a pending
    /// shell, the new conversation starts polling like any selected one.
    pub async fn send_text(&self) -> Result<SendOutcome, AppError> {
        let outcome = self.inner.composer.send_text().await?;
        if let SendOutcome::Created { conversation, selected: true } = &outcome {
            let epoch = self.begin_selection();
            if conversation.messages.is_empty() {
                let _ = self.inner.detail.refresh(&conversation.id, true).await;
            }
            self.start_conversation_pollers(epoch, &conversation.id);
        }
        Ok(outcome)
    }

    pub fn pick_attachment(&self, file: LocalFile) -> Result<(), AppError> {
        self.inner.composer.pick_attachment(file)
    }

    pub fn clear_attachment(&self) {
        self.inner.composer.clear_attachment();
    }

    pub async fn send_attachment(&self) -> Result<Message, AppError> {
        self.inner.composer.send_attachment().await
    }

    // ── Gallery ─────────────────────────────────────────────────────────────

    pub fn open_gallery(&self, message_id: &MessageId) -> Option<GalleryImage> {
        let gateway = self.inner.gateway.clone();
        self.inner.shared.with(|s| {
            let navigator = GalleryNavigator::open(
                s.messages(),
                |remote_id| gateway.resolve_attachment_url(remote_id),
                message_id,
            )?;
            let current = navigator.current().clone();
            s.gallery = Some(navigator);
            Some(current)
        })
    }

    pub fn gallery_next(&self) -> Option<GalleryImage> {
        self.inner.shared.with(|s| s.gallery.as_mut().map(|g| g.next().clone()))
    }

    pub fn gallery_prev(&self) -> Option<GalleryImage> {
        self.inner.shared.with(|s| s.gallery.as_mut().map(|g| g.prev().clone()))
    }

    pub fn close_gallery(&self) {
        self.inner.shared.with(|s| s.gallery = None);
    }

    #[cfg(test)]
    fn polling(&self) -> (bool, bool, bool) {
        let pollers = self.inner.pollers.lock();
        (pollers.list.is_some(), pollers.detail.is_some(), pollers.presence.is_some())
    }
}

fn upgrade(inner: &Weak<EngineInner>) -> Option<ChatEngine> {
    inner.upgrade().map(|inner| ChatEngine { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ProgressFn;
    use crate::models::{ConversationList, MessageType, PresenceRecord};
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl Gateway for Offline {
        async fn list_conversations(&self, _: ConversationFilter) -> Result<ConversationList, AppError> {
            Err(AppError::transport("connect", "offline"))
        }
        async fn get_conversation(&self, _: &str) -> Result<Conversation, AppError> {
            Err(AppError::transport("connect", "offline"))
        }
        async fn send_text(&self, _: &str, _: &str) -> Result<Message, AppError> {
            Err(AppError::transport("connect", "offline"))
        }
        async fn upload_attachment(
            &self,
            _: &str,
            _: LocalFile,
            _: MessageType,
            _: ProgressFn,
        ) -> Result<Message, AppError> {
            Err(AppError::transport("connect", "offline"))
        }
        async fn mark_read(&self, _: &str) -> Result<(), AppError> {
            Ok(())
        }
        async fn toggle_important(&self, _: &str) -> Result<bool, AppError> {
            Err(AppError::transport("connect", "offline"))
        }
        async fn presence(&self, _: &str) -> Result<PresenceRecord, AppError> {
            Err(AppError::transport("connect", "offline"))
        }
        async fn create_from_reference(&self, _: &str, _: &str) -> Result<Conversation, AppError> {
            Err(AppError::transport("connect", "offline"))
        }
        fn resolve_attachment_url(&self, _: &str) -> Option<String> {
            None
        }
    }

    #[tokio::test(start_paused = true)]
    async fn list_polling_follows_visibility() {
        let engine = ChatEngine::new(Arc::new(Offline), SyncConfig::default());
        assert!(engine.activate().await.is_err());
        assert_eq!(engine.polling(), (true, false, false));

        engine.set_minimized(true);
        assert!(!engine.polling().0);
        engine.set_minimized(false);
        engine.set_list_visible(false);
        assert!(!engine.polling().0);
        engine.set_list_visible(true);
        assert!(engine.polling().0);

        engine.shutdown();
        assert_eq!(engine.polling(), (false, false, false));
    }

    #[tokio::test(start_paused = true)]
    async fn full_screen_callback_gets_the_open_conversation() {
        let engine = ChatEngine::new(Arc::new(Offline), SyncConfig::default());
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        engine.on_full_screen(move |id| *sink.lock() = Some(id.map(str::to_string)));

        let _ = engine.select_conversation("c1").await;
        engine.switch_to_full_screen();
        assert_eq!(*seen.lock(), Some(Some("c1".to_string())));
        assert!(engine.snapshot().view.full_screen);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_stops_conversation_polling() {
        let engine = ChatEngine::new(Arc::new(Offline), SyncConfig::default());
        let _ = engine.select_conversation("c1").await;
        assert!(engine.polling().1);
        engine.close_conversation();
        assert_eq!(engine.polling(), (false, false, false));
        assert_eq!(engine.snapshot().selection, Selection::None);
    }
}
