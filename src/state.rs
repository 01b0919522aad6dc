// src/state.rs

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::db::Store;
use crate::endpoint::{endpoint_from_settings, ChatEndpoint};
use crate::error::{ChatError, Result};
use crate::render::markdown::{MarkdownEngine, PulldownMarkdown};
use crate::render::RenderPipeline;
use crate::settings::{ConfigUpdate, Settings};
use crate::types::{ContentBlock, Message, ModelInfo, Session};
use crate::view::MessageArea;

/// Minimum spacing between two streamed renders of the same reply.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);
/// Delay between the first answer token and the think block closing.
pub const THINK_CLOSE_DELAY: Duration = Duration::from_millis(200);
/// Refresh rate of the live `[Load]` / `[Run]` stats marker.
pub const STATS_TICK: Duration = Duration::from_millis(100);

/// Interactive yes/no prompt for destructive actions.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Per-run transient state. Reset pieces on session switch, never persisted
/// except through `Settings`.
#[derive(Default)]
pub struct RunState {
    pub attached_images: Vec<ContentBlock>,
    pub auto_scroll: bool,
    pub abort: Option<CancellationToken>,
    pub streaming_message_id: Option<String>,
    /// Session whose messages are currently on screen.
    pub displayed_session: Option<String>,
}

pub struct AppState {
    pub store: Store,
    pub settings: Mutex<Settings>,
    pub run: Mutex<RunState>,
    pub sessions: Mutex<Vec<Session>>,
    pub messages: Mutex<Vec<Message>>,
    pub view: Mutex<MessageArea>,
    pub sidebar_html: Mutex<String>,
    pub models: Mutex<Vec<ModelInfo>>,
    pub is_processing: AtomicBool,
    pub switch_generation: AtomicU64,
    pub settled_generation: AtomicU64,
    pub renderer: RenderPipeline,
    pub endpoint: Mutex<Option<Arc<dyn ChatEndpoint>>>,
    pub endpoint_override: Option<Arc<dyn ChatEndpoint>>,
    pub confirm: Arc<dyn Confirm>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding one of these locks leaves plain data behind; keep going.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ClientOptions {
    pub endpoint: Option<Arc<dyn ChatEndpoint>>,
    pub confirm: Arc<dyn Confirm>,
    pub markdown: Arc<dyn MarkdownEngine>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            confirm: Arc::new(AlwaysConfirm),
            markdown: Arc::new(PulldownMarkdown),
        }
    }
}

impl ClientOptions {
    pub fn with_endpoint(mut self, endpoint: Arc<dyn ChatEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_markdown(mut self, markdown: Arc<dyn MarkdownEngine>) -> Self {
        self.markdown = markdown;
        self
    }
}

/// Handle to the chat core. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct ChatClient {
    pub(crate) state: Arc<AppState>,
}

impl ChatClient {
    pub fn new(store: Store, options: ClientOptions) -> Result<Self> {
        let settings = Settings::load(&store)?;
        let renderer = RenderPipeline::new(options.markdown)?;

        Ok(Self {
            state: Arc::new(AppState {
                store,
                settings: Mutex::new(settings),
                run: Mutex::new(RunState {
                    auto_scroll: true,
                    ..Default::default()
                }),
                sessions: Mutex::new(Vec::new()),
                messages: Mutex::new(Vec::new()),
                view: Mutex::new(MessageArea::default()),
                sidebar_html: Mutex::new(String::new()),
                models: Mutex::new(Vec::new()),
                is_processing: AtomicBool::new(false),
                switch_generation: AtomicU64::new(0),
                settled_generation: AtomicU64::new(0),
                renderer,
                endpoint: Mutex::new(None),
                endpoint_override: options.endpoint,
                confirm: options.confirm,
            }),
        })
    }

    pub fn store(&self) -> &Store {
        &self.state.store
    }

    pub fn settings(&self) -> Settings {
        lock(&self.state.settings).clone()
    }

    pub fn active_session_id(&self) -> Option<String> {
        lock(&self.state.settings).last_session_id.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.state.is_processing.load(Ordering::SeqCst)
    }

    /// True while a session switch is still replaying messages into the view.
    pub fn is_switching(&self) -> bool {
        self.state.switch_generation.load(Ordering::SeqCst)
            != self.state.settled_generation.load(Ordering::SeqCst)
    }

    /// Apply a config change in memory and write it through to the store.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        let resets_endpoint = matches!(
            update,
            ConfigUpdate::ModelService(_)
                | ConfigUpdate::OpenaiApiEndpoint(_)
                | ConfigUpdate::OpenaiApiKey(_)
                | ConfigUpdate::LocalServerUrl(_)
        );
        lock(&self.state.settings).update(&self.state.store, update)?;
        if resets_endpoint {
            lock(&self.state.endpoint).take();
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self) -> Arc<dyn ChatEndpoint> {
        if let Some(endpoint) = &self.state.endpoint_override {
            return endpoint.clone();
        }
        let mut cached = lock(&self.state.endpoint);
        match cached.as_ref() {
            Some(endpoint) => endpoint.clone(),
            None => {
                let endpoint = endpoint_from_settings(&lock(&self.state.settings));
                *cached = Some(endpoint.clone());
                endpoint
            }
        }
    }

    pub fn sessions(&self) -> Vec<Session> {
        lock(&self.state.sessions).clone()
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        lock(&self.state.sessions).iter().find(|s| s.id == id).cloned()
    }

    /// In-memory messages of the active session.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.state.messages).clone()
    }

    pub fn attached_images(&self) -> Vec<ContentBlock> {
        lock(&self.state.run).attached_images.clone()
    }

    pub fn sidebar_html(&self) -> String {
        lock(&self.state.sidebar_html).clone()
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        lock(&self.state.models).clone()
    }

    /// Read access to the live message area.
    pub fn with_view<R>(&self, f: impl FnOnce(&MessageArea) -> R) -> R {
        f(&lock(&self.state.view))
    }

    pub fn view_html(&self) -> String {
        self.with_view(|view| view.to_html())
    }

    pub fn set_auto_scroll(&self, on: bool) {
        lock(&self.state.run).auto_scroll = on;
    }

    pub(crate) fn require_active(&self) -> Result<String> {
        self.active_session_id()
            .ok_or_else(|| ChatError::SessionNotFound("no active session".to_string()))
    }
}
