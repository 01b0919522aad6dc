// src/session.rs

use std::sync::atomic::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::backup::{Backup, ImportMode, ImportReport};
use crate::db::unix_ms;
use crate::error::{ChatError, Result};
use crate::ids::generate_session_id;
use crate::images;
use crate::settings::{ConfigUpdate, Settings};
use crate::sidebar::UNTITLED;
use crate::state::{lock, ChatClient};
use crate::streaming::StreamOutcome;
use crate::types::{order_models, pick_model, ContentBlock, Message, ModelInfo, Role, Session};
use crate::view::{ImagePreview, MessageView};

pub const WELCOME_SESSION_ID: &str = "sess_welcome";
pub const WELCOME_TITLE: &str = "Welcome 👋";
pub const TITLE_MAX_CHARS: usize = 47;
pub const UNTITLED_SESSION: &str = "Untitled Session";
pub const IMAGE_ONLY_TITLE: &str = "[Image]";

const WELCOME_MESSAGE_ID: &str = "msg_system_intro";
const WELCOME_TEXT: &str = r#"# pChat

Conversations are stored locally and never leave this machine, except for the
messages you send to the configured model endpoint.

- `/new` starts a session, `/sessions` lists them, `/switch <id>` opens one.
- `/fork <message id>` copies a conversation up to that message into a new session.
- `/export <file>` and `/import <file> [--compatible]` move sessions between machines.

Links like [Hello](#/user_send) send their text as a message when clicked."#;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static LEADING_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\n+").expect("valid leading blank line regex"));
static FORK_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[Fork (\d+)\]").expect("valid fork counter regex"));
static FORK_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[Fork( \d+)?\] ").expect("valid fork prefix regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Already showing that session.
    Skipped,
    /// Refused because a reply is streaming.
    Blocked,
    Completed,
    /// A newer switch took over before this one finished rendering.
    Superseded,
}

// ==================== Text helpers ====================

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Title derived from the first message of an untitled session.
pub fn auto_title(text: &str) -> String {
    let cut = truncate_chars(text.trim(), TITLE_MAX_CHARS);
    WHITESPACE.replace_all(&cut, " ").into_owned()
}

/// Title typed by the user; blank input keeps the previous title.
pub fn clean_title(input: &str, previous: &str) -> String {
    let collapsed = WHITESPACE.replace_all(input, " ");
    let trimmed = collapsed.trim();
    let fallback = if previous.trim().is_empty() {
        UNTITLED_SESSION
    } else {
        previous.trim()
    };
    let chosen = if trimmed.is_empty() { fallback } else { trimmed };
    truncate_chars(chosen, TITLE_MAX_CHARS)
}

/// `[Fork] X`, then `[Fork 1] X`, `[Fork 2] X`, ...
pub fn fork_title(current: &str) -> String {
    let current = if current.is_empty() { UNTITLED } else { current };
    if !current.starts_with("[Fork") {
        return format!("[Fork] {}", current);
    }
    let count: u64 = FORK_COUNT
        .captures(current)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    format!("[Fork {}] {}", count + 1, FORK_PREFIX.replace(current, ""))
}

/// Drop leading blank lines and trailing whitespace, keeping first-line indentation.
pub fn clean_input(input: &str) -> String {
    LEADING_BLANK_LINES.replace(input, "").trim_end().to_string()
}

fn most_recent(sessions: &[Session]) -> Option<String> {
    sessions
        .iter()
        .max_by_key(|s| s.timestamp)
        .map(|s| s.id.clone())
}

/// Marks a render pass settled when dropped, unless a newer pass has started.
struct SwitchGuard<'a> {
    client: &'a ChatClient,
    generation: u64,
}

impl SwitchGuard<'_> {
    fn is_current(&self) -> bool {
        self.client.state.switch_generation.load(Ordering::SeqCst) == self.generation
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        if self.is_current() {
            self.client
                .state
                .settled_generation
                .store(self.generation, Ordering::SeqCst);
        }
    }
}

impl ChatClient {
    // ==================== Startup ====================

    /// Seed the welcome session, load the index and open the last session.
    pub async fn bootstrap(&self) -> Result<()> {
        self.write_welcome_session()?;
        self.reload_sessions()?;
        self.open_initial_session().await?;
        tracing::info!(
            "[session] ready with {} sessions, active {:?}",
            self.sessions().len(),
            self.active_session_id()
        );
        Ok(())
    }

    fn write_welcome_session(&self) -> Result<()> {
        let session = Session::new(WELCOME_SESSION_ID.into(), WELCOME_TITLE.into(), 0);
        let mut intro = Message::system(WELCOME_TEXT);
        intro.id = WELCOME_MESSAGE_ID.to_string();
        intro.is_collapsed = false;

        self.state.store.save_session_meta(&session)?;
        self.state
            .store
            .save_session_messages(&session.id, &[intro])?;
        Ok(())
    }

    pub(crate) fn reload_sessions(&self) -> Result<()> {
        let sessions = self.state.store.get_all_sessions()?;
        *lock(&self.state.sessions) = sessions;
        Ok(())
    }

    async fn open_initial_session(&self) -> Result<()> {
        let sessions = self.sessions();
        let last = self.active_session_id();
        let target = match last {
            Some(id) if sessions.iter().any(|s| s.id == id) => Some(id),
            _ => most_recent(&sessions),
        };
        match target {
            Some(id) => {
                self.display_session(&id, true).await?;
            }
            None => {
                self.create_session().await?;
            }
        }
        Ok(())
    }

    // ==================== Persistence ====================

    /// One full-array write of the active session's messages.
    pub(crate) fn save_current_session(&self) -> Result<()> {
        let Some(id) = self.active_session_id() else {
            return Ok(());
        };
        let messages = self.messages();
        self.state.store.save_session_messages(&id, &messages)
    }

    fn save_session_meta_local(&self, session: &Session) -> Result<()> {
        {
            let mut sessions = lock(&self.state.sessions);
            match sessions.iter_mut().find(|s| s.id == session.id) {
                Some(existing) => *existing = session.clone(),
                None => sessions.push(session.clone()),
            }
        }
        self.state.store.save_session_meta(session)
    }

    pub(crate) async fn refresh_sidebar(&self) -> Result<()> {
        let sessions = self.sessions();
        let active = self.active_session_id();
        let html = self
            .state
            .renderer
            .render_sidebar(&sessions, active.as_deref())
            .await?;
        *lock(&self.state.sidebar_html) = html;
        Ok(())
    }

    pub(crate) async fn build_view(&self, msg: &Message) -> Result<MessageView> {
        let mut view = MessageView::new(msg);
        let rendered = self
            .state
            .renderer
            .render(&msg.content, view.rendered)
            .await?;
        view.set_content(&rendered);
        Ok(view)
    }

    /// Claim the message area for a new render pass, superseding older ones.
    fn begin_switch(&self) -> Option<SwitchGuard<'_>> {
        if self.is_processing() {
            return None;
        }
        let generation = self.state.switch_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = SwitchGuard {
            client: self,
            generation,
        };
        // A stream may have claimed the client between the check and the bump.
        if self.is_processing() {
            return None;
        }
        Some(guard)
    }

    // ==================== Sessions ====================

    /// Start an empty session seeded with the default system prompt.
    pub async fn create_session(&self) -> Result<Option<String>> {
        let Some(switch) = self.begin_switch() else {
            return Ok(None);
        };

        let id = generate_session_id();
        let prompt = lock(&self.state.settings).default_system_prompt.clone();
        let system = Message::system(&prompt);
        let session = Session::new(id.clone(), String::new(), unix_ms());
        let view = self.build_view(&system).await?;

        {
            let mut current = lock(&self.state.messages);
            if !switch.is_current() {
                tracing::debug!("[session] create superseded by a switch");
                return Ok(None);
            }
            self.update_config(ConfigUpdate::LastSessionId(Some(id.clone())))?;
            *current = vec![system.clone()];
        }
        self.save_session_meta_local(&session)?;
        self.state
            .store
            .save_session_messages(&id, std::slice::from_ref(&system))?;

        {
            let mut area = lock(&self.state.view);
            if !switch.is_current() {
                return Ok(None);
            }
            area.clear();
            area.set_document_title("");
            area.push(view, false);
            lock(&self.state.run).displayed_session = Some(id.clone());
        }
        drop(switch);
        self.refresh_sidebar().await?;

        tracing::info!("[session] created {}", id);
        Ok(Some(id))
    }

    pub async fn switch_session(&self, id: &str) -> Result<SwitchOutcome> {
        self.display_session(id, false).await
    }

    /// Load `id` and replay its messages into the view, yielding between
    /// messages. A newer switch makes this one stop at its next checkpoint.
    pub(crate) async fn display_session(&self, id: &str, force: bool) -> Result<SwitchOutcome> {
        if self.is_processing() {
            return Ok(SwitchOutcome::Blocked);
        }
        if !force {
            let showing = lock(&self.state.run).displayed_session.as_deref() == Some(id);
            let has_content = !lock(&self.state.view).is_empty();
            if self.active_session_id().as_deref() == Some(id) && showing && has_content {
                return Ok(SwitchOutcome::Skipped);
            }
        }
        let Some(switch) = self.begin_switch() else {
            return Ok(SwitchOutcome::Blocked);
        };

        lock(&self.state.run).displayed_session = None;
        let title = self.session(id).map(|s| s.title).unwrap_or_default();

        let messages = match self.state.store.get_session_messages(id) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("[session] failed to load {}: {}", id, e);
                Vec::new()
            }
        };

        {
            let mut current = lock(&self.state.messages);
            if !switch.is_current() {
                return Ok(SwitchOutcome::Superseded);
            }
            self.update_config(ConfigUpdate::LastSessionId(Some(id.to_string())))?;
            *current = messages.clone();
        }
        {
            let mut area = lock(&self.state.view);
            if !switch.is_current() {
                return Ok(SwitchOutcome::Superseded);
            }
            area.clear();
            area.set_document_title(&title);
        }

        for msg in &messages {
            let view = self.build_view(msg).await?;
            {
                let mut area = lock(&self.state.view);
                if !switch.is_current() {
                    tracing::debug!("[session] switch to {} superseded", id);
                    return Ok(SwitchOutcome::Superseded);
                }
                area.push(view, false);
            }
            tokio::task::yield_now().await;
        }

        {
            let mut area = lock(&self.state.view);
            if !switch.is_current() {
                return Ok(SwitchOutcome::Superseded);
            }
            if id != WELCOME_SESSION_ID {
                lock(&self.state.run).auto_scroll = true;
                area.scroll_to_bottom();
            }
        }
        lock(&self.state.run).displayed_session = Some(id.to_string());
        drop(switch);
        self.refresh_sidebar().await?;

        tracing::debug!("[session] switched to {} ({} messages)", id, messages.len());
        Ok(SwitchOutcome::Completed)
    }

    /// Copy the active conversation up to and including `message_id` into a new session.
    pub async fn fork_session(&self, message_id: &str) -> Result<Option<String>> {
        if self.is_processing() {
            return Ok(None);
        }
        let forked: Vec<Message> = {
            let messages = lock(&self.state.messages);
            match messages.iter().position(|m| m.id == message_id) {
                Some(idx) => messages[..=idx].to_vec(),
                None => return Ok(None),
            }
        };

        let current_title = self
            .active_session_id()
            .and_then(|id| self.session(&id))
            .map(|s| s.title)
            .unwrap_or_default();
        let id = generate_session_id();
        let session = Session::new(id.clone(), fork_title(&current_title), unix_ms());

        self.save_session_meta_local(&session)?;
        self.state.store.save_session_messages(&id, &forked)?;
        self.refresh_sidebar().await?;
        self.switch_session(&id).await?;

        tracing::info!("[session] forked {} messages into {}", forked.len(), id);
        Ok(Some(id))
    }

    /// Delete after confirmation. Returns false when refused or declined.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let active = self.active_session_id();
        if self.is_processing() && active.as_deref() == Some(id) {
            return Ok(false);
        }
        if !self.state.confirm.confirm("Permanently delete this session?") {
            return Ok(false);
        }

        self.state.store.delete_session(id)?;
        lock(&self.state.sessions).retain(|s| s.id != id);
        tracing::info!("[session] deleted {}", id);

        if active.as_deref() == Some(id) {
            lock(&self.state.run).displayed_session = None;
            match most_recent(&self.sessions()) {
                Some(next) => {
                    self.refresh_sidebar().await?;
                    self.display_session(&next, true).await?;
                }
                None => {
                    self.create_session().await?;
                }
            }
        } else {
            self.refresh_sidebar().await?;
        }
        Ok(true)
    }

    pub async fn rename_session(&self, id: &str, input: &str) -> Result<Option<String>> {
        let Some(mut session) = self.session(id) else {
            return Ok(None);
        };
        session.title = clean_title(input, &session.title);
        self.save_session_meta_local(&session)?;

        if self.active_session_id().as_deref() == Some(id) {
            lock(&self.state.view).set_document_title(&session.title);
        }
        self.refresh_sidebar().await?;
        Ok(Some(session.title))
    }

    /// Flip the pin, bump the timestamp so it re-sorts, then open it.
    pub async fn toggle_pin(&self, id: &str) -> Result<Option<bool>> {
        let Some(mut session) = self.session(id) else {
            return Ok(None);
        };
        session.pinned = !session.pinned;
        session.timestamp = unix_ms();
        self.save_session_meta_local(&session)?;
        self.refresh_sidebar().await?;
        self.switch_session(id).await?;
        Ok(Some(session.pinned))
    }

    fn update_title_if_needed(&self, text: &str) -> Result<()> {
        let Some(id) = self.active_session_id() else {
            return Ok(());
        };
        let Some(mut session) = self.session(&id) else {
            return Ok(());
        };
        if !session.title.is_empty() {
            return Ok(());
        }
        session.title = auto_title(text);
        self.save_session_meta_local(&session)?;
        lock(&self.state.view).set_document_title(&session.title);
        Ok(())
    }

    // ==================== Messages ====================

    /// Append a user message built from pending attachments and `input`, then stream a reply.
    /// An image-only message is allowed; nothing at all is a no-op.
    pub async fn send_message(&self, input: &str) -> Result<StreamOutcome> {
        let text = clean_input(input);
        if self.is_processing() || self.is_switching() {
            return Ok(StreamOutcome::Skipped);
        }
        let Some(session_id) = self.active_session_id() else {
            return Ok(StreamOutcome::Skipped);
        };
        let mut content = {
            let mut run = lock(&self.state.run);
            if text.is_empty() && run.attached_images.is_empty() {
                return Ok(StreamOutcome::Skipped);
            }
            std::mem::take(&mut run.attached_images)
        };
        content.push(ContentBlock::text(text.clone()));

        let generation = self.state.switch_generation.load(Ordering::SeqCst);
        let msg = Message::user(content);
        let view = self.build_view(&msg).await?;

        // The session on screen may have changed while the view was rendering.
        {
            let mut messages = lock(&self.state.messages);
            let moved = self.state.switch_generation.load(Ordering::SeqCst) != generation
                || self.active_session_id().as_deref() != Some(session_id.as_str());
            if moved || self.is_processing() {
                tracing::debug!("[session] send dropped, {} is no longer shown", session_id);
                lock(&self.state.run).attached_images = msg.images().cloned().collect();
                return Ok(StreamOutcome::Skipped);
            }
            messages.push(msg);
            let mut area = lock(&self.state.view);
            area.push(view, false);
            area.set_pending_images(Vec::new());
        }
        let title_source = if text.is_empty() { IMAGE_ONLY_TITLE } else { text.as_str() };
        self.update_title_if_needed(title_source)?;
        self.save_current_session()?;
        self.refresh_sidebar().await?;
        {
            lock(&self.state.run).auto_scroll = true;
            lock(&self.state.view).scroll_to_bottom();
        }

        self.perform_request(None).await
    }

    fn is_streaming_target(&self, id: &str) -> bool {
        self.is_processing()
            && lock(&self.state.run).streaming_message_id.as_deref() == Some(id)
    }

    pub fn delete_message(&self, id: &str) -> Result<bool> {
        if self.is_streaming_target(id) {
            return Ok(false);
        }
        let removed = {
            let mut messages = lock(&self.state.messages);
            let before = messages.len();
            messages.retain(|m| m.id != id);
            before != messages.len()
        };
        if !removed {
            return Ok(false);
        }
        lock(&self.state.view).remove(id);
        self.save_current_session()?;
        Ok(true)
    }

    /// Re-stream an existing reply in place.
    pub async fn regenerate_message(&self, id: &str) -> Result<StreamOutcome> {
        if self.is_processing() {
            return Ok(StreamOutcome::Skipped);
        }
        self.perform_request(Some(id)).await
    }

    /// Regenerate the reply to user message `id`, inserting one if it has none.
    pub async fn regenerate_following_user_message(&self, id: &str) -> Result<StreamOutcome> {
        if self.is_processing() {
            return Ok(StreamOutcome::Skipped);
        }

        let next = {
            let messages = lock(&self.state.messages);
            let Some(idx) = messages.iter().position(|m| m.id == id) else {
                return Ok(StreamOutcome::Skipped);
            };
            messages.get(idx + 1).map(|m| (m.id.clone(), m.role))
        };

        if let Some((next_id, Role::Assistant)) = next {
            return self.perform_request(Some(&next_id)).await;
        }

        let model = lock(&self.state.settings).last_model.clone();
        let reply = Message::assistant(model);
        let reply_id = reply.id.clone();
        let view = self.build_view(&reply).await?;
        {
            let mut messages = lock(&self.state.messages);
            let Some(idx) = messages.iter().position(|m| m.id == id) else {
                return Ok(StreamOutcome::Skipped);
            };
            messages.insert(idx + 1, reply);
        }
        lock(&self.state.view).insert_after(id, view);
        self.save_current_session()?;

        self.perform_request(Some(&reply_id)).await
    }

    pub fn toggle_collapse(&self, id: &str) -> Result<Option<bool>> {
        let collapsed = {
            let mut messages = lock(&self.state.messages);
            let Some(msg) = messages.iter_mut().find(|m| m.id == id) else {
                return Ok(None);
            };
            msg.is_collapsed = !msg.is_collapsed;
            msg.is_collapsed
        };
        {
            let mut area = lock(&self.state.view);
            if let Some(view) = area.get_mut(id) {
                view.collapsed = collapsed;
            }
            area.set_minimap_collapsed(id, collapsed);
        }
        self.save_current_session()?;
        Ok(Some(collapsed))
    }

    /// Switch a message between rendered HTML and its editable source.
    ///
    /// Leaving raw mode first stores `edited` (or the text currently shown)
    /// when it differs from the message. Returns the new "rendered" state.
    pub async fn toggle_raw(&self, id: &str, edited: Option<&str>) -> Result<Option<bool>> {
        if self.is_streaming_target(id) {
            return Ok(None);
        }
        let Some(showing_rendered) = lock(&self.state.view).get(id).map(|v| v.rendered) else {
            return Ok(None);
        };

        let msg = {
            let mut messages = lock(&self.state.messages);
            let Some(msg) = messages.iter_mut().find(|m| m.id == id) else {
                return Ok(None);
            };
            if !showing_rendered {
                let shown = match edited {
                    Some(text) => text.to_string(),
                    None => lock(&self.state.view)
                        .get(id)
                        .map(|v| v.content_text())
                        .unwrap_or_default(),
                };
                if shown != msg.primary_text() {
                    msg.set_primary_text(&shown);
                }
            }
            msg.is_raw = Some(showing_rendered);
            msg.clone()
        };

        let rendered = !showing_rendered;
        let html = if rendered {
            self.state.renderer.render(&msg.content, true).await?
        } else {
            msg.primary_text().to_string()
        };
        if let Some(view) = lock(&self.state.view).get_mut(id) {
            view.rendered = rendered;
            view.set_content(&html);
        }

        self.save_current_session()?;
        Ok(Some(rendered))
    }

    /// Replace the first text block, as typed into a raw message.
    pub fn edit_message_text(&self, id: &str, text: &str) -> Result<bool> {
        if self.is_streaming_target(id) {
            return Ok(false);
        }
        {
            let mut messages = lock(&self.state.messages);
            let Some(msg) = messages.iter_mut().find(|m| m.id == id) else {
                return Ok(false);
            };
            msg.set_primary_text(text);
        }
        if let Some(view) = lock(&self.state.view).get_mut(id) {
            if !view.rendered {
                view.set_content(text);
            }
        }
        self.save_current_session()?;
        Ok(true)
    }

    // ==================== Images ====================

    /// Queue an image for the next message. Exact duplicates are skipped.
    pub fn attach_image(&self, bytes: &[u8], file_name: &str) -> Result<bool> {
        let block = images::image_block(bytes, file_name)?;
        let (added, previews) = {
            let mut run = lock(&self.state.run);
            let added = images::push_unique(&mut run.attached_images, block);
            let previews: Vec<ImagePreview> = run
                .attached_images
                .iter()
                .filter_map(ImagePreview::from_block)
                .collect();
            (added, previews)
        };
        lock(&self.state.view).set_pending_images(previews);
        Ok(added)
    }

    pub fn remove_pending_image(&self, image_id: &str) -> bool {
        let (removed, previews) = {
            let mut run = lock(&self.state.run);
            let before = run.attached_images.len();
            run.attached_images.retain(|b| b.image_id() != Some(image_id));
            let previews: Vec<ImagePreview> = run
                .attached_images
                .iter()
                .filter_map(ImagePreview::from_block)
                .collect();
            (before != run.attached_images.len(), previews)
        };
        lock(&self.state.view).set_pending_images(previews);
        removed
    }

    pub fn remove_message_image(&self, message_id: &str, image_id: &str) -> Result<bool> {
        if self.is_processing() {
            return Ok(false);
        }
        let removed = {
            let mut messages = lock(&self.state.messages);
            let Some(msg) = messages.iter_mut().find(|m| m.id == message_id) else {
                return Ok(false);
            };
            let before = msg.content.len();
            msg.content.retain(|b| b.image_id() != Some(image_id));
            before != msg.content.len()
        };
        if !removed {
            return Ok(false);
        }
        if let Some(view) = lock(&self.state.view).get_mut(message_id) {
            view.images.retain(|img| img.id != image_id);
        }
        self.save_current_session()?;
        Ok(true)
    }

    // ==================== Backup ====================

    pub fn export_all(&self) -> Result<Backup> {
        Backup::full(&self.state.store)
    }

    pub fn export_current_session(&self) -> Result<Backup> {
        let id = self.require_active()?;
        let session = self
            .session(&id)
            .ok_or_else(|| ChatError::SessionNotFound(id.clone()))?;
        let messages = self.state.store.get_session_messages(&id)?;
        Ok(Backup::single(&self.state.store, session, messages))
    }

    /// Validate and import a backup, then reload settings, the index and the view.
    pub async fn import_backup(&self, text: &str, mode: ImportMode) -> Result<ImportReport> {
        let backup = Backup::from_json(text)?;
        let report = backup.import_into(&self.state.store, mode)?;
        tracing::info!(
            "[session] imported {} sessions, {} chats, {} config entries",
            report.sessions,
            report.chats,
            report.config_entries
        );

        let reloaded = Settings::load(&self.state.store)?;
        *lock(&self.state.settings) = reloaded;
        lock(&self.state.endpoint).take();
        if let Some(last) = report.new_session_ids.last() {
            self.update_config(ConfigUpdate::LastSessionId(Some(last.clone())))?;
        }

        self.reload_sessions()?;
        lock(&self.state.run).displayed_session = None;
        self.open_initial_session().await?;
        Ok(report)
    }

    // ==================== Models ====================

    pub fn set_model(&self, model: &str) -> Result<()> {
        self.update_config(ConfigUpdate::LastModel(Some(model.to_string())))
    }

    /// Fetch the model list; returns `(priority matches, all models)`.
    pub async fn list_models(&self) -> Result<(Vec<ModelInfo>, Vec<ModelInfo>)> {
        let models = self.endpoint().list_models().await?;
        let (priority, last) = {
            let settings = lock(&self.state.settings);
            (settings.priority_models().to_vec(), settings.last_model.clone())
        };
        let (preferred, all) = order_models(&models, &priority);

        let offered: Vec<ModelInfo> = preferred.iter().chain(all.iter()).cloned().collect();
        if let Some(pick) = pick_model(&offered, last.as_deref()) {
            if last.as_deref() != Some(pick.as_str()) {
                self.set_model(&pick)?;
            }
        }
        *lock(&self.state.models) = all.clone();
        Ok((preferred, all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_title_collapses_and_truncates() {
        assert_eq!(auto_title("  hello \n\t world  "), "hello world");
        let long = "x".repeat(60);
        assert_eq!(auto_title(&long).chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn clean_title_falls_back() {
        assert_eq!(clean_title("  a   b ", "old"), "a b");
        assert_eq!(clean_title("   ", "old"), "old");
        assert_eq!(clean_title("", ""), UNTITLED_SESSION);
        assert_eq!(clean_title(&"y".repeat(80), "old").chars().count(), 47);
    }

    #[test]
    fn fork_titles_count_up() {
        assert_eq!(fork_title("Rust"), "[Fork] Rust");
        assert_eq!(fork_title("[Fork] Rust"), "[Fork 1] Rust");
        assert_eq!(fork_title("[Fork 1] Rust"), "[Fork 2] Rust");
        assert_eq!(fork_title(""), "[Fork] New Session");
    }

    #[test]
    fn clean_input_keeps_indentation() {
        assert_eq!(clean_input("\n\n    code\n  "), "    code");
        assert_eq!(clean_input("  hi  "), "  hi");
        assert_eq!(clean_input(" \n \n"), "");
    }
}
