// src/streaming.rs

use std::sync::atomic::Ordering;

use futures::StreamExt;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};
use crate::reconcile;
use crate::state::{lock, ChatClient, FRAME_INTERVAL, STATS_TICK, THINK_CLOSE_DELAY};
use crate::types::{ContentBlock, Message, OpenAIMessage, Role};
use crate::view::{MessageView, StatsTone};

pub const STOPPED: &str = "STOPPED";
pub const FAIL: &str = "FAIL";

/// Chars per token used for the throughput estimate.
const CHARS_PER_TOKEN: f64 = 2.5;

#[derive(Debug)]
pub enum StreamOutcome {
    /// Nothing was streamed: busy, switching, or the target is gone.
    Skipped,
    Completed { message_id: String, stats: String },
    Stopped { message_id: String },
    Failed { message_id: String, error: ChatError },
}

impl StreamOutcome {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            StreamOutcome::Skipped => None,
            StreamOutcome::Completed { message_id, .. }
            | StreamOutcome::Stopped { message_id }
            | StreamOutcome::Failed { message_id, .. } => Some(message_id),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StreamOutcome::Skipped)
    }
}

// ==================== Stats ====================

pub fn estimate_tokens(text: &str, reasoning: &str) -> u64 {
    let chars = (text.chars().count() + reasoning.chars().count()) as f64;
    (chars / CHARS_PER_TOKEN).max(1.0).ceil() as u64
}

/// `"<load>s | <run>s | <tps> T/s"`, all rounded to whole numbers.
pub fn format_stats(load_secs: f64, run_secs: f64, tokens: u64) -> String {
    let tps = if run_secs > 0.0 {
        (tokens as f64 / run_secs).round() as u64
    } else {
        tokens
    };
    format!(
        "{}s | {}s | {} T/s",
        load_secs.round() as u64,
        run_secs.round() as u64,
        tps
    )
}

fn live_stats(started: Instant, first_token: Option<Instant>, now: Instant) -> String {
    match first_token {
        None => format!("{:.1}s [Load]", (now - started).as_secs_f64()),
        Some(first) => format!(
            "{:.1}s | {:.1}s [Run]",
            (first - started).as_secs_f64(),
            (now - first).as_secs_f64()
        ),
    }
}

// ==================== Frame pacing ====================

/// At most one render per frame interval; bursts in between are coalesced.
#[derive(Default)]
struct FrameClock {
    last: Option<Instant>,
}

impl FrameClock {
    fn due(&self, now: Instant) -> Instant {
        match self.last {
            Some(last) => (last + FRAME_INTERVAL).max(now),
            None => now,
        }
    }

    fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

/// Open on the first reasoning delta, close once after the answer starts.
/// Never reopens on its own.
#[derive(Default)]
struct ThinkLatch {
    pending_open: bool,
    opened: bool,
    close_at: Option<Instant>,
    closed: bool,
}

impl ThinkLatch {
    fn on_reasoning(&mut self) {
        if !self.opened && !self.closed {
            self.pending_open = true;
        }
    }

    fn on_text(&mut self, now: Instant) {
        if self.close_at.is_none() && !self.closed {
            self.close_at = Some(now + THINK_CLOSE_DELAY);
        }
    }

    /// Apply pending transitions to the think block, if it is rendered yet.
    fn apply(&mut self, view: &mut MessageView, now: Instant) {
        let close_due = self.close_at.is_some_and(|at| at <= now);
        let Some(block) = view.think_block_mut() else {
            if close_due {
                // Answer started before any reasoning was drawn; nothing to open or close.
                self.pending_open = false;
                self.close_at = None;
                self.closed = true;
            }
            return;
        };
        if self.pending_open && !close_due {
            block.set_attr("open", "");
            self.pending_open = false;
            self.opened = true;
        }
        if close_due && !self.closed {
            block.remove_attr("open");
            self.pending_open = false;
            self.close_at = None;
            self.closed = true;
        }
    }

    /// End of stream: a close that has not fired yet fires now.
    fn settle(&mut self, view: &mut MessageView) {
        if self.close_at.is_some() || self.opened {
            if let Some(block) = view.think_block_mut() {
                block.remove_attr("open");
            }
        }
        self.pending_open = false;
        self.close_at = None;
        self.closed = true;
    }
}

// ==================== Orchestrator ====================

/// Clears the busy state however the stream ends.
struct ProcessingGuard<'a> {
    client: &'a ChatClient,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        {
            let mut run = lock(&self.client.state.run);
            run.abort = None;
            run.streaming_message_id = None;
        }
        lock(&self.client.state.view).clear_processing();
        self.client
            .state
            .is_processing
            .store(false, Ordering::SeqCst);
    }
}

enum Ending {
    Completed,
    Stopped,
    Failed(ChatError),
}

struct Accumulated {
    text: String,
    reasoning: String,
    started: Instant,
    first_token: Option<Instant>,
}

impl ChatClient {
    /// Cancel the in-flight stream. Returns false when nothing is streaming.
    pub fn stop_generation(&self) -> bool {
        match lock(&self.state.run).abort.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stream a reply into `target` (an existing assistant message, regenerated
    /// in place) or into a new assistant message appended to the thread.
    pub(crate) async fn perform_request(&self, target: Option<&str>) -> Result<StreamOutcome> {
        if self
            .state
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(StreamOutcome::Skipped);
        }
        let _guard = ProcessingGuard { client: self };
        if self.is_switching() {
            return Ok(StreamOutcome::Skipped);
        }

        let session_id = self.require_active()?;
        let model = lock(&self.state.settings)
            .last_model
            .clone()
            .unwrap_or_default();

        let Some((message_id, history)) = self.prepare_target(target, &model)? else {
            return Ok(StreamOutcome::Skipped);
        };

        let token = CancellationToken::new();
        {
            let mut run = lock(&self.state.run);
            run.abort = Some(token.clone());
            run.streaming_message_id = Some(message_id.clone());
        }
        {
            let mut area = lock(&self.state.view);
            area.set_busy(true);
            if let Some(view) = area.get_mut(&message_id) {
                view.processing = true;
                view.stats = live_stats(Instant::now(), None, Instant::now());
                view.stats_tone = StatsTone::Normal;
            }
        }

        tracing::info!(
            "[stream] {} -> {} ({} history messages)",
            message_id,
            if model.is_empty() { "<no model>" } else { &model },
            history.len()
        );

        let mut acc = Accumulated {
            text: String::new(),
            reasoning: String::new(),
            started: Instant::now(),
            first_token: None,
        };
        let mut latch = ThinkLatch::default();
        let ending = self
            .consume(&message_id, history, &model, &token, &mut acc, &mut latch)
            .await;

        self.commit(&session_id, &message_id, &model, acc, latch, ending)
            .await
    }

    /// Resolve the message to stream into and the history sent with it.
    fn prepare_target(
        &self,
        target: Option<&str>,
        model: &str,
    ) -> Result<Option<(String, Vec<OpenAIMessage>)>> {
        match target {
            Some(id) => {
                let history = {
                    let mut messages = lock(&self.state.messages);
                    let Some(idx) = messages.iter().position(|m| m.id == id) else {
                        return Ok(None);
                    };
                    if messages[idx].role != Role::Assistant {
                        return Ok(None);
                    }
                    messages[idx].model = Some(model.to_string());
                    messages[..idx]
                        .iter()
                        .map(OpenAIMessage::from)
                        .collect::<Vec<_>>()
                };
                if let Some(view) = lock(&self.state.view).get_mut(id) {
                    view.label = model.to_uppercase();
                    view.rendered = true;
                    view.set_content("");
                }
                Ok(Some((id.to_string(), history)))
            }
            None => {
                let reply = Message::assistant(Some(model.to_string()));
                let id = reply.id.clone();
                let view = MessageView::new(&reply);
                let history = {
                    let mut messages = lock(&self.state.messages);
                    let history = messages.iter().map(OpenAIMessage::from).collect::<Vec<_>>();
                    messages.push(reply);
                    history
                };
                let scroll = lock(&self.state.run).auto_scroll;
                lock(&self.state.view).push(view, scroll);
                Ok(Some((id, history)))
            }
        }
    }

    async fn consume(
        &self,
        message_id: &str,
        history: Vec<OpenAIMessage>,
        model: &str,
        token: &CancellationToken,
        acc: &mut Accumulated,
        latch: &mut ThinkLatch,
    ) -> Ending {
        let endpoint = self.endpoint();
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Ending::Stopped,
            opened = endpoint.chat(history, model, token.clone()) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return Ending::Failed(e),
        };

        let mut clock = FrameClock::default();
        let mut dirty = false;
        let mut ticker = time::interval(STATS_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let now = Instant::now();
            let frame_at = clock.due(now);
            let close_at = latch.close_at.unwrap_or(now);
            let closing = latch.close_at.is_some();

            tokio::select! {
                biased;
                _ = token.cancelled() => return Ending::Stopped,
                _ = time::sleep_until(frame_at), if dirty => {
                    let now = Instant::now();
                    clock.mark(now);
                    dirty = false;
                    self.render_frame(message_id, acc, latch, now).await;
                }
                _ = time::sleep_until(close_at), if closing => {
                    let mut area = lock(&self.state.view);
                    if let Some(view) = area.get_mut(message_id) {
                        latch.apply(view, Instant::now());
                    }
                }
                item = stream.next() => match item {
                    Some(Ok(delta)) => {
                        if delta.is_empty() {
                            continue;
                        }
                        let now = Instant::now();
                        acc.first_token.get_or_insert(now);
                        if !delta.reasoning.is_empty() {
                            acc.reasoning.push_str(&delta.reasoning);
                            latch.on_reasoning();
                        }
                        if !delta.text.is_empty() {
                            acc.text.push_str(&delta.text);
                            latch.on_text(now);
                        }
                        dirty = true;
                    }
                    Some(Err(e)) if e.is_malformed_chunk() => {
                        tracing::warn!("[stream] skipping malformed chunk: {}", e);
                    }
                    Some(Err(e)) => return Ending::Failed(e),
                    None if token.is_cancelled() => return Ending::Stopped,
                    None => return Ending::Completed,
                },
                _ = ticker.tick() => {
                    let stats = live_stats(acc.started, acc.first_token, Instant::now());
                    let mut area = lock(&self.state.view);
                    if let Some(view) = area.get_mut(message_id) {
                        view.stats = stats;
                    }
                }
            }
        }
    }

    /// Render the accumulated reply and morph it into the live view.
    async fn render_frame(
        &self,
        message_id: &str,
        acc: &Accumulated,
        latch: &mut ThinkLatch,
        now: Instant,
    ) {
        let blocks = [ContentBlock::reply(acc.text.clone(), acc.reasoning.clone())];
        let html = match self.state.renderer.render(&blocks, true).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("[stream] render failed: {}", e);
                return;
            }
        };
        let auto_scroll = lock(&self.state.run).auto_scroll;
        let mut area = lock(&self.state.view);
        if let Some(view) = area.get_mut(message_id) {
            reconcile::patch(&mut view.content, &html);
            latch.apply(view, now);
            view.stats = live_stats(acc.started, acc.first_token, now);
        }
        if auto_scroll {
            area.scroll_to_bottom();
        }
    }

    /// Final render plus one write of the whole thread, for every ending.
    async fn commit(
        &self,
        session_id: &str,
        message_id: &str,
        model: &str,
        acc: Accumulated,
        mut latch: ThinkLatch,
        ending: Ending,
    ) -> Result<StreamOutcome> {
        let finished = Instant::now();
        let (load, run) = match acc.first_token {
            Some(first) => (
                (first - acc.started).as_secs_f64(),
                (finished - first).as_secs_f64(),
            ),
            None => ((finished - acc.started).as_secs_f64(), 0.0),
        };
        let tokens = estimate_tokens(&acc.text, &acc.reasoning);
        let (stats, tone) = match &ending {
            Ending::Completed => (format_stats(load, run, tokens), StatsTone::Normal),
            Ending::Stopped => (STOPPED.to_string(), StatsTone::Stopped),
            Ending::Failed(_) => (FAIL.to_string(), StatsTone::Failed),
        };

        let reply = ContentBlock::reply(acc.text, acc.reasoning);
        let html = match self
            .state
            .renderer
            .render(std::slice::from_ref(&reply), true)
            .await
        {
            Ok(html) => Some(html),
            Err(e) => {
                tracing::warn!("[stream] final render failed: {}", e);
                None
            }
        };

        let messages = {
            let mut messages = lock(&self.state.messages);
            if let Some(msg) = messages.iter_mut().find(|m| m.id == message_id) {
                msg.content = vec![reply];
                msg.model = Some(model.to_string());
                msg.stats = Some(stats.clone());
                msg.is_raw = None;
            }
            messages.clone()
        };
        {
            let mut area = lock(&self.state.view);
            if let Some(view) = area.get_mut(message_id) {
                if let Some(html) = &html {
                    reconcile::patch(&mut view.content, html);
                }
                latch.settle(view);
                view.stats = stats.clone();
                view.stats_tone = tone;
            }
        }
        self.state
            .store
            .save_session_messages(session_id, &messages)?;

        Ok(match ending {
            Ending::Completed => {
                tracing::info!("[stream] {} done: {}", message_id, stats);
                StreamOutcome::Completed {
                    message_id: message_id.to_string(),
                    stats,
                }
            }
            Ending::Stopped => {
                tracing::info!("[stream] {} stopped", message_id);
                StreamOutcome::Stopped {
                    message_id: message_id.to_string(),
                }
            }
            Ending::Failed(error) => {
                tracing::warn!("[stream] {} failed: {}", message_id, error);
                StreamOutcome::Failed {
                    message_id: message_id.to_string(),
                    error,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::html::Element;

    #[test]
    fn token_estimate_has_a_floor_of_one() {
        assert_eq!(estimate_tokens("", ""), 1);
        assert_eq!(estimate_tokens("abcde", ""), 2);
        assert_eq!(estimate_tokens("abc", "de"), 2);
        assert_eq!(estimate_tokens("héllo", ""), 2);
    }

    #[test]
    fn stats_are_whole_numbers() {
        assert_eq!(format_stats(0.4, 2.0, 10), "0s | 2s | 5 T/s");
        assert_eq!(format_stats(1.6, 0.0, 7), "2s | 0s | 7 T/s");
    }

    #[test]
    fn live_marker_switches_phase() {
        let start = Instant::now();
        let later = start + std::time::Duration::from_millis(1500);
        assert_eq!(live_stats(start, None, later), "1.5s [Load]");
        let first = start + std::time::Duration::from_millis(500);
        assert_eq!(live_stats(start, Some(first), later), "0.5s | 1.0s [Run]");
    }

    #[test]
    fn frame_clock_spaces_renders() {
        let now = Instant::now();
        let mut clock = FrameClock::default();
        assert_eq!(clock.due(now), now);
        clock.mark(now);
        assert_eq!(clock.due(now), now + FRAME_INTERVAL);
    }

    fn view_with_think() -> MessageView {
        let mut view = MessageView::new(&Message::assistant(Some("m".into())));
        view.content = Element::new("div");
        view.content.set_inner_html(
            "<details class=\"think __pChat__\"><summary>[THINK]</summary><p>hm</p></details>",
        );
        view
    }

    #[test]
    fn think_latch_opens_then_closes_once() {
        let mut view = view_with_think();
        let mut latch = ThinkLatch::default();
        let t0 = Instant::now();

        latch.on_reasoning();
        latch.apply(&mut view, t0);
        assert!(view.think_block().unwrap().has_attr("open"));

        latch.on_text(t0);
        latch.apply(&mut view, t0 + THINK_CLOSE_DELAY / 2);
        assert!(view.think_block().unwrap().has_attr("open"));

        latch.apply(&mut view, t0 + THINK_CLOSE_DELAY);
        assert!(!view.think_block().unwrap().has_attr("open"));

        latch.on_reasoning();
        latch.apply(&mut view, t0 + THINK_CLOSE_DELAY * 2);
        assert!(!view.think_block().unwrap().has_attr("open"));
    }

    #[test]
    fn settle_closes_a_pending_block() {
        let mut view = view_with_think();
        let mut latch = ThinkLatch::default();
        let t0 = Instant::now();
        latch.on_reasoning();
        latch.apply(&mut view, t0);
        latch.on_text(t0);
        latch.settle(&mut view);
        assert!(!view.think_block().unwrap().has_attr("open"));
    }
}
