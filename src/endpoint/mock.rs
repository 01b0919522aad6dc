// src/endpoint/mock.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{ChatDelta, ChatEndpoint, DeltaStream};
use crate::error::{ChatError, Result};
use crate::types::{ModelInfo, OpenAIMessage};

/// One scripted event of a fake reply stream.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Delta(ChatDelta),
    /// A frame that fails to decode; yields `MalformedChunk`.
    Malformed(String),
    /// A transport failure; the stream ends after it.
    Fail(String),
    Pause(Duration),
    /// Block until the test calls `Notify::notify_one`.
    Wait(Arc<Notify>),
}

/// Endpoint that replays a fixed script for every `chat` call.
///
/// Tests can inspect how often it was called and what history it received,
/// and can make it trip the cancellation token right after delivering a chunk.
#[derive(Default)]
pub struct ScriptedEndpoint {
    models: Vec<ModelInfo>,
    steps: Vec<ScriptStep>,
    cancel_after: Option<usize>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, Vec<OpenAIMessage>)>>,
}

impl ScriptedEndpoint {
    /// Plain text chunks.
    pub fn new(chunks: &[&str]) -> Self {
        Self::from_steps(
            chunks
                .iter()
                .map(|c| ScriptStep::Delta(ChatDelta::text(c)))
                .collect(),
        )
    }

    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            models: vec![ModelInfo::new("mock-model")],
            steps,
            ..Default::default()
        }
    }

    pub fn with_models(mut self, ids: &[&str]) -> Self {
        self.models = ids.iter().map(|id| ModelInfo::new(*id)).collect();
        self
    }

    /// Cancel the caller's token as soon as delta number `k` (1-based) is handed out.
    pub fn cancel_after(mut self, k: usize) -> Self {
        self.cancel_after = Some(k);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<(String, Vec<OpenAIMessage>)> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }
}

struct Replay {
    steps: std::vec::IntoIter<ScriptStep>,
    cancel: CancellationToken,
    cancel_after: Option<usize>,
    delivered: usize,
    failed: bool,
}

async fn replay_next(mut state: Replay) -> Option<(Result<ChatDelta>, Replay)> {
    loop {
        if state.failed || state.cancel.is_cancelled() {
            return None;
        }
        match state.steps.next()? {
            ScriptStep::Delta(delta) => {
                state.delivered += 1;
                if state.cancel_after == Some(state.delivered) {
                    state.cancel.cancel();
                }
                return Some((Ok(delta), state));
            }
            ScriptStep::Malformed(frame) => {
                return Some((Err(ChatError::MalformedChunk(frame)), state));
            }
            ScriptStep::Fail(message) => {
                state.failed = true;
                return Some((Err(ChatError::transport(message)), state));
            }
            ScriptStep::Pause(duration) => {
                tokio::select! {
                    _ = state.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(duration) => {}
                }
            }
            ScriptStep::Wait(gate) => {
                tokio::select! {
                    _ = state.cancel.cancelled() => return None,
                    _ = gate.notified() => {}
                }
            }
        }
    }
}

#[async_trait]
impl ChatEndpoint for ScriptedEndpoint {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self.models.clone())
    }

    async fn chat(
        &self,
        messages: Vec<OpenAIMessage>,
        model: &str,
        cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((model.to_string(), messages));
        }

        let state = Replay {
            steps: self.steps.clone().into_iter(),
            cancel,
            cancel_after: self.cancel_after,
            delivered: 0,
            failed: false,
        };
        Ok(stream::unfold(state, replay_next).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_and_records_request() {
        let endpoint = ScriptedEndpoint::new(&["a", "b"]);
        let stream = endpoint
            .chat(Vec::new(), "m", CancellationToken::new())
            .await
            .unwrap();
        let deltas: Vec<ChatDelta> = stream.map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas, vec![ChatDelta::text("a"), ChatDelta::text("b")]);
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(endpoint.last_request().unwrap().0, "m");
    }

    #[tokio::test]
    async fn cancel_after_stops_the_stream() {
        let endpoint = ScriptedEndpoint::new(&["a", "b", "c"]).cancel_after(1);
        let token = CancellationToken::new();
        let stream = endpoint.chat(Vec::new(), "m", token.clone()).await.unwrap();
        let deltas: Vec<Result<ChatDelta>> = stream.collect().await;
        assert_eq!(deltas.len(), 1);
        assert!(token.is_cancelled());
    }
}
