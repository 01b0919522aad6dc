// src/endpoint/mod.rs

pub mod local;
pub mod mock;
pub mod openai;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::settings::{ModelService, Settings};
use crate::types::{ModelInfo, OpenAIMessage};

/// One increment of a streamed reply. Either field may be empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatDelta {
    pub text: String,
    pub reasoning: String,
}

impl ChatDelta {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            reasoning: String::new(),
        }
    }

    pub fn reasoning(reasoning: &str) -> Self {
        Self {
            text: String::new(),
            reasoning: reasoning.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.reasoning.is_empty()
    }
}

/// Lazy, finite, non-restartable sequence of deltas. The stream ends after the
/// end-of-stream marker; a cancelled token ends it early.
pub type DeltaStream = BoxStream<'static, Result<ChatDelta>>;

#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    fn name(&self) -> &str;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    async fn chat(
        &self,
        messages: Vec<OpenAIMessage>,
        model: &str,
        cancel: CancellationToken,
    ) -> Result<DeltaStream>;
}

/// Round-robin over configured API keys, starting at a random position.
pub struct KeyRing {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Self {
        let keys: Vec<String> = keys.into_iter().filter(|k| !k.trim().is_empty()).collect();
        let start = if keys.is_empty() {
            0
        } else {
            (uuid::Uuid::new_v4().as_u128() % keys.len() as u128) as usize
        };
        Self {
            keys,
            cursor: AtomicUsize::new(start),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn next_key(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % self.keys.len();
        Some(&self.keys[idx])
    }
}

/// Build the endpoint selected by `modelService`.
pub fn endpoint_from_settings(settings: &Settings) -> Arc<dyn ChatEndpoint> {
    match settings.model_service {
        ModelService::OpenAiApi => Arc::new(openai::OpenAiEndpoint::new(
            &settings.openai_api_endpoint,
            KeyRing::new(settings.openai_api_key.clone()),
        )),
        ModelService::Local => Arc::new(local::LocalServerEndpoint::new(&settings.local_server_url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn key_ring_visits_every_key() {
        let ring = KeyRing::new(vec!["a".into(), "".into(), "b".into(), "c".into()]);
        assert_eq!(ring.len(), 3);

        let first: Vec<String> = (0..3).map(|_| ring.next_key().unwrap().to_string()).collect();
        let unique: HashSet<&String> = first.iter().collect();
        assert_eq!(unique.len(), 3);

        let second: Vec<String> = (0..3).map(|_| ring.next_key().unwrap().to_string()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_ring_has_no_key() {
        assert!(KeyRing::new(Vec::new()).next_key().is_none());
    }

    #[test]
    fn factory_follows_model_service() {
        let mut settings = Settings::default();
        assert_eq!(endpoint_from_settings(&settings).name(), "OpenAI-API");
        settings.model_service = ModelService::Local;
        assert_eq!(endpoint_from_settings(&settings).name(), "Local");
    }
}
