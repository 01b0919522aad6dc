// src/endpoint/local.rs

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::openai::OpenAiEndpoint;
use super::{ChatEndpoint, DeltaStream, KeyRing};
use crate::error::Result;
use crate::server::wait_for_server_ready;
use crate::types::{ModelInfo, OpenAIMessage};

const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// A llama-server (or compatible) process on this machine. No credentials.
pub struct LocalServerEndpoint {
    server_url: String,
    inner: OpenAiEndpoint,
}

impl LocalServerEndpoint {
    pub fn new(server_url: &str) -> Self {
        let server_url = server_url.trim_end_matches('/').to_string();
        Self {
            inner: OpenAiEndpoint::named(
                "Local",
                &format!("{}/v1", server_url),
                KeyRing::new(Vec::new()),
            ),
            server_url,
        }
    }

    async fn ensure_ready(&self) -> Result<()> {
        wait_for_server_ready(self.inner.client(), &self.server_url, READY_TIMEOUT).await
    }
}

#[async_trait]
impl ChatEndpoint for LocalServerEndpoint {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.ensure_ready().await?;
        self.inner.list_models().await
    }

    async fn chat(
        &self,
        messages: Vec<OpenAIMessage>,
        model: &str,
        cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        self.ensure_ready().await?;
        self.inner.chat(messages, model, cancel).await
    }
}
