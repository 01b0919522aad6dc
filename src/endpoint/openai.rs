// src/endpoint/openai.rs

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest_eventsource::{Event, EventSource};
use tokio_util::sync::CancellationToken;

use super::{ChatDelta, ChatEndpoint, DeltaStream, KeyRing};
use crate::error::{ChatError, Result};
use crate::types::{
    normalize_models, ModelInfo, OpenAIErrorBody, OpenAIMessage, OpenAIModelList, OpenAIRequest,
    OpenAIStreamResponse,
};

/// Any server speaking the OpenAI chat-completions protocol.
pub struct OpenAiEndpoint {
    name: &'static str,
    base_url: String,
    keys: KeyRing,
    client: reqwest::Client,
}

impl OpenAiEndpoint {
    pub fn new(base_url: &str, keys: KeyRing) -> Self {
        Self::named("OpenAI-API", base_url, keys)
    }

    pub fn named(name: &'static str, base_url: &str, keys: KeyRing) -> Self {
        Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
            client: reqwest::Client::new(),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn url(&self, path: &str) -> Result<String> {
        if self.base_url.is_empty() {
            return Err(ChatError::Config("API endpoint is not configured".to_string()));
        }
        Ok(format!("{}/{}", self.base_url, path))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.keys.next_key() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

/// Error message from a failed response body, falling back to the status line.
async fn error_from_response(response: reqwest::Response) -> ChatError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<OpenAIErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| "OpenAI API Request Failed".to_string());
    ChatError::Http {
        status: status.as_u16(),
        message,
    }
}

/// Decode one `data:` payload. A payload without choices is an empty delta.
pub fn parse_chunk(data: &str) -> Result<ChatDelta> {
    let parsed: OpenAIStreamResponse =
        serde_json::from_str(data).map_err(|e| ChatError::MalformedChunk(e.to_string()))?;
    Ok(parsed
        .choices
        .first()
        .map(|choice| ChatDelta {
            text: choice.delta.content.clone().unwrap_or_default(),
            reasoning: choice.delta.reasoning_text(),
        })
        .unwrap_or_default())
}

struct SseState {
    events: EventSource,
    cancel: CancellationToken,
    finished: bool,
}

impl SseState {
    fn finish(&mut self) {
        self.events.close();
        self.finished = true;
    }
}

async fn next_delta(mut state: SseState) -> Option<(Result<ChatDelta>, SseState)> {
    if state.finished {
        return None;
    }
    loop {
        let event = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => {
                state.finish();
                return None;
            }
            event = state.events.next() => event,
        };

        match event {
            None => return None,
            Some(Ok(Event::Open)) => continue,
            Some(Ok(Event::Message(msg))) => {
                let data = msg.data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    state.finish();
                    return None;
                }
                let delta = parse_chunk(data);
                return Some((delta, state));
            }
            Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                state.finish();
                return None;
            }
            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(_, response))) => {
                state.finish();
                return Some((Err(error_from_response(response).await), state));
            }
            Some(Err(err)) => {
                state.finish();
                return Some((Err(ChatError::transport(err.to_string())), state));
            }
        }
    }
}

#[async_trait]
impl ChatEndpoint for OpenAiEndpoint {
    fn name(&self) -> &str {
        self.name
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .authorize(self.client.get(self.url("models")?))
            .header("Content-Type", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let list: OpenAIModelList = response.json().await?;
        Ok(normalize_models(
            list.data.into_iter().map(|m| ModelInfo::new(m.id)).collect(),
        ))
    }

    async fn chat(
        &self,
        messages: Vec<OpenAIMessage>,
        model: &str,
        cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        let body = OpenAIRequest {
            model,
            messages: &messages,
            stream: true,
        };
        let request = self
            .authorize(self.client.post(self.url("chat/completions")?))
            .header("Content-Type", "application/json")
            .json(&body);

        let events = EventSource::new(request).map_err(|e| ChatError::transport(e.to_string()))?;
        tracing::debug!("[{}] streaming {} messages to {}", self.name, messages.len(), model);

        let state = SseState {
            events,
            cancel,
            finished: false,
        };
        Ok(stream::unfold(state, next_delta).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_and_reasoning() {
        let delta = parse_chunk(r#"{"choices":[{"delta":{"content":"Hi","reasoning_content":"hm"}}]}"#)
            .unwrap();
        assert_eq!(delta.text, "Hi");
        assert_eq!(delta.reasoning, "hm");
    }

    #[test]
    fn empty_choices_are_an_empty_delta() {
        assert!(parse_chunk(r#"{"choices":[]}"#).unwrap().is_empty());
    }

    #[test]
    fn broken_json_is_a_malformed_chunk() {
        let err = parse_chunk(r#"{"choices":[{"delta":"#).unwrap_err();
        assert!(err.is_malformed_chunk());
    }

    #[tokio::test]
    async fn missing_endpoint_is_a_config_error() {
        let endpoint = OpenAiEndpoint::new("", KeyRing::new(Vec::new()));
        let err = endpoint.list_models().await.unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
