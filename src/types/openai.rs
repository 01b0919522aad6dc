// src/types/openai.rs

use serde::{Deserialize, Serialize};

use crate::types::chat::{ContentBlock, Message};

#[derive(Serialize)]
pub struct OpenAIRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [OpenAIMessage],
    pub stream: bool,
}

/// A message as the endpoint sees it: ids, stats and render flags stripped.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: Vec<OpenAIContentPart>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum OpenAIContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrlData },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ImageUrlData {
    pub url: String,
}

impl From<&Message> for OpenAIMessage {
    fn from(msg: &Message) -> Self {
        let content = msg
            .content
            .iter()
            .map(|c| match c {
                ContentBlock::Text { text, .. } => OpenAIContentPart::Text { text: text.clone() },
                ContentBlock::Image { image_url, .. } => OpenAIContentPart::ImageUrl {
                    image_url: ImageUrlData {
                        url: image_url.url.clone(),
                    },
                },
            })
            .collect();

        OpenAIMessage {
            role: msg.role.as_str().to_string(),
            content,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct OpenAIStreamResponse {
    pub choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize, Debug)]
pub struct OpenAIStreamChoice {
    pub delta: OpenAIDelta,
}

#[derive(Deserialize, Debug, Clone)]
pub struct OpenAIDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub reasoning_content: Option<String>,
}

impl OpenAIDelta {
    /// Providers disagree on the reasoning field name.
    pub fn reasoning_text(&self) -> String {
        self.reasoning
            .clone()
            .or_else(|| self.reasoning_content.clone())
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Debug)]
pub struct OpenAIModelList {
    pub data: Vec<OpenAIModelEntry>,
}

#[derive(Deserialize, Debug)]
pub struct OpenAIModelEntry {
    #[serde(default)]
    pub id: String,
}

#[derive(Deserialize, Debug)]
pub struct OpenAIErrorBody {
    pub error: Option<OpenAIErrorDetail>,
}

#[derive(Deserialize, Debug)]
pub struct OpenAIErrorDetail {
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chat::{ImageUrl, Role};
    use serde_json::json;

    #[test]
    fn wire_projection_strips_local_fields() {
        let msg = Message {
            id: "msg_1".into(),
            role: Role::User,
            content: vec![
                ContentBlock::Image {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AA".into(),
                    },
                    id: "img_1".into(),
                    name: "shot".into(),
                },
                ContentBlock::Text {
                    text: "what is this".into(),
                    reasoning: Some("ignored".into()),
                },
            ],
            model: Some("m".into()),
            stats: Some("1s | 1s | 1 T/s".into()),
            is_collapsed: true,
            is_raw: Some(true),
        };

        let wire = serde_json::to_value(OpenAIMessage::from(&msg)).unwrap();
        assert_eq!(
            wire,
            json!({
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AA"}},
                    {"type": "text", "text": "what is this"}
                ]
            })
        );
    }

    #[test]
    fn reasoning_prefers_reasoning_field() {
        let delta: OpenAIDelta = serde_json::from_value(json!({
            "content": null,
            "reasoning": "a",
            "reasoning_content": "b"
        }))
        .unwrap();
        assert_eq!(delta.reasoning_text(), "a");

        let delta: OpenAIDelta =
            serde_json::from_value(json!({"reasoning_content": "b"})).unwrap();
        assert_eq!(delta.reasoning_text(), "b");
    }
}
