// src/types/chat.rs

use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::generate_message_id;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub pinned: bool,
}

impl Session {
    pub fn new(id: String, title: String, timestamp: i64) -> Self {
        Self {
            id,
            title,
            timestamp,
            pinned: false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    #[serde(rename = "image_url")]
    Image {
        image_url: ImageUrl,
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: text.into(),
            reasoning: None,
        }
    }

    /// Final form of a streamed reply: an empty reasoning side-channel is dropped.
    pub fn reply(text: String, reasoning: String) -> Self {
        ContentBlock::Text {
            text,
            reasoning: if reasoning.is_empty() {
                None
            } else {
                Some(reasoning)
            },
        }
    }

    pub fn image_id(&self) -> Option<&str> {
        match self {
            ContentBlock::Image { id, .. } => Some(id),
            ContentBlock::Text { .. } => None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(deserialize_with = "content_or_legacy_text")]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    #[serde(default)]
    pub is_collapsed: bool,
    /// Unset means "render by role": assistant replies render, everything else shows raw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_raw: Option<bool>,
}

impl Message {
    pub fn system(prompt: &str) -> Self {
        Self {
            id: generate_message_id(),
            role: Role::System,
            content: vec![ContentBlock::text(prompt)],
            model: None,
            stats: None,
            is_collapsed: true,
            is_raw: Some(false),
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            id: generate_message_id(),
            role: Role::User,
            content,
            model: None,
            stats: None,
            is_collapsed: false,
            is_raw: Some(true),
        }
    }

    /// Empty assistant reply waiting for a stream.
    pub fn assistant(model: Option<String>) -> Self {
        Self {
            id: generate_message_id(),
            role: Role::Assistant,
            content: vec![ContentBlock::text("")],
            model,
            stats: None,
            is_collapsed: false,
            is_raw: None,
        }
    }

    /// Text of the first text block.
    pub fn primary_text(&self) -> &str {
        self.content
            .iter()
            .find_map(|c| match c {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .unwrap_or("")
    }

    /// Replace the text of the first text block, appending one when missing.
    pub fn set_primary_text(&mut self, new_text: &str) {
        for block in self.content.iter_mut() {
            if let ContentBlock::Text { text, .. } = block {
                *text = new_text.to_string();
                return;
            }
        }
        self.content.push(ContentBlock::text(new_text));
    }

    pub fn images(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content
            .iter()
            .filter(|c| matches!(c, ContentBlock::Image { .. }))
    }

    pub fn renders_html(&self) -> bool {
        match self.is_raw {
            Some(raw) => !raw,
            None => self.role == Role::Assistant,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyContent {
    Blocks(Vec<ContentBlock>),
    Text(String),
}

fn content_or_legacy_text<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    let content = Option::<LegacyContent>::deserialize(deserializer)?;
    Ok(match content {
        Some(LegacyContent::Blocks(blocks)) => blocks,
        Some(LegacyContent::Text(text)) => vec![ContentBlock::text(text)],
        None => vec![ContentBlock::text("")],
    })
}

/// One row of the `chats` collection: the whole message array of a session.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ChatRecord {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ConfigEntry {
    pub id: String,
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_string_content_becomes_text_block() {
        let msg: Message = serde_json::from_value(json!({
            "id": "msg_1",
            "role": "assistant",
            "content": "plain old text",
        }))
        .unwrap();

        assert_eq!(msg.content, vec![ContentBlock::text("plain old text")]);
        assert!(msg.is_raw.is_none());
        assert!(msg.renders_html());
        assert!(msg.model.is_none());
    }

    #[test]
    fn image_blocks_keep_browser_shape() {
        let block = ContentBlock::Image {
            image_url: ImageUrl {
                url: "data:image/png;base64,AAAA".into(),
            },
            id: "img_1".into(),
            name: "cat".into(),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "image_url");
        assert_eq!(value["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn empty_reasoning_is_not_serialized() {
        let block = ContentBlock::reply("answer".into(), String::new());
        let value = serde_json::to_value(&block).unwrap();
        assert!(value.get("reasoning").is_none());

        let block = ContentBlock::reply("answer".into(), "hmm".into());
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["reasoning"], "hmm");
    }

    #[test]
    fn set_primary_text_skips_images() {
        let mut msg = Message::user(vec![
            ContentBlock::Image {
                image_url: ImageUrl { url: "u".into() },
                id: "img".into(),
                name: "n".into(),
            },
            ContentBlock::text("old"),
        ]);
        msg.set_primary_text("new");
        assert_eq!(msg.primary_text(), "new");
        assert_eq!(msg.images().count(), 1);
    }

    #[test]
    fn missing_pinned_defaults_to_false() {
        let session: Session =
            serde_json::from_value(json!({"id": "sess_1", "title": "t", "timestamp": 5})).unwrap();
        assert!(!session.pinned);
    }
}
