// src/settings.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::Store;
use crate::error::Result;

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant.

Rules:
- Use Markdown for formatting.
- Use LaTeX ($...$ / $$...$$) for math.
- All block tokens should have a blank line before and after them.
- If you don't know, say "I don't know"."#;

/// Config keys removed in earlier versions; deleted from the store at startup.
pub const LEGACY_KEYS: &[&str] = &["puter_priorityModels"];

pub const DEFAULT_LOCAL_SERVER_URL: &str = "http://127.0.0.1:8080";

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum ModelService {
    #[default]
    #[serde(rename = "OpenAI-API")]
    OpenAiApi,
    #[serde(rename = "Local")]
    Local,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub last_session_id: Option<String>,
    pub last_model: Option<String>,
    pub default_system_prompt: String,
    pub model_service: ModelService,
    pub openai_api_endpoint: String,
    pub openai_api_key: Vec<String>,
    pub openai_priority_models: Vec<String>,
    pub local_server_url: String,
    pub local_priority_models: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_session_id: None,
            last_model: None,
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model_service: ModelService::default(),
            openai_api_endpoint: String::new(),
            openai_api_key: Vec::new(),
            openai_priority_models: Vec::new(),
            local_server_url: DEFAULT_LOCAL_SERVER_URL.to_string(),
            local_priority_models: vec!["qwen3".to_string()],
        }
    }
}

/// One write-through change. Each variant maps to exactly one stored key.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigUpdate {
    LastSessionId(Option<String>),
    LastModel(Option<String>),
    DefaultSystemPrompt(String),
    ModelService(ModelService),
    OpenaiApiEndpoint(String),
    OpenaiApiKey(Vec<String>),
    OpenaiPriorityModels(Vec<String>),
    LocalServerUrl(String),
    LocalPriorityModels(Vec<String>),
}

impl ConfigUpdate {
    pub fn key(&self) -> &'static str {
        match self {
            ConfigUpdate::LastSessionId(_) => "lastSessionId",
            ConfigUpdate::LastModel(_) => "lastModel",
            ConfigUpdate::DefaultSystemPrompt(_) => "defaultSystemPrompt",
            ConfigUpdate::ModelService(_) => "modelService",
            ConfigUpdate::OpenaiApiEndpoint(_) => "openaiApiEndpoint",
            ConfigUpdate::OpenaiApiKey(_) => "openaiApiKey",
            ConfigUpdate::OpenaiPriorityModels(_) => "openaiPriorityModels",
            ConfigUpdate::LocalServerUrl(_) => "localServerUrl",
            ConfigUpdate::LocalPriorityModels(_) => "localPriorityModels",
        }
    }

    pub fn value(&self) -> Value {
        match self {
            ConfigUpdate::LastSessionId(v) | ConfigUpdate::LastModel(v) => json!(v),
            ConfigUpdate::DefaultSystemPrompt(v)
            | ConfigUpdate::OpenaiApiEndpoint(v)
            | ConfigUpdate::LocalServerUrl(v) => json!(v),
            ConfigUpdate::ModelService(v) => json!(v),
            ConfigUpdate::OpenaiApiKey(v)
            | ConfigUpdate::OpenaiPriorityModels(v)
            | ConfigUpdate::LocalPriorityModels(v) => json!(v),
        }
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        // Older builds stored a single key as a plain string.
        Value::String(s) if s.is_empty() => Some(Vec::new()),
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

fn optional_string(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

impl Settings {
    /// Build settings from stored entries over the defaults, normalizing legacy shapes.
    pub fn hydrate(stored: &BTreeMap<String, Value>) -> Self {
        let mut settings = Settings::default();

        for (key, value) in stored {
            match key.as_str() {
                "lastSessionId" => settings.last_session_id = optional_string(value),
                "lastModel" => settings.last_model = optional_string(value),
                "defaultSystemPrompt" => {
                    if let Some(prompt) = value.as_str() {
                        settings.default_system_prompt = prompt.to_string();
                    }
                }
                "modelService" => match serde_json::from_value::<ModelService>(value.clone()) {
                    Ok(service) => settings.model_service = service,
                    Err(_) => tracing::warn!(
                        "[settings] unsupported model service {}, using {:?}",
                        value,
                        settings.model_service
                    ),
                },
                "openaiApiEndpoint" => {
                    settings.openai_api_endpoint = value.as_str().unwrap_or_default().to_string()
                }
                "openaiApiKey" => {
                    if let Some(keys) = string_list(value) {
                        settings.openai_api_key = keys;
                    }
                }
                "openaiPriorityModels" => {
                    if let Some(models) = string_list(value) {
                        settings.openai_priority_models = models;
                    }
                }
                "localServerUrl" => {
                    if let Some(url) = optional_string(value) {
                        settings.local_server_url = url;
                    }
                }
                "localPriorityModels" => {
                    if let Some(models) = string_list(value) {
                        settings.local_priority_models = models;
                    }
                }
                other => tracing::debug!("[settings] ignoring unknown key {}", other),
            }
        }

        settings
    }

    /// Load once at startup and drop retired keys.
    pub fn load(store: &Store) -> Result<Self> {
        for key in LEGACY_KEYS {
            store.del_config(key)?;
        }
        let settings = Self::hydrate(&store.get_config()?);
        tracing::info!(
            "[settings] loaded (service: {:?}, last session: {:?})",
            settings.model_service,
            settings.last_session_id
        );
        Ok(settings)
    }

    pub fn apply(&mut self, update: &ConfigUpdate) {
        match update.clone() {
            ConfigUpdate::LastSessionId(v) => self.last_session_id = v,
            ConfigUpdate::LastModel(v) => self.last_model = v,
            ConfigUpdate::DefaultSystemPrompt(v) => self.default_system_prompt = v,
            ConfigUpdate::ModelService(v) => self.model_service = v,
            ConfigUpdate::OpenaiApiEndpoint(v) => self.openai_api_endpoint = v,
            ConfigUpdate::OpenaiApiKey(v) => self.openai_api_key = v,
            ConfigUpdate::OpenaiPriorityModels(v) => self.openai_priority_models = v,
            ConfigUpdate::LocalServerUrl(v) => self.local_server_url = v,
            ConfigUpdate::LocalPriorityModels(v) => self.local_priority_models = v,
        }
    }

    /// Apply in memory and write the single affected key. Last write wins.
    pub fn update(&mut self, store: &Store, update: ConfigUpdate) -> Result<()> {
        self.apply(&update);
        store.set_config(update.key(), &update.value())
    }

    pub fn priority_models(&self) -> &[String] {
        match self.model_service {
            ModelService::OpenAiApi => &self.openai_priority_models,
            ModelService::Local => &self.local_priority_models,
        }
    }
}

/// Get the default system prompt
pub fn get_default_system_prompt() -> &'static str {
    DEFAULT_SYSTEM_PROMPT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let settings = Settings::hydrate(&BTreeMap::new());
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.default_system_prompt, get_default_system_prompt());
    }

    #[test]
    fn legacy_string_key_becomes_list() {
        let mut stored = BTreeMap::new();
        stored.insert("openaiApiKey".to_string(), json!("sk-one"));
        stored.insert("modelService".to_string(), json!("Puter.js"));
        stored.insert("lastSessionId".to_string(), json!("sess_5"));

        let settings = Settings::hydrate(&stored);
        assert_eq!(settings.openai_api_key, vec!["sk-one".to_string()]);
        assert_eq!(settings.model_service, ModelService::OpenAiApi);
        assert_eq!(settings.last_session_id.as_deref(), Some("sess_5"));
    }

    #[test]
    fn update_writes_through() {
        let store = Store::open_in_memory().unwrap();
        store.set_config("puter_priorityModels", &json!(["x"])).unwrap();

        let mut settings = Settings::load(&store).unwrap();
        assert!(!store.get_config().unwrap().contains_key("puter_priorityModels"));

        settings
            .update(&store, ConfigUpdate::ModelService(ModelService::Local))
            .unwrap();
        settings
            .update(&store, ConfigUpdate::OpenaiApiKey(vec!["a".into(), "b".into()]))
            .unwrap();

        let reloaded = Settings::load(&store).unwrap();
        assert_eq!(reloaded, settings);
        assert_eq!(reloaded.priority_models(), &["qwen3".to_string()]);
    }
}
