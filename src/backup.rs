// src/backup.rs

use std::collections::HashMap;

use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{unix_ms, Store};
use crate::error::{ChatError, Result};
use crate::ids::session_id_at;
use crate::types::{ChatRecord, ConfigEntry, Message, Session};

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid file name regex"));

/// The JSON backup file. `config` is absent in single-session exports.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Backup {
    pub timestamp: i64,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<ConfigEntry>>,
    pub sessions: Vec<Session>,
    pub chats: Vec<ChatRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportMode {
    /// Imported rows overwrite rows with the same id.
    Merge,
    /// Every imported session gets a fresh time-based id.
    Compatible,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub sessions: usize,
    pub chats: usize,
    pub config_entries: usize,
    /// Fresh ids allocated in compatible mode, in import order.
    pub new_session_ids: Vec<String>,
}

impl Backup {
    pub fn full(store: &Store) -> Result<Self> {
        Ok(Self {
            timestamp: unix_ms(),
            version: store.version(),
            config: Some(store.get_config_entries()?),
            sessions: store.get_all_sessions()?,
            chats: store.get_all_chats()?,
        })
    }

    pub fn single(store: &Store, session: Session, messages: Vec<Message>) -> Self {
        Self {
            timestamp: unix_ms(),
            version: store.version(),
            config: None,
            chats: vec![ChatRecord {
                id: session.id.clone(),
                messages,
            }],
            sessions: vec![session],
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate a parsed backup document. Nothing is written here.
    pub fn from_value(data: Value) -> Result<Self> {
        let obj = data
            .as_object()
            .ok_or_else(|| ChatError::invalid_backup("Expected a JSON object"))?;

        let (sessions, chats) = match (obj.get("sessions"), obj.get("chats")) {
            (Some(s), Some(c)) => (s, c),
            _ => {
                return Err(ChatError::invalid_backup(
                    "Missing required fields (sessions/chats)",
                ))
            }
        };
        if !sessions.is_array() || !chats.is_array() {
            return Err(ChatError::invalid_backup(
                "sessions and chats must be arrays",
            ));
        }

        let sessions: Vec<Session> = serde_json::from_value(sessions.clone())
            .map_err(|e| ChatError::invalid_backup(format!("bad session entry: {e}")))?;
        let chats: Vec<ChatRecord> = serde_json::from_value(chats.clone())
            .map_err(|e| ChatError::invalid_backup(format!("bad chat entry: {e}")))?;
        let config = obj.get("config").map(config_entries).transpose()?;

        Ok(Self {
            timestamp: obj.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
            version: obj.get("version").and_then(Value::as_i64).unwrap_or(0),
            config,
            sessions,
            chats,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let data: Value = serde_json::from_str(text)
            .map_err(|e| ChatError::invalid_backup(format!("not valid JSON: {e}")))?;
        Self::from_value(data)
    }

    /// Give every session (and its chat) a fresh consecutive id.
    fn rewrite_ids(&mut self, now: i64) -> Vec<String> {
        let mut mapping: HashMap<String, String> = HashMap::new();
        let mut new_ids = Vec::with_capacity(self.sessions.len());

        for (i, session) in self.sessions.iter_mut().enumerate() {
            let new_id = session_id_at(now + i as i64);
            mapping.insert(session.id.clone(), new_id.clone());
            session.id = new_id.clone();
            session.timestamp = now;
            new_ids.push(new_id);
        }

        for chat in self.chats.iter_mut() {
            chat.id = match mapping.get(&chat.id) {
                Some(id) => id.clone(),
                None => {
                    tracing::warn!("[backup] chat {} has no session, giving it a fresh id", chat.id);
                    session_id_at(now)
                }
            };
        }

        new_ids
    }

    pub fn import_into(mut self, store: &Store, mode: ImportMode) -> Result<ImportReport> {
        let new_session_ids = match mode {
            ImportMode::Merge => Vec::new(),
            ImportMode::Compatible => self.rewrite_ids(unix_ms()),
        };

        let config = self.config.unwrap_or_default();
        store.import_records(&config, &self.sessions, &self.chats)?;

        Ok(ImportReport {
            sessions: self.sessions.len(),
            chats: self.chats.len(),
            config_entries: config.len(),
            new_session_ids,
        })
    }
}

/// Accepts the entry list format and the older `{key: value}` map format.
fn config_entries(value: &Value) -> Result<Vec<ConfigEntry>> {
    match value {
        Value::Array(_) => serde_json::from_value(value.clone())
            .map_err(|e| ChatError::invalid_backup(format!("bad config entry: {e}"))),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(id, value)| ConfigEntry {
                id: id.clone(),
                value: value.clone(),
            })
            .collect()),
        _ => Ok(Vec::new()),
    }
}

fn date_stamp(now_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(now_ms)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

pub fn backup_file_name(now_ms: i64) -> String {
    format!("pChat_Backup_{}.json", date_stamp(now_ms))
}

pub fn session_file_name(title: &str, now_ms: i64) -> String {
    let safe = UNSAFE_FILE_CHARS.replace_all(title, "_");
    let safe = if safe.is_empty() { "untitled".into() } else { safe };
    format!("pChat_Session_{}_{}.json", safe, date_stamp(now_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed(store: &Store, id: &str) {
        store
            .save_session_meta(&Session::new(id.into(), format!("t-{id}"), 100))
            .unwrap();
        store
            .save_session_messages(id, &[Message::system(&format!("sys {id}"))])
            .unwrap();
    }

    #[test]
    fn rejects_missing_collections_before_writing() {
        let store = Store::open_in_memory().unwrap();
        let err = Backup::from_value(json!({"sessions": []})).unwrap_err();
        assert!(err.is_validation());

        let err = Backup::from_value(json!({"sessions": {}, "chats": []})).unwrap_err();
        assert!(err.to_string().contains("must be arrays"));

        assert!(store.get_all_sessions().unwrap().is_empty());
    }

    #[test]
    fn rejects_broken_entries_without_partial_writes() {
        let store = Store::open_in_memory().unwrap();
        let result = Backup::from_value(json!({
            "sessions": [{"id": "s1"}],
            "chats": [{"id": "s1", "messages": [{"id": "m", "role": "wizard", "content": []}]}]
        }));
        assert!(result.unwrap_err().is_validation());
        assert!(store.get_all_sessions().unwrap().is_empty());
    }

    #[test]
    fn compatible_import_never_collides() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "s1");

        let backup = Backup::from_value(json!({
            "sessions": [{"id": "s1", "title": "a", "timestamp": 1}, {"id": "s2", "title": "b", "timestamp": 2}],
            "chats": [{"id": "s1", "messages": []}, {"id": "s2", "messages": []}]
        }))
        .unwrap();
        let report = backup.import_into(&store, ImportMode::Compatible).unwrap();

        let sessions = store.get_all_sessions().unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions.iter().filter(|s| s.id == "s1").count(), 1);
        assert_eq!(store.get_session("s1").unwrap().unwrap().title, "t-s1");
        assert_eq!(report.new_session_ids.len(), 2);
        for id in &report.new_session_ids {
            assert!(store.get_session(id).unwrap().is_some());
        }
    }

    #[test]
    fn merge_import_overwrites_on_collision() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "s1");

        let backup = Backup::from_value(json!({
            "sessions": [{"id": "s1", "title": "imported", "timestamp": 9}],
            "chats": [{"id": "s1", "messages": []}],
            "config": {"lastModel": "m"}
        }))
        .unwrap();
        backup.import_into(&store, ImportMode::Merge).unwrap();

        assert_eq!(store.get_session("s1").unwrap().unwrap().title, "imported");
        assert!(store.get_session_messages("s1").unwrap().is_empty());
        assert_eq!(store.get_config().unwrap()["lastModel"], json!("m"));
    }

    #[test]
    fn export_then_merge_import_is_stable() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "s1");
        seed(&store, "s2");
        store.set_config("lastModel", &json!("m")).unwrap();

        let before = Backup::full(&store).unwrap();
        let text = before.to_json().unwrap();
        Backup::from_json(&text)
            .unwrap()
            .import_into(&store, ImportMode::Merge)
            .unwrap();
        let after = Backup::full(&store).unwrap();

        assert_eq!(before.sessions, after.sessions);
        assert_eq!(before.chats, after.chats);
        assert_eq!(before.config, after.config);
    }

    #[test]
    fn file_names_are_sanitized() {
        let name = session_file_name("a/b:c?", 0);
        assert!(name.starts_with("pChat_Session_a_b_c__"));
        assert!(session_file_name("", 0).starts_with("pChat_Session_untitled_"));
        assert!(backup_file_name(0).starts_with("pChat_Backup_"));
    }
}
