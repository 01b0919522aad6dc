// src/db.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::types::{ChatRecord, ConfigEntry, Message, Session};

/// Schema generation written to `PRAGMA user_version`, also stamped into backups.
pub const STORE_VERSION: i64 = 3;

pub fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}

pub fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(Duration::from_millis(2000))?;
    Ok(conn)
}

/// Create missing collections and columns. Existing rows are never dropped.
pub fn init_db(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL DEFAULT '',
            timestamp   INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS chats (
            id          TEXT PRIMARY KEY,
            messages    TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS config (
            id          TEXT PRIMARY KEY,
            value       TEXT NOT NULL
        );
        "#,
    )?;

    // Migration: add pinned column if missing
    let has_pinned: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('sessions') WHERE name = 'pinned'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false);
    if !has_pinned {
        conn.execute(
            "ALTER TABLE sessions ADD COLUMN pinned INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }

    if version < STORE_VERSION {
        tracing::info!("[db] upgraded schema v{} -> v{}", version, STORE_VERSION);
        conn.pragma_update(None, "user_version", STORE_VERSION)?;
    }

    Ok(())
}

pub fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pchat");
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("pchat.sqlite3"))
}

fn read_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        timestamp: row.get(2)?,
        pinned: row.get(3)?,
    })
}

fn put_session(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, title, timestamp, pinned) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET title = ?2, timestamp = ?3, pinned = ?4",
        params![session.id, session.title, session.timestamp, session.pinned],
    )?;
    Ok(())
}

fn put_chat(conn: &Connection, id: &str, messages: &[Message]) -> Result<()> {
    let json = serde_json::to_string(messages)?;
    conn.execute(
        "INSERT INTO chats (id, messages) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET messages = ?2",
        params![id, json],
    )?;
    Ok(())
}

fn put_config(conn: &Connection, id: &str, value: &serde_json::Value) -> Result<()> {
    let json = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO config (id, value) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET value = ?2",
        params![id, json],
    )?;
    Ok(())
}

/// Local durable mirror of sessions, message arrays and config entries.
///
/// Message arrays are only ever written whole; the last full write wins.
pub struct Store {
    conn: Mutex<Connection>,
    chat_writes: AtomicU64,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!("[db] path = {}", path.display());
        let conn = open_db(path)?;
        init_db(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            chat_writes: AtomicU64::new(0),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn version(&self) -> i64 {
        STORE_VERSION
    }

    /// Number of full message-array writes since open.
    pub fn chat_write_count(&self) -> u64 {
        self.chat_writes.load(Ordering::SeqCst)
    }

    // ==================== Sessions ====================

    pub fn get_all_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, title, timestamp, pinned FROM sessions ORDER BY rowid")?;
        let rows = stmt.query_map([], read_session)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        let session = conn
            .query_row(
                "SELECT id, title, timestamp, pinned FROM sessions WHERE id = ?1",
                params![id],
                read_session,
            )
            .optional()?;
        Ok(session)
    }

    pub fn save_session_meta(&self, session: &Session) -> Result<()> {
        put_session(&self.conn(), session)
    }

    /// Removes metadata and messages together.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        tx.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    // ==================== Chats ====================

    pub fn get_session_messages(&self, id: &str) -> Result<Vec<Message>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT messages FROM chats WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn save_session_messages(&self, id: &str, messages: &[Message]) -> Result<()> {
        put_chat(&self.conn(), id, messages)?;
        self.chat_writes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("[db] saved {} messages for {}", messages.len(), id);
        Ok(())
    }

    pub fn get_all_chats(&self) -> Result<Vec<ChatRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, messages FROM chats ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let json: String = row.get(1)?;
            Ok((id, json))
        })?;

        let mut out = Vec::new();
        for r in rows {
            let (id, json) = r?;
            out.push(ChatRecord {
                id,
                messages: serde_json::from_str(&json)?,
            });
        }
        Ok(out)
    }

    // ==================== Config ====================

    pub fn get_config(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        Ok(self
            .get_config_entries()?
            .into_iter()
            .map(|e| (e.id, e.value))
            .collect())
    }

    pub fn get_config_entries(&self) -> Result<Vec<ConfigEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, value FROM config ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let json: String = row.get(1)?;
            Ok((id, json))
        })?;

        let mut out = Vec::new();
        for r in rows {
            let (id, json) = r?;
            out.push(ConfigEntry {
                id,
                value: serde_json::from_str(&json)?,
            });
        }
        Ok(out)
    }

    pub fn set_config(&self, id: &str, value: &serde_json::Value) -> Result<()> {
        put_config(&self.conn(), id, value)
    }

    pub fn del_config(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM config WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ==================== Backup ====================

    /// Writes all three collections in one transaction; upserts on id collision.
    pub fn import_records(
        &self,
        config: &[ConfigEntry],
        sessions: &[Session],
        chats: &[ChatRecord],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for entry in config {
            put_config(&tx, &entry.id, &entry.value)?;
        }
        for session in sessions {
            put_session(&tx, session)?;
        }
        for chat in chats {
            put_chat(&tx, &chat.id, &chat.messages)?;
        }
        tx.commit()?;

        tracing::info!(
            "[db] imported {} config entries, {} sessions, {} chats",
            config.len(),
            sessions.len(),
            chats.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentBlock;
    use serde_json::json;

    fn session(id: &str, ts: i64) -> Session {
        Session::new(id.to_string(), format!("title {id}"), ts)
    }

    #[test]
    fn session_meta_round_trips_and_upserts() {
        let store = Store::open_in_memory().unwrap();
        let mut s = session("sess_1", 10);
        store.save_session_meta(&s).unwrap();

        s.pinned = true;
        s.title = "renamed".into();
        store.save_session_meta(&s).unwrap();

        assert_eq!(store.get_all_sessions().unwrap(), vec![s.clone()]);
        assert_eq!(store.get_session("sess_1").unwrap(), Some(s));
        assert_eq!(store.get_session("missing").unwrap(), None);
    }

    #[test]
    fn delete_removes_meta_and_messages() {
        let store = Store::open_in_memory().unwrap();
        store.save_session_meta(&session("sess_1", 1)).unwrap();
        store
            .save_session_messages("sess_1", &[Message::system("hi")])
            .unwrap();

        store.delete_session("sess_1").unwrap();

        assert!(store.get_all_sessions().unwrap().is_empty());
        assert!(store.get_session_messages("sess_1").unwrap().is_empty());
        assert!(store.get_all_chats().unwrap().is_empty());
    }

    #[test]
    fn message_arrays_are_written_whole() {
        let store = Store::open_in_memory().unwrap();
        let mut msgs = vec![Message::system("sys"), Message::user(vec![ContentBlock::text("q")])];
        store.save_session_messages("s", &msgs).unwrap();
        msgs.pop();
        store.save_session_messages("s", &msgs).unwrap();

        assert_eq!(store.get_session_messages("s").unwrap(), msgs);
        assert_eq!(store.chat_write_count(), 2);
    }

    #[test]
    fn config_entries_keep_json_values() {
        let store = Store::open_in_memory().unwrap();
        store.set_config("openaiApiKey", &json!(["k1", "k2"])).unwrap();
        store.set_config("lastModel", &json!("gpt")).unwrap();
        store.set_config("lastModel", &json!("qwen")).unwrap();

        let config = store.get_config().unwrap();
        assert_eq!(config["openaiApiKey"], json!(["k1", "k2"]));
        assert_eq!(config["lastModel"], json!("qwen"));

        store.del_config("lastModel").unwrap();
        assert!(!store.get_config().unwrap().contains_key("lastModel"));
    }

    #[test]
    fn upgrade_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.sqlite3");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE sessions (id TEXT PRIMARY KEY, title TEXT NOT NULL DEFAULT '', timestamp INTEGER NOT NULL DEFAULT 0);
                 INSERT INTO sessions (id, title, timestamp) VALUES ('sess_old', 'kept', 42);",
            )
            .unwrap();
        }

        let store = Store::open(&path).unwrap();
        let sessions = store.get_all_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "kept");
        assert!(!sessions[0].pinned);
        assert!(store.get_all_chats().unwrap().is_empty());

        let version: i64 = store
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, STORE_VERSION);
    }
}
