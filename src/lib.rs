// src/lib.rs

pub mod backup;
pub mod commands;
pub mod db;
pub mod endpoint;
pub mod error;
pub mod ids;
pub mod images;
pub mod logging;
pub mod reconcile;
pub mod render;
pub mod server;
pub mod session;
pub mod settings;
pub mod sidebar;
pub mod state;
pub mod streaming;
pub mod types;
pub mod view;

use std::path::Path;

pub use backup::{Backup, ImportMode, ImportReport};
pub use commands::{Command, CommandOutcome};
pub use db::Store;
pub use error::{ChatError, Result};
pub use session::SwitchOutcome;
pub use settings::{ConfigUpdate, ModelService, Settings};
pub use state::{AlwaysConfirm, ChatClient, ClientOptions, Confirm};
pub use streaming::StreamOutcome;

/// Open (or create) the store at `db_path`, build a client and run startup.
pub async fn open_client(db_path: &Path, options: ClientOptions) -> Result<ChatClient> {
    let store = Store::open(db_path)?;
    let client = ChatClient::new(store, options)?;
    client.bootstrap().await?;
    Ok(client)
}
