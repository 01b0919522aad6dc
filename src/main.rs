// src/main.rs

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};

use pchat_lib::logging::init_logging;
use pchat_lib::sidebar::{sort_sessions, UNTITLED};
use pchat_lib::{
    open_client, ChatClient, ClientOptions, Command, CommandOutcome, ImportMode, StreamOutcome,
};

const HELP: &str = "/new | /sessions | /switch <id> | /fork <message id> | /export <file> | /import <file> [--compatible] | /quit";

fn db_path() -> pchat_lib::Result<PathBuf> {
    match std::env::var_os("PCHAT_DB") {
        Some(path) => Ok(PathBuf::from(path)),
        None => pchat_lib::db::default_db_path(),
    }
}

fn print_sessions(client: &ChatClient) {
    let active = client.active_session_id();
    for session in sort_sessions(&client.sessions()) {
        let marker = if active.as_deref() == Some(session.id.as_str()) { "*" } else { " " };
        let pin = if session.pinned { " [pinned]" } else { "" };
        let title = if session.title.is_empty() { UNTITLED } else { &session.title };
        println!("{} {}  {}{}", marker, session.id, title, pin);
    }
}

fn print_thread(client: &ChatClient) {
    for msg in client.messages() {
        println!("[{}] {}", msg.role.as_str(), msg.id);
        if !msg.is_collapsed {
            println!("{}", msg.primary_text());
        }
    }
}

fn print_reply(client: &ChatClient, outcome: &StreamOutcome) {
    match outcome {
        StreamOutcome::Skipped => println!("(busy, nothing sent)"),
        StreamOutcome::Failed { error, .. } => eprintln!("request failed: {}", error),
        _ => {}
    }
    let Some(id) = outcome.message_id() else {
        return;
    };
    if let Some(msg) = client.messages().into_iter().find(|m| m.id == id) {
        println!("{}", msg.primary_text());
        println!("-- {}", msg.stats.unwrap_or_default());
    }
}

/// Send a message, letting Ctrl-C stop the stream instead of the program.
async fn send(client: &ChatClient, text: String) -> pchat_lib::Result<()> {
    let worker = client.clone();
    let mut task = tokio::spawn(async move { worker.dispatch(Command::Send(text)).await });

    let outcome = loop {
        tokio::select! {
            joined = &mut task => {
                break joined.map_err(|e| pchat_lib::ChatError::transport(e.to_string()))??;
            }
            _ = tokio::signal::ctrl_c() => {
                client.stop_generation();
            }
        }
    };
    if let CommandOutcome::Stream(outcome) = outcome {
        print_reply(client, &outcome);
    }
    Ok(())
}

async fn handle_line(client: &ChatClient, line: &str) -> pchat_lib::Result<bool> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("/quit") | Some("/exit") => return Ok(false),
        Some("/help") => println!("{}", HELP),
        Some("/new") => {
            client.dispatch(Command::NewSession).await?;
            print_sessions(client);
        }
        Some("/sessions") => print_sessions(client),
        Some("/switch") => match parts.next() {
            Some(id) => {
                let outcome = client.dispatch(Command::Switch(id.to_string())).await?;
                tracing::debug!("[cli] switch: {:?}", outcome);
                print_thread(client);
            }
            None => println!("usage: /switch <id>"),
        },
        Some("/fork") => match parts.next() {
            Some(id) => {
                if let CommandOutcome::Session(Some(new_id)) =
                    client.dispatch(Command::Fork(id.to_string())).await?
                {
                    println!("forked into {}", new_id);
                }
            }
            None => println!("usage: /fork <message id>"),
        },
        Some("/export") => match parts.next() {
            Some(file) => {
                let backup = client.export_all()?;
                std::fs::write(file, backup.to_json()?)?;
                println!("exported {} sessions to {}", backup.sessions.len(), file);
            }
            None => println!("usage: /export <file>"),
        },
        Some("/import") => match parts.next() {
            Some(file) => {
                let mode = if parts.any(|p| p == "--compatible") {
                    ImportMode::Compatible
                } else {
                    ImportMode::Merge
                };
                let text = std::fs::read_to_string(file)?;
                let report = client.import_backup(&text, mode).await?;
                println!("imported {} sessions", report.sessions);
            }
            None => println!("usage: /import <file> [--compatible]"),
        },
        _ => send(client, line.to_string()).await?,
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> pchat_lib::Result<()> {
    init_logging("info");

    let client = open_client(&db_path()?, ClientOptions::default()).await?;
    println!("{}", HELP);
    print_thread(&client);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match handle_line(&client, &line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("error: {}", e),
        }
    }
    Ok(())
}
