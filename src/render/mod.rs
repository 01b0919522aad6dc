// src/render/mod.rs

pub mod html;
pub mod markdown;
pub mod sanitize;
pub mod worker;

use std::sync::Arc;

use crate::error::Result;
use crate::sidebar::render_sidebar_html;
use crate::types::{ContentBlock, Session};

use markdown::{MarkdownEngine, PulldownMarkdown};
use worker::WorkerChannel;

pub const THINK_CLASS: &str = "think";

#[derive(Debug, Clone)]
pub enum RenderRequest {
    /// Markdown source to sanitized HTML.
    Markdown(String),
    Sidebar {
        sessions: Vec<Session>,
        active_id: Option<String>,
    },
}

fn handle(engine: &dyn MarkdownEngine, request: RenderRequest) -> String {
    match request {
        RenderRequest::Markdown(text) => sanitize::sanitize_html(&engine.render(&text)),
        RenderRequest::Sidebar {
            sessions,
            active_id,
        } => render_sidebar_html(&sessions, active_id.as_deref()),
    }
}

/// Concatenated source text of a message. Reasoning only shows up in HTML mode,
/// as a collapsible block ahead of the answer.
pub fn compose_source(blocks: &[ContentBlock], render_html: bool) -> String {
    let mut full = String::new();
    for block in blocks {
        if let ContentBlock::Text { text, reasoning } = block {
            if let Some(reasoning) = reasoning.as_deref().filter(|r| !r.is_empty()) {
                if render_html {
                    full.push_str("<details class=\"think __pChat__\"><summary>[THINK]</summary>\n\n");
                    full.push_str(reasoning);
                    full.push_str("\n\n</details>\n\n");
                }
            }
            full.push_str(text);
        }
    }
    full
}

/// Markdown and sanitizing run on the render worker thread.
pub struct RenderPipeline {
    worker: WorkerChannel<RenderRequest, String>,
}

impl RenderPipeline {
    pub fn new(engine: Arc<dyn MarkdownEngine>) -> Result<Self> {
        let worker = WorkerChannel::spawn("pchat-render", move |request| {
            handle(engine.as_ref(), request)
        })?;
        Ok(Self { worker })
    }

    pub fn with_default_engine() -> Result<Self> {
        Self::new(Arc::new(PulldownMarkdown))
    }

    pub async fn render(&self, blocks: &[ContentBlock], render_html: bool) -> Result<String> {
        let source = compose_source(blocks, render_html);
        if !render_html {
            return Ok(source);
        }
        self.worker.run(RenderRequest::Markdown(source)).await
    }

    pub async fn render_sidebar(
        &self,
        sessions: &[Session],
        active_id: Option<&str>,
    ) -> Result<String> {
        self.worker
            .run(RenderRequest::Sidebar {
                sessions: sessions.to_vec(),
                active_id: active_id.map(str::to_string),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mode_skips_reasoning() {
        let blocks = vec![ContentBlock::reply("answer".into(), "thinking".into())];
        assert_eq!(compose_source(&blocks, false), "answer");
        let html = compose_source(&blocks, true);
        assert!(html.starts_with("<details class=\"think __pChat__\"><summary>[THINK]</summary>"));
        assert!(html.ends_with("</details>\n\nanswer"));
    }

    #[tokio::test]
    async fn renders_through_worker() {
        let pipeline = RenderPipeline::with_default_engine().unwrap();
        let blocks = vec![ContentBlock::reply("**bold** <blink>x</blink>".into(), "hm".into())];
        let html = pipeline.render(&blocks, true).await.unwrap();

        assert!(html.contains("<summary>[THINK]</summary>"));
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("&lt;blink&gt;x&lt;/blink&gt;"));

        let raw = pipeline.render(&blocks, false).await.unwrap();
        assert_eq!(raw, "**bold** <blink>x</blink>");
    }
}
