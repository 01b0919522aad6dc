// src/render/markdown.rs

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};

/// Text to HTML. The output is sanitized separately, so engines may emit raw HTML.
pub trait MarkdownEngine: Send + Sync {
    fn render(&self, text: &str) -> String;
}

/// GFM-flavoured engine: tables, strikethrough, task lists, footnotes and
/// single newlines rendered as line breaks.
#[derive(Default, Clone, Copy)]
pub struct PulldownMarkdown;

impl PulldownMarkdown {
    fn options() -> Options {
        let mut opts = Options::empty();
        opts.insert(Options::ENABLE_TABLES);
        opts.insert(Options::ENABLE_FOOTNOTES);
        opts.insert(Options::ENABLE_STRIKETHROUGH);
        opts.insert(Options::ENABLE_TASKLISTS);
        opts
    }
}

fn code_language(kind: &CodeBlockKind) -> String {
    match kind {
        CodeBlockKind::Fenced(info) => info
            .split_whitespace()
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| "plaintext".to_string()),
        CodeBlockKind::Indented => "plaintext".to_string(),
    }
}

impl MarkdownEngine for PulldownMarkdown {
    fn render(&self, text: &str) -> String {
        let events = Parser::new_ext(text, Self::options()).map(|event| match event {
            Event::SoftBreak => Event::HardBreak,
            Event::Start(Tag::CodeBlock(kind)) => Event::Html(CowStr::from(format!(
                "<pre><code class=\"hljs language-{}\">",
                html_escape::encode_double_quoted_attribute(&code_language(&kind))
            ))),
            Event::End(TagEnd::CodeBlock) => Event::Html(CowStr::Borrowed("</code></pre>\n")),
            Event::Code(code) => Event::InlineHtml(CowStr::from(format!(
                "<code class=\"hljs\">{}</code>",
                html_escape::encode_text(&code)
            ))),
            other => other,
        });

        let mut buf = String::with_capacity(text.len() * 3 / 2);
        html::push_html(&mut buf, events);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_gfm_basics() {
        let out = PulldownMarkdown.render("# Title\n\n~~old~~ **new**\n\n| a |\n|---|\n| 1 |");
        assert!(out.contains("<h1>Title</h1>"));
        assert!(out.contains("<del>old</del>"));
        assert!(out.contains("<strong>new</strong>"));
        assert!(out.contains("<table>"));
    }

    #[test]
    fn single_newlines_break_lines() {
        let out = PulldownMarkdown.render("one\ntwo");
        assert_eq!(out, "<p>one<br />\ntwo</p>\n");
    }

    #[test]
    fn code_blocks_carry_language_class() {
        let out = PulldownMarkdown.render("```rust\nlet a = 1 < 2;\n```\n\nuse `x<y`");
        assert!(out.contains("<pre><code class=\"hljs language-rust\">let a = 1 &lt; 2;\n</code></pre>"));
        assert!(out.contains("<code class=\"hljs\">x&lt;y</code>"));

        let out = PulldownMarkdown.render("```\nplain\n```");
        assert!(out.contains("language-plaintext"));
    }
}
