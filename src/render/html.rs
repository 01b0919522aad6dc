// src/render/html.rs

//! A small HTML element tree: enough of a DOM for the message area.
//!
//! The parser is tolerant in the way a browser's `innerHTML` setter is for
//! the markup the markdown engine produces: void elements, self-closing
//! tags, stray closing tags, comments and raw-text `script`/`style` bodies.

use std::fmt::Write as _;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Scroll position of a scrollable element. Not part of the markup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScrollOffset {
    pub top: i64,
    pub left: i64,
}

#[derive(Clone, Debug)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    pub scroll: ScrollOffset,
}

#[derive(Clone, Debug)]
pub enum Node {
    Element(Element),
    Text(String),
}

// ==================== Equality ====================

/// Content equality: attribute order and scroll state are ignored.
impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.attrs.len() == other.attrs.len()
            && self
                .attrs
                .iter()
                .all(|(k, v)| other.attr(k) == Some(v.as_str()))
            && self.children == other.children
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Text(a), Node::Text(b)) => a == b,
            (Node::Element(a), Node::Element(b)) => a == b,
            _ => false,
        }
    }
}

// ==================== Element API ====================

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
            scroll: ScrollOffset::default(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let joined = match self.attr("class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {}", existing.trim(), class),
            _ => class.to_string(),
        };
        self.set_attr("class", &joined);
    }

    pub fn remove_class(&mut self, class: &str) {
        if !self.has_class(class) {
            return;
        }
        let kept: Vec<&str> = self.classes().filter(|c| *c != class).collect();
        let joined = kept.join(" ");
        self.set_attr("class", &joined);
    }

    pub fn toggle_class(&mut self, class: &str, on: bool) {
        if on {
            self.add_class(class);
        } else {
            self.remove_class(class);
        }
    }

    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    pub fn set_text(&mut self, text: &str) {
        self.children = vec![Node::Text(text.to_string())];
    }

    /// First descendant (or self) matching `pred`, depth first.
    pub fn find(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        if pred(self) {
            return Some(self);
        }
        self.children.iter().find_map(|child| match child {
            Node::Element(el) => el.find(pred),
            Node::Text(_) => None,
        })
    }

    pub fn find_mut(&mut self, pred: &dyn Fn(&Element) -> bool) -> Option<&mut Element> {
        if pred(self) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| match child {
            Node::Element(el) => el.find_mut(pred),
            Node::Text(_) => None,
        })
    }

    pub fn find_class(&self, class: &str) -> Option<&Element> {
        self.find(&|el| el.has_class(class))
    }

    pub fn find_class_mut(&mut self, class: &str) -> Option<&mut Element> {
        self.find_mut(&|el| el.has_class(class))
    }

    pub fn count(&self, pred: &dyn Fn(&Element) -> bool) -> usize {
        let own = usize::from(pred(self));
        own + self
            .children
            .iter()
            .map(|child| match child {
                Node::Element(el) => el.count(pred),
                Node::Text(_) => 0,
            })
            .sum::<usize>()
    }

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            write_node(child, &mut out, RAW_TEXT_ELEMENTS.contains(&self.tag.as_str()));
        }
        out
    }

    pub fn set_inner_html(&mut self, html: &str) {
        self.children = parse_fragment(html);
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }
}

impl Node {
    pub fn text(text: &str) -> Self {
        Node::Text(text.to_string())
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        write_node(self, &mut out, false);
        out
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(el) => collect_text(&el.children, out),
        }
    }
}

// ==================== Serialization ====================

pub fn to_html(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(node, &mut out, false);
    }
    out
}

fn write_node(node: &Node, out: &mut String, raw: bool) {
    match node {
        Node::Text(text) if raw => out.push_str(text),
        Node::Text(text) => out.push_str(&html_escape::encode_text(text)),
        Node::Element(el) => write_element(el, out),
    }
}

fn write_element(el: &Element, out: &mut String) {
    let _ = write!(out, "<{}", el.tag);
    for (name, value) in &el.attrs {
        let _ = write!(
            out,
            " {}=\"{}\"",
            name,
            html_escape::encode_double_quoted_attribute(value)
        );
    }
    out.push('>');
    if is_void(&el.tag) {
        return;
    }
    let raw = RAW_TEXT_ELEMENTS.contains(&el.tag.as_str());
    for child in &el.children {
        write_node(child, out, raw);
    }
    let _ = write!(out, "</{}>", el.tag);
}

// ==================== Parsing ====================

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    stack: Vec<Element>,
}

pub fn parse_fragment(src: &str) -> Vec<Node> {
    let mut parser = Parser {
        src,
        pos: 0,
        stack: vec![Element::new("#fragment")],
    };
    parser.run();
    while parser.stack.len() > 1 {
        parser.pop();
    }
    parser.stack.pop().map(|root| root.children).unwrap_or_default()
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn run(&mut self) {
        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.pos += rest.find("-->").map(|i| i + 3).unwrap_or(rest.len());
            } else if rest.starts_with("</") {
                self.closing_tag();
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                self.pos += rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
            } else if rest.starts_with('<')
                && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
            {
                self.opening_tag();
            } else {
                let first = rest.chars().next().map(char::len_utf8).unwrap_or(1);
                let end = rest[first..]
                    .find('<')
                    .map(|i| i + first)
                    .unwrap_or(rest.len());
                let decoded = html_escape::decode_html_entities(&rest[..end]).into_owned();
                self.push_text(&decoded);
                self.pos += end;
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(top) = self.stack.last_mut() {
            if let Some(Node::Text(prev)) = top.children.last_mut() {
                prev.push_str(text);
            } else {
                top.children.push(Node::Text(text.to_string()));
            }
        }
    }

    fn pop(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        if let Some(done) = self.stack.pop() {
            if let Some(parent) = self.stack.last_mut() {
                parent.children.push(Node::Element(done));
            }
        }
    }

    fn take_name(&mut self) -> String {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == ':' || c == '_'))
            .unwrap_or(rest.len());
        self.pos += len;
        rest[..len].to_ascii_lowercase()
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn closing_tag(&mut self) {
        self.pos += 2;
        let name = self.take_name();
        let rest = self.rest();
        self.pos += rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
        if name.is_empty() {
            return;
        }
        // Unmatched closers are dropped, matched ones close everything above them.
        if let Some(depth) = self.stack.iter().skip(1).rposition(|el| el.tag == name) {
            while self.stack.len() > depth + 1 {
                self.pop();
            }
        }
    }

    fn opening_tag(&mut self) {
        self.pos += 1;
        let mut el = Element::new(&self.take_name());
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                break;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break;
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                self_closing = true;
                break;
            }
            let name_len = rest
                .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
                .unwrap_or(rest.len());
            if name_len == 0 {
                self.pos += 1;
                continue;
            }
            let name = rest[..name_len].to_ascii_lowercase();
            self.pos += name_len;
            self.skip_whitespace();

            let mut value = String::new();
            if self.rest().starts_with('=') {
                self.pos += 1;
                self.skip_whitespace();
                value = self.attr_value();
            }
            if !el.has_attr(&name) {
                el.attrs.push((name, value));
            }
        }

        // <p> and <li> close an open sibling of the same kind.
        if matches!(el.tag.as_str(), "p" | "li")
            && self.stack.last().map(|top| top.tag == el.tag).unwrap_or(false)
        {
            self.pop();
        }

        if is_void(&el.tag) || self_closing {
            if let Some(top) = self.stack.last_mut() {
                top.children.push(Node::Element(el));
            }
            return;
        }

        if RAW_TEXT_ELEMENTS.contains(&el.tag.as_str()) {
            let rest = self.rest();
            let closer = format!("</{}", el.tag);
            let end = rest
                .to_ascii_lowercase()
                .find(&closer)
                .unwrap_or(rest.len());
            if end > 0 {
                el.children.push(Node::Text(rest[..end].to_string()));
            }
            self.pos += end;
            let rest = self.rest();
            self.pos += rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
            if let Some(top) = self.stack.last_mut() {
                top.children.push(Node::Element(el));
            }
            return;
        }

        self.stack.push(el);
    }

    fn attr_value(&mut self) -> String {
        let rest = self.rest();
        let raw = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let body = &rest[1..];
                let end = body.find(q).unwrap_or(body.len());
                self.pos += 1 + end + usize::from(end < body.len());
                &body[..end]
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                self.pos += end;
                &rest[..end]
            }
        };
        html_escape::decode_html_entities(raw).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_markup() {
        let nodes = parse_fragment("<p>Hello <strong>big</strong> world</p><hr><p>x &amp; y</p>");
        assert_eq!(nodes.len(), 3);
        let first = nodes[0].as_element().unwrap();
        assert_eq!(first.tag, "p");
        assert_eq!(first.text_content(), "Hello big world");
        assert_eq!(nodes[1].as_element().unwrap().tag, "hr");
        assert_eq!(nodes[2].as_element().unwrap().text_content(), "x & y");
    }

    #[test]
    fn serializer_round_trips_parser_output() {
        let html = r#"<details class="think" open=""><summary>[THINK]</summary><pre><code class="language-rs">a &lt; b</code></pre></details>"#;
        let nodes = parse_fragment(html);
        assert_eq!(to_html(&nodes), html);
    }

    #[test]
    fn tolerates_stray_and_unclosed_tags() {
        let nodes = parse_fragment("<div><p>one<p>two</span></div>tail<b>open");
        let div = nodes[0].as_element().unwrap();
        assert_eq!(div.children.len(), 2);
        assert_eq!(nodes[1], Node::text("tail"));
        assert_eq!(nodes[2].as_element().unwrap().text_content(), "open");
    }

    #[test]
    fn comments_are_dropped_and_script_is_raw() {
        let nodes = parse_fragment("<!-- hi --><script>if (a<b) x()</script>");
        assert_eq!(nodes.len(), 1);
        let script = nodes[0].as_element().unwrap();
        assert_eq!(script.text_content(), "if (a<b) x()");
    }

    #[test]
    fn equality_ignores_attribute_order_and_scroll() {
        let mut a = Element::new("pre").with_attr("class", "x").with_attr("id", "1");
        let b = Element::new("pre").with_attr("id", "1").with_attr("class", "x");
        a.scroll.top = 40;
        assert_eq!(a, b);

        let c = b.clone().with_attr("open", "");
        assert_ne!(a, c);
    }

    #[test]
    fn class_helpers() {
        let mut el = Element::new("div");
        el.add_class("message");
        el.add_class("assistant");
        el.add_class("message");
        assert_eq!(el.attr("class"), Some("message assistant"));
        el.toggle_class("message", false);
        assert_eq!(el.attr("class"), Some("assistant"));
    }
}
