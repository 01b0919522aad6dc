// src/render/sanitize.rs

use super::html::{parse_fragment, to_html, Element, Node};

/// Link target that sends its own text as a user message when clicked.
pub const USER_SEND_HREF: &str = "#/user_send";
pub const USER_SEND_CLASS: &str = "cmd_user_send";

const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "b", "blockquote", "br", "caption", "cite", "code", "col", "colgroup", "dd",
    "del", "details", "div", "dl", "dt", "em", "figcaption", "figure", "h1", "h2", "h3", "h4",
    "h5", "h6", "hr", "i", "img", "input", "ins", "kbd", "li", "mark", "ol", "p", "pre", "q",
    "s", "samp", "section", "small", "span", "strong", "sub", "summary", "sup", "table",
    "tbody", "td", "tfoot", "th", "thead", "tr", "u", "ul",
];

const ALLOWED_ATTRS: &[&str] = &[
    "align", "alt", "checked", "class", "colspan", "dir", "disabled", "height", "href", "id",
    "lang", "loading", "name", "open", "rel", "rowspan", "src", "start", "style", "target",
    "title", "type", "value", "width",
];

const URL_ATTRS: &[&str] = &["href", "src"];

pub fn sanitize_html(html: &str) -> String {
    to_html(&sanitize(parse_fragment(html)))
}

pub fn sanitize(nodes: Vec<Node>) -> Vec<Node> {
    nodes.into_iter().map(sanitize_node).collect()
}

fn sanitize_node(node: Node) -> Node {
    match node {
        Node::Text(_) => node,
        // Disallowed markup stays visible as its own source text.
        Node::Element(el) if !ALLOWED_TAGS.contains(&el.tag.as_str()) => {
            Node::Text(el.outer_html())
        }
        Node::Element(mut el) => {
            clean_attrs(&mut el);
            apply_link_policy(&mut el);
            if el.tag == "pre" {
                el.set_attr("contenteditable", "plaintext-only");
                el.add_class("no-edit");
            }
            el.children = sanitize(std::mem::take(&mut el.children));
            Node::Element(el)
        }
    }
}

fn clean_attrs(el: &mut Element) {
    let tag = el.tag.clone();
    el.attrs.retain(|(name, value)| {
        let known = ALLOWED_ATTRS.contains(&name.as_str()) || name.starts_with("data-");
        known && !(URL_ATTRS.contains(&name.as_str()) && !safe_url(&tag, value))
    });
}

fn safe_url(tag: &str, value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    if compact.starts_with("javascript:") || compact.starts_with("vbscript:") {
        return false;
    }
    if compact.starts_with("data:") {
        return tag == "img" && compact.starts_with("data:image/");
    }
    true
}

fn apply_link_policy(el: &mut Element) {
    if el.tag != "a" {
        return;
    }
    el.set_attr("target", "_blank");
    if el
        .attr("href")
        .map(|href| href.starts_with(USER_SEND_HREF))
        .unwrap_or(false)
    {
        el.add_class(USER_SEND_CLASS);
        el.remove_attr("target");
    }
}
