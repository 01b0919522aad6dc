// src/reconcile.rs

//! Morph a live element's children towards freshly rendered HTML.
//!
//! Children are matched by position. Equal nodes are left alone, nodes with
//! the same tag are updated in place (attributes synced, children morphed
//! recursively), anything else is replaced. Two pieces of UI state are not
//! expressed in markup and are carried over before the comparison: the
//! `open` flag of `<details>` and the scroll offsets of `<pre>`.

use std::mem;

use crate::render::html::{parse_fragment, Element, Node};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchStats {
    pub unchanged: usize,
    pub updated: usize,
    pub replaced: usize,
    pub inserted: usize,
    pub removed: usize,
}

impl PatchStats {
    pub fn is_noop(&self) -> bool {
        self.updated + self.replaced + self.inserted + self.removed == 0
    }
}

pub fn patch(live: &mut Element, html: &str) -> PatchStats {
    patch_nodes(live, parse_fragment(html))
}

pub fn patch_nodes(live: &mut Element, next: Vec<Node>) -> PatchStats {
    let mut stats = PatchStats::default();
    morph_children(&mut live.children, next, &mut stats);
    stats
}

fn morph_children(live: &mut Vec<Node>, next: Vec<Node>, stats: &mut PatchStats) {
    let target_len = next.len();
    for (i, new) in next.into_iter().enumerate() {
        match live.get_mut(i) {
            Some(old) => morph_node(old, new, stats),
            None => {
                live.push(new);
                stats.inserted += 1;
            }
        }
    }
    if live.len() > target_len {
        stats.removed += live.len() - target_len;
        live.truncate(target_len);
    }
}

fn carry_ui_state(from: &Element, to: &mut Element) {
    match from.tag.as_str() {
        "details" => {
            if from.has_attr("open") {
                to.set_attr("open", "");
            } else {
                to.remove_attr("open");
            }
        }
        "pre" => to.scroll = from.scroll,
        _ => {}
    }
}

fn morph_node(old: &mut Node, new: Node, stats: &mut PatchStats) {
    match (old, new) {
        (Node::Text(current), Node::Text(text)) => {
            if *current == text {
                stats.unchanged += 1;
            } else {
                *current = text;
                stats.updated += 1;
            }
        }
        (Node::Element(current), Node::Element(mut el)) if current.tag == el.tag => {
            carry_ui_state(current, &mut el);
            if *current == el {
                stats.unchanged += 1;
                return;
            }
            current.attrs = mem::take(&mut el.attrs);
            current.scroll = el.scroll;
            morph_children(&mut current.children, mem::take(&mut el.children), stats);
            stats.updated += 1;
        }
        (slot, new) => {
            *slot = new;
            stats.replaced += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::html::to_html;

    fn live(html: &str) -> Element {
        let mut root = Element::new("div");
        root.set_inner_html(html);
        root
    }

    #[test]
    fn identical_content_is_a_noop() {
        let html = "<p>one</p><pre><code>x</code></pre>";
        let mut root = live(html);
        let stats = patch(&mut root, html);
        assert!(stats.is_noop());
        assert_eq!(stats.unchanged, 2);
    }

    #[test]
    fn appended_text_updates_in_place() {
        let mut root = live("<p>Hel</p>");
        let stats = patch(&mut root, "<p>Hello</p><p>world</p>");
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.updated, 2);
        assert_eq!(to_html(&root.children), "<p>Hello</p><p>world</p>");
    }

    #[test]
    fn details_open_state_survives() {
        let mut root = live("<details><summary>[THINK]</summary><p>a</p></details>");
        root.find_mut(&|el| el.tag == "details").unwrap().set_attr("open", "");

        let stats = patch(&mut root, "<details><summary>[THINK]</summary><p>ab</p></details>");
        let details = root.find(&|el| el.tag == "details").unwrap();
        assert!(details.has_attr("open"));
        assert_eq!(details.text_content(), "[THINK]ab");
        assert_eq!(stats.replaced, 0);

        // Closed stays closed even if the new markup says open.
        root.find_mut(&|el| el.tag == "details").unwrap().remove_attr("open");
        let stats = patch(&mut root, "<details open><summary>[THINK]</summary><p>ab</p></details>");
        assert!(stats.is_noop());
    }

    #[test]
    fn pre_scroll_is_preserved() {
        let mut root = live("<pre><code>line</code></pre>");
        root.find_mut(&|el| el.tag == "pre").unwrap().scroll.left = 120;

        patch(&mut root, "<pre><code>line\nmore</code></pre>");
        assert_eq!(root.find(&|el| el.tag == "pre").unwrap().scroll.left, 120);
    }

    #[test]
    fn different_tags_are_replaced_and_extra_removed() {
        let mut root = live("<p>a</p><ul><li>b</li></ul><p>c</p>");
        let stats = patch(&mut root, "<h1>a</h1><ul><li>b</li></ul>");
        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(to_html(&root.children), "<h1>a</h1><ul><li>b</li></ul>");
    }
}
