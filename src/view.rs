// src/view.rs

//! The live message area: one view per displayed message, the minimap strip
//! and the document title. Rendering targets `MessageView::content`, which the
//! reconciler patches in place while a reply streams.

use crate::render::html::{Element, Node};
use crate::sidebar::UNTITLED;
use crate::types::{ContentBlock, Message, Role};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagePreview {
    pub id: String,
    pub name: String,
    pub url: String,
}

impl ImagePreview {
    pub fn from_block(block: &ContentBlock) -> Option<Self> {
        match block {
            ContentBlock::Image {
                image_url,
                id,
                name,
            } => Some(Self {
                id: id.clone(),
                name: name.clone(),
                url: image_url.url.clone(),
            }),
            ContentBlock::Text { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StatsTone {
    #[default]
    Normal,
    Stopped,
    Failed,
}

#[derive(Clone, Debug)]
pub struct MessageView {
    pub id: String,
    pub role: Role,
    pub label: String,
    pub rendered: bool,
    pub collapsed: bool,
    pub processing: bool,
    pub stats: String,
    pub stats_tone: StatsTone,
    pub images: Vec<ImagePreview>,
    pub content: Element,
}

impl MessageView {
    pub fn new(msg: &Message) -> Self {
        let label = match (&msg.role, &msg.model) {
            (Role::Assistant, Some(model)) if !model.is_empty() => model.to_uppercase(),
            (role, _) => role.as_str().to_uppercase(),
        };
        Self {
            id: msg.id.clone(),
            role: msg.role,
            label,
            rendered: msg.renders_html(),
            collapsed: msg.is_collapsed,
            processing: false,
            stats: msg.stats.clone().unwrap_or_default(),
            stats_tone: StatsTone::Normal,
            images: msg.images().filter_map(ImagePreview::from_block).collect(),
            content: Element::new("div"),
        }
    }

    /// Fill the content area from a render result.
    pub fn set_content(&mut self, rendered: &str) {
        if self.rendered {
            self.content.set_inner_html(rendered);
        } else {
            self.content.set_text(rendered);
        }
    }

    pub fn content_text(&self) -> String {
        self.content.text_content()
    }

    pub fn think_block_mut(&mut self) -> Option<&mut Element> {
        self.content
            .find_mut(&|el| el.tag == "details" && el.has_class(crate::render::THINK_CLASS))
    }

    pub fn think_block(&self) -> Option<&Element> {
        self.content
            .find(&|el| el.tag == "details" && el.has_class(crate::render::THINK_CLASS))
    }

    pub fn to_element(&self) -> Element {
        let mut root = Element::new("div")
            .with_attr("class", &format!("message {}", self.role.as_str()))
            .with_attr("id", &self.id)
            .with_attr("data-rendered", if self.rendered { "true" } else { "false" });
        root.toggle_class("isProcessing", self.processing);

        let toggle = if self.rendered { "[RAW]" } else { "[RENDER]" };
        let collapse = if self.collapsed { "[+]" } else { "[-]" };
        let header = Element::new("span")
            .with_attr("class", "role-label")
            .with_child(Node::Element(
                Element::new("span").with_child(Node::text(&self.label)),
            ))
            .with_child(Node::Element(
                Element::new("div")
                    .with_attr("class", "role-header-right")
                    .with_child(Node::Element(
                        Element::new("button")
                            .with_attr("class", "action-btn btn-toggle")
                            .with_child(Node::text(toggle)),
                    ))
                    .with_child(Node::Element(
                        Element::new("button")
                            .with_attr("class", "action-btn btn-collapse")
                            .with_attr("data-is-collapsed", &self.collapsed.to_string())
                            .with_child(Node::text(collapse)),
                    )),
            ));
        root.children.push(Node::Element(header));

        let mut previews = Element::new("div").with_attr("class", "preview-content");
        previews.toggle_class("collapsed", self.collapsed);
        for image in &self.images {
            previews.children.push(Node::Element(
                Element::new("div")
                    .with_attr("id", &image.id)
                    .with_attr("class", "preview-item")
                    .with_child(Node::Element(
                        Element::new("img")
                            .with_attr("src", &image.url)
                            .with_attr("loading", "lazy")
                            .with_attr("class", "img-node"),
                    ))
                    .with_child(Node::Element(
                        Element::new("span")
                            .with_attr("class", "file-info")
                            .with_child(Node::text(&image.name)),
                    )),
            ));
        }
        root.children.push(Node::Element(previews));

        let mut content = self.content.clone();
        content.set_attr("class", "content markdown-body");
        content.toggle_class("collapsed", self.collapsed);
        content.set_attr(
            "contenteditable",
            if self.rendered { "false" } else { "plaintext-only" },
        );
        root.children.push(Node::Element(content));

        let mut stats = Element::new("div")
            .with_attr("class", "meta-stats")
            .with_child(Node::text(&self.stats));
        match self.stats_tone {
            StatsTone::Normal => {}
            StatsTone::Stopped => stats.add_class("stopped"),
            StatsTone::Failed => stats.add_class("failed"),
        }
        root.children.push(Node::Element(
            Element::new("div")
                .with_attr("class", "msg-footer")
                .with_child(Node::Element(stats)),
        ));

        root
    }

    pub fn to_html(&self) -> String {
        self.to_element().outer_html()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinimapItem {
    pub id: String,
    pub role: Role,
    pub collapsed: bool,
}

#[derive(Debug, Default)]
pub struct MessageArea {
    messages: Vec<MessageView>,
    minimap: Vec<MinimapItem>,
    pending_images: Vec<ImagePreview>,
    document_title: String,
    busy: bool,
    scroll_requests: usize,
}

impl MessageArea {
    pub fn clear(&mut self) {
        self.messages.clear();
        self.minimap.clear();
    }

    pub fn push(&mut self, view: MessageView, scroll: bool) {
        self.minimap.push(MinimapItem {
            id: view.id.clone(),
            role: view.role,
            collapsed: view.collapsed,
        });
        self.messages.push(view);
        if scroll {
            self.scroll_to_bottom();
        }
    }

    /// Insert directly after the message `after_id`; appends when it is gone.
    pub fn insert_after(&mut self, after_id: &str, view: MessageView) {
        let item = MinimapItem {
            id: view.id.clone(),
            role: view.role,
            collapsed: view.collapsed,
        };
        match self.position(after_id) {
            Some(pos) => {
                self.messages.insert(pos + 1, view);
                let mini = self
                    .minimap
                    .iter()
                    .position(|m| m.id == after_id)
                    .map(|p| p + 1)
                    .unwrap_or(self.minimap.len());
                self.minimap.insert(mini, item);
            }
            None => {
                self.messages.push(view);
                self.minimap.push(item);
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.minimap.retain(|m| m.id != id);
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        before != self.messages.len()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&MessageView> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut MessageView> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[MessageView] {
        &self.messages
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn minimap(&self) -> &[MinimapItem] {
        &self.minimap
    }

    pub fn set_minimap_collapsed(&mut self, id: &str, collapsed: bool) {
        if let Some(item) = self.minimap.iter_mut().find(|m| m.id == id) {
            item.collapsed = collapsed;
        }
    }

    pub fn set_document_title(&mut self, session_title: &str) {
        self.document_title = if session_title.is_empty() {
            UNTITLED.to_string()
        } else {
            format!("[Chat] {}", session_title)
        };
    }

    pub fn document_title(&self) -> &str {
        &self.document_title
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_requests += 1;
    }

    pub fn scroll_requests(&self) -> usize {
        self.scroll_requests
    }

    pub fn set_pending_images(&mut self, images: Vec<ImagePreview>) {
        self.pending_images = images;
    }

    pub fn pending_images(&self) -> &[ImagePreview] {
        &self.pending_images
    }

    /// Clear the busy markers left on any message view.
    pub fn clear_processing(&mut self) {
        for view in self.messages.iter_mut() {
            view.processing = false;
        }
        self.busy = false;
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for view in &self.messages {
            out.push_str(&view.to_html());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(text: &str) -> Message {
        let mut msg = Message::assistant(Some("gpt-test".into()));
        msg.set_primary_text(text);
        msg
    }

    #[test]
    fn labels_follow_role_and_model() {
        let view = MessageView::new(&assistant("x"));
        assert_eq!(view.label, "GPT-TEST");
        assert!(view.rendered);

        let view = MessageView::new(&Message::user(vec![ContentBlock::text("hi")]));
        assert_eq!(view.label, "USER");
        assert!(!view.rendered);
    }

    #[test]
    fn collapse_round_trip_is_byte_identical() {
        let mut view = MessageView::new(&assistant("x"));
        view.set_content("<p>x</p>");
        let original = view.to_html();

        view.collapsed = true;
        assert_ne!(view.to_html(), original);
        view.collapsed = false;
        assert_eq!(view.to_html(), original);
    }

    #[test]
    fn raw_content_is_text() {
        let mut view = MessageView::new(&Message::user(vec![ContentBlock::text("<b>")]));
        view.set_content("<b>");
        assert_eq!(view.content_text(), "<b>");
        assert!(view.to_html().contains("&lt;b&gt;"));
    }

    #[test]
    fn insert_after_keeps_minimap_in_step() {
        let view = |id: &str, msg: Message| {
            let mut v = MessageView::new(&msg);
            v.id = id.to_string();
            v
        };
        let mut area = MessageArea::default();
        area.push(view("a", Message::user(vec![ContentBlock::text("a")])), false);
        area.push(view("b", Message::user(vec![ContentBlock::text("b")])), false);
        area.insert_after("a", view("c", assistant("c")));

        assert_eq!(area.message_ids(), vec!["a", "c", "b"]);
        let mini: Vec<&str> = area.minimap().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(mini, vec!["a", "c", "b"]);

        assert!(area.remove("c"));
        assert_eq!(area.len(), 2);
    }

    #[test]
    fn document_title() {
        let mut area = MessageArea::default();
        area.set_document_title("");
        assert_eq!(area.document_title(), "New Session");
        area.set_document_title("Rust");
        assert_eq!(area.document_title(), "[Chat] Rust");
    }
}
