use std::{collections::HashMap, fmt};

use ego_tree::{NodeId, NodeRef};
use html5ever::{tendril::StrTendril as ParsedTendril, Attribute, LocalName, Namespace, QualName};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{node::Element, ElementRef, Html, Node, Selector, StrTendril};
use thiserror::Error;
use tokio::sync::mpsc;

use super::mutation::{MutationBatch, MutationReceiver, MutationRecord};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
    #[error("node {0:?} is not a text node")]
    NotText(NodeId),
    #[error("the document root cannot be removed")]
    RootRemoval,
}

pub type ClickHandler = Box<dyn FnOnce(&mut Document, NodeId) + Send>;

struct Observer {
    target: NodeId,
    sender: mpsc::UnboundedSender<MutationBatch>,
}

/// The host page: a parsed [`Html`] tree plus the bits a browser adds on
/// top of it.
///
/// Structural and attribute changes are recorded as [`MutationRecord`]s and
/// delivered to observers in one batch per [`Document::flush`]. Node ids stay
/// valid after removal; a removed subtree is detached, not reused.
pub struct Document {
    html: Html,
    root: NodeId,
    body: NodeId,
    pending: Vec<MutationRecord>,
    observers: Vec<Observer>,
    click_handlers: HashMap<NodeId, ClickHandler>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("body", &self.body)
            .field("pending", &self.pending.len())
            .field("observers", &self.observers.len())
            .field("click_handlers", &self.click_handlers.len())
            .finish()
    }
}

impl Document {
    /// Empty `<html><head></head><body></body></html>` skeleton.
    pub fn new() -> Self {
        Self::parse("")
    }

    pub fn parse(source: &str) -> Self {
        let mut html = Html::parse_document(source);
        let root = html.root_element().id();
        let found = html.root_element().descendants().find(|node| {
            node.value()
                .as_element()
                .is_some_and(|element| element.name() == "body")
        });
        let body = match found.map(|node| node.id()) {
            Some(body) => body,
            // Frameset documents have no body; give content somewhere to go.
            None => match html.tree.get_mut(root) {
                Some(mut node) => node.append(element_node("body", Vec::new())).id(),
                None => root,
            },
        };

        Self {
            html,
            root,
            body,
            pending: Vec::new(),
            observers: Vec::new(),
            click_handlers: HashMap::new(),
        }
    }

    /// The `<html>` element.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.html.tree.get(id)?.value().as_element()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.html.tree.get(id)?.parent().map(|parent| parent.id())
    }

    /// Whether `id` is still connected to the document.
    pub fn contains(&self, id: NodeId) -> bool {
        self.is_within(id, self.html.tree.root().id())
    }

    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        self.html.tree.get(id).is_some_and(|node| {
            node.id() == ancestor || node.ancestors().any(|parent| parent.id() == ancestor)
        })
    }

    /// All connected elements matching `selector`, in document order.
    pub fn select(&self, selector: &Selector) -> Vec<NodeId> {
        self.html
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|element| selector.matches(element))
            .map(|element| element.id())
            .collect()
    }

    pub fn query_selector(&self, selector: &Selector) -> Option<NodeId> {
        self.html
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|element| selector.matches(element))
            .map(|element| element.id())
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        let node = self.html.tree.get(id)?;
        std::iter::once(node)
            .chain(node.ancestors())
            .filter_map(ElementRef::wrap)
            .find(|element| selector.matches(element))
            .map(|element| element.id())
    }

    /// `id` and everything below it, attached or not.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        self.html
            .tree
            .get(id)
            .map(|node| node.descendants().map(|node| node.id()).collect())
            .unwrap_or_default()
    }

    /// Text as a reader would see it: descendant text joined, whitespace
    /// collapsed, trimmed.
    pub fn rendered_text(&self, id: NodeId) -> String {
        let mut raw = String::new();
        if let Some(node) = self.html.tree.get(id) {
            collect_text(node, &mut raw);
        }
        WHITESPACE.replace_all(&raw, " ").trim().to_string()
    }

    /// Parses `html` as a fragment and appends it under `parent`.
    pub fn append_html(&mut self, parent: NodeId, html: &str) -> Result<Vec<NodeId>, DomError> {
        self.require_element(parent)?;
        let fragment = Html::parse_fragment(html);
        let added: Vec<NodeId> = fragment
            .root_element()
            .children()
            .filter_map(|child| self.graft(parent, child))
            .collect();
        if !added.is_empty() {
            self.pending.push(MutationRecord::ChildList {
                target: parent,
                added: added.clone(),
                removed: Vec::new(),
            });
        }
        Ok(added)
    }

    /// Detaches `id` from its parent. Click handlers inside the subtree go
    /// with it.
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        if id == self.root {
            return Err(DomError::RootRemoval);
        }
        let mut node = self.html.tree.get_mut(id).ok_or(DomError::UnknownNode(id))?;
        let Some(parent) = node.parent().map(|parent| parent.id()) else {
            return Ok(());
        };
        node.detach();

        for removed in self.subtree(id) {
            self.click_handlers.remove(&removed);
        }
        self.pending.push(MutationRecord::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![id],
        });
        Ok(())
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.edit_attributes(id, |attrs| {
            match attrs.iter().position(|(key, _)| &*key.local == name) {
                Some(index) => attrs[index].1 = value.to_string(),
                None => attrs.push((attribute_name(name), value.to_string())),
            }
            true
        })?;
        self.record_attribute(id, name);
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<(), DomError> {
        let removed = self.edit_attributes(id, |attrs| {
            let before = attrs.len();
            attrs.retain(|(key, _)| &*key.local != name);
            attrs.len() != before
        })?;
        if removed {
            self.record_attribute(id, name);
        }
        Ok(())
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.element(id)
            .is_some_and(|element| element.classes().any(|candidate| candidate == class))
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) -> Result<(), DomError> {
        self.edit_classes(id, |classes| {
            if classes.iter().any(|candidate| candidate == class) {
                return false;
            }
            classes.push(class.to_string());
            true
        })
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) -> Result<(), DomError> {
        self.edit_classes(id, |classes| {
            let before = classes.len();
            classes.retain(|candidate| candidate != class);
            classes.len() != before
        })
    }

    /// Replaces the content of a text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        let mut node = self.html.tree.get_mut(id).ok_or(DomError::UnknownNode(id))?;
        match node.value() {
            Node::Text(existing) => existing.text = StrTendril::from_slice(text),
            _ => return Err(DomError::NotText(id)),
        }
        self.pending.push(MutationRecord::CharacterData { target: id });
        Ok(())
    }

    pub fn text_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.html
            .tree
            .get(id)
            .map(|node| {
                node.descendants()
                    .filter(|node| node.value().is_text())
                    .map(|node| node.id())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Registers a handler fired by the next click on `id`, then dropped.
    /// A later registration for the same node replaces an unfired one.
    pub fn on_click_once(&mut self, id: NodeId, handler: ClickHandler) -> Result<(), DomError> {
        self.require_element(id)?;
        self.click_handlers.insert(id, handler);
        Ok(())
    }

    pub fn has_click_handler(&self, id: NodeId) -> bool {
        self.click_handlers.contains_key(&id)
    }

    pub fn click_handler_count(&self) -> usize {
        self.click_handlers.len()
    }

    /// Dispatches a click at `id`. The event bubbles to the nearest ancestor
    /// with a handler, which consumes it. Returns the node that handled it.
    pub fn click(&mut self, id: NodeId) -> Option<NodeId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let Some(handler) = self.click_handlers.remove(&current) {
                handler(self, current);
                return Some(current);
            }
            cursor = self.parent(current);
        }
        None
    }

    /// Subscribes to mutation batches whose targets lie within `target`'s subtree.
    pub fn observe(&mut self, target: NodeId) -> MutationReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.observers.push(Observer { target, sender });
        receiver
    }

    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.pending)
    }

    /// Delivers pending records to observers. Each observer receives at most
    /// one batch per flush; observers whose receiver is gone are dropped.
    pub fn flush(&mut self) -> usize {
        let records = self.take_records();
        if records.is_empty() {
            return 0;
        }

        let mut observers = std::mem::take(&mut self.observers);
        observers.retain(|observer| {
            let batch: MutationBatch = records
                .iter()
                .filter(|record| self.is_within(record.target(), observer.target))
                .cloned()
                .collect();
            if batch.is_empty() {
                return !observer.sender.is_closed();
            }
            observer.sender.send(batch).is_ok()
        });
        self.observers = observers;
        records.len()
    }

    fn require_element(&self, id: NodeId) -> Result<(), DomError> {
        let node = self.html.tree.get(id).ok_or(DomError::UnknownNode(id))?;
        if node.value().is_element() {
            Ok(())
        } else {
            Err(DomError::NotAnElement(id))
        }
    }

    /// Copies `source` and its element/text descendants under `parent`.
    fn graft(&mut self, parent: NodeId, source: NodeRef<'_, Node>) -> Option<NodeId> {
        if !matches!(source.value(), Node::Element(_) | Node::Text(_)) {
            return None;
        }
        let id = self
            .html
            .tree
            .get_mut(parent)?
            .append(source.value().clone())
            .id();
        for child in source.children() {
            self.graft(id, child);
        }
        Some(id)
    }

    /// Scraper caches an element's id and classes, so attribute edits
    /// rebuild the element instead of patching it in place.
    fn edit_attributes<F>(&mut self, id: NodeId, edit: F) -> Result<bool, DomError>
    where
        F: FnOnce(&mut Vec<(QualName, String)>) -> bool,
    {
        let mut node = self.html.tree.get_mut(id).ok_or(DomError::UnknownNode(id))?;
        let Node::Element(element) = node.value() else {
            return Err(DomError::NotAnElement(id));
        };
        let mut attrs: Vec<(QualName, String)> = element
            .attrs
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        if !edit(&mut attrs) {
            return Ok(false);
        }
        let attributes = attrs
            .into_iter()
            .map(|(name, value)| Attribute {
                name,
                value: ParsedTendril::from_slice(&value),
            })
            .collect();
        *element = Element::new(element.name.clone(), attributes);
        Ok(true)
    }

    fn edit_classes<F>(&mut self, id: NodeId, edit: F) -> Result<(), DomError>
    where
        F: FnOnce(&mut Vec<String>) -> bool,
    {
        let changed = self.edit_attributes(id, |attrs| {
            let index = attrs.iter().position(|(key, _)| &*key.local == "class");
            let mut classes: Vec<String> = index
                .map(|index| attrs[index].1.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            if !edit(&mut classes) {
                return false;
            }
            let joined = classes.join(" ");
            match index {
                Some(index) => attrs[index].1 = joined,
                None => attrs.push((attribute_name("class"), joined)),
            }
            true
        })?;
        if changed {
            self.record_attribute(id, "class");
        }
        Ok(())
    }

    fn record_attribute(&mut self, id: NodeId, name: &str) {
        self.pending.push(MutationRecord::Attributes {
            target: id,
            name: name.to_string(),
        });
    }
}

fn attribute_name(name: &str) -> QualName {
    QualName::new(None, Namespace::from(""), LocalName::from(name))
}

fn element_node(name: &str, attributes: Vec<Attribute>) -> Node {
    let name = QualName::new(
        None,
        Namespace::from("http://www.w3.org/1999/xhtml"),
        LocalName::from(name),
    );
    Node::Element(Element::new(name, attributes))
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(element) => {
            match element.name() {
                "script" | "style" | "template" => return,
                "br" => out.push('\n'),
                _ => {}
            }
            for child in node.children() {
                collect_text(child, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(source: &str) -> Selector {
        Selector::parse(source).unwrap()
    }

    #[test]
    fn parse_builds_body_and_rendered_text() {
        let document = Document::parse(
            "<html><body><p class=\"md\">  Hello <b>there</b>\n   friend </p><script>var x;</script></body></html>",
        );
        let paragraph = document.query_selector(&selector("p")).unwrap();
        assert_eq!(document.rendered_text(paragraph), "Hello there friend");
        assert_eq!(document.element(document.body()).unwrap().name(), "body");
        assert!(document.is_within(paragraph, document.body()));
    }

    #[test]
    fn full_css_selectors_match() {
        let document = Document::parse(
            r#"<body>
                <article><div data-testid="tweetText">one</div></article>
                <p>first</p><p>second</p>
                <a href="https://example.com/font/sans">font</a>
            </body>"#,
        );
        assert_eq!(document.select(&selector("article > div")).len(), 1);
        assert_eq!(document.select(&selector(r#"[data-testid^="tweet"]"#)).len(), 1);
        assert_eq!(document.select(&selector("a[href*='/font/']")).len(), 1);
        assert_eq!(document.select(&selector("p ~ p")).len(), 1);
        let first = document.query_selector(&selector("article:first-child")).unwrap();
        assert_eq!(document.element(first).unwrap().name(), "article");
    }

    #[test]
    fn append_html_records_added_nodes_once_per_flush() {
        let mut document = Document::new();
        let body = document.body();
        let mut receiver = document.observe(body);

        document.append_html(body, "<p>one</p><p>two</p>").unwrap();
        document.append_html(body, "<p>three</p>").unwrap();
        assert_eq!(document.flush(), 2);

        let batch = receiver.try_recv().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(MutationRecord::has_added_nodes));
        assert!(receiver.try_recv().is_err());
        assert_eq!(document.select(&selector("p")).len(), 3);
    }

    #[test]
    fn observers_only_see_their_subtree() {
        let mut document = Document::new();
        let head = document.query_selector(&selector("head")).unwrap();
        let body = document.body();
        let mut receiver = document.observe(body);

        document.append_html(head, "<meta name=\"x\">").unwrap();
        document.flush();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn removed_nodes_leave_the_tree() {
        let mut document = Document::new();
        let body = document.body();
        let added = document.append_html(body, "<div><p>gone</p></div>").unwrap();
        let paragraph = document.query_selector(&selector("p")).unwrap();

        document.remove(added[0]).unwrap();
        assert!(!document.contains(paragraph));
        assert!(document.select(&selector("p")).is_empty());
        assert_eq!(document.subtree(added[0]).len(), 3, "div, p and its text");
        assert_eq!(document.remove(document.root()), Err(DomError::RootRemoval));

        let records = document.take_records();
        assert!(matches!(
            records.last(),
            Some(MutationRecord::ChildList { removed, .. }) if removed == &vec![added[0]]
        ));
    }

    #[test]
    fn removal_drops_click_handlers_inside_the_subtree() {
        let mut document = Document::new();
        let body = document.body();
        for _ in 0..100 {
            let card = document
                .append_html(body, "<div><span>inner</span></div>")
                .unwrap()[0];
            let inner = document.subtree(card)[1];
            document.on_click_once(card, Box::new(|_, _| {})).unwrap();
            document.on_click_once(inner, Box::new(|_, _| {})).unwrap();
            document.remove(card).unwrap();
        }
        assert_eq!(document.click_handler_count(), 0);
    }

    #[test]
    fn class_helpers_edit_class_attribute() {
        let mut document = Document::new();
        let body = document.body();
        let div = document.append_html(body, "<div class=\"a\"></div>").unwrap()[0];

        document.add_class(div, "b").unwrap();
        document.add_class(div, "b").unwrap();
        assert_eq!(document.element(div).unwrap().attr("class"), Some("a b"));
        document.remove_class(div, "a").unwrap();
        assert!(!document.has_class(div, "a"));
        assert!(document.has_class(div, "b"));
        assert_eq!(document.select(&selector(".b")), vec![div]);
        assert!(document.select(&selector(".a")).is_empty());
    }

    #[test]
    fn attributes_and_text_can_be_edited() {
        let mut document = Document::new();
        let body = document.body();
        let div = document.append_html(body, "<div>before</div>").unwrap()[0];

        document.set_attribute(div, "title", "hint").unwrap();
        assert_eq!(document.element(div).unwrap().attr("title"), Some("hint"));
        document.remove_attribute(div, "title").unwrap();
        assert_eq!(document.element(div).unwrap().attr("title"), None);

        let text = document.text_nodes(div)[0];
        document.set_text(text, "after").unwrap();
        assert_eq!(document.rendered_text(div), "after");
        assert_eq!(document.set_text(div, "x"), Err(DomError::NotText(div)));
        assert_eq!(
            document.set_attribute(text, "title", "x"),
            Err(DomError::NotAnElement(text))
        );
    }

    #[test]
    fn click_handlers_fire_once_and_bubble() {
        let mut document = Document::new();
        let body = document.body();
        let outer = document
            .append_html(body, "<div><span>inner</span></div>")
            .unwrap()[0];
        let inner = document.query_selector(&selector("span")).unwrap();

        document
            .on_click_once(
                outer,
                Box::new(|doc, id| {
                    doc.add_class(id, "clicked").unwrap();
                }),
            )
            .unwrap();

        assert_eq!(document.click(inner), Some(outer));
        assert!(document.has_class(outer, "clicked"));
        assert_eq!(document.click(inner), None);
        assert!(!document.has_click_handler(outer));
    }
}
