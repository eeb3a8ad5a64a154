//! Arena-backed document model.
//!
//! Nodes are addressed by [`NodeId`] and never freed while the owning engine lives;
//! detached nodes simply lose their parent link. Element properties and event
//! listeners hold script values, so the DOM is only ever touched through short
//! borrows that never span script evaluation.

use indexmap::IndexMap;

use crate::escape::{escape_attribute, escape_text};
use crate::script::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Fragment,
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub shadow_root: Option<NodeId>,
}

pub struct Listener {
    pub id: ListenerId,
    pub event_type: String,
    pub handler: Value,
}

pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub properties: IndexMap<String, Value>,
    pub listeners: Vec<Listener>,
    /// Host element when this node is a shadow root.
    pub host: Option<NodeId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            properties: IndexMap::new(),
            listeners: Vec::new(),
            host: None,
        }
    }
}

/// Child argument for [`Dom::build_element`].
#[derive(Debug, Clone)]
pub enum ElementChild {
    Text(String),
    Node(NodeId),
}

lazy_static::lazy_static! {
    static ref VOID_ELEMENTS: std::collections::HashSet<&'static str> = [
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
        "param", "source", "track", "wbr",
    ]
    .into_iter()
    .collect();
}

fn is_raw_text(tag: &str) -> bool {
    matches!(tag, "script" | "style")
}

pub struct Dom {
    nodes: Vec<Node>,
    document: NodeId,
    html: NodeId,
    head: NodeId,
    body: NodeId,
    next_listener: u64,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new("en")
    }
}

impl Dom {
    /// Empty `<html lang=..><head></head><body></body></html>` document.
    pub fn new(language: &str) -> Self {
        let mut dom = Dom {
            nodes: vec![Node::new(NodeKind::Document)],
            document: NodeId(0),
            html: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            next_listener: 1,
        };
        dom.html = dom.create_element("html");
        dom.head = dom.create_element("head");
        dom.body = dom.create_element("body");
        dom.set_attribute(dom.html, "lang", language);
        dom.append_child(dom.document, dom.html);
        dom.append_child(dom.html, dom.head);
        dom.append_child(dom.html, dom.body);
        dom
    }

    pub fn document(&self) -> NodeId {
        self.document
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn language(&self) -> String {
        self.get_attribute(self.html, "lang")
            .unwrap_or("en")
            .to_string()
    }

    pub fn set_language(&mut self, language: &str) {
        let html = self.html;
        self.set_attribute(html, "lang", language);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CREATION & ACCESS
    // ═══════════════════════════════════════════════════════════════════════════

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node::new(kind));
        NodeId(self.nodes.len() - 1)
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            shadow_root: None,
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Comment(text.to_string()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.push(NodeKind::Fragment)
    }

    /// Element with attributes and children in one call.
    pub fn build_element(
        &mut self,
        tag: &str,
        attrs: &[(String, String)],
        children: &[ElementChild],
    ) -> NodeId {
        let element = self.create_element(tag);
        for (name, value) in attrs {
            self.set_attribute(element, name, value);
        }
        for child in children {
            let node = match child {
                ElementChild::Text(text) => self.create_text(text),
                ElementChild::Node(node) => *node,
            };
            self.append_child(element, node);
        }
        element
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn contains_id(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Element(_))
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Element(el) => Some(&el.tag),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    pub fn host(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).host
    }

    /// Whether `id` is reachable from the document (through shadow hosts too).
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.document {
                return true;
            }
            match self.parent(current).or_else(|| self.host(current)) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TREE MUTATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Unlink a node from its parent. No-op for detached nodes.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|c| *c != id);
            self.node_mut(id).parent = None;
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Insert `child` before `reference` (or at the end). Fragments move their children.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if matches!(self.kind(child), NodeKind::Fragment) && self.host(child).is_none() {
            let moved: Vec<NodeId> = self.children(child).to_vec();
            for node in moved {
                self.insert_before(parent, node, reference);
            }
            return;
        }
        if child == parent || self.contains(child, parent) {
            return;
        }
        self.detach(child);
        let index = reference
            .and_then(|r| self.children(parent).iter().position(|c| *c == r))
            .unwrap_or(self.children(parent).len());
        self.node_mut(parent).children.insert(index, child);
        self.node_mut(child).parent = Some(parent);
    }

    /// Put `replacements` where `old` is, then detach `old`.
    pub fn replace_with(&mut self, old: NodeId, replacements: &[NodeId]) {
        if let Some(parent) = self.parent(old) {
            for node in replacements {
                if *node != old {
                    self.insert_before(parent, *node, Some(old));
                }
            }
            if !replacements.contains(&old) {
                self.detach(old);
            }
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children(id).to_vec();
        for child in children {
            self.detach(child);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ATTRIBUTES, TEXT & PROPERTIES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn attributes(&self, id: NodeId) -> &[(String, String)] {
        match self.kind(id) {
            NodeKind::Element(el) => &el.attrs,
            _ => &[],
        }
    }

    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.get_attribute(id, name).is_some()
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element(el) = &mut self.node_mut(id).kind {
            match el.attrs.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => *existing = value.to_string(),
                None => el.attrs.push((name.to_string(), value.to_string())),
            }
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<String> {
        if let NodeKind::Element(el) = &mut self.node_mut(id).kind {
            if let Some(index) = el.attrs.iter().position(|(n, _)| n == name) {
                return Some(el.attrs.remove(index).1);
            }
        }
        None
    }

    pub fn text_content(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Text(text) | NodeKind::Comment(text) => text.clone(),
            _ => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        for child in self.children(id) {
            match self.kind(*child) {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Comment(_) => {}
                _ => self.collect_text(*child, out),
            }
        }
    }

    pub fn set_text_content(&mut self, id: NodeId, text: &str) {
        if let NodeKind::Text(existing) | NodeKind::Comment(existing) = &mut self.node_mut(id).kind
        {
            *existing = text.to_string();
            return;
        }
        self.clear_children(id);
        if !text.is_empty() {
            let node = self.create_text(text);
            self.append_child(id, node);
        }
    }

    pub fn property(&self, id: NodeId, key: &str) -> Option<Value> {
        self.node(id).properties.get(key).cloned()
    }

    pub fn set_property(&mut self, id: NodeId, key: &str, value: Value) {
        self.node_mut(id).properties.insert(key.to_string(), value);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SHADOW ROOTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Attach (or return the existing) open shadow root of an element.
    pub fn attach_shadow(&mut self, host: NodeId) -> NodeId {
        if let Some(existing) = self.shadow_root(host) {
            return existing;
        }
        let root = self.create_fragment();
        self.node_mut(root).host = Some(host);
        if let NodeKind::Element(el) = &mut self.node_mut(host).kind {
            el.shadow_root = Some(root);
        }
        root
    }

    pub fn shadow_root(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::Element(el) => el.shadow_root,
            _ => None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// `root` and everything below it in document order, descending into shadow roots.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.children(id).iter().rev() {
                stack.push(*child);
            }
            if let Some(shadow) = self.shadow_root(id) {
                stack.push(shadow);
            }
        }
        out
    }

    pub fn find_by_attribute(&self, root: NodeId, name: &str, value: &str) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|id| self.get_attribute(*id, name) == Some(value))
    }

    pub fn find_all_with_attribute(&self, root: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|id| self.has_attribute(*id, name))
            .collect()
    }

    pub fn element_by_id(&self, id_attr: &str) -> Option<NodeId> {
        self.find_by_attribute(self.document, "id", id_attr)
    }

    pub fn contains_tag(&self, root: NodeId, tag: &str) -> bool {
        self.descendants(root)
            .into_iter()
            .any(|id| self.tag_name(id) == Some(tag))
    }

    /// Match a single compound selector: `tag`, `#id`, `.class`, `[attr]`, `[attr=value]`
    /// and combinations like `button.primary[type=submit]`.
    pub fn matches_selector(&self, id: NodeId, selector: &str) -> bool {
        let tag = match self.tag_name(id) {
            Some(tag) => tag,
            None => return false,
        };
        let mut rest = selector.trim();
        let tag_end = rest.find(['#', '.', '[']).unwrap_or(rest.len());
        let wanted_tag = &rest[..tag_end];
        if !wanted_tag.is_empty() && wanted_tag != "*" && !wanted_tag.eq_ignore_ascii_case(tag) {
            return false;
        }
        rest = &rest[tag_end..];

        while !rest.is_empty() {
            let (kind, body) = rest.split_at(1);
            match kind {
                "#" | "." => {
                    let end = body.find(['#', '.', '[']).unwrap_or(body.len());
                    let name = &body[..end];
                    let ok = if kind == "#" {
                        self.get_attribute(id, "id") == Some(name)
                    } else {
                        self.get_attribute(id, "class")
                            .map(|c| c.split_whitespace().any(|cls| cls == name))
                            .unwrap_or(false)
                    };
                    if !ok {
                        return false;
                    }
                    rest = &body[end..];
                }
                "[" => {
                    let end = match body.find(']') {
                        Some(end) => end,
                        None => return false,
                    };
                    let inner = &body[..end];
                    let ok = match inner.split_once('=') {
                        Some((name, value)) => {
                            let value = value.trim_matches(|c| c == '"' || c == '\'');
                            self.get_attribute(id, name.trim()) == Some(value)
                        }
                        None => self.has_attribute(id, inner.trim()),
                    };
                    if !ok {
                        return false;
                    }
                    rest = &body[end + 1..];
                }
                _ => return false,
            }
        }
        true
    }

    /// Descendants of `root` (excluding `root`) matching a compound selector.
    pub fn query_selector_all(&self, root: NodeId, selector: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .skip(1)
            .filter(|id| self.matches_selector(*id, selector))
            .collect()
    }

    pub fn query_selector(&self, root: NodeId, selector: &str) -> Option<NodeId> {
        self.query_selector_all(root, selector).into_iter().next()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn add_listener(&mut self, id: NodeId, event_type: &str, handler: Value) -> ListenerId {
        let listener_id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.node_mut(id).listeners.push(Listener {
            id: listener_id,
            event_type: event_type.to_string(),
            handler,
        });
        listener_id
    }

    pub fn remove_listener(&mut self, id: NodeId, listener: ListenerId) -> bool {
        let listeners = &mut self.node_mut(id).listeners;
        let before = listeners.len();
        listeners.retain(|l| l.id != listener);
        listeners.len() != before
    }

    /// Remove listeners whose handler is `handler` (`removeEventListener`).
    pub fn remove_listener_by_handler(&mut self, id: NodeId, event_type: &str, handler: &Value) {
        self.node_mut(id)
            .listeners
            .retain(|l| !(l.event_type == event_type && l.handler.strict_equals(handler)));
    }

    pub fn listeners_for(&self, id: NodeId, event_type: &str) -> Vec<Value> {
        self.node(id)
            .listeners
            .iter()
            .filter(|l| l.event_type == event_type)
            .map(|l| l.handler.clone())
            .collect()
    }

    pub fn listener_count(&self, id: NodeId) -> usize {
        self.node(id).listeners.len()
    }

    /// Bubbling path from `target` up to the document, crossing shadow boundaries.
    pub fn event_path(&self, target: NodeId) -> Vec<NodeId> {
        let mut path = vec![target];
        let mut current = target;
        while let Some(next) = self.parent(current).or_else(|| self.host(current)) {
            path.push(next);
            current = next;
        }
        path
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // NORMALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Merge adjacent text nodes and drop empty text and comment nodes below `id`.
    /// Whitespace-only text that spans a line break counts as empty, except inside
    /// `pre`, `textarea`, `script` and `style`. Comments that carry text are kept.
    /// Idempotent.
    pub fn normalize(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children(id).to_vec();
        let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
        for child in children {
            let merge_into = match (self.kind(child), kept.last()) {
                (NodeKind::Text(_), Some(prev)) if matches!(self.kind(*prev), NodeKind::Text(_)) => {
                    Some(*prev)
                }
                _ => None,
            };
            match self.kind(child).clone() {
                NodeKind::Text(text) if text.is_empty() => {
                    self.node_mut(child).parent = None;
                }
                NodeKind::Comment(text) if text.is_empty() => {
                    self.node_mut(child).parent = None;
                }
                NodeKind::Text(text) if merge_into.is_some() => {
                    if let Some(prev) = merge_into {
                        if let NodeKind::Text(existing) = &mut self.node_mut(prev).kind {
                            existing.push_str(&text);
                        }
                    }
                    self.node_mut(child).parent = None;
                }
                _ => {
                    self.normalize(child);
                    kept.push(child);
                }
            }
        }
        if !matches!(self.tag_name(id), Some("pre" | "textarea" | "script" | "style")) {
            let (blank, rest): (Vec<NodeId>, Vec<NodeId>) = kept.into_iter().partition(|child| {
                matches!(self.kind(*child), NodeKind::Text(text) if text.contains('\n') && text.trim().is_empty())
            });
            for child in blank {
                self.node_mut(child).parent = None;
            }
            kept = rest;
        }
        self.node_mut(id).children = kept;
        if let Some(shadow) = self.shadow_root(id) {
            self.normalize(shadow);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.serialize_into(id, &mut out, false);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        let raw = self.tag_name(id).map(is_raw_text).unwrap_or(false);
        self.serialize_children(id, &mut out, raw);
        out
    }

    fn serialize_children(&self, id: NodeId, out: &mut String, raw: bool) {
        for child in self.children(id) {
            self.serialize_into(*child, out, raw);
        }
    }

    fn serialize_into(&self, id: NodeId, out: &mut String, raw_text: bool) {
        match self.kind(id) {
            NodeKind::Document | NodeKind::Fragment => self.serialize_children(id, out, false),
            NodeKind::Text(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    out.push_str(&escape_text(text));
                }
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                if !el.attrs.is_empty() {
                    out.push(' ');
                    out.push_str(&attrs_to_string(&el.attrs));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(el.tag.as_str()) {
                    return;
                }
                if let Some(shadow) = el.shadow_root {
                    out.push_str("<template shadowrootmode=\"open\">");
                    self.serialize_children(shadow, out, false);
                    out.push_str("</template>");
                }
                self.serialize_children(id, out, is_raw_text(&el.tag));
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}

/// Serialize attributes as `name="value"` pairs separated by spaces. Valueless
/// attributes (empty string) are written bare.
pub fn attrs_to_string(attrs: &[(String, String)]) -> String {
    attrs
        .iter()
        .map(|(name, value)| {
            if value.is_empty() {
                name.clone()
            } else {
                format!("{}=\"{}\"", name, escape_attribute(value))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dom: &mut Dom) -> (NodeId, NodeId, NodeId) {
        let ul = dom.build_element(
            "ul",
            &[("class".to_string(), "list main".to_string())],
            &[],
        );
        let li = dom.build_element(
            "li",
            &[("data-id".to_string(), "7".to_string())],
            &[ElementChild::Text("a < b".to_string())],
        );
        dom.append_child(ul, li);
        let body = dom.body();
        dom.append_child(body, ul);
        (body, ul, li)
    }

    #[test]
    fn test_build_and_serialize() {
        let mut dom = Dom::default();
        let (_, ul, _) = sample(&mut dom);
        assert_eq!(
            dom.outer_html(ul),
            r#"<ul class="list main"><li data-id="7">a &lt; b</li></ul>"#
        );
        let br = dom.create_element("br");
        assert_eq!(dom.outer_html(br), "<br>");
    }

    #[test]
    fn test_selectors() {
        let mut dom = Dom::default();
        let (body, ul, li) = sample(&mut dom);
        assert_eq!(dom.query_selector(body, "ul.main"), Some(ul));
        assert_eq!(dom.query_selector(body, "[data-id=7]"), Some(li));
        assert_eq!(dom.query_selector(body, "li[data-id='8']"), None);
        assert!(dom.matches_selector(ul, ".list.main"));
    }

    #[test]
    fn test_fragment_insertion_moves_children() {
        let mut dom = Dom::default();
        let frag = dom.create_fragment();
        let a = dom.create_text("a");
        let b = dom.create_element("b");
        dom.append_child(frag, a);
        dom.append_child(frag, b);
        let div = dom.create_element("div");
        dom.append_child(div, frag);
        assert_eq!(dom.children(div), &[a, b]);
        assert!(dom.children(frag).is_empty());
        assert_eq!(dom.parent(b), Some(div));
    }

    #[test]
    fn test_normalize_merges_and_strips() {
        let mut dom = Dom::default();
        let div = dom.create_element("div");
        for node in [
            dom.create_text("a"),
            dom.create_text(""),
            dom.create_text("b"),
            dom.create_comment(""),
            dom.create_comment("keep"),
        ] {
            dom.append_child(div, node);
        }
        dom.normalize(div);
        assert_eq!(dom.inner_html(div), "ab<!--keep-->");
        dom.normalize(div);
        assert_eq!(dom.children(div).len(), 2);
    }

    #[test]
    fn test_normalize_drops_line_break_whitespace() {
        let mut dom = Dom::default();
        let ul = dom.create_element("ul");
        let li = dom.create_element("li");
        let pre = dom.create_element("pre");
        for node in [dom.create_text("\n  "), li, dom.create_text(" "), pre, dom.create_text("\n")] {
            dom.append_child(ul, node);
        }
        let kept = dom.create_text("\n\n");
        dom.append_child(pre, kept);
        let word = dom.create_text("a\n");
        dom.append_child(li, word);

        dom.normalize(ul);
        assert_eq!(dom.inner_html(ul), "<li>a\n</li> <pre>\n\n</pre>");
        assert_eq!(dom.parent(kept), Some(pre));
    }

    #[test]
    fn test_shadow_root_is_searched_and_serialized() {
        let mut dom = Dom::default();
        let host = dom.create_element("div");
        let shadow = dom.attach_shadow(host);
        let inner = dom.build_element("p", &[("id".to_string(), "x".to_string())], &[]);
        dom.append_child(shadow, inner);
        assert_eq!(dom.find_by_attribute(host, "id", "x"), Some(inner));
        assert_eq!(dom.event_path(inner), vec![inner, shadow, host]);
        assert_eq!(
            dom.outer_html(host),
            r#"<div><template shadowrootmode="open"><p id="x"></p></template></div>"#
        );
    }

    #[test]
    fn test_listeners() {
        let mut dom = Dom::default();
        let button = dom.create_element("button");
        let first = dom.add_listener(button, "click", Value::Null);
        dom.add_listener(button, "focus", Value::Bool(true));
        assert_eq!(dom.listeners_for(button, "click").len(), 1);
        assert!(dom.remove_listener(button, first));
        assert!(!dom.remove_listener(button, first));
        assert_eq!(dom.listener_count(button), 1);
    }

    #[test]
    fn test_attrs_to_string() {
        let attrs = vec![
            ("title".to_string(), "say \"hi\"".to_string()),
            ("disabled".to_string(), String::new()),
        ];
        assert_eq!(attrs_to_string(&attrs), r#"title="say &quot;hi&quot;" disabled"#);
    }
}
