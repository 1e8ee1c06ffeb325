//! Arena DOM for the simulated browser.

use super::site::Node;
use crate::channel::{ElementId, ElementInfo};
use crate::selector::{self, Element, Selector};
use std::collections::BTreeMap;

const NON_RENDERED: &[&str] = &["head", "script", "style", "title", "meta", "link"];
const NON_TEXT_INPUTS: &[&str] = &[
    "checkbox", "radio", "file", "submit", "button", "hidden", "reset", "image",
];

#[derive(Debug, Clone)]
struct NodeData {
    id: ElementId,
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<usize>,
    parent: Option<usize>,
    hidden: bool,
    obscured: bool,
    attached: bool,
}

/// One loaded document
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: usize,
}

impl Document {
    /// Build a document whose root is `root`, assigning fresh element ids
    pub fn build(root: &Node, next_id: &mut impl FnMut() -> ElementId) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: 0,
        };
        doc.root = doc.insert(root, None, next_id);
        doc
    }

    fn insert(
        &mut self,
        node: &Node,
        parent: Option<usize>,
        next_id: &mut impl FnMut() -> ElementId,
    ) -> usize {
        let index = self.nodes.len();
        let hidden = node.hidden
            || node
                .attrs
                .get("style")
                .is_some_and(|s| s.replace(' ', "").contains("display:none"));
        self.nodes.push(NodeData {
            id: next_id(),
            tag: node.tag.to_lowercase(),
            attrs: node.attrs.clone(),
            text: node.text.clone(),
            children: Vec::new(),
            parent,
            hidden,
            obscured: node.obscured,
            attached: true,
        });
        for child in &node.children {
            let child_index = self.insert(child, Some(index), next_id);
            self.nodes[index].children.push(child_index);
        }
        index
    }

    /// Root element
    #[must_use]
    pub fn root(&self) -> NodeRef<'_> {
        NodeRef {
            doc: self,
            index: self.root,
        }
    }

    /// Attached elements matching `selector`, in document order
    #[must_use]
    pub fn query(&self, selector: &Selector) -> Vec<NodeRef<'_>> {
        selector::query_all(&self.root(), selector)
    }

    /// Parse and query; invalid selectors match nothing
    #[must_use]
    pub fn query_str(&self, source: &str) -> Vec<NodeRef<'_>> {
        Selector::parse(source)
            .map(|s| self.query(&s))
            .unwrap_or_default()
    }

    /// Element by id, attached or not
    #[must_use]
    pub fn find(&self, id: ElementId) -> Option<NodeRef<'_>> {
        self.nodes
            .iter()
            .position(|n| n.id == id)
            .map(|index| NodeRef { doc: self, index })
    }

    /// Form value of the first match
    #[must_use]
    pub fn value_of(&self, source: &str) -> Option<String> {
        self.query_str(source)
            .first()
            .and_then(|n| n.attribute("value"))
    }

    /// Text of the first match
    #[must_use]
    pub fn text_of(&self, source: &str) -> Option<String> {
        self.query_str(source).first().map(|n| n.text_content())
    }

    /// Frame elements with a `src`: (index, element id, name, src)
    pub(crate) fn frames(&self) -> Vec<(usize, ElementId, Option<String>, String)> {
        self.query_str("frame[src], iframe[src]")
            .iter()
            .map(|n| {
                let data = n.data();
                (
                    n.index,
                    data.id,
                    data.attrs.get("name").cloned(),
                    data.attrs.get("src").cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Indices of attached elements matching `source`
    pub(crate) fn indices(&self, source: &str) -> Vec<usize> {
        self.query_str(source).iter().map(|n| n.index).collect()
    }

    /// Index of an element by id
    pub(crate) fn index_of(&self, id: ElementId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Browser-side view of one element
    pub(crate) fn info(&self, index: usize) -> ElementInfo {
        let node = NodeRef { doc: self, index };
        let data = node.data();
        let enabled = !data.attrs.contains_key("disabled");
        let editable = enabled
            && !data.attrs.contains_key("readonly")
            && match data.tag.as_str() {
                "textarea" => true,
                "input" => !data
                    .attrs
                    .get("type")
                    .is_some_and(|t| NON_TEXT_INPUTS.contains(&t.to_lowercase().as_str())),
                _ => false,
            };
        ElementInfo {
            id: data.id,
            tag: data.tag.clone(),
            text: node.text_content(),
            attributes: data.attrs.clone(),
            visible: data.attached && node.is_rendered(),
            enabled,
            editable,
            attached: data.attached,
            obscured: data.obscured,
            checked: data.attrs.contains_key("checked"),
            value: data.attrs.get("value").cloned(),
        }
    }

    pub(crate) fn set_text(&mut self, index: usize, text: &str) {
        let children = std::mem::take(&mut self.nodes[index].children);
        for child in children {
            self.mark_detached(child);
        }
        self.nodes[index].text = text.to_string();
    }

    pub(crate) fn set_attr(&mut self, index: usize, name: &str, value: &str) {
        self.nodes[index]
            .attrs
            .insert(name.to_string(), value.to_string());
    }

    pub(crate) fn remove_attr(&mut self, index: usize, name: &str) {
        self.nodes[index].attrs.remove(name);
    }

    pub(crate) fn set_hidden(&mut self, index: usize, hidden: bool) {
        self.nodes[index].hidden = hidden;
        if !hidden {
            if let Some(style) = self.nodes[index].attrs.get_mut("style") {
                *style = style.replace("display:none", "").replace("display: none", "");
            }
        }
    }

    pub(crate) fn set_obscured(&mut self, index: usize, obscured: bool) {
        self.nodes[index].obscured = obscured;
    }

    /// Remove an element and its subtree from the document
    pub(crate) fn detach(&mut self, index: usize) {
        if let Some(parent) = self.nodes[index].parent {
            self.nodes[parent].children.retain(|c| *c != index);
        }
        self.mark_detached(index);
    }

    fn mark_detached(&mut self, index: usize) {
        self.nodes[index].attached = false;
        let children = self.nodes[index].children.clone();
        for child in children {
            self.mark_detached(child);
        }
    }

    /// Append a subtree under `parent`
    pub(crate) fn append(
        &mut self,
        parent: usize,
        node: &Node,
        next_id: &mut impl FnMut() -> ElementId,
    ) {
        let index = self.insert(node, Some(parent), next_id);
        self.nodes[parent].children.push(index);
    }

    /// Flip the `checked` attribute
    pub(crate) fn toggle_checked(&mut self, index: usize) {
        let attrs = &mut self.nodes[index].attrs;
        if attrs.remove("checked").is_none() {
            attrs.insert("checked".to_string(), String::new());
        }
    }

    /// Serialized markup for diagnostics
    #[must_use]
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        self.write_node(self.root, 0, &mut out);
        out
    }

    fn write_node(&self, index: usize, depth: usize, out: &mut String) {
        let data = &self.nodes[index];
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&data.tag);
        for (name, value) in &data.attrs {
            if value.is_empty() {
                out.push_str(&format!(" {name}"));
            } else {
                out.push_str(&format!(" {name}=\"{}\"", value.replace('"', "&quot;")));
            }
        }
        if data.hidden {
            out.push_str(" hidden");
        }
        out.push('>');
        if !data.text.is_empty() {
            out.push_str(&data.text);
        }
        if data.children.is_empty() {
            out.push_str(&format!("</{}>\n", data.tag));
            return;
        }
        out.push('\n');
        for child in &data.children {
            self.write_node(*child, depth + 1, out);
        }
        out.push_str(&format!("{indent}</{}>\n", data.tag));
    }
}

/// Borrowed element of a [`Document`]
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    doc: &'a Document,
    index: usize,
}

impl NodeRef<'_> {
    fn data(&self) -> &NodeData {
        &self.doc.nodes[self.index]
    }

    /// Element id
    #[must_use]
    pub fn id(&self) -> ElementId {
        self.data().id
    }

    /// Arena index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    fn is_rendered(&self) -> bool {
        let mut current = Some(self.index);
        while let Some(index) = current {
            let data = &self.doc.nodes[index];
            if data.hidden || NON_RENDERED.contains(&data.tag.as_str()) {
                return false;
            }
            if data.tag == "input"
                && data.attrs.get("type").is_some_and(|t| t == "hidden")
            {
                return false;
            }
            current = data.parent;
        }
        true
    }
}

impl Element for NodeRef<'_> {
    fn local_name(&self) -> String {
        self.data().tag.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.data().attrs.get(name).cloned()
    }

    fn text_content(&self) -> String {
        let data = self.data();
        let mut out = data.text.clone();
        for child in &data.children {
            out.push_str(
                &NodeRef {
                    doc: self.doc,
                    index: *child,
                }
                .text_content(),
            );
        }
        out
    }

    fn parent_element(&self) -> Option<Self> {
        self.data().parent.map(|index| NodeRef {
            doc: self.doc,
            index,
        })
    }

    fn children(&self) -> Vec<Self> {
        self.data()
            .children
            .iter()
            .map(|index| NodeRef {
                doc: self.doc,
                index: *index,
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ids() -> impl FnMut() -> ElementId {
        let mut n = 0;
        move || {
            n += 1;
            ElementId(n)
        }
    }

    fn doc() -> Document {
        let root = Node::new("body").children([
            Node::new("h1").text("Example Domain"),
            Node::new("div")
                .id("finish")
                .hidden()
                .child(Node::new("h4").text("Hello World!")),
            Node::new("input").id("username").attr("type", "text"),
            Node::new("input")
                .attr("type", "checkbox")
                .attr("checked", ""),
            Node::new("iframe").attr("name", "inner").attr("src", "/frame"),
        ]);
        Document::build(&root, &mut ids())
    }

    #[test]
    fn test_hidden_ancestor_hides_descendants() {
        let doc = doc();
        let h4 = doc.query_str("#finish h4")[0].index();
        assert!(!doc.info(h4).visible);
        let finish = doc.indices("#finish")[0];
        let mut doc = doc;
        doc.set_hidden(finish, false);
        assert!(doc.info(h4).visible);
    }

    #[test]
    fn test_editable_and_checked() {
        let doc = doc();
        let text = doc.info(doc.indices("#username")[0]);
        assert!(text.editable);
        let checkbox = doc.info(doc.indices("input[type=checkbox]")[0]);
        assert!(!checkbox.editable);
        assert!(checkbox.checked);
    }

    #[test]
    fn test_detach_marks_subtree() {
        let mut doc = doc();
        let finish = doc.indices("#finish")[0];
        let h4_id = doc.query_str("#finish h4")[0].id();
        doc.detach(finish);
        assert!(doc.query_str("#finish").is_empty());
        let h4 = doc.index_of(h4_id).unwrap();
        assert!(!doc.info(h4).attached);
        assert!(!doc.info(h4).visible);
    }

    #[test]
    fn test_set_text_replaces_children() {
        let mut doc = doc();
        let finish = doc.indices("#finish")[0];
        doc.set_text(finish, "done");
        assert_eq!(doc.text_of("#finish").unwrap(), "done");
        assert!(doc.query_str("h4").is_empty());
    }

    #[test]
    fn test_frames_listed() {
        let frames = doc().frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].2.as_deref(), Some("inner"));
        assert_eq!(frames[0].3, "/frame");
    }

    #[test]
    fn test_snapshot_contains_markup() {
        let snap = doc().snapshot();
        assert!(snap.contains("<h1>Example Domain</h1>"));
        assert!(snap.contains("id=\"finish\""));
    }

    #[test]
    fn test_toggle_checked() {
        let mut doc = doc();
        let checkbox = doc.indices("input[type=checkbox]")[0];
        doc.toggle_checked(checkbox);
        assert!(!doc.info(checkbox).checked);
        doc.toggle_checked(checkbox);
        assert!(doc.info(checkbox).checked);
    }
}
