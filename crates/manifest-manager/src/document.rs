//! Manifest document tree
//!
//! A small mutable XML tree that keeps everything needed to write the file
//! back the way it was read: declaration, comments, processing
//! instructions and the whitespace between elements.

use indexmap::IndexMap;

/// Android namespace URI
pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

/// `<?xml ...?>` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

impl Default for Declaration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            encoding: Some("utf-8".to_string()),
            standalone: None,
        }
    }
}

/// Any node that can appear inside or around an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data, kept in its escaped form
    Text(String),
    Comment(String),
    CData(String),
    ProcessingInstruction(String),
    DocType(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    fn is_whitespace(&self) -> bool {
        matches!(self, Node::Text(t) if t.chars().all(char::is_whitespace))
    }
}

/// An XML element with ordered attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    /// Attribute values, unescaped
    pub attributes: IndexMap<String, String>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: IndexMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Set an attribute only if it is not there yet; returns whether it was set
    pub fn set_attr_if_absent(&mut self, key: &str, value: impl Into<String>) -> bool {
        if self.has_attr(key) {
            return false;
        }
        self.attributes.insert(key.to_string(), value.into());
        true
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    pub fn find_child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.name == name)
    }

    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.child_elements_mut().find(|e| e.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.child_elements().filter(move |e| e.name == name)
    }

    /// Indices into `children` of the direct child elements with this name
    pub fn child_indices(&self, name: &str) -> Vec<usize> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node, Node::Element(e) if e.name == name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Whitespace used in front of child elements, if the element has any
    pub fn child_indent(&self) -> Option<&str> {
        self.children.iter().find_map(|node| match node {
            Node::Text(t) if t.contains('\n') && t.chars().all(char::is_whitespace) => {
                Some(t.as_str())
            }
            _ => None,
        })
    }

    /// Insert an element as the first child, keeping the indentation style
    pub fn insert_first_formatted(&mut self, element: Element, default_indent: &str) {
        let indent = self.child_indent().unwrap_or(default_indent).to_string();
        if self.children.is_empty() {
            self.children.push(Node::Text(closing_indent(&indent)));
        }
        self.children.insert(0, Node::Element(element));
        self.children.insert(0, Node::Text(indent));
    }

    /// Append an element as the last child, before any trailing whitespace
    pub fn append_formatted(&mut self, element: Element, default_indent: &str) {
        let indent = self.child_indent().unwrap_or(default_indent).to_string();
        if self.children.is_empty() {
            self.children.push(Node::Text(closing_indent(&indent)));
        }
        let at = match self.children.last() {
            Some(last) if last.is_whitespace() => self.children.len() - 1,
            _ => self.children.len(),
        };
        self.children.insert(at, Node::Element(element));
        self.children.insert(at, Node::Text(indent));
    }

    /// Remove the child node at `index` with the whitespace in front of it
    pub fn remove_child_at(&mut self, index: usize) -> Option<Node> {
        if index >= self.children.len() {
            return None;
        }
        let removed = self.children.remove(index);
        if index > 0 && self.children[index - 1].is_whitespace() {
            self.children.remove(index - 1);
        }
        Some(removed)
    }

    /// Visit this element and all descendant elements
    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut Element)) {
        visit(self);
        for child in self.child_elements_mut() {
            child.walk_mut(visit);
        }
    }
}

/// Whitespace that closes a parent one level up from `indent`
fn closing_indent(indent: &str) -> String {
    let depth = indent.trim_start_matches(['\r', '\n']).len();
    let line_break = &indent[..indent.len() - depth];
    let line_break = if line_break.is_empty() { "\n" } else { line_break };
    let outer = depth.saturating_sub(4);
    format!("{}{}", line_break, &indent[indent.len() - depth..][..outer])
}

/// A complete XML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub declaration: Option<Declaration>,
    /// Nodes between the declaration and the root element
    pub prolog: Vec<Node>,
    pub root: Element,
    /// Nodes after the root element
    pub epilog: Vec<Node>,
}

impl Document {
    /// A fresh document with a declaration and the given root
    pub fn new(root: Element) -> Self {
        Self {
            declaration: Some(Declaration::default()),
            prolog: vec![Node::Text("\n".to_string())],
            root,
            epilog: vec![Node::Text("\n".to_string())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_helpers() {
        let mut e = Element::new("activity").with_attr("android:name", ".Main");
        assert_eq!(e.attr("android:name"), Some(".Main"));
        assert!(!e.set_attr_if_absent("android:name", ".Other"));
        assert!(e.set_attr_if_absent("android:exported", "true"));
        assert_eq!(e.attr("android:exported"), Some("true"));
    }

    #[test]
    fn test_insert_first_into_empty_element() {
        let mut root = Element::new("manifest");
        root.insert_first_formatted(Element::new("uses-sdk"), "\n    ");

        assert_eq!(root.children.len(), 3);
        assert_eq!(root.children[0], Node::Text("\n    ".into()));
        assert_eq!(root.children[2], Node::Text("\n".into()));
    }

    #[test]
    fn test_append_before_trailing_whitespace() {
        let mut root = Element::new("manifest");
        root.children = vec![
            Node::Text("\n  ".into()),
            Node::Element(Element::new("uses-sdk")),
            Node::Text("\n".into()),
        ];
        root.append_formatted(Element::new("application"), "\n    ");

        let names: Vec<_> = root.child_elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["uses-sdk", "application"]);
        assert_eq!(root.children[2], Node::Text("\n  ".into()));
        assert_eq!(root.children.last(), Some(&Node::Text("\n".into())));
    }

    #[test]
    fn test_remove_child_takes_leading_whitespace() {
        let mut root = Element::new("manifest");
        root.children = vec![
            Node::Text("\n    ".into()),
            Node::Element(Element::new("a")),
            Node::Text("\n    ".into()),
            Node::Element(Element::new("b")),
            Node::Text("\n".into()),
        ];
        root.remove_child_at(3);

        assert_eq!(root.children.len(), 3);
        assert!(root.find_child("b").is_none());
    }

    #[test]
    fn test_closing_indent() {
        assert_eq!(closing_indent("\n    "), "\n");
        assert_eq!(closing_indent("\n        "), "\n    ");
        assert_eq!(closing_indent("\r\n    "), "\r\n");
    }
}
