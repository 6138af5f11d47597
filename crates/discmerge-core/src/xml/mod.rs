//! Owned XML element tree used for export documents.
//!
//! Documents are parsed with `roxmltree` into an owned [`Element`] tree with
//! namespaces stripped from tag names. Engines deep-clone template subtrees
//! and edit known fields by name, then serialize through [`XmlDocument::to_bytes`]
//! which reproduces the retail formatting conventions:
//!
//! - UTF-8 with an XML declaration and LF-only newlines
//! - two-space indentation, `<TAG/>` for empty elements
//! - the default namespace plus the redundant `xmlns:ss` declaration on the root
//!
//! Prefixed attributes keep their `prefix:local` name, and the prefix
//! declarations travel as `xmlns:prefix` attributes on the element that
//! introduced them. Comments inside the root element are kept.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Namespace used by every retail export document
pub const SINGSTAR_NS: &str = "http://www.singstargame.com";

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// An owned XML element with its attributes in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Local tag name (namespace stripped)
    pub name: String,
    /// Attributes in document order
    pub attributes: Vec<(String, String)>,
    /// Non-whitespace character content, if any
    pub text: Option<String>,
    /// Child elements in document order
    pub children: Vec<Element>,
    /// Comments that precede this element inside its parent
    pub comments: Vec<String>,
    /// Comments after the last child element
    pub trailing_comments: Vec<String>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
            comments: Vec::new(),
            trailing_comments: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Get an attribute value by exact name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Parse an attribute as an unsigned integer
    pub fn attr_u32(&self, name: &str) -> Option<u32> {
        self.attr(name).and_then(|v| v.trim().parse().ok())
    }

    /// Set an attribute, keeping its position if it already exists
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Character content, or an empty string
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    /// First direct child with the given name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Direct children with the given name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// All descendants (excluding `self`) in document order
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// First descendant with the given name, in document order
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.descendants().find(|e| e.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Element> {
        for child in &mut self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find_mut(name) {
                return Some(found);
            }
        }
        None
    }

    /// Visit every descendant mutably, parents before children
    pub fn for_each_descendant_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        for child in &mut self.children {
            f(child);
            child.for_each_descendant_mut(f);
        }
    }

    /// Remove every descendant with the given name, at any depth
    pub fn remove_descendants(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|c| c.name != name);
        let mut removed = before - self.children.len();
        for child in &mut self.children {
            removed += child.remove_descendants(name);
        }
        removed
    }

    fn write_into(&self, out: &mut String, depth: usize, root_namespace: Option<&str>) {
        let indent = "  ".repeat(depth);
        for comment in &self.comments {
            push_comment(out, &indent, comment);
        }
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.name);

        if let Some(ns) = root_namespace {
            push_attr(out, "xmlns", ns);
            if ns == SINGSTAR_NS && self.attr("xmlns:ss").is_none() {
                push_attr(out, "xmlns:ss", ns);
            }
        }
        for (name, value) in &self.attributes {
            push_attr(out, name, value);
        }

        let text = self.text.as_deref().filter(|t| !t.trim().is_empty());
        let has_children = !self.children.is_empty() || !self.trailing_comments.is_empty();
        match (text, !has_children) {
            (None, true) => out.push_str("/>\n"),
            (Some(text), true) => {
                out.push('>');
                out.push_str(&escape_text(text));
                out.push_str("</");
                out.push_str(&self.name);
                out.push_str(">\n");
            }
            (text, false) => {
                out.push('>');
                if let Some(text) = text {
                    out.push_str(&escape_text(text.trim()));
                }
                out.push('\n');
                for child in &self.children {
                    child.write_into(out, depth + 1, None);
                }
                let inner = "  ".repeat(depth + 1);
                for comment in &self.trailing_comments {
                    push_comment(out, &inner, comment);
                }
                out.push_str(&indent);
                out.push_str("</");
                out.push_str(&self.name);
                out.push_str(">\n");
            }
        }
    }
}

/// Depth-first iterator over an element's descendants
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// A parsed export document: root element plus its default namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root: Element,
    pub namespace: Option<String>,
}

impl XmlDocument {
    /// Create a document in the retail namespace
    pub fn new(root: Element) -> Self {
        Self {
            root,
            namespace: Some(SINGSTAR_NS.to_string()),
        }
    }

    /// Read and parse a document from disk
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let text = String::from_utf8(bytes).map_err(|e| Error::XmlParse {
            path: path.to_path_buf(),
            message: format!("not valid UTF-8: {}", e),
        })?;
        Self::parse_str(&text, path)
    }

    /// Parse document text; `origin` is only used in error messages
    pub fn parse_str(text: &str, origin: &Path) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, options).map_err(|e| {
            Error::XmlParse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            }
        })?;

        let root_node = doc.root_element();
        Ok(Self {
            namespace: root_node.tag_name().namespace().map(str::to_string),
            root: convert_node(root_node),
        })
    }

    /// Serialize in the retail style
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self.root.write_into(&mut out, 0, self.namespace.as_deref());
        out.into_bytes()
    }

    /// Write to disk, replacing (not truncating) any existing file
    pub fn write(&self, path: &Path) -> Result<()> {
        crate::fsops::write_replacing(path, &self.to_bytes())
    }
}

fn convert_node(node: roxmltree::Node<'_, '_>) -> Element {
    let mut element = Element::new(node.tag_name().name());
    element.attributes = namespace_declarations(node);
    for attr in node.attributes() {
        element
            .attributes
            .push((qualified_attr_name(node, &attr), attr.value().to_string()));
    }

    let mut text = String::new();
    let mut pending_comments = Vec::new();
    for child in node.children() {
        if child.is_element() {
            let mut converted = convert_node(child);
            converted.comments = std::mem::take(&mut pending_comments);
            element.children.push(converted);
        } else if child.is_comment() {
            if let Some(t) = child.text() {
                pending_comments.push(t.to_string());
            }
        } else if child.is_text() {
            if let Some(t) = child.text() {
                text.push_str(t);
            }
        }
    }
    element.trailing_comments = pending_comments;
    if !text.trim().is_empty() {
        element.text = Some(text);
    }
    element
}

/// `xmlns:prefix` declarations this element adds to its parent's scope.
///
/// The root's default namespace and its `ss` alias are written by
/// [`XmlDocument::to_bytes`] and are not repeated here.
fn namespace_declarations(node: roxmltree::Node<'_, '_>) -> Vec<(String, String)> {
    let parent = node.parent_element();
    let inherited = |prefix: Option<&str>, uri: &str| {
        parent.is_some_and(|p| p.namespaces().any(|ns| ns.name() == prefix && ns.uri() == uri))
    };
    let retail_root = parent.is_none() && node.tag_name().namespace() == Some(SINGSTAR_NS);

    let mut declarations = Vec::new();
    for ns in node.namespaces() {
        let (prefix, uri) = (ns.name(), ns.uri());
        if prefix == Some("xml") || inherited(prefix, uri) {
            continue;
        }
        match prefix {
            None if parent.is_none() => {}
            Some("ss") if retail_root && uri == SINGSTAR_NS => {}
            None => declarations.push(("xmlns".to_string(), uri.to_string())),
            Some(prefix) => declarations.push((format!("xmlns:{}", prefix), uri.to_string())),
        }
    }
    declarations
}

fn qualified_attr_name(node: roxmltree::Node<'_, '_>, attr: &roxmltree::Attribute<'_, '_>) -> String {
    let Some(uri) = attr.namespace() else {
        return attr.name().to_string();
    };
    let prefix = if uri == XML_NS {
        Some("xml")
    } else {
        node.namespaces()
            .filter(|ns| ns.uri() == uri)
            .find_map(|ns| ns.name())
    };
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, attr.name()),
        None => attr.name().to_string(),
    }
}

fn push_comment(out: &mut String, indent: &str, comment: &str) {
    out.push_str(indent);
    out.push_str("<!--");
    out.push_str(&comment.replace("--", "- -"));
    out.push_str("-->\n");
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#09;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(text: &str) -> XmlDocument {
        XmlDocument::parse_str(text, &PathBuf::from("test.xml")).unwrap()
    }

    #[test]
    fn test_parse_strips_namespace() {
        let doc = parse(
            r#"<?xml version="1.0"?>
<SONGS xmlns="http://www.singstargame.com">
  <SONG ID="3"><TITLE>Hello</TITLE></SONG>
</SONGS>"#,
        );
        assert_eq!(doc.namespace.as_deref(), Some(SINGSTAR_NS));
        assert_eq!(doc.root.name, "SONGS");
        let song = doc.root.child("SONG").unwrap();
        assert_eq!(song.attr_u32("ID"), Some(3));
        assert_eq!(song.child("TITLE").unwrap().text(), "Hello");
    }

    #[test]
    fn test_malformed_is_parse_error() {
        let err = XmlDocument::parse_str("<SONGS><broken>", &PathBuf::from("bad.xml")).unwrap_err();
        assert!(matches!(err, Error::XmlParse { .. }));
        assert!(err.to_string().contains("bad.xml"));
    }

    #[test]
    fn test_serialize_retail_style() {
        let root = Element::new("COVERS")
            .with_child(
                Element::new("TPAGE_BIT")
                    .with_attr("NAME", "cover_1")
                    .with_attr("TEXTURE", "page_0"),
            )
            .with_child(Element::new("NOTE").with_text("a & b"));
        let bytes = XmlDocument::new(root).to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <COVERS xmlns=\"http://www.singstargame.com\" xmlns:ss=\"http://www.singstargame.com\">\n  \
             <TPAGE_BIT NAME=\"cover_1\" TEXTURE=\"page_0\"/>\n  \
             <NOTE>a &amp; b</NOTE>\n\
             </COVERS>\n"
        );
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let original = parse(
            r#"<CONFIG xmlns="http://www.singstargame.com">
  <VERSION version="1"><SONGS><SONG_LIST>a "q"</SONG_LIST></SONGS></VERSION>
</CONFIG>"#,
        );
        let text = String::from_utf8(original.to_bytes()).unwrap();
        let reparsed = parse(&text);
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_prefixed_attributes_and_comments_survive() {
        let original = parse(
            r#"<CONFIG xmlns="http://www.singstargame.com" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="config.xsd">
  <!-- banks -->
  <VERSION version="1" xml:lang="en"/>
  <!-- end -->
</CONFIG>"#,
        );
        let root = &original.root;
        assert_eq!(root.attr("xsi:noNamespaceSchemaLocation"), Some("config.xsd"));
        assert_eq!(
            root.attr("xmlns:xsi"),
            Some("http://www.w3.org/2001/XMLSchema-instance")
        );
        assert!(root.attr("xmlns:ss").is_none());
        let version = root.child("VERSION").unwrap();
        assert_eq!(version.attr("xml:lang"), Some("en"));
        assert_eq!(version.comments, vec![" banks ".to_string()]);
        assert_eq!(root.trailing_comments, vec![" end ".to_string()]);

        let text = String::from_utf8(original.to_bytes()).unwrap();
        assert!(text.contains(r#"xsi:noNamespaceSchemaLocation="config.xsd""#));
        assert!(text.contains("  <!-- banks -->\n  <VERSION"));
        assert!(text.contains("  <!-- end -->\n</CONFIG>"));
        assert_eq!(parse(&text), original);
    }

    #[test]
    fn test_descendants_document_order() {
        let doc = parse("<A><B><C/></B><D/></A>");
        let names: Vec<&str> = doc.root.descendants().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C", "D"]);
    }

    #[test]
    fn test_remove_descendants_any_depth() {
        let mut doc = parse("<A><ERRATA/><B><ERRATA/><C/></B></A>");
        assert_eq!(doc.root.remove_descendants("ERRATA"), 2);
        assert!(doc.root.find("ERRATA").is_none());
        assert!(doc.root.find("C").is_some());
    }

    #[test]
    fn test_set_attr_keeps_position() {
        let mut el = Element::new("X").with_attr("A", "1").with_attr("B", "2");
        el.set_attr("A", "9");
        assert_eq!(el.attributes[0], ("A".to_string(), "9".to_string()));
    }
}
