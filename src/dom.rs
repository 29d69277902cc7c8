//! Owned XML tree with source-ordered attributes and parse-time-resolved
//! namespaces.
//!
//! Both trees handled by this crate (the business header and the document)
//! are caller-owned values of [`Element`]. Prefixes are resolved to
//! namespace URIs while parsing, so path lookups and canonicalization work
//! on (namespace, local-name) pairs and never depend on whatever prefixes
//! the source document happened to use. Namespace declarations are
//! re-derived when writing.

use std::collections::HashMap;
use std::str;

use quick_xml::NsReader;
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;

use crate::c14n::{escape_attr_value, escape_text_value};
use crate::error::{Error, Result};

/// Child index path from a root element down to a node.
pub type NodePath = Vec<usize>;

/// A single attribute. Unprefixed attributes carry no namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

/// A node in the tree. Processing instructions and the XML declaration are
/// not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

impl XmlNode {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            XmlNode::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_mut_element(&mut self) -> Option<&mut Element> {
        match self {
            XmlNode::Element(e) => Some(e),
            _ => None,
        }
    }
}

/// An XML element with resolved namespace, source-ordered attributes and
/// ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<XmlNode>,
}

impl Element {
    pub fn new(prefix: Option<&str>, namespace: Option<&str>, name: &str) -> Self {
        Element {
            prefix: prefix.map(|s| s.to_string()),
            namespace: namespace.map(|s| s.to_string()),
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Append an unprefixed attribute.
    pub fn push_attr(&mut self, name: &str, value: &str) {
        self.attributes.push(Attribute {
            prefix: None,
            namespace: None,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// Value of the first unprefixed attribute with the given local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.prefix.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn push_element(&mut self, child: Element) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn push_text(&mut self, text: &str) {
        self.children.push(XmlNode::Text(text.to_string()));
    }

    /// True when this element has the given namespace and local name.
    pub fn is_named(&self, namespace: &str, name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.name == name
    }

    /// Direct element children, in order.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(XmlNode::as_element)
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(XmlNode::as_mut_element)
    }

    /// Concatenated text and CDATA content of this element's direct
    /// children.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                XmlNode::Text(t) | XmlNode::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    /// Merge adjacent text children and drop empty text nodes, recursively.
    pub fn normalize(&mut self) {
        let mut merged: Vec<XmlNode> = Vec::with_capacity(self.children.len());
        for child in self.children.drain(..) {
            match child {
                XmlNode::Text(t) => {
                    if t.is_empty() {
                        continue;
                    }
                    if let Some(XmlNode::Text(prev)) = merged.last_mut() {
                        prev.push_str(&t);
                    } else {
                        merged.push(XmlNode::Text(t));
                    }
                }
                other => merged.push(other),
            }
        }
        self.children = merged;
        for child in &mut self.children {
            if let XmlNode::Element(e) = child {
                e.normalize();
            }
        }
    }

    /// Parse a single-rooted XML document into its root element.
    pub fn parse_str(xml: &str) -> Result<Element> {
        let mut reader = NsReader::from_str(xml);
        reader.config_mut().trim_text(false);
        reader.config_mut().expand_empty_elements = true;

        // Stack of open elements; the completed root pops out at Eof.
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_resolved_event() {
                Ok((resolution, Event::Start(e))) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(Error::Xml("document has more than one root".into()));
                    }
                    let namespace = resolved_namespace(resolution)?;
                    let name = e.name();
                    let prefix = name
                        .prefix()
                        .map(|p| str::from_utf8(p.as_ref()).map(|s| s.to_string()))
                        .transpose()?;
                    let local = str::from_utf8(name.local_name().as_ref())?.to_string();

                    let mut element = Element {
                        prefix,
                        namespace,
                        name: local,
                        attributes: Vec::new(),
                        children: Vec::new(),
                    };
                    for attr in e.attributes().with_checks(false) {
                        let attr = attr?;
                        let key = attr.key.as_ref();
                        if key == b"xmlns" || key.starts_with(b"xmlns:") {
                            continue;
                        }
                        let (attr_resolution, attr_local) = reader.resolve_attribute(attr.key);
                        let attr_prefix = attr
                            .key
                            .prefix()
                            .map(|p| str::from_utf8(p.as_ref()).map(|s| s.to_string()))
                            .transpose()?;
                        let attr_namespace = if attr_prefix.is_some() {
                            resolved_namespace(attr_resolution)?
                        } else {
                            None
                        };
                        element.attributes.push(Attribute {
                            prefix: attr_prefix,
                            namespace: attr_namespace,
                            name: str::from_utf8(attr_local.as_ref())?.to_string(),
                            value: attr.unescape_value()?.into_owned(),
                        });
                    }
                    stack.push(element);
                }
                Ok((_, Event::End(_))) => {
                    let finished = stack
                        .pop()
                        .ok_or_else(|| Error::Xml("unbalanced end tag".into()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Element(finished)),
                        None => root = Some(finished),
                    }
                }
                Ok((_, Event::Text(e))) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = e.unescape()?;
                        parent.children.push(XmlNode::Text(text.into_owned()));
                    }
                }
                Ok((_, Event::CData(e))) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = str::from_utf8(e.as_ref())?.to_string();
                        parent.children.push(XmlNode::CData(text));
                    }
                }
                Ok((_, Event::Comment(e))) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = str::from_utf8(e.as_ref())?.to_string();
                        parent.children.push(XmlNode::Comment(text));
                    }
                }
                Ok((_, Event::Eof)) => break,
                Ok(_) => {}
                Err(e) => return Err(Error::Xml(e.to_string())),
            }
        }

        root.ok_or_else(|| Error::Xml("document has no root element".into()))
    }

    /// Serialize this element and its subtree, emitting namespace
    /// declarations wherever a binding differs from the inherited scope.
    pub fn write_string(&self) -> String {
        let mut out = String::new();
        write_element(self, &HashMap::new(), &mut out);
        out
    }
}

fn resolved_namespace(resolution: ResolveResult<'_>) -> Result<Option<String>> {
    match resolution {
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Bound(ns) => Ok(Some(String::from_utf8(ns.as_ref().to_vec())?)),
        ResolveResult::Unknown(prefix) => Err(Error::Xml(format!(
            "undeclared namespace prefix: {}",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn qualified_name(prefix: &Option<String>, name: &str) -> String {
    match prefix {
        Some(p) => format!("{p}:{name}"),
        None => name.to_string(),
    }
}

fn write_element(el: &Element, scope: &HashMap<Option<String>, String>, out: &mut String) {
    let mut bindings = scope.clone();
    let mut decls: Vec<(Option<String>, String)> = Vec::new();

    let require = |bindings: &mut HashMap<Option<String>, String>,
                   decls: &mut Vec<(Option<String>, String)>,
                   prefix: &Option<String>,
                   uri: &str| {
        if bindings.get(prefix).map(String::as_str) != Some(uri) {
            bindings.insert(prefix.clone(), uri.to_string());
            decls.push((prefix.clone(), uri.to_string()));
        }
    };

    match &el.namespace {
        Some(uri) => require(&mut bindings, &mut decls, &el.prefix, uri),
        // Undeclare an inherited default namespace for unprefixed elements.
        None => {
            if el.prefix.is_none() && bindings.contains_key(&None) {
                bindings.remove(&None);
                decls.push((None, String::new()));
            }
        }
    }
    for attr in &el.attributes {
        if let (Some(_), Some(uri)) = (&attr.prefix, &attr.namespace) {
            require(&mut bindings, &mut decls, &attr.prefix, uri);
        }
    }

    out.push('<');
    let tag = qualified_name(&el.prefix, &el.name);
    out.push_str(&tag);
    for (prefix, uri) in &decls {
        match prefix {
            Some(p) => out.push_str(&format!(" xmlns:{p}=\"")),
            None => out.push_str(" xmlns=\""),
        }
        out.push_str(&escape_attr_value(uri));
        out.push('"');
    }
    for attr in &el.attributes {
        out.push(' ');
        out.push_str(&qualified_name(&attr.prefix, &attr.name));
        out.push_str("=\"");
        out.push_str(&escape_attr_value(&attr.value));
        out.push('"');
    }
    out.push('>');

    for child in &el.children {
        match child {
            XmlNode::Element(e) => write_element(e, &bindings, out),
            XmlNode::Text(t) | XmlNode::CData(t) => out.push_str(&escape_text_value(t)),
            XmlNode::Comment(c) => {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
        }
    }

    out.push_str("</");
    out.push_str(&tag);
    out.push('>');
}

/// Element at a child index path, or `None` when the path runs through a
/// non-element node or out of bounds.
pub fn node_at<'a>(root: &'a Element, path: &[usize]) -> Option<&'a Element> {
    let mut current = root;
    for &index in path {
        current = current.children.get(index)?.as_element()?;
    }
    Some(current)
}

/// Mutable variant of [`node_at`].
pub fn node_at_mut<'a>(root: &'a mut Element, path: &[usize]) -> Option<&'a mut Element> {
    let mut current = root;
    for &index in path {
        current = current.children.get_mut(index)?.as_mut_element()?;
    }
    Some(current)
}

/// Remove and return the node at a child index path. The path must not be
/// empty (the root cannot remove itself).
pub fn remove_at(root: &mut Element, path: &[usize]) -> Option<XmlNode> {
    let (&last, parent_path) = path.split_last()?;
    let parent = node_at_mut(root, parent_path)?;
    if last < parent.children.len() {
        Some(parent.children.remove(last))
    } else {
        None
    }
}
