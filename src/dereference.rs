//! Reference-URI resolution across the two disconnected trees.
//!
//! XML signature references cannot natively address a second tree, so two
//! sentinel URI values are repurposed: the empty URI selects the business
//! header root and an absent URI selects the document root. Any other URI
//! is delegated to the ordinary same-document fragment resolver.

use crate::constants::ID_ATTRIBUTE;
use crate::dom::{Attribute, Element, XmlNode};
use crate::error::{Error, Result};

/// A node yielded by a document-order traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef<'a> {
    Element(&'a Element),
    Attribute(&'a Attribute),
    Text(&'a str),
    CData(&'a str),
    Comment(&'a str),
}

/// The resolved target of a reference URI: a subtree, traversable in
/// document order.
#[derive(Debug, Clone, Copy)]
pub struct NodeSet<'a> {
    root: &'a Element,
}

impl<'a> NodeSet<'a> {
    pub fn new(root: &'a Element) -> Self {
        NodeSet { root }
    }

    pub fn root(&self) -> &'a Element {
        self.root
    }

    /// A fresh document-order iterator over the subtree. Each call returns
    /// a new single-pass iterator, so concurrent resolutions never share
    /// traversal state.
    pub fn iter(&self) -> DocOrderIter<'a> {
        DocOrderIter {
            stack: vec![NodeRef::Element(self.root)],
        }
    }
}

/// Lazy, forward-only document-order traversal: each element is yielded,
/// then its attributes in source order, then its children, depth first.
///
/// The walk is iterative with an explicit stack so arbitrarily deep trees
/// cannot overflow the call stack. On popping an element, its children are
/// pushed in reverse order (so they pop left to right) and its attributes
/// are pushed in reverse order on top of them (so they pop right after the
/// owning element).
#[derive(Debug)]
pub struct DocOrderIter<'a> {
    stack: Vec<NodeRef<'a>>,
}

impl<'a> Iterator for DocOrderIter<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<NodeRef<'a>> {
        let node = self.stack.pop()?;
        if let NodeRef::Element(el) = node {
            for child in el.children.iter().rev() {
                self.stack.push(match child {
                    XmlNode::Element(e) => NodeRef::Element(e),
                    XmlNode::Text(t) => NodeRef::Text(t),
                    XmlNode::CData(t) => NodeRef::CData(t),
                    XmlNode::Comment(c) => NodeRef::Comment(c),
                });
            }
            for attr in el.attributes.iter().rev() {
                self.stack.push(NodeRef::Attribute(attr));
            }
        }
        Some(node)
    }
}

/// Resolves reference URIs to node sets. Two variants, dispatched by tag:
/// the sentinel-aware dual-tree resolver used by sign and validate, and
/// the default fragment resolver it delegates to.
#[derive(Debug)]
pub enum UriResolver<'a> {
    DualTree(DualTreeResolver<'a>),
    Fragment(FragmentResolver<'a>),
}

impl<'a> UriResolver<'a> {
    /// Resolver bound to a (header, document) pair for one call.
    pub fn dual_tree(header: &'a Element, document: &'a Element) -> Self {
        UriResolver::DualTree(DualTreeResolver {
            header,
            document,
            delegate: FragmentResolver { root: header },
        })
    }

    pub fn resolve(&self, uri: Option<&str>) -> Result<NodeSet<'a>> {
        match self {
            UriResolver::DualTree(r) => r.resolve(uri),
            UriResolver::Fragment(r) => r.resolve(uri),
        }
    }
}

/// Intercepts the two sentinel URI values ahead of delegation.
#[derive(Debug)]
pub struct DualTreeResolver<'a> {
    header: &'a Element,
    document: &'a Element,
    delegate: FragmentResolver<'a>,
}

impl<'a> DualTreeResolver<'a> {
    fn resolve(&self, uri: Option<&str>) -> Result<NodeSet<'a>> {
        match uri {
            // The explicit self-reference: the header root.
            Some("") => Ok(NodeSet::new(self.header)),
            // No URI at all: the disconnected document root.
            None => Ok(NodeSet::new(self.document)),
            Some(_) => self.delegate.resolve(uri),
        }
    }
}

/// Ordinary same-document fragment lookup over one tree.
#[derive(Debug)]
pub struct FragmentResolver<'a> {
    root: &'a Element,
}

impl<'a> FragmentResolver<'a> {
    pub fn new(root: &'a Element) -> Self {
        FragmentResolver { root }
    }

    fn resolve(&self, uri: Option<&str>) -> Result<NodeSet<'a>> {
        let uri = uri.ok_or_else(|| Error::Engine("cannot resolve an absent URI".into()))?;
        let id = uri
            .strip_prefix('#')
            .ok_or_else(|| Error::Engine(format!("unsupported reference URI: {uri:?}")))?;

        for node in NodeSet::new(self.root).iter() {
            if let NodeRef::Element(el) = node {
                if el.attr(ID_ATTRIBUTE) == Some(id) {
                    return Ok(NodeSet::new(el));
                }
            }
        }
        Err(Error::Engine(format!("no element with Id {id:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Element;

    fn names(set: &NodeSet<'_>) -> Vec<String> {
        set.iter()
            .map(|n| match n {
                NodeRef::Element(e) => format!("<{}>", e.name),
                NodeRef::Attribute(a) => format!("@{}", a.name),
                NodeRef::Text(t) => format!("'{t}'"),
                NodeRef::CData(t) => format!("cdata'{t}'"),
                NodeRef::Comment(c) => format!("<!--{c}-->"),
            })
            .collect()
    }

    #[test]
    fn document_order_yields_node_attributes_then_children() {
        let xml = r#"<r a="1" b="2"><x c="3">t</x><y/></r>"#;
        let root = Element::parse_str(xml).unwrap();
        let set = NodeSet::new(&root);
        assert_eq!(
            names(&set),
            ["<r>", "@a", "@b", "<x>", "@c", "'t'", "<y>"]
        );
    }

    #[test]
    fn iterator_is_fresh_per_call() {
        let root = Element::parse_str("<r><x/></r>").unwrap();
        let set = NodeSet::new(&root);
        let mut first = set.iter();
        first.next();
        // A second iterator starts from the root regardless of the first.
        assert!(matches!(set.iter().next(), Some(NodeRef::Element(e)) if e.name == "r"));
    }

    #[test]
    fn empty_uri_resolves_to_header() {
        let header = Element::parse_str("<h/>").unwrap();
        let document = Element::parse_str("<d/>").unwrap();
        let resolver = UriResolver::dual_tree(&header, &document);
        assert_eq!(resolver.resolve(Some("")).unwrap().root().name, "h");
    }

    #[test]
    fn absent_uri_resolves_to_document() {
        let header = Element::parse_str("<h/>").unwrap();
        let document = Element::parse_str("<d/>").unwrap();
        let resolver = UriResolver::dual_tree(&header, &document);
        assert_eq!(resolver.resolve(None).unwrap().root().name, "d");
    }

    #[test]
    fn fragment_uri_delegates_to_id_lookup() {
        let header =
            Element::parse_str(r#"<h><a Id="one"/><b><c Id="two">x</c></b></h>"#).unwrap();
        let document = Element::parse_str("<d/>").unwrap();
        let resolver = UriResolver::dual_tree(&header, &document);
        assert_eq!(resolver.resolve(Some("#two")).unwrap().root().name, "c");
        assert!(resolver.resolve(Some("#missing")).is_err());
    }

    #[test]
    fn non_fragment_uri_is_engine_error() {
        let header = Element::parse_str("<h/>").unwrap();
        let document = Element::parse_str("<d/>").unwrap();
        let resolver = UriResolver::dual_tree(&header, &document);
        assert!(matches!(
            resolver.resolve(Some("http://example.com")),
            Err(Error::Engine(_))
        ));
    }

    #[test]
    fn fragment_resolver_rejects_absent_uri() {
        let root = Element::parse_str("<h/>").unwrap();
        let resolver = UriResolver::Fragment(FragmentResolver::new(&root));
        assert!(matches!(resolver.resolve(None), Err(Error::Engine(_))));
    }
}
