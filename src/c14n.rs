//! Exclusive XML canonicalization over the resolved DOM.
//!
//! Canonical output depends only on resolved (prefix, namespace) pairs,
//! attribute order and content, so a subtree canonicalizes to the same
//! bytes whether it is held in memory or reparsed from serialized output.
//! Comments are omitted and CDATA sections are normalized to text, which
//! matches the canonicalization the digest values are computed over.

use std::collections::BTreeMap;

use crate::dom::{Element, XmlNode};

/// Canonicalize an element subtree with Exclusive XML Canonicalization.
pub fn canonicalize(root: &Element) -> String {
    let mut out = String::new();
    write_canonical(root, &BTreeMap::new(), &mut out);
    out
}

/// Namespace bindings rendered so far, keyed by prefix. The `None` key is
/// the default namespace.
type Rendered = BTreeMap<Option<String>, String>;

fn write_canonical(el: &Element, rendered: &Rendered, out: &mut String) {
    // Visibly utilized bindings: the element's own prefix plus every
    // prefixed attribute. The xml prefix is implicitly bound and never
    // rendered.
    let mut utilized: BTreeMap<Option<String>, &str> = BTreeMap::new();
    utilized.insert(el.prefix.clone(), el.namespace.as_deref().unwrap_or(""));
    for attr in &el.attributes {
        if let (Some(prefix), Some(uri)) = (&attr.prefix, &attr.namespace) {
            if prefix != "xml" {
                utilized.insert(Some(prefix.clone()), uri.as_str());
            }
        }
    }

    let mut to_render: Vec<(Option<String>, String)> = Vec::new();
    for (prefix, uri) in &utilized {
        if prefix.is_none() && uri.is_empty() {
            // An unprefixed element in no namespace only needs xmlns=""
            // when an ancestor rendered a non-empty default namespace.
            if rendered.get(&None).is_some_and(|r| !r.is_empty()) {
                to_render.push((None, String::new()));
            }
            continue;
        }
        let already = rendered.get(prefix).map(String::as_str) == Some(*uri);
        if !already {
            to_render.push((prefix.clone(), uri.to_string()));
        }
    }
    // BTreeMap iteration already yields prefixes in lexical order with the
    // default namespace first.

    let tag = match &el.prefix {
        Some(p) => format!("{p}:{}", el.name),
        None => el.name.clone(),
    };
    out.push('<');
    out.push_str(&tag);
    for (prefix, uri) in &to_render {
        match prefix {
            Some(p) => out.push_str(&format!(" xmlns:{p}=\"")),
            None => out.push_str(" xmlns=\""),
        }
        out.push_str(&escape_attr_value(uri));
        out.push('"');
    }

    // Attributes sorted by (namespace URI, local name); unprefixed
    // attributes have no namespace and sort first.
    let mut attrs: Vec<_> = el.attributes.iter().collect();
    attrs.sort_by(|a, b| {
        let a_key = (a.namespace.as_deref().unwrap_or(""), a.name.as_str());
        let b_key = (b.namespace.as_deref().unwrap_or(""), b.name.as_str());
        a_key.cmp(&b_key)
    });
    for attr in attrs {
        out.push(' ');
        match &attr.prefix {
            Some(p) => {
                out.push_str(p);
                out.push(':');
            }
            None => {}
        }
        out.push_str(&attr.name);
        out.push_str("=\"");
        out.push_str(&escape_attr_value(&attr.value));
        out.push('"');
    }
    out.push('>');

    let mut child_rendered = rendered.clone();
    for (prefix, uri) in to_render {
        child_rendered.insert(prefix, uri);
    }

    for child in &el.children {
        match child {
            XmlNode::Element(e) => write_canonical(e, &child_rendered, out),
            XmlNode::Text(t) | XmlNode::CData(t) => out.push_str(&escape_text_value(t)),
            XmlNode::Comment(_) => {}
        }
    }

    out.push_str("</");
    out.push_str(&tag);
    out.push('>');
}

/// Escape an attribute value per C14N rules.
pub(crate) fn escape_attr_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len() + v.len() / 4);
    for ch in v.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape a text node value per C14N rules.
pub(crate) fn escape_text_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len() + v.len() / 4);
    for ch in v.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}
