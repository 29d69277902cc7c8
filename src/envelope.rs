//! Locating or creating the `Sgntr` signature envelope inside the header.

use tracing::debug;

use crate::constants::{ENVELOPE_ELEMENT, TRAILER_ELEMENT, XPATH_SIGNATURE_ENV, XPATH_SIGNATURE_NODE};
use crate::dom::{Element, NodePath, XmlNode, remove_at};
use crate::error::{Error, Result};
use crate::xpath::ExpressionPool;

/// Find or create an empty `Sgntr` envelope in the header, returning its
/// child index path.
///
/// Any existing `Signature` nodes under the envelope path are removed
/// first, so re-signing replaces rather than accumulates. The header must
/// conform to the business-header schema: at least one element precedes
/// the envelope position, and any `Rltd` elements come after it.
pub(crate) fn locate_or_create(header: &mut Element, xpaths: &ExpressionPool) -> Result<NodePath> {
    // Remove all existing Signature nodes, in reverse index order so the
    // remaining index paths stay valid while mutating.
    let stale = xpaths.find_nodes(XPATH_SIGNATURE_NODE, header)?;
    if !stale.is_empty() {
        debug!(count = stale.len(), "removing stale signature nodes");
    }
    for path in stale.iter().rev() {
        remove_at(header, path);
    }

    if let Some(path) = xpaths.find_node(XPATH_SIGNATURE_ENV, header)? {
        debug!("reusing existing signature envelope");
        return Ok(path);
    }

    // The envelope sits near the end of the header; only Rltd elements may
    // follow it. Walk backward past those (and non-element nodes) to the
    // insertion point, tracking the node just after it as the anchor.
    let mut anchor: Option<usize> = None;
    let mut stop: Option<usize> = None;
    for index in (0..header.children.len()).rev() {
        match &header.children[index] {
            XmlNode::Element(e) if e.name != TRAILER_ELEMENT => {
                stop = Some(index);
                break;
            }
            _ => anchor = Some(index),
        }
    }
    let stop = stop.ok_or_else(|| {
        Error::Structural("header has no element before the envelope position".into())
    })?;

    let (prefix, namespace) = match &header.children[stop] {
        XmlNode::Element(e) => (e.prefix.clone(), e.namespace.clone()),
        _ => unreachable!("stop index always points at an element"),
    };
    let envelope = Element {
        prefix,
        namespace,
        name: ENVELOPE_ELEMENT.to_string(),
        attributes: Vec::new(),
        children: Vec::new(),
    };

    let at = anchor.unwrap_or(header.children.len());
    debug!(index = at, "creating signature envelope");
    header.children.insert(at, XmlNode::Element(envelope));
    Ok(vec![at])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NS_ISO_HEAD;
    use crate::dom::node_at;

    fn header(body: &str) -> Element {
        let xml = format!(r#"<AppHdr xmlns="{NS_ISO_HEAD}">{body}</AppHdr>"#);
        Element::parse_str(&xml).unwrap()
    }

    #[test]
    fn creates_envelope_at_end_without_trailers() {
        let mut hdr = header("<Fr>a</Fr><To>b</To>");
        let pool = ExpressionPool::new();
        let path = locate_or_create(&mut hdr, &pool).unwrap();
        assert_eq!(path, vec![2]);
        let env = node_at(&hdr, &path).unwrap();
        assert_eq!(env.name, "Sgntr");
        assert_eq!(env.namespace.as_deref(), Some(NS_ISO_HEAD));
    }

    #[test]
    fn inserts_before_first_trailer() {
        let mut hdr = header("<Fr>a</Fr><Rltd/><Rltd/>");
        let pool = ExpressionPool::new();
        let path = locate_or_create(&mut hdr, &pool).unwrap();
        assert_eq!(path, vec![1]);
        assert_eq!(node_at(&hdr, &[1]).unwrap().name, "Sgntr");
        assert_eq!(node_at(&hdr, &[2]).unwrap().name, "Rltd");
        assert_eq!(node_at(&hdr, &[3]).unwrap().name, "Rltd");
    }

    #[test]
    fn skips_trailing_text_nodes() {
        let mut hdr = header("<Fr>a</Fr>\n  ");
        let pool = ExpressionPool::new();
        let path = locate_or_create(&mut hdr, &pool).unwrap();
        // Inserted between <Fr> and the trailing whitespace.
        assert_eq!(path, vec![1]);
    }

    #[test]
    fn reuses_existing_envelope_and_removes_stale_signature() {
        let mut hdr = header(concat!(
            "<Fr>a</Fr>",
            r#"<Sgntr><Signature xmlns="http://www.w3.org/2000/09/xmldsig#">old</Signature></Sgntr>"#,
        ));
        let pool = ExpressionPool::new();
        let path = locate_or_create(&mut hdr, &pool).unwrap();
        assert_eq!(path, vec![1]);
        let env = node_at(&hdr, &path).unwrap();
        assert!(env.children.is_empty());
    }

    #[test]
    fn two_preexisting_envelopes_are_structural() {
        let mut hdr = header("<Fr>a</Fr><Sgntr/><Sgntr/>");
        let pool = ExpressionPool::new();
        assert!(matches!(
            locate_or_create(&mut hdr, &pool),
            Err(Error::Structural(_))
        ));
    }

    #[test]
    fn header_of_only_trailers_is_structural() {
        let mut hdr = header("<Rltd/>");
        let pool = ExpressionPool::new();
        assert!(matches!(
            locate_or_create(&mut hdr, &pool),
            Err(Error::Structural(_))
        ));
    }
}
