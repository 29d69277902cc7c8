//! The three SignedInfo references and the transform/digest pipeline they
//! share with validation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::c14n;
use crate::constants::{
    ENVELOPED_SIGNATURE_ALGORITHM, EXCLUSIVE_C14N_ALGORITHM, NS_XMLDSIG, SIGNATURE_ELEMENT,
};
use crate::dereference::NodeSet;
use crate::dom::{Element, XmlNode};
use crate::error::{Error, Result};

/// A transform applied to a resolved node set before digesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// Remove every `ds:Signature` element from the hash input, so a
    /// signature never covers itself.
    Enveloped,
    /// Exclusive canonicalization; always the final serializing step.
    ExclusiveC14n,
}

impl TransformKind {
    pub fn uri(&self) -> &'static str {
        match self {
            TransformKind::Enveloped => ENVELOPED_SIGNATURE_ALGORITHM,
            TransformKind::ExclusiveC14n => EXCLUSIVE_C14N_ALGORITHM,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        match uri {
            ENVELOPED_SIGNATURE_ALGORITHM => Ok(TransformKind::Enveloped),
            EXCLUSIVE_C14N_ALGORITHM => Ok(TransformKind::ExclusiveC14n),
            other => Err(Error::Engine(format!("unsupported transform: {other}"))),
        }
    }
}

/// One reference to be digested: its URI (`None` means the URI attribute
/// is absent entirely) and its ordered transform list. Digest method is
/// always SHA-256.
#[derive(Debug, Clone)]
pub struct ReferenceSpec {
    pub uri: Option<String>,
    pub transforms: Vec<TransformKind>,
}

/// Reference to the KeyInfo element, via a freshly generated random
/// fragment identifier.
///
/// Uniqueness of the identifier within the document relies on the
/// randomness of the v4 UUID alone; no collision scan is performed.
pub fn key_info_reference() -> ReferenceSpec {
    ReferenceSpec {
        uri: Some(format!("#KeyInfo-{}", Uuid::new_v4())),
        transforms: vec![TransformKind::ExclusiveC14n],
    }
}

/// Explicit self-reference to the header root: the empty URI.
pub fn header_reference() -> ReferenceSpec {
    ReferenceSpec {
        uri: Some(String::new()),
        transforms: vec![TransformKind::Enveloped, TransformKind::ExclusiveC14n],
    }
}

/// Reference to the disconnected document: no URI at all. The signature
/// never lives inside the document tree, so there is no enveloped
/// transform.
pub fn document_reference() -> ReferenceSpec {
    ReferenceSpec {
        uri: None,
        transforms: vec![TransformKind::ExclusiveC14n],
    }
}

/// Apply a transform chain to a resolved node set and digest the result.
pub fn digest_node_set(node_set: &NodeSet<'_>, transforms: &[TransformKind]) -> Result<String> {
    let mut working: Option<Element> = None;
    let mut canonical: Option<String> = None;

    for transform in transforms {
        if canonical.is_some() {
            return Err(Error::Engine(
                "transform after canonicalization is not supported".into(),
            ));
        }
        match transform {
            TransformKind::Enveloped => {
                let mut copy = working.take().unwrap_or_else(|| node_set.root().clone());
                strip_signatures(&mut copy);
                working = Some(copy);
            }
            TransformKind::ExclusiveC14n => {
                let text = match &working {
                    Some(el) => c14n::canonicalize(el),
                    None => c14n::canonicalize(node_set.root()),
                };
                canonical = Some(text);
            }
        }
    }

    let canonical = canonical.ok_or_else(|| {
        Error::Engine("reference transforms must end with canonicalization".into())
    })?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(BASE64.encode(digest))
}

/// Remove every `ds:Signature` element in the subtree.
fn strip_signatures(el: &mut Element) {
    el.children.retain(|child| match child {
        XmlNode::Element(e) => !e.is_named(NS_XMLDSIG, SIGNATURE_ELEMENT),
        _ => true,
    });
    for child in &mut el.children {
        if let XmlNode::Element(e) = child {
            strip_signatures(e);
        }
    }
}
