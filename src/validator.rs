//! Validation of an embedded co-signature against the header and
//! document trees.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info};

use crate::c14n;
use crate::constants::{
    EXCLUSIVE_C14N_ALGORITHM, NS_XMLDSIG, SHA256_DIGEST_ALGORITHM, XPATH_SIGNATURE_NODE,
    XPATH_X509_NODE,
};
use crate::crypto::{SignatureAlgorithm, decode_certificate, verify_bytes};
use crate::dereference::UriResolver;
use crate::dom::{Element, node_at};
use crate::error::{Error, Result};
use crate::reference::{TransformKind, digest_node_set};
use crate::signer::SignerVerifier;

impl SignerVerifier {
    /// Validate the signature embedded in `header` over both trees.
    ///
    /// Returns `Ok(false)` when the signature is structurally sound but
    /// cryptographically wrong: a reference digest mismatch or a failed
    /// signature check. Anything else is an error: missing or duplicated
    /// nodes are `Structural`, unknown algorithms are `Engine`, a bad
    /// certificate is `Certificate`.
    pub fn validate(&self, header: &Element, document: &Element) -> Result<bool> {
        let cert_path = self.xpaths.find_required_node(XPATH_X509_NODE, header)?;
        let cert_node = node_at(header, &cert_path)
            .ok_or_else(|| Error::Structural("certificate node vanished".into()))?;
        let certificate = decode_certificate(&cert_node.text_content())?;
        let public_key = certificate.public_key()?;

        let signature_path = self
            .xpaths
            .find_required_node(XPATH_SIGNATURE_NODE, header)?;
        let signature = node_at(header, &signature_path)
            .ok_or_else(|| Error::Structural("signature node vanished".into()))?;

        let signed_info = exactly_one(signature, "SignedInfo")?;

        let canon_method = exactly_one(signed_info, "CanonicalizationMethod")?;
        let canon_uri = required_attr(canon_method, "Algorithm")?;
        if canon_uri != EXCLUSIVE_C14N_ALGORITHM {
            return Err(Error::Engine(format!(
                "unsupported canonicalization method: {canon_uri}"
            )));
        }

        let signature_method = exactly_one(signed_info, "SignatureMethod")?;
        let algorithm = SignatureAlgorithm::from_uri(required_attr(signature_method, "Algorithm")?)?;

        let resolver = UriResolver::dual_tree(header, document);
        for reference in signed_info
            .child_elements()
            .filter(|e| e.is_named(NS_XMLDSIG, "Reference"))
        {
            if !self.check_reference(reference, &resolver)? {
                return Ok(false);
            }
        }

        let signature_value = exactly_one(signature, "SignatureValue")?;
        let compact: String = signature_value
            .text_content()
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let raw = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| Error::Engine(format!("signature value is not base64: {e}")))?;

        let canonical = c14n::canonicalize(signed_info);
        let valid = verify_bytes(&public_key, algorithm, canonical.as_bytes(), &raw)?;
        info!(valid, algorithm = algorithm.uri(), "signature validated");
        Ok(valid)
    }

    /// Recompute one reference digest. `Ok(false)` means a mismatch.
    fn check_reference(&self, reference: &Element, resolver: &UriResolver<'_>) -> Result<bool> {
        let uri = reference.attr("URI");

        let digest_method = exactly_one(reference, "DigestMethod")?;
        let digest_uri = required_attr(digest_method, "Algorithm")?;
        if digest_uri != SHA256_DIGEST_ALGORITHM {
            return Err(Error::Engine(format!(
                "unsupported digest method: {digest_uri}"
            )));
        }

        let mut transforms: Vec<TransformKind> = Vec::new();
        if let Some(list) = optional_child(reference, "Transforms")? {
            for transform in list
                .child_elements()
                .filter(|e| e.is_named(NS_XMLDSIG, "Transform"))
            {
                transforms.push(TransformKind::from_uri(required_attr(
                    transform,
                    "Algorithm",
                )?)?);
            }
        }

        let expected = exactly_one(reference, "DigestValue")?
            .text_content()
            .trim()
            .to_string();

        let node_set = resolver.resolve(uri)?;
        let actual = digest_node_set(&node_set, &transforms)?;
        if actual != expected {
            debug!(uri = uri.unwrap_or("<absent>"), "reference digest mismatch");
            return Ok(false);
        }
        Ok(true)
    }
}

fn exactly_one<'a>(parent: &'a Element, name: &str) -> Result<&'a Element> {
    let mut found = parent
        .child_elements()
        .filter(|e| e.is_named(NS_XMLDSIG, name));
    let first = found
        .next()
        .ok_or_else(|| Error::Structural(format!("missing {name} element")))?;
    if found.next().is_some() {
        return Err(Error::Structural(format!("multiple {name} elements")));
    }
    Ok(first)
}

fn optional_child<'a>(parent: &'a Element, name: &str) -> Result<Option<&'a Element>> {
    let mut found = parent
        .child_elements()
        .filter(|e| e.is_named(NS_XMLDSIG, name));
    let first = found.next();
    if found.next().is_some() {
        return Err(Error::Structural(format!("multiple {name} elements")));
    }
    Ok(first)
}

fn required_attr<'a>(el: &'a Element, name: &str) -> Result<&'a str> {
    el.attr(name)
        .ok_or_else(|| Error::Structural(format!("{} is missing the {name} attribute", el.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_utils::generate_signing_credentials;
    use crate::constants::NS_ISO_HEAD;
    use crate::dom::node_at_mut;

    fn signed_pair() -> (Element, Element, SignerVerifier) {
        let engine = SignerVerifier::new().unwrap();
        let mut header = Element::parse_str(&format!(
            r#"<AppHdr xmlns="{NS_ISO_HEAD}"><Fr>Alpha</Fr><To>Beta</To></AppHdr>"#
        ))
        .unwrap();
        let document =
            Element::parse_str(r#"<Document xmlns="urn:example:doc"><Amt>10</Amt></Document>"#)
                .unwrap();
        let creds = generate_signing_credentials();
        engine
            .sign(&mut header, &document, &creds, SignatureAlgorithm::RsaSha256)
            .unwrap();
        (header, document, engine)
    }

    #[test]
    fn fresh_signature_validates() {
        let (header, document, engine) = signed_pair();
        assert!(engine.validate(&header, &document).unwrap());
    }

    #[test]
    fn missing_certificate_is_structural() {
        let (mut header, document, engine) = signed_pair();
        // Strip KeyInfo; the certificate path no longer matches anything.
        let signature = node_at_mut(&mut header, &[2, 0]).unwrap();
        signature.children.pop();
        assert!(matches!(
            engine.validate(&header, &document),
            Err(Error::Structural(_))
        ));
    }

    #[test]
    fn unknown_signature_method_is_engine_error() {
        let (mut header, document, engine) = signed_pair();
        let signed_info = node_at_mut(&mut header, &[2, 0, 0]).unwrap();
        let method = signed_info.children[1].as_mut_element().unwrap();
        method.attributes[0].value = "http://www.w3.org/2000/09/xmldsig#rsa-sha1".into();
        assert!(matches!(
            engine.validate(&header, &document),
            Err(Error::Engine(_))
        ));
    }

    #[test]
    fn tampered_digest_reports_invalid_not_error() {
        let (mut header, document, engine) = signed_pair();
        let signed_info = node_at_mut(&mut header, &[2, 0, 0]).unwrap();
        // Reference order is KeyInfo, header, document; index 4 is the
        // document reference.
        let reference = signed_info.children[4].as_mut_element().unwrap();
        let digest_value = reference.children[2].as_mut_element().unwrap();
        digest_value.children.clear();
        digest_value.push_text("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        assert!(!engine.validate(&header, &document).unwrap());
    }
}
