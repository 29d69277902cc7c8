//! Producing the co-signature: envelope placement, reference digests,
//! SignedInfo assembly and the final `ds:Signature` tree.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info};

use crate::c14n;
use crate::constants::{
    EXCLUSIVE_C14N_ALGORITHM, ID_ATTRIBUTE, NS_XMLDSIG, PREFIX_DSIG, SHA256_DIGEST_ALGORITHM,
    SIGNATURE_ELEMENT, XPATH_SIGNATURE_ENV, XPATH_SIGNATURE_NODE, XPATH_X509_NODE,
};
use crate::crypto::{Credentials, SignatureAlgorithm, sign_bytes};
use crate::dereference::{NodeSet, UriResolver};
use crate::dom::{Element, node_at_mut};
use crate::envelope;
use crate::error::{Error, Result};
use crate::reference::{
    ReferenceSpec, digest_node_set, document_reference, header_reference, key_info_reference,
};
use crate::xpath::ExpressionPool;

/// Signs and validates business-header co-signatures.
///
/// One instance is meant to be shared: the path pool inside is
/// thread-safe, and compiled path instances are recycled across calls.
pub struct SignerVerifier {
    pub(crate) xpaths: ExpressionPool,
}

impl SignerVerifier {
    /// Create an engine with all internal paths compiled up front, so a
    /// misconfigured path surfaces here and not in the middle of a
    /// signing run.
    pub fn new() -> Result<Self> {
        let xpaths = ExpressionPool::new();
        xpaths.prepare(XPATH_SIGNATURE_ENV)?;
        xpaths.prepare(XPATH_SIGNATURE_NODE)?;
        xpaths.prepare(XPATH_X509_NODE)?;
        Ok(SignerVerifier { xpaths })
    }

    /// Sign `header` and `document` with one signature embedded in the
    /// header.
    ///
    /// The signature carries three references: the KeyInfo element by
    /// fragment id, the header by the empty URI, and the document by an
    /// absent URI. Any previous signature in the header is replaced.
    pub fn sign(
        &self,
        header: &mut Element,
        document: &Element,
        credentials: &Credentials,
        algorithm: SignatureAlgorithm,
    ) -> Result<()> {
        header.normalize();
        // The envelope must exist, empty, before the header is digested:
        // the enveloped transform removes Signature elements on both
        // sides, so the digested bytes match at validation time.
        let envelope_path = envelope::locate_or_create(header, &self.xpaths)?;

        let key_info_ref = key_info_reference();
        let header_ref = header_reference();
        let document_ref = document_reference();

        let key_info_id = key_info_ref
            .uri
            .as_deref()
            .and_then(|u| u.strip_prefix('#'))
            .ok_or_else(|| Error::Engine("key info reference is not a fragment".into()))?
            .to_string();
        let key_info = build_key_info(&key_info_id, credentials)?;
        let key_info_digest =
            digest_node_set(&NodeSet::new(&key_info), &key_info_ref.transforms)?;

        let (header_digest, document_digest) = {
            let resolver = UriResolver::dual_tree(header, document);
            let header_set = resolver.resolve(header_ref.uri.as_deref())?;
            let document_set = resolver.resolve(document_ref.uri.as_deref())?;
            (
                digest_node_set(&header_set, &header_ref.transforms)?,
                digest_node_set(&document_set, &document_ref.transforms)?,
            )
        };

        let signed_info = build_signed_info(
            algorithm,
            &[
                (&key_info_ref, &key_info_digest),
                (&header_ref, &header_digest),
                (&document_ref, &document_digest),
            ],
        );
        let canonical = c14n::canonicalize(&signed_info);
        let raw = sign_bytes(&credentials.private_key, algorithm, canonical.as_bytes())?;
        debug!(signature_len = raw.len(), "computed signature value");

        let mut signature = ds_element(SIGNATURE_ELEMENT);
        signature.push_element(signed_info);
        let mut signature_value = ds_element("SignatureValue");
        signature_value.push_text(&BASE64.encode(raw));
        signature.push_element(signature_value);
        signature.push_element(key_info);

        let envelope = node_at_mut(header, &envelope_path)
            .ok_or_else(|| Error::Structural("signature envelope vanished".into()))?;
        envelope.push_element(signature);
        info!(algorithm = algorithm.uri(), "header signed");
        Ok(())
    }
}

pub(crate) fn ds_element(name: &str) -> Element {
    Element::new(Some(PREFIX_DSIG), Some(NS_XMLDSIG), name)
}

fn build_key_info(id: &str, credentials: &Credentials) -> Result<Element> {
    let mut key_info = ds_element("KeyInfo");
    key_info.push_attr(ID_ATTRIBUTE, id);
    let mut x509_data = ds_element("X509Data");
    let mut certificate = ds_element("X509Certificate");
    certificate.push_text(&credentials.certificate_b64()?);
    x509_data.push_element(certificate);
    key_info.push_element(x509_data);
    Ok(key_info)
}

fn build_signed_info(
    algorithm: SignatureAlgorithm,
    references: &[(&ReferenceSpec, &str)],
) -> Element {
    let mut signed_info = ds_element("SignedInfo");

    let mut canon_method = ds_element("CanonicalizationMethod");
    canon_method.push_attr("Algorithm", EXCLUSIVE_C14N_ALGORITHM);
    signed_info.push_element(canon_method);

    let mut signature_method = ds_element("SignatureMethod");
    signature_method.push_attr("Algorithm", algorithm.uri());
    signed_info.push_element(signature_method);

    for (spec, digest) in references {
        let mut reference = ds_element("Reference");
        if let Some(uri) = &spec.uri {
            reference.push_attr("URI", uri);
        }

        let mut transforms = ds_element("Transforms");
        for kind in &spec.transforms {
            let mut transform = ds_element("Transform");
            transform.push_attr("Algorithm", kind.uri());
            transforms.push_element(transform);
        }
        reference.push_element(transforms);

        let mut digest_method = ds_element("DigestMethod");
        digest_method.push_attr("Algorithm", SHA256_DIGEST_ALGORITHM);
        reference.push_element(digest_method);

        let mut digest_value = ds_element("DigestValue");
        digest_value.push_text(digest);
        reference.push_element(digest_value);

        signed_info.push_element(reference);
    }
    signed_info
}
