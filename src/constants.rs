//! Namespace, algorithm and path constants for the ISO 20022 signature
//! protocol, centralized to avoid magic strings.

/// Namespace of the ISO 20022 business application header (`head.001.001.03`).
pub const NS_ISO_HEAD: &str = "urn:iso:std:iso:20022:tech:xsd:head.001.001.03";

/// Namespace for XML digital signatures.
pub const NS_XMLDSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Internal prefix bound to [`NS_ISO_HEAD`] in path expressions.
pub const PREFIX_HEAD: &str = "head";

/// Internal prefix bound to [`NS_XMLDSIG`] in path expressions, and the
/// prefix used for every signature element this crate creates.
pub const PREFIX_DSIG: &str = "ds";

/// Algorithm URIs
pub const EXCLUSIVE_C14N_ALGORITHM: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const ENVELOPED_SIGNATURE_ALGORITHM: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const SHA256_DIGEST_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Element names
pub const ENVELOPE_ELEMENT: &str = "Sgntr";
pub const TRAILER_ELEMENT: &str = "Rltd";
pub const SIGNATURE_ELEMENT: &str = "Signature";

/// Attribute used for same-document fragment lookups.
pub const ID_ATTRIBUTE: &str = "Id";

/// Path to the signature envelope within the business header.
pub const XPATH_SIGNATURE_ENV: &str = "/head:AppHdr/head:Sgntr";

/// Path to the Signature node within the signature envelope.
pub const XPATH_SIGNATURE_NODE: &str = "/head:AppHdr/head:Sgntr/ds:Signature";

/// Path to the X.509 certificate within the Signature node.
pub const XPATH_X509_NODE: &str =
    "/head:AppHdr/head:Sgntr/ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509Certificate";
