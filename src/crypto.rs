//! Key handling, certificate decoding and raw signature operations.
//!
//! Everything cryptographic below the protocol layer lives here: the
//! algorithm-URI table, PEM credential loading, base64/DER certificate
//! decoding, and signing/verification of canonical bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use tracing::debug;

use crate::error::{Error, Result};

/// Signature methods supported for SignedInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaSha256,
    RsaSha384,
    RsaSha512,
    EcdsaSha256,
    EcdsaSha384,
    EcdsaSha512,
}

impl SignatureAlgorithm {
    /// The xmldsig algorithm URI.
    pub fn uri(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha256 => {
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
            }
            SignatureAlgorithm::RsaSha384 => {
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384"
            }
            SignatureAlgorithm::RsaSha512 => {
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512"
            }
            SignatureAlgorithm::EcdsaSha256 => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"
            }
            SignatureAlgorithm::EcdsaSha384 => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384"
            }
            SignatureAlgorithm::EcdsaSha512 => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512"
            }
        }
    }

    /// Look up a method by URI. Unknown URIs are an engine error, keeping
    /// validation strict about the algorithms it will run.
    pub fn from_uri(uri: &str) -> Result<Self> {
        [
            SignatureAlgorithm::RsaSha256,
            SignatureAlgorithm::RsaSha384,
            SignatureAlgorithm::RsaSha512,
            SignatureAlgorithm::EcdsaSha256,
            SignatureAlgorithm::EcdsaSha384,
            SignatureAlgorithm::EcdsaSha512,
        ]
        .into_iter()
        .find(|alg| alg.uri() == uri)
        .ok_or_else(|| Error::Engine(format!("unsupported signature algorithm: {uri}")))
    }

    fn message_digest(&self) -> MessageDigest {
        match self {
            SignatureAlgorithm::RsaSha256 | SignatureAlgorithm::EcdsaSha256 => {
                MessageDigest::sha256()
            }
            SignatureAlgorithm::RsaSha384 | SignatureAlgorithm::EcdsaSha384 => {
                MessageDigest::sha384()
            }
            SignatureAlgorithm::RsaSha512 | SignatureAlgorithm::EcdsaSha512 => {
                MessageDigest::sha512()
            }
        }
    }
}

/// A private key together with the certificate to embed in the header.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub private_key: PKey<Private>,
    pub certificate: X509,
}

impl Credentials {
    /// Load a PEM private key and PEM certificate.
    pub fn from_pem(key_pem: &[u8], cert_pem: &[u8]) -> Result<Self> {
        let private_key = PKey::private_key_from_pem(key_pem)
            .map_err(|e| Error::Certificate(format!("invalid private key PEM: {e}")))?;
        let certificate = X509::from_pem(cert_pem)
            .map_err(|e| Error::Certificate(format!("invalid certificate PEM: {e}")))?;
        Ok(Credentials {
            private_key,
            certificate,
        })
    }

    pub fn new(private_key: PKey<Private>, certificate: X509) -> Self {
        Credentials {
            private_key,
            certificate,
        }
    }

    /// The certificate as base64 DER, the form embedded in KeyInfo.
    pub fn certificate_b64(&self) -> Result<String> {
        Ok(BASE64.encode(self.certificate.to_der()?))
    }
}

/// Decode the text content of an X509Certificate node. Line breaks are
/// permitted in the base64 payload.
pub fn decode_certificate(text: &str) -> Result<X509> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let der = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| Error::Certificate(format!("invalid base64 certificate: {e}")))?;
    X509::from_der(&der).map_err(|e| Error::Certificate(format!("invalid X.509 certificate: {e}")))
}

/// Sign canonical bytes with the given method.
pub fn sign_bytes(
    key: &PKey<Private>,
    algorithm: SignatureAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>> {
    debug!(
        algorithm = algorithm.uri(),
        len = data.len(),
        "signing canonical bytes"
    );
    let mut signer = Signer::new(algorithm.message_digest(), key)
        .map_err(|e| Error::Engine(format!("key does not support {}: {e}", algorithm.uri())))?;
    signer.update(data)?;
    signer
        .sign_to_vec()
        .map_err(|e| Error::Engine(format!("signing failed: {e}")))
}

/// Verify a signature over canonical bytes. Returns `false` for any
/// cryptographic mismatch, including malformed signature bytes.
pub fn verify_bytes(
    key: &PKey<Public>,
    algorithm: SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let mut verifier = Verifier::new(algorithm.message_digest(), key)
        .map_err(|e| Error::Engine(format!("key does not support {}: {e}", algorithm.uri())))?;
    verifier.update(data)?;
    Ok(verifier.verify(signature).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_utils::generate_signing_credentials;

    #[test]
    fn algorithm_uris_round_trip() {
        for alg in [
            SignatureAlgorithm::RsaSha256,
            SignatureAlgorithm::RsaSha384,
            SignatureAlgorithm::RsaSha512,
            SignatureAlgorithm::EcdsaSha256,
            SignatureAlgorithm::EcdsaSha384,
            SignatureAlgorithm::EcdsaSha512,
        ] {
            assert_eq!(SignatureAlgorithm::from_uri(alg.uri()).unwrap(), alg);
        }
        assert!(matches!(
            SignatureAlgorithm::from_uri("http://www.w3.org/2000/09/xmldsig#rsa-sha1"),
            Err(Error::Engine(_))
        ));
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let creds = generate_signing_credentials();
        let data = b"canonical bytes";
        let sig = sign_bytes(&creds.private_key, SignatureAlgorithm::RsaSha256, data).unwrap();
        let public = creds.certificate.public_key().unwrap();
        assert!(verify_bytes(&public, SignatureAlgorithm::RsaSha256, data, &sig).unwrap());
        assert!(!verify_bytes(&public, SignatureAlgorithm::RsaSha256, b"other", &sig).unwrap());
        assert!(!verify_bytes(&public, SignatureAlgorithm::RsaSha256, data, b"junk").unwrap());
    }

    #[test]
    fn certificate_decode_tolerates_line_breaks() {
        let creds = generate_signing_credentials();
        let b64 = creds.certificate_b64().unwrap();
        let wrapped: String = b64
            .as_bytes()
            .chunks(64)
            .map(|c| format!("{}\n", String::from_utf8_lossy(c)))
            .collect();
        let decoded = decode_certificate(&wrapped).unwrap();
        assert_eq!(
            decoded.to_der().unwrap(),
            creds.certificate.to_der().unwrap()
        );
    }

    #[test]
    fn malformed_certificate_is_certificate_error() {
        assert!(matches!(
            decode_certificate("not base64 !!!"),
            Err(Error::Certificate(_))
        ));
        assert!(matches!(
            decode_certificate(&BASE64.encode(b"not a certificate")),
            Err(Error::Certificate(_))
        ));
    }
}
