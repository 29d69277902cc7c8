//! Self-signed credential generation for tests and demos.
//!
//! Unwraps are fine here; nothing in the signing or validation path
//! depends on this module.

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder};

use crate::crypto::Credentials;

/// Generate a fresh RSA-2048 key pair with a matching self-signed
/// certificate.
pub fn generate_signing_credentials() -> Credentials {
    let rsa = Rsa::generate(2048).unwrap();
    let key_pair = PKey::from_rsa(rsa).unwrap();
    build_credentials(key_pair, "Test RSA Signer")
}

/// Same as [`generate_signing_credentials`], but with a P-256 EC key.
pub fn generate_ecdsa_credentials() -> Credentials {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let ec = EcKey::generate(&group).unwrap();
    let key_pair = PKey::from_ec_key(ec).unwrap();
    build_credentials(key_pair, "Test EC Signer")
}

fn build_credentials(key_pair: PKey<Private>, common_name: &str) -> Credentials {
    let mut cert_builder = X509Builder::new().unwrap();

    cert_builder.set_version(2).unwrap();

    let serial_number = generate_serial_number();
    cert_builder.set_serial_number(&serial_number).unwrap();

    let subject_name = create_x509_name(&[
        ("C", "CM"),
        ("O", "Test Organization"),
        ("CN", common_name),
    ])
    .unwrap();
    cert_builder.set_subject_name(&subject_name).unwrap();
    cert_builder.set_issuer_name(&subject_name).unwrap();

    cert_builder.set_pubkey(&key_pair).unwrap();

    // Set validity period (1 year)
    let not_before = Asn1Time::days_from_now(0).unwrap();
    let not_after = Asn1Time::days_from_now(365).unwrap();
    cert_builder.set_not_before(&not_before).unwrap();
    cert_builder.set_not_after(&not_after).unwrap();

    cert_builder
        .append_extension(BasicConstraints::new().build().unwrap())
        .unwrap();

    cert_builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .non_repudiation()
                .build()
                .unwrap(),
        )
        .unwrap();

    cert_builder
        .sign(&key_pair, MessageDigest::sha256())
        .unwrap();

    Credentials::new(key_pair, cert_builder.build())
}

fn generate_serial_number() -> Asn1Integer {
    let mut serial = BigNum::new().unwrap();
    serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
    serial.to_asn1_integer().unwrap()
}

fn create_x509_name(entries: &[(&str, &str)]) -> Result<X509Name, openssl::error::ErrorStack> {
    let mut name_builder = X509NameBuilder::new()?;
    for (key, value) in entries {
        name_builder.append_entry_by_text(key, value)?;
    }
    Ok(name_builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_certificate_matches_key() {
        let creds = generate_signing_credentials();
        let public = creds.certificate.public_key().unwrap();
        assert!(public.public_eq(&creds.private_key));
    }

    #[test]
    fn ecdsa_credentials_use_an_ec_key() {
        let creds = generate_ecdsa_credentials();
        assert!(creds.private_key.ec_key().is_ok());
    }
}
