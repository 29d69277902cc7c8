//! Embedded XML signatures for ISO 20022 business messages.
//!
//! A message travels as two disconnected trees, the `AppHdr` business
//! header and the payload `Document`. One signature, embedded in the
//! header's `Sgntr` envelope, certifies both: it references its own
//! KeyInfo by fragment id, the header by the empty URI, and the document
//! by omitting the URI entirely.

pub mod c14n;
pub mod cert_utils;
pub mod constants;
pub mod crypto;
pub mod dereference;
pub mod dom;
pub(crate) mod envelope;
pub mod error;
pub mod reference;
pub mod signer;
pub mod validator;
pub mod xpath;

pub use crypto::{Credentials, SignatureAlgorithm};
pub use dom::{Element, XmlNode};
pub use error::{Error, Result};
pub use signer::SignerVerifier;
pub use xpath::ExpressionPool;
