use openssl::error::ErrorStack;

pub type Result<T> = std::result::Result<T, Error>;

/// Error type for signing and validation.
///
/// `validate` reports "cryptographically invalid" as `Ok(false)`, never as
/// an error; everything below means the inputs or the environment were bad
/// in a way the caller must be able to tell apart from a failed signature.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required node is absent, or present more than once where exactly
    /// one is required.
    #[error("structural error: {0}")]
    Structural(String),

    /// Malformed base64 or certificate bytes.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The signature engine rejected its inputs: unknown algorithm,
    /// key/algorithm mismatch, malformed SignedInfo.
    #[error("signature engine error: {0}")]
    Engine(String),

    /// A required crypto or XML capability is unavailable; fatal, not
    /// recoverable per call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// XML processing error.
    #[error("XML error: {0}")]
    Xml(String),

    /// Internal OpenSSL error.
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Xml(err.utf8_error().to_string())
    }
}
