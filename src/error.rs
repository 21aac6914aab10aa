//! Error types for hybrid-envelope.
//!
//! Two layers:
//!   - [`DecodeError`] is what the TLV reader and the envelope codec report.
//!   - [`Error`] is what every public operation returns.
//!
//! Authentication failures are coarse: a caller learns that a
//! tag did not verify, never which byte or which step disagreed.

use thiserror::Error as ThisError;

/// Structural decode failures. Decoding never panics; every malformed input
/// maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum DecodeError {
    /// Non-canonical encoding (indefinite or non-minimal length, non-minimal
    /// tag or integer, trailing bytes).
    #[error("syntax error: {0}")]
    Syntax(&'static str),
    /// Well-formed TLV that does not fit the expected structure.
    #[error("structural error: {0}")]
    Structural(&'static str),
    #[error("unsupported recipient type [{0}]")]
    UnsupportedRecipientType(u32),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(&'static str),
    /// Input ended before the declared length.
    #[error("truncated input")]
    Truncated,
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(DecodeError),
    #[error("unsupported key type")]
    UnsupportedKeyType,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(&'static str),
    /// No recipient could be unlocked with the supplied key or password.
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("authentication tag mismatch")]
    TagMismatch,
    #[error("signature verification failed")]
    SignVerificationFailed,
    #[error("signature not found")]
    SignatureNotFound,
    #[error("truncated ciphertext")]
    TruncatedCiphertext,
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("random source unavailable")]
    RandomSource,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::UnsupportedAlgorithm(name) => Error::UnsupportedAlgorithm(name),
            other => Error::MalformedEnvelope(other),
        }
    }
}

impl From<hkdf::InvalidLength> for Error {
    fn from(_: hkdf::InvalidLength) -> Self {
        Error::InvalidParameter("hkdf output length")
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        Error::InvalidKey("ed25519 point")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
