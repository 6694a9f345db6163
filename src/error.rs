//! Error types for wvproxy.

use thiserror::Error;

use crate::license_protocol::signed_message::MessageType;
use crate::session::SessionState;

/// Main error type for wvproxy operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire bytes could not be interpreted.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The device (.wvd) container is invalid.
    #[error("Invalid device file: {0}")]
    FormatError(String),

    /// The content identifier is empty.
    #[error("Content identifier must not be empty")]
    InvalidContentIdentifier,

    /// The License Type is an invalid value.
    #[error("Invalid license type: {0}")]
    InvalidLicenseType(String),

    /// The envelope carried a different message than the one expected.
    #[error("Expected {} message, got {}", .expected.as_str_name(), .found.as_str_name())]
    UnexpectedMessageType {
        expected: MessageType,
        found: MessageType,
    },

    /// The license answers a different request than the session issued.
    #[error("Request id mismatch (expected {}, got {})", hex::encode(.expected), hex::encode(.found))]
    RequestIdMismatch { expected: Vec<u8>, found: Vec<u8> },

    /// Signature verification or key unwrapping failed.
    #[error("Integrity check failed: {0}")]
    IntegrityError(String),

    /// No in-flight session is registered under the request id.
    #[error("No session for request id {}", hex::encode(.0))]
    NotFound(Vec<u8>),

    /// The session is not in the state the operation requires.
    #[error("Session is {found:?}, expected {expected:?}")]
    InvalidState {
        expected: SessionState,
        found: SessionState,
    },

    /// The license carried no key containers.
    #[error("No keys loaded for this session")]
    NoKeysLoaded,

    /// Too many sessions are awaiting a response.
    #[error("Too many sessions open (max {max})")]
    TooManySessions { max: usize },

    /// The payload is neither ClearKey JSON nor a signed protocol message.
    #[error("Unrecognized payload")]
    UnrecognizedPayload,

    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// RSA error.
    #[error("RSA error: {0}")]
    RsaError(#[from] rsa::Error),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for wvproxy operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::license_protocol::signed_message::MessageType;

    #[test]
    fn unexpected_message_type_uses_protocol_names() {
        let err = Error::UnexpectedMessageType {
            expected: MessageType::License,
            found: MessageType::ErrorResponse,
        };
        assert_eq!(err.to_string(), "Expected LICENSE message, got ERROR_RESPONSE");
    }

    #[test]
    fn request_id_mismatch_is_hex_encoded() {
        let err = Error::RequestIdMismatch {
            expected: vec![0xab],
            found: vec![0x01, 0x02],
        };
        assert_eq!(err.to_string(), "Request id mismatch (expected ab, got 0102)");
    }
}
