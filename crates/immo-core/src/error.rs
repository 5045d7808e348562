//! Error types for the media and realtime core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImmoError>;

#[derive(Error, Debug)]
pub enum ImmoError {
    /// The runtime cannot provide the random source or the cipher
    #[error("Crypto unavailable: {0}")]
    CryptoUnavailable(String),

    #[error("Invalid {field} length: expected {expected} bytes, got {got}")]
    InvalidInputLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    /// Deliberately carries no detail about which input was wrong
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection config unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ImmoError {
    fn from(e: serde_json::Error) -> Self {
        ImmoError::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for ImmoError {
    fn from(e: base64::DecodeError) -> Self {
        ImmoError::Encoding(e.to_string())
    }
}
