use std::fmt;

use thiserror::Error;

/// Why a token was turned away. Logged, never sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    NotYetValid,
    BadSignature,
    Malformed,
    MissingKeyId,
    InvalidPayload,
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            TokenRejection::Expired => "expired",
            TokenRejection::NotYetValid => "not_yet_valid",
            TokenRejection::BadSignature => "bad_signature",
            TokenRejection::Malformed => "malformed",
            TokenRejection::MissingKeyId => "missing_kid",
            TokenRejection::InvalidPayload => "invalid_payload",
        };
        f.write_str(reason)
    }
}

impl From<&jsonwebtoken::errors::Error> for TokenRejection {
    fn from(err: &jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => TokenRejection::Expired,
            ErrorKind::ImmatureSignature => TokenRejection::NotYetValid,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat => TokenRejection::BadSignature,
            ErrorKind::Json(_) | ErrorKind::MissingRequiredClaim(_) => {
                TokenRejection::InvalidPayload
            }
            _ => TokenRejection::Malformed,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum KeyResolutionError {
    #[error("failed to fetch key set: {0}")]
    Fetch(String),

    #[error("key set endpoint returned HTTP {0}")]
    HttpStatus(u16),

    #[error("invalid key set document: {0}")]
    InvalidDocument(String),

    #[error("public key not found for kid `{kid}`")]
    KeyNotFound { kid: String },

    #[error("failed to decode key material: {0}")]
    Decode(String),
}

impl KeyResolutionError {
    /// Transport failures, throttling and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            KeyResolutionError::Fetch(_) => true,
            KeyResolutionError::HttpStatus(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token ({0})")]
    InvalidToken(TokenRejection),

    #[error("{0}")]
    KeyResolution(#[from] KeyResolutionError),

    #[error("client credentials rejected")]
    ClientRejected,
}
