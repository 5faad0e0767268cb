use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claim set carrying an application payload under the `Payload` claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadClaims<P> {
    #[serde(rename = "Payload")]
    pub payload: P,
    /// Expiration time (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Not before (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

impl<P> PayloadClaims<P> {
    /// Claims expiring `ttl_seconds` from now.
    pub fn expiring_in(payload: P, ttl_seconds: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            payload,
            exp: Some(now + ttl_seconds),
            iat: Some(now),
            nbf: None,
        }
    }
}

/// Payload of access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtAuthPayload {
    /// Tenant ID
    pub tid: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Payload of session tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtSessionPayload {
    /// Tenant ID
    pub tid: String,
    #[serde(rename = "type")]
    pub token_type: String,
    /// Role ID
    pub rid: String,
    /// Session ID
    pub sid: String,
}

/// Payloads that can tag log lines with a session.
pub trait SessionScoped {
    fn session_id(&self) -> Option<&str> {
        None
    }
}

impl SessionScoped for JwtAuthPayload {}

impl SessionScoped for JwtSessionPayload {
    fn session_id(&self) -> Option<&str> {
        Some(&self.sid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub expiry: DateTime<Utc>,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        self.expiry <= Utc::now()
    }
}
