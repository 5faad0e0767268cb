use serde::de::DeserializeOwned;

use crate::config::{AuthConfig, ConfigProvider, JwksConfig};
use crate::error::Result;

use super::{AuthError, JwksTokenValidator, JwtValidator};

/// Token verification strategy used by the gatekeeper.
pub enum TokenVerifier {
    /// HMAC tokens signed with the access secret
    Secret(JwtValidator),
    /// RSA tokens verified against a JWKS endpoint
    Jwks(JwksTokenValidator),
}

impl TokenVerifier {
    /// JWKS mode when `auth.jwks_url` is set, shared-secret mode otherwise.
    pub fn from_provider(provider: &ConfigProvider) -> Result<Self> {
        if let Some(jwks) = JwksConfig::load(provider)? {
            tracing::info!(jwks_url = %jwks.url, "Token verification via JWKS");
            return Ok(TokenVerifier::Jwks(JwksTokenValidator::from_config(&jwks)?));
        }

        let auth = AuthConfig::load(provider)?;
        Ok(TokenVerifier::Secret(JwtValidator::new(&auth)))
    }

    pub async fn verify<P: DeserializeOwned>(&self, token: &str) -> std::result::Result<P, AuthError> {
        match self {
            TokenVerifier::Secret(validator) => validator.validate(token),
            TokenVerifier::Jwks(validator) => validator.validate(token).await,
        }
    }
}

impl From<JwtValidator> for TokenVerifier {
    fn from(validator: JwtValidator) -> Self {
        TokenVerifier::Secret(validator)
    }
}

impl From<JwksTokenValidator> for TokenVerifier {
    fn from(validator: JwksTokenValidator) -> Self {
        TokenVerifier::Jwks(validator)
    }
}
