use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;

use crate::config::AuthConfig;

use super::{AuthError, JwtAuthPayload, JwtSessionPayload, PayloadClaims, RsaPublicKey, TokenRejection};

/// Characters of the token echoed into logs
const LOGGED_TOKEN_PREFIX_LEN: usize = 8;

pub(crate) fn token_prefix(token: &str) -> String {
    token.chars().take(LOGGED_TOKEN_PREFIX_LEN).collect()
}

pub(crate) fn reject(token: &str, reason: TokenRejection) -> AuthError {
    tracing::warn!(
        token_prefix = %token_prefix(token),
        reason = %reason,
        "Token validation failed"
    );
    AuthError::InvalidToken(reason)
}

/// Verifies signed tokens and extracts the `Payload` claim.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

fn validation_for(algorithms: Vec<Algorithm>) -> Validation {
    let mut validation = Validation::new(algorithms[0]);
    validation.algorithms = algorithms;
    // exp and nbf are enforced when present, without grace period
    validation.required_spec_claims.clear();
    validation.validate_nbf = true;
    validation.leeway = 0;
    validation.validate_aud = false;
    validation
}

impl JwtValidator {
    /// Validator keyed by the access secret.
    pub fn new(config: &AuthConfig) -> Self {
        Self::from_secret(&config.access_secret)
    }

    /// HMAC (HS256/384/512) validator.
    pub fn from_secret(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: validation_for(vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512]),
        }
    }

    /// RSA (RS256/384/512) validator for a key resolved from a JWKS.
    pub fn from_rsa_key(key: &RsaPublicKey) -> Self {
        Self {
            decoding_key: key.decoding_key(),
            validation: validation_for(vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512]),
        }
    }

    pub fn validate<P: DeserializeOwned>(&self, token: &str) -> Result<P, AuthError> {
        decode::<PayloadClaims<P>>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims.payload)
            .map_err(|e| reject(token, TokenRejection::from(&e)))
    }

    pub fn validate_auth(&self, token: &str) -> Result<JwtAuthPayload, AuthError> {
        self.validate(token)
    }

    pub fn validate_session(&self, token: &str) -> Result<JwtSessionPayload, AuthError> {
        self.validate(token)
    }
}
