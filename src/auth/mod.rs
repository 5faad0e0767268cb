//! Token authentication.
//!
//! - `JwtValidator`: shared-secret (HMAC) or single-RSA-key validation
//! - `JwksResolver`: remote public key lookup with caching and retries
//! - `TokenVerifier`: the strategy the gatekeeper middleware delegates to

mod backoff;
mod claims;
mod error;
mod jwks;
mod jwt;
mod verifier;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use claims::{JwtAuthPayload, JwtSessionPayload, PayloadClaims, SessionScoped, Token};
pub use error::{AuthError, KeyResolutionError, TokenRejection};
pub use jwks::{Jwk, JwkSet, JwksResolver, JwksTokenValidator, RsaPublicKey};
pub use jwt::JwtValidator;
pub use verifier::TokenVerifier;
