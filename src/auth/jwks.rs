//! JWKS public key resolution.
//!
//! Keys are fetched from the identity provider over HTTP with a bounded
//! timeout and retried with exponential backoff on transient failures.
//! Resolved keys are cached per `(jwks_url, kid)`; unknown `kid`s are
//! remembered for a shorter period so a flood of bad tokens cannot turn into
//! a flood of fetches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::DecodingKey;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::JwksConfig;

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::jwt::{reject, token_prefix};
use super::{AuthError, JwtValidator, KeyResolutionError, TokenRejection};

/// Maximum number of resolved keys kept in memory
const KEY_CACHE_CAPACITY: u64 = 1_000;

/// Maximum number of remembered misses
const MISS_CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kty: String,
    #[serde(default)]
    pub kid: String,
    #[serde(rename = "use", default)]
    pub key_use: String,
    #[serde(default)]
    pub alg: String,
    #[serde(default)]
    pub n: String,
    #[serde(default)]
    pub e: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// First RSA key whose `kid` matches.
    pub fn find_rsa_key(&self, kid: &str) -> Result<RsaPublicKey, KeyResolutionError> {
        self.keys
            .iter()
            .find(|key| key.kid == kid && key.kty == "RSA")
            .ok_or_else(|| KeyResolutionError::KeyNotFound {
                kid: kid.to_string(),
            })
            .and_then(|key| RsaPublicKey::from_components(&key.n, &key.e))
    }
}

/// RSA public key as big-endian modulus and exponent bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

fn decode_component(name: &str, value: &str) -> Result<Vec<u8>, KeyResolutionError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| KeyResolutionError::Decode(format!("{name}: {e}")))?;

    // Leading zero bytes carry no value
    let first = bytes.iter().position(|b| *b != 0);
    match first {
        Some(start) => Ok(bytes[start..].to_vec()),
        None => Err(KeyResolutionError::Decode(format!("{name}: empty value"))),
    }
}

impl RsaPublicKey {
    /// Build from base64url-encoded `n` and `e` JWK members.
    pub fn from_components(n: &str, e: &str) -> Result<Self, KeyResolutionError> {
        let modulus = decode_component("n", n)?;
        let exponent = decode_component("e", e)?;

        if exponent.len() > 8 {
            return Err(KeyResolutionError::Decode(
                "e: exponent does not fit in 64 bits".to_string(),
            ));
        }

        Ok(Self { modulus, exponent })
    }

    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    pub fn exponent(&self) -> u64 {
        self.exponent
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_rsa_raw_components(&self.modulus, &self.exponent)
    }
}

type CacheKey = (String, String);

/// Fetches and caches JWKS public keys.
pub struct JwksResolver {
    client: reqwest::Client,
    keys: Cache<CacheKey, Arc<RsaPublicKey>>,
    misses: Cache<CacheKey, ()>,
    backoff: BackoffConfig,
    max_retries: u32,
    fetches: AtomicU64,
}

impl JwksResolver {
    pub fn new(config: &JwksConfig) -> Result<Self, KeyResolutionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KeyResolutionError::Fetch(e.to_string()))?;

        Ok(Self {
            client,
            keys: Cache::builder()
                .max_capacity(KEY_CACHE_CAPACITY)
                .time_to_live(config.cache_ttl)
                .build(),
            misses: Cache::builder()
                .max_capacity(MISS_CACHE_CAPACITY)
                .time_to_live(config.negative_ttl)
                .build(),
            backoff: BackoffConfig::default(),
            max_retries: config.max_retries,
            fetches: AtomicU64::new(0),
        })
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Resolve the RSA key identified by `kid` in the key set at `jwks_url`.
    pub async fn resolve_public_key(
        &self,
        jwks_url: &str,
        kid: &str,
    ) -> Result<Arc<RsaPublicKey>, KeyResolutionError> {
        let cache_key = (jwks_url.to_string(), kid.to_string());

        if self.misses.contains_key(&cache_key) {
            return Err(KeyResolutionError::KeyNotFound {
                kid: kid.to_string(),
            });
        }

        // Concurrent lookups of the same key share one fetch
        let result = self
            .keys
            .try_get_with(cache_key.clone(), async {
                let set = self.fetch_jwks(jwks_url).await?;
                self.cache_siblings(jwks_url, kid, &set).await;
                set.find_rsa_key(kid).map(Arc::new)
            })
            .await;

        match result {
            Ok(key) => Ok(key),
            Err(e) => {
                let err = KeyResolutionError::clone(&e);
                if matches!(err, KeyResolutionError::KeyNotFound { .. }) {
                    self.misses.insert(cache_key, ()).await;
                }
                Err(err)
            }
        }
    }

    /// Cache the other RSA keys of a freshly fetched set.
    async fn cache_siblings(&self, jwks_url: &str, kid: &str, set: &JwkSet) {
        for jwk in set.keys.iter().filter(|k| k.kty == "RSA" && k.kid != kid) {
            match RsaPublicKey::from_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    let cache_key = (jwks_url.to_string(), jwk.kid.clone());
                    // A kid published after an earlier miss must resolve now
                    self.misses.invalidate(&cache_key).await;
                    self.keys.insert(cache_key, Arc::new(key)).await;
                }
                Err(e) => {
                    tracing::debug!(kid = %jwk.kid, error = %e, "Skipping undecodable JWK");
                }
            }
        }
    }

    /// Fetch the key set, retrying transient failures.
    pub async fn fetch_jwks(&self, url: &str) -> Result<JwkSet, KeyResolutionError> {
        let mut backoff = ExponentialBackoff::with_config(self.backoff.clone());

        loop {
            match self.fetch_once(url).await {
                Ok(set) => {
                    tracing::debug!(url = %url, keys = set.keys.len(), "Fetched JWKS");
                    return Ok(set);
                }
                Err(e) if e.is_retryable() && backoff.attempt() < self.max_retries => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        url = %url,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "JWKS fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(url = %url, error = %e, "JWKS fetch failed");
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<JwkSet, KeyResolutionError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| KeyResolutionError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyResolutionError::HttpStatus(status.as_u16()));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| KeyResolutionError::InvalidDocument(e.to_string()))
    }

    /// Number of HTTP requests issued so far, retries included.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn invalidate_all(&self) {
        self.keys.invalidate_all();
        self.misses.invalidate_all();
    }
}

/// Validates RSA-signed tokens against keys from a JWKS endpoint.
#[derive(Clone)]
pub struct JwksTokenValidator {
    resolver: Arc<JwksResolver>,
    jwks_url: String,
}

impl JwksTokenValidator {
    pub fn new(resolver: Arc<JwksResolver>, jwks_url: impl Into<String>) -> Self {
        Self {
            resolver,
            jwks_url: jwks_url.into(),
        }
    }

    pub fn from_config(config: &JwksConfig) -> Result<Self, KeyResolutionError> {
        Ok(Self::new(Arc::new(JwksResolver::new(config)?), config.url.clone()))
    }

    pub fn resolver(&self) -> &Arc<JwksResolver> {
        &self.resolver
    }

    pub async fn validate<P: DeserializeOwned>(&self, token: &str) -> Result<P, AuthError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| reject(token, TokenRejection::Malformed))?;
        let kid = header
            .kid
            .ok_or_else(|| reject(token, TokenRejection::MissingKeyId))?;

        let key = self
            .resolver
            .resolve_public_key(&self.jwks_url, &kid)
            .await
            .map_err(|e| {
                tracing::warn!(
                    token_prefix = %token_prefix(token),
                    kid = %kid,
                    reason = %e,
                    "Token validation failed"
                );
                AuthError::KeyResolution(e)
            })?;

        JwtValidator::from_rsa_key(&key).validate(token)
    }
}
