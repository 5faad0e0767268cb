use std::marker::PhantomData;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use serde::de::DeserializeOwned;
use subtle::ConstantTimeEq;
use tracing::Instrument;

use crate::auth::{JwtAuthPayload, SessionScoped, TokenVerifier};
use crate::config::{ClientAuthConfig, ConfigProvider};
use crate::error::Result;
use crate::telemetry::session_span;

use super::{BearerToken, ClaimPayload, SessionLogContext};

pub const CLIENT_KEY_HEADER: &str = "X-Auth-Key";
pub const CLIENT_SECRET_HEADER: &str = "X-Auth-Secret";

/// Bearer token gate. `P` is the payload shape carried in the token.
pub struct Gatekeeper<P = JwtAuthPayload> {
    verifier: TokenVerifier,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Gatekeeper<P> {
    pub fn new(verifier: impl Into<TokenVerifier>) -> Self {
        Self {
            verifier: verifier.into(),
            _payload: PhantomData,
        }
    }

    pub fn from_provider(provider: &ConfigProvider) -> Result<Self> {
        Ok(Self::new(TokenVerifier::from_provider(provider)?))
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Bearer token authentication middleware.
///
/// Rejects with 401 when the token is absent or fails validation. On success
/// the payload, raw token and session context are attached to the request
/// and the rest of the chain runs inside the caller's session span.
pub async fn auth_middleware<P>(
    State(gate): State<Arc<Gatekeeper<P>>>,
    mut req: Request<Body>,
    next: Next,
) -> std::result::Result<Response, StatusCode>
where
    P: DeserializeOwned + SessionScoped + Clone + Send + Sync + 'static,
{
    let Some(token) = extract_bearer_token(req.headers()).map(str::to_owned) else {
        tracing::warn!(path = %req.uri().path(), "Missing bearer token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let payload: P = gate
        .verifier
        .verify(&token)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let extensions = req.extensions_mut();
    if let Some(session_id) = payload.session_id() {
        extensions.insert(SessionLogContext {
            session_id: session_id.to_string(),
        });
    }
    extensions.insert(ClaimPayload(payload));
    extensions.insert(BearerToken(token));

    let span = session_span(req.extensions());
    Ok(next.run(req).instrument(span).await)
}

/// Static client key/secret middleware.
///
/// Validates `X-Auth-Key` and `X-Auth-Secret` against the configured pair;
/// both must match exactly.
pub async fn client_middleware(
    State(client): State<Arc<ClientAuthConfig>>,
    req: Request<Body>,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    if client.key.trim().is_empty() {
        tracing::error!("Client auth key is not configured");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    if client.secret.trim().is_empty() {
        tracing::error!("Client auth secret is not configured");
        return Err(StatusCode::UNAUTHORIZED);
    }

    // Header borrows must end before the request moves into `next`
    {
        let headers = req.headers();
        let header_value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let (Some(key), Some(secret)) = (
            header_value(CLIENT_KEY_HEADER),
            header_value(CLIENT_SECRET_HEADER),
        ) else {
            tracing::warn!("Missing client credential headers");
            return Err(StatusCode::UNAUTHORIZED);
        };

        if !client_credentials_match(&client, key, secret) {
            tracing::warn!("Invalid client credentials provided");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    Ok(next.run(req).await)
}

/// Constant-time comparison of both values; neither check short-circuits.
fn client_credentials_match(client: &ClientAuthConfig, key: &str, secret: &str) -> bool {
    let key_ok = key.as_bytes().ct_eq(client.key.as_bytes());
    let secret_ok = secret.as_bytes().ct_eq(client.secret.as_bytes());
    (key_ok & secret_ok).into()
}
