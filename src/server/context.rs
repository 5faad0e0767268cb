//! Values the middleware chain attaches to request extensions.

use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode};

/// Decoded claim payload of an authorized request (`x-claim-payload`).
#[derive(Debug, Clone)]
pub struct ClaimPayload<P>(pub P);

/// Raw bearer token of an authorized request (`x-token`).
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Session identity used to tag log lines (`x-claim-payload-log`).
#[derive(Debug, Clone)]
pub struct SessionLogContext {
    pub session_id: String,
}

impl<S, P> FromRequestParts<S> for ClaimPayload<P>
where
    S: Send + Sync,
    P: Clone + Send + Sync + 'static,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ClaimPayload<P>>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<BearerToken>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}
