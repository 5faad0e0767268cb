mod context;
mod middleware;
mod request_log;

pub use context::{BearerToken, ClaimPayload, SessionLogContext};
pub use middleware::{
    auth_middleware, client_middleware, extract_bearer_token, Gatekeeper, CLIENT_KEY_HEADER,
    CLIENT_SECRET_HEADER,
};
pub use request_log::request_log_middleware;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, Router};
use serde::de::DeserializeOwned;

use crate::auth::SessionScoped;
use crate::config::{ClientAuthConfig, RequestLogConfig};

/// Wrap `router` with token authentication followed by request logging.
///
/// The gatekeeper runs first, so rejected requests never reach the logger
/// and logged requests carry the caller's session id.
pub fn with_auth_and_logging<S, P>(
    router: Router<S>,
    gatekeeper: Arc<Gatekeeper<P>>,
    request_log: Arc<RequestLogConfig>,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    P: DeserializeOwned + SessionScoped + Clone + Send + Sync + 'static,
{
    router
        .layer(from_fn_with_state(request_log, request_log_middleware))
        .layer(from_fn_with_state(gatekeeper, auth_middleware::<P>))
}

/// Wrap `router` with the static client key/secret check.
pub fn with_client_auth<S>(router: Router<S>, client: Arc<ClientAuthConfig>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(from_fn_with_state(client, client_middleware))
}
