//! Request/response body logging.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{to_bytes, Body, Bytes, HttpBody},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Local, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::config::RequestLogConfig;

use super::SessionLogContext;

/// Bodies that are not JSON are logged as `null`.
fn parse_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

/// Bodies are buffered only when their full length is known up front and
/// within `max_bytes`. Event streams never are.
fn capturable<B: HttpBody>(headers: &HeaderMap, body: &B, max_bytes: usize) -> bool {
    let event_stream = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));
    if event_stream {
        return false;
    }

    matches!(body.size_hint().upper(), Some(len) if len <= max_bytes as u64)
}

fn client_ip(req: &Request<Body>) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    let header_str = |name| req.headers().get(name).and_then(|v| v.to_str().ok());

    header_str("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .or_else(|| header_str("x-real-ip"))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn formatted_time(config: &RequestLogConfig) -> Option<String> {
    let format = config.time_format.as_deref()?;
    Some(if config.utc {
        Utc::now().format(format).to_string()
    } else {
        Local::now().format(format).to_string()
    })
}

/// Logs request and response bodies together with request metadata.
///
/// Paths listed in `skip_paths` pass through untouched. Bodies that cannot be
/// buffered within `max_body_bytes` are streamed through and logged as
/// `null`. Responses with a 5xx status are logged at ERROR, everything else
/// at INFO.
pub async fn request_log_middleware(
    State(config): State<Arc<RequestLogConfig>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if config.skip_paths.iter().any(|p| *p == path) {
        return next.run(req).await;
    }

    let start = Instant::now();
    let method = req.method().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();
    let ip = client_ip(&req);
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let session_id = req
        .extensions()
        .get::<SessionLogContext>()
        .map(|ctx| ctx.session_id.clone());

    let max_bytes = config.max_body_bytes;

    let (parts, body) = req.into_parts();
    let (request_body, req) = if capturable(&parts.headers, &body, max_bytes) {
        match to_bytes(body, max_bytes).await {
            Ok(bytes) => (
                parse_body(&bytes),
                Request::from_parts(parts, Body::from(bytes)),
            ),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to read request body");
                return StatusCode::BAD_REQUEST.into_response();
            }
        }
    } else {
        (Value::Null, Request::from_parts(parts, body))
    };

    let response = next.run(req).await;

    let (parts, body) = response.into_parts();
    let status = parts.status;
    let (response_body, response) = if capturable(&parts.headers, &body, max_bytes) {
        match to_bytes(body, max_bytes).await {
            Ok(bytes) => (
                parse_body(&bytes),
                Response::from_parts(parts, Body::from(bytes)),
            ),
            Err(e) => {
                tracing::error!(path = %path, error = %e, "Failed to read response body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    } else {
        (Value::Null, Response::from_parts(parts, body))
    };

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    let time = formatted_time(&config);
    let request_id = Uuid::new_v4();

    if status.is_server_error() {
        tracing::error!(
            request_id = %request_id,
            request_body = %request_body,
            response_body = %response_body,
            status = status.as_u16(),
            method = %method,
            path = %path,
            query = %query,
            ip = %ip,
            user_agent = %user_agent,
            latency_ms,
            time = time.as_deref(),
            session_id = session_id.as_deref(),
            "{}",
            path
        );
    } else {
        tracing::info!(
            request_id = %request_id,
            request_body = %request_body,
            response_body = %response_body,
            status = status.as_u16(),
            method = %method,
            path = %path,
            query = %query,
            ip = %ip,
            user_agent = %user_agent,
            latency_ms,
            time = time.as_deref(),
            session_id = session_id.as_deref(),
            "{}",
            path
        );
    }

    response
}
