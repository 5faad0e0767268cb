//! Process-wide structured logging.
//!
//! This module provides:
//! - A `tracing` subscriber writing JSON (default) or human-readable lines
//! - Optional OTLP export for distributed tracing
//! - Session-scoped spans so log lines inside an authenticated request carry
//!   the caller's `session_id`
//!
//! # Configuration keys
//!
//! | Key | Description | Default |
//! |-----|-------------|---------|
//! | `log.level` | Filter used when `RUST_LOG` is unset | `info` |
//! | `log.format` | `json` or `pretty` | `json` |
//! | `otel.enabled` | Enable OpenTelemetry export | `false` |
//! | `otel.endpoint` | OTLP gRPC endpoint | `http://localhost:4317` |
//! | `otel.sampling_ratio` | Trace sampling ratio (0.0-1.0) | `1.0` |

use axum::http::Extensions;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::server::SessionLogContext;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter: {0}")]
    ExporterBuild(String),
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Keeps the OpenTelemetry provider alive; flushes it on drop.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            tracing::info!("Shutting down OpenTelemetry tracer provider");
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "OpenTelemetry shutdown failed");
            }
        }
    }
}

/// Install the global subscriber. Call once at process start and hold the
/// returned guard until shutdown.
pub fn init_logging(config: &LoggingConfig) -> TelemetryResult<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let provider = if config.otel.enabled {
        Some(init_otel_tracer(config)?)
    } else {
        None
    };
    let otel_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(config.service_name.clone()))
    });

    let json = config.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| {
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
        }))
        .with((!json).then(|| fmt::layer()))
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    tracing::info!(
        service_name = %config.service_name,
        format = ?config.format,
        otel_enabled = config.otel.enabled,
        "Logging initialized"
    );

    Ok(TelemetryGuard { provider })
}

fn init_otel_tracer(config: &LoggingConfig) -> TelemetryResult<SdkTracerProvider> {
    use opentelemetry::KeyValue;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel.endpoint)
        .build()
        .map_err(|e| TelemetryError::ExporterBuild(e.to_string()))?;

    let sampler = sampler_for(config.otel.sampling_ratio);

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                config.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        ]))
        .build();

    tracing::debug!(endpoint = %config.otel.endpoint, "OTLP exporter configured");

    Ok(provider)
}

fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Span carrying the session id of the authenticated caller, if any.
///
/// Events recorded while the span is entered get `session_id` attached.
pub fn session_span(extensions: &Extensions) -> Span {
    match extensions.get::<SessionLogContext>() {
        Some(ctx) => tracing::info_span!("session", session_id = %ctx.session_id),
        None => Span::none(),
    }
}
