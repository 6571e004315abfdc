//! Tracing subscriber initialization.
//!
//! Installs a structured `fmt` subscriber with a router-appropriate default
//! filter, optionally bridged to OpenTelemetry through a stdout exporter.
//! Span and field naming follows the conventions in [`crate::route_attrs`].

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Filter used when `RUST_LOG` is unset: routing and budget decisions at
/// debug, everything else at info, sqlx statement logging suppressed.
const DEFAULT_DIRECTIVES: &str = "info,tollgate_core=debug,sqlx=warn";

/// Kept for shutdown; only set when the OTel bridge is enabled.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter directives. With `enable_otel`
/// set, spans are additionally exported through an OpenTelemetry stdout
/// exporter under the `tollgate` tracer (swap the exporter for OTLP in
/// production).
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(enable_otel: bool) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    let otel_layer = enable_otel.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("tollgate");
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
}

/// Flush pending spans and shut down the OTel provider.
///
/// Safe to call when OTel was never enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(error) = provider.shutdown()
    {
        eprintln!("otel shutdown error: {error}");
    }
}
