//! Telemetry initialization.
//!
//! Controlled by `OPENSPRINT_LOG_FORMAT`:
//! - unset or `"off"` → no-op (tracing disabled, zero overhead)
//! - `"stderr"` → JSON spans/events to stderr
//!
//! Log formatting itself (field naming, redaction, etc.) is out of scope
//! per `SPEC_FULL.md` — this module only wires up the subscriber.

use tracing_subscriber::EnvFilter;

/// Opaque guard. Holding it keeps the subscriber installed; nothing to flush
/// without an exporter, but the type is kept so callers don't need to know
/// which mode was selected.
pub struct TelemetryGuard;

/// Initialize telemetry based on `OPENSPRINT_LOG_FORMAT`.
///
/// Returns a guard that should be held until the program exits.
#[must_use]
pub fn init() -> TelemetryGuard {
    match std::env::var("OPENSPRINT_LOG_FORMAT").as_deref() {
        Ok("stderr") => init_stderr(),
        _ => TelemetryGuard,
    }
}

/// JSON spans/events to stderr via tracing-subscriber's JSON formatter.
fn init_stderr() -> TelemetryGuard {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
        )
        .init();

    TelemetryGuard
}
