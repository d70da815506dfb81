//! Telemetry & Logging
//!
//! Structured logging for the restoration engine.
//! Features:
//! - Configurable log levels via RUST_LOG
//! - Per-tick spans carrying session and tick number
//! - Transition and restoration outcome events
//! - Control-character escaping for user-controlled strings
//!
//! Everything goes to stderr; stdout is reserved for command output.

use tracing::{info, info_span, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Escape control characters in user-controlled strings before logging them.
///
/// Applied to snapshot paths, session ids and backup ids, so an embedded
/// newline cannot start a forged log line or audit record. Common whitespace escapes keep their short form (`\n`, `\t`),
/// anything else becomes `\u{..}`.
pub fn sanitize_for_log(s: &str) -> String {
    if !s.chars().any(char::is_control) {
        return s.to_string();
    }
    s.chars().fold(String::with_capacity(s.len() + 8), |mut out, c| {
        match c {
            '\n' | '\r' | '\t' => out.extend(c.escape_default()),
            c if c.is_control() => out.extend(c.escape_unicode()),
            c => out.push(c),
        }
        out
    })
}

/// Initialize global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects `info`, and the
/// default is `warn` so CLI output on stdout stays machine-readable.
pub fn init_tracing(verbose: bool) {
    match std::env::var("RUST_LOG") {
        Ok(filter) => init_tracing_with_filter(&filter),
        Err(_) if verbose => init_tracing_with_filter("info"),
        Err(_) => init_tracing_with_filter("warn"),
    }
}

/// Install the stderr subscriber once per process; later calls are no-ops.
///
/// An unparsable filter falls back to `warn`.
pub fn init_tracing_with_filter(filter: &str) {
    static INSTALLED: std::sync::OnceLock<()> = std::sync::OnceLock::new();

    INSTALLED.get_or_init(|| {
        let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
        let stderr_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr);

        // A subscriber installed by a test harness stays in place.
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init();
    });
}

/// Span for one tick of the change-detection loop
pub fn enter_tick(session_id: &str, tick: u64) -> tracing::span::Span {
    let safe_session = sanitize_for_log(session_id);
    info_span!("sync.tick", session = safe_session.as_str(), tick = tick)
}

/// Record a loop state transition
pub fn record_state_transition(from: &str, to: &str) {
    info!(from = from, to = to, "Sync loop state transition");
}

/// Record the outcome of a restoration
pub fn record_restoration(backup_id: &str, restored: usize, conflicts: usize, failed: usize) {
    let safe_id = sanitize_for_log(backup_id);
    if failed > 0 {
        warn!(
            backup_id = safe_id.as_str(),
            restored, conflicts, failed, "Restoration completed with failures"
        );
    } else {
        info!(
            backup_id = safe_id.as_str(),
            restored, conflicts, "Restoration completed"
        );
    }
}

/// Initialize tracing for tests with a simple subscriber
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
