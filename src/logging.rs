//! Logging and tracing initialization for prefetchd.
//!
//! Structured logging through the `tracing` ecosystem, either as pretty
//! console output or as JSON lines for log aggregation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

/// Initialize the tracing subscriber with the given configuration.
///
/// Call once, early in `main`, after config is loaded. `RUST_LOG`
/// overrides the default filter.
///
/// ```ignore
/// prefetchd::logging::init(LogConfig { verbose: true, ..Default::default() });
/// ```
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "prefetchd={},tower_http=info",
            default_level.as_str().to_lowercase()
        ))
    });

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}

/// A rate limiter for throttling log messages.
///
/// Used for download progress, which would otherwise log once per chunk.
///
/// ```ignore
/// let throttle = LogThrottle::new(Duration::from_millis(500));
/// while let Some(chunk) = response.chunk().await? {
///     if throttle.should_log() {
///         tracing::debug!(bytes = received, "Download progress");
///     }
/// }
/// ```
pub struct LogThrottle {
    interval_ms: u64,
    /// Last log time in ms since `start`, or NEVER_LOGGED
    last_log_ms: AtomicU64,
    start: Instant,
}

const NEVER_LOGGED: u64 = u64::MAX;

impl LogThrottle {
    /// Create a new throttle with the given minimum interval between logs.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            start: Instant::now(),
        }
    }

    /// Returns true if enough time has passed since the last log.
    pub fn should_log(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        let should = last == NEVER_LOGGED || now_ms.saturating_sub(last) >= self.interval_ms;

        if should {
            // Losing the race means another thread just logged
            self.last_log_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        } else {
            false
        }
    }
}
