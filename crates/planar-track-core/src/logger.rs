//! Process-wide log sinks for binaries and tests.
//!
//! [`init_stderr_logger`] installs a `log` backend that writes one line per
//! record to stderr. Records from the `planar_track*` crates pass at the
//! requested level; everything else (HTTP stack, image decoders) is held
//! at `warn` unless the requested level is stricter.
//!
//! With the `tracing` feature, [`init_tracing`] installs a
//! `tracing-subscriber` formatter instead, which also picks up `log` records.

use std::io::Write;
use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, fmt::format::FmtSpan, util::SubscriberInitExt, EnvFilter};

const OWN_PREFIX: &str = "planar_track";

struct StderrLogger {
    own: LevelFilter,
    foreign: LevelFilter,
}

impl StderrLogger {
    fn new(level: LevelFilter) -> Self {
        Self {
            own: level,
            foreign: level.min(LevelFilter::Warn),
        }
    }

    fn limit_for(&self, target: &str) -> LevelFilter {
        if target.starts_with(OWN_PREFIX) {
            self.own
        } else {
            self.foreign
        }
    }
}

/// `planar_track::tracker::pipeline` -> `tracker::pipeline`.
fn short_target(target: &str) -> &str {
    match target.split_once("::") {
        Some((krate, rest)) if krate.starts_with(OWN_PREFIX) => rest,
        _ => target,
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "E",
        Level::Warn => "W",
        Level::Info => "I",
        Level::Debug => "D",
        Level::Trace => "T",
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.limit_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {}: {}\n",
            level_tag(record.level()),
            short_target(record.target()),
            record.args()
        );
        // A single write keeps lines from the worker thread intact.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger. Only the first call has an effect; later calls
/// return `Ok(())` and keep the original level.
pub fn init_stderr_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| StderrLogger::new(level));
    log::set_logger(logger)?;
    log::set_max_level(logger.own.max(logger.foreign));
    Ok(())
}

/// Output shape of [`init_tracing`].
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceFormat {
    /// Human readable, with uptime timestamps.
    #[default]
    Compact,
    /// One flattened JSON object per event.
    Json,
}

/// Install a `tracing` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"planar_track=debug,info"`). Span close events
/// are emitted so per-frame timings show up.
#[cfg(feature = "tracing")]
pub fn init_tracing(format: TraceFormat, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let _ = match format {
        TraceFormat::Json => builder.json().flatten_event(true).finish().try_init(),
        TraceFormat::Compact => builder
            .compact()
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_targets_are_capped_at_warn() {
        let l = StderrLogger::new(LevelFilter::Debug);
        assert_eq!(l.limit_for("planar_track::tracker::pipeline"), LevelFilter::Debug);
        assert_eq!(l.limit_for("planar_track_features::ransac"), LevelFilter::Debug);
        assert_eq!(l.limit_for("reqwest::connect"), LevelFilter::Warn);

        let quiet = StderrLogger::new(LevelFilter::Error);
        assert_eq!(quiet.limit_for("hyper"), LevelFilter::Error);
    }

    #[test]
    fn own_crate_prefix_is_trimmed() {
        assert_eq!(short_target("planar_track::session"), "session");
        assert_eq!(short_target("planar_track_core::logger"), "logger");
        assert_eq!(short_target("reqwest::blocking"), "reqwest::blocking");
        assert_eq!(short_target("planar_track"), "planar_track");
    }
}
