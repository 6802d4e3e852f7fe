use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    /// `minutely`, `hourly` or `daily` (default).
    pub rolling: Option<String>,
    pub max_files: usize,
    pub thread_names: bool,
}

impl LoggerConfig {
    /// Reads DUPLEX_LOG_LEVEL, DUPLEX_LOG_DIR, DUPLEX_LOG_PREFIX and DUPLEX_LOG_ROLLING.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(level) = std::env::var("DUPLEX_LOG_LEVEL") {
            cfg.level = level;
        }
        cfg.file_dir = std::env::var("DUPLEX_LOG_DIR").ok();
        cfg.file_prefix = std::env::var("DUPLEX_LOG_PREFIX").ok();
        if let Ok(rolling) = std::env::var("DUPLEX_LOG_ROLLING") {
            cfg.rolling = Some(rolling);
        }
        cfg
    }

    pub fn level(&self) -> Level {
        Level::from_str(&self.level).unwrap_or(Level::INFO)
    }

    fn rotation(&self) -> Rotation {
        match self.rolling.as_deref() {
            Some("minutely") => Rotation::MINUTELY,
            Some("hourly") => Rotation::HOURLY,
            _ => Rotation::DAILY,
        }
    }

    /// Install the global fmt subscriber.
    ///
    /// A subscriber installed earlier (another component, a test harness)
    /// wins; this call then only reports where it would have logged.
    /// Keep the returned guard alive for as long as file logging is needed.
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let level = self.level();

        let Some(dir) = self.file_dir.as_deref() else {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_thread_names(self.thread_names)
                .try_init();
            tracing::info!("[Logger] logging to stdout at {level}");
            return Ok(None);
        };

        let prefix = self.file_prefix.as_deref().unwrap_or("duplexrt");
        let appender = RollingFileAppender::builder()
            .rotation(self.rotation())
            .max_log_files(self.max_files.max(1))
            .filename_prefix(prefix)
            .build(dir)
            .with_context(|| format!("failed to create rolling appender in {dir}"))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_thread_names(self.thread_names)
            .with_ansi(false)
            .with_writer(writer)
            .try_init();

        tracing::info!(
            "[Logger] logging to dir: {dir}, prefix: {prefix}, rotation: {:?}",
            self.rolling
        );
        Ok(Some(guard))
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: None,
            rolling: Some("daily".to_string()),
            max_files: 3,
            thread_names: true,
        }
    }
}

/// Rate limiter for a single log call site.
///
/// Messages inside `interval` are counted instead of emitted; the next
/// emitted message reports how many were suppressed.
///
/// ```ignore
/// warn_throttled!(Duration::from_secs(5), "[ControlBus] recv failed: {err}");
/// ```
pub struct Throttle {
    last: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
    interval: Duration,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            suppressed: AtomicU64::new(0),
            interval,
        }
    }

    /// `Some(suppressed)` when the caller should emit now.
    pub fn poll(&self) -> Option<u64> {
        let mut last = self.last.lock();
        match *last {
            Some(at) if at.elapsed() < self.interval => {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                None
            }
            _ => {
                *last = Some(Instant::now());
                Some(self.suppressed.swap(0, Ordering::Relaxed))
            }
        }
    }
}

#[macro_export]
macro_rules! log_throttled {
    ($level:ident, $interval:expr, $($arg:tt)*) => {{
        static _THROTTLE: std::sync::OnceLock<$crate::utils::logger::Throttle> =
            std::sync::OnceLock::new();
        let t = _THROTTLE.get_or_init(|| $crate::utils::logger::Throttle::new($interval));
        if let Some(_suppressed) = t.poll() {
            if _suppressed > 0 {
                tracing::$level!(suppressed = _suppressed, $($arg)*);
            } else {
                tracing::$level!($($arg)*);
            }
        }
    }};
}

#[macro_export]
macro_rules! error_throttled { ($interval:expr, $($arg:tt)*) => { $crate::log_throttled!(error, $interval, $($arg)*); } }
#[macro_export]
macro_rules! warn_throttled  { ($interval:expr, $($arg:tt)*) => { $crate::log_throttled!(warn,  $interval, $($arg)*); } }
#[macro_export]
macro_rules! debug_throttled { ($interval:expr, $($arg:tt)*) => { $crate::log_throttled!(debug, $interval, $($arg)*); } }
