//! Logging setup for the dllcall front end
//!
//! Builds one `tracing` subscriber from a [`LogConfig`]: pretty, compact or
//! JSON lines, written to stdout, stderr, or a daily-rotated file. Output goes
//! through a non-blocking writer; keep the returned guard alive until exit so
//! buffered lines are flushed.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format with timestamps
    Pretty,
    /// Compact format for production
    #[default]
    Compact,
    /// JSON format for structured logging
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
    /// File with rotation (daily)
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: LogFormat,
    /// Output destination
    pub output: LogOutput,
    /// Whether to include span events
    pub span_events: bool,
    /// Custom filter directives (e.g., "dllcall_runtime=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Initialize the global logging system
///
/// Returns a `WorkerGuard` that must be kept alive for the duration of the
/// program to ensure all logs are flushed. Returns `None` when a subscriber
/// was already installed.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let filter = build_filter(&config);

    let (layer, guard) = match &config.output {
        LogOutput::Stdout => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            (format_layer(writer, &config), guard)
        }
        LogOutput::Stderr => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (format_layer(writer, &config), guard)
        }
        LogOutput::File { directory, prefix } => {
            let file_appender = rolling::daily(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            (format_layer(writer, &config), guard)
        }
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .ok()
        .map(|()| guard)
}

fn format_layer<W>(writer: W, config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let spans = span_events_config(config.span_events);
    match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .pretty()
            .with_span_events(spans)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(writer)
            .compact()
            .with_span_events(spans)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .with_span_events(spans)
            .boxed(),
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    match &config.filter {
        Some(filter_str) => filter_str
            .split(',')
            .filter(|directive| !directive.trim().is_empty())
            .fold(base_filter, |filter, directive| {
                filter.add_directive(directive.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!("Invalid filter directive: {}", directive);
                    config.level.into()
                }))
            }),
        None => base_filter,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Level from its name, case-insensitive
pub fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse().ok()
}

/// Initialize logging with defaults for development
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: true,
        filter: Some("dllcall=debug,dllcall_runtime=trace".to_string()),
    })
}

/// Initialize logging with defaults for unattended runs
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::INFO,
        format: LogFormat::Json,
        output: LogOutput::File {
            directory: log_dir.as_ref().to_string_lossy().to_string(),
            prefix: "dllcall".to_string(),
        },
        span_events: false,
        filter: None,
    })
}
