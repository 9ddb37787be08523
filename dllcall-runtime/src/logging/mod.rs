//! Logging infrastructure - structured tracing throughout the runtime
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled
//! - A `dll_call` span around every call

use once_cell::sync::OnceCell;
use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // DLLCALL_LOG_LEVEL: trace, debug, info, warn, error
        if let Some(level) = var("DLLCALL_LOG_LEVEL") {
            config.level = parse_level(&level).unwrap_or(Level::INFO);
        }

        // DLLCALL_LOG_JSON: enable JSON format
        config.json_format = var("DLLCALL_LOG_JSON").is_some();

        // DLLCALL_LOG_SPANS: show span events
        config.show_spans = var("DLLCALL_LOG_SPANS").is_some();

        config
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            json_format: false,
            show_spans: true,
        }
    }
}

/// Level from its lowercase or uppercase name
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber; a subscriber installed by the
/// embedding application is left alone.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "dllcall_runtime={}",
                config.level.as_str().to_lowercase()
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = if config.json_format {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(io::stderr)
                        .with_span_events(span_events),
                )
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_span_events(span_events)
                        .with_target(true)
                        .with_thread_ids(cfg!(debug_assertions))
                        .with_line_number(cfg!(debug_assertions)),
                )
                .try_init()
        };
        // Already installed elsewhere
        let _ = result;
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Runtime-specific logging functions
// ============================================================================

/// Log native function call
pub fn log_ffi_call(fn_name: &str, arg_count: usize) {
    use tracing::debug;
    debug!(
        event = "ffi_call",
        function = fn_name,
        args = arg_count,
        "Native function called"
    );
}

/// Log native function return
pub fn log_ffi_return(fn_name: &str, status: &str) {
    use tracing::trace;
    trace!(
        event = "ffi_return",
        function = fn_name,
        status = status,
        "Native function returned"
    );
}

/// Log a call rejected before reaching native code
pub fn log_ffi_error(fn_name: &str, error: &str) {
    use tracing::warn;
    warn!(
        event = "ffi_error",
        function = fn_name,
        error = error,
        "Native call rejected"
    );
}

/// Log marshaling failure
pub fn log_marshal_error(fn_name: &str, error: &str) {
    use tracing::warn;
    warn!(
        event = "marshal_error",
        function = fn_name,
        error = error,
        "Argument marshaling failed"
    );
}

/// Log type conversion
pub fn log_type_conversion(from_type: &str, to_type: &str) {
    use tracing::trace;
    trace!(
        event = "type_conversion",
        from = from_type,
        to = to_type,
        "Type conversion performed"
    );
}

/// Log library load attempt
pub fn log_library_load(name: &str, loaded: bool) {
    use tracing::{debug, warn};
    if loaded {
        debug!(event = "library_load", library = name, "Library loaded");
    } else {
        warn!(event = "library_load", library = name, "Library failed to load");
    }
}

/// Log a fault trapped inside a callee
pub fn log_fault(fn_name: &str, code: u32) {
    use tracing::error;
    let code = format!("0x{:X}", code);
    error!(
        event = "callee_fault",
        function = fn_name,
        code = %code,
        "Native function faulted"
    );
}

/// Log a standard-call stack mismatch
pub fn log_stack_imbalance(fn_name: &str, delta: i32) {
    use tracing::warn;
    warn!(
        event = "stack_imbalance",
        function = fn_name,
        delta_bytes = delta,
        "Declared arguments do not match the callee"
    );
}

/// Log fault handler installation
pub fn log_trap_installed(signal_count: usize) {
    use tracing::debug;
    debug!(
        event = "trap_installed",
        signals = signal_count,
        "Fault handlers installed"
    );
}
