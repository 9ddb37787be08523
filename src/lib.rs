//! dllcall - call native library functions named at runtime
//!
//! The call engine lives in `dllcall-runtime`; this crate adds file-based
//! configuration, subscriber setup, and the command-line front end.

pub mod cli;
pub mod config;
pub mod logging;

// Re-export commonly used items
pub use cli::{parse_args, Cli, CliConfig, CliOperand};
pub use config::{Config, ConfigError};
pub use dllcall_runtime::interop::{stats, InteropStats};
pub use dllcall_runtime::{
    dll_call, dll_call_with, CallOutcome, DllCallError, HostValue, Loader, LoaderConfig, Operand,
    Status, Variable,
};
pub use logging::{init_logging, LogConfig, LogFormat, LogOutput};

/// Entry point for CLI binary
pub fn cli_main() -> Result<i32, String> {
    let config = parse_args(std::env::args().skip(1))?;
    Cli::new(config).run()
}
