//! DllCall Runtime - invoke native functions named at runtime
//!
//! This crate builds native call frames from a host engine's typed operand
//! list, calls the function with faults trapped, and writes results back into
//! host variables.

pub mod interop;
pub mod logging;
pub mod value;

// Re-export core types
pub use interop::{dll_call, dll_call_with, CallOutcome, DllCallError, Loader, LoaderConfig, Status};
pub use value::{HostValue, Operand, Variable};

/// Runtime initialization
///
/// Sets up logging from the environment and configures the process-wide
/// loader. Returns false if the loader was already in use.
pub fn init(loader: LoaderConfig) -> bool {
    logging::init();
    interop::init(loader)
}
