//! Interoperability - Call native functions named at runtime
//!
//! Design: Everything that can fail without running native code is checked
//! first; the call itself is trapped and its stack measured.
//!
//! Architecture:
//! - `types.rs` - Descriptors, payloads, call plans, raw results
//! - `descriptor.rs` - Type token mini-language
//! - `marshal.rs` - Host operands → call plan
//! - `abi.rs` - Calling conventions and the `CallFrame` capability
//! - `frame.rs` - Hand-built 32-bit x86 stack frames
//! - `ffi_frame.rs` - libffi frames for every other target
//! - `call.rs` - Drives a frame inside the fault trap
//! - `trap.rs` - Signal-based fault recovery
//! - `writeback.rs` - Raw result → host value, output parameters
//! - `library.rs` - Library cache and symbol resolution
//! - `status.rs` - Status channel and pre-call errors

mod types;
mod descriptor;
mod marshal;
mod abi;
#[cfg(any(target_arch = "x86", test))]
mod frame;
#[cfg(not(target_arch = "x86"))]
mod ffi_frame;
mod call;
mod trap;
mod writeback;
mod library;
mod status;

use core::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug_span;

use crate::logging::{
    log_fault, log_ffi_call, log_ffi_error, log_ffi_return, log_marshal_error,
    log_stack_imbalance,
};
use crate::value::Operand;

pub use types::{ArgDescriptor, ArgKind, CallPlan, InvocationResult, Payload, StringBuffer};
pub use descriptor::{
    parse as parse_descriptor, parse_return as parse_return_descriptor, DescriptorError,
};
pub use marshal::{marshal, MarshalError};
pub use abi::{CallFrame, Convention};
#[cfg(target_arch = "x86")]
pub use frame::StackFrame;
#[cfg(not(target_arch = "x86"))]
pub use ffi_frame::FfiFrame;
pub use call::FunctionCall;
pub use trap::{guarded, Guarded};
pub use writeback::finish;
pub use library::{
    FunctionRef, InvalidFunction, LoadError, Loader, LoaderConfig, ResolveError, SymbolError,
};
pub use status::{CallOutcome, DllCallError, Status};

static CALLS_MADE: AtomicUsize = AtomicUsize::new(0);
static MARSHALING_ERRORS: AtomicUsize = AtomicUsize::new(0);
static FAULTS: AtomicUsize = AtomicUsize::new(0);
static STACK_IMBALANCES: AtomicUsize = AtomicUsize::new(0);

/// Configure the process-wide loader before the first call
///
/// Returns false if a call already created it with the default config.
pub fn init(config: LoaderConfig) -> bool {
    Loader::install_global(config)
}

/// Call a native function through the process-wide loader
///
/// `operands` is `[function, type1, value1, ..., typeN, valueN, (return)]`.
/// Variables passed as `Str` or by address receive the callee's output.
pub fn dll_call(operands: &mut [Operand<'_>]) -> CallOutcome {
    dll_call_with(Loader::global(), operands)
}

/// Call a native function, resolving names through `loader`
pub fn dll_call_with(loader: &Loader, operands: &mut [Operand<'_>]) -> CallOutcome {
    let Some((function, params)) = operands.split_first_mut() else {
        return rejected("", DllCallError::MissingFunction, ArgKind::Int32);
    };
    let name = function.value().to_text();
    let _span = debug_span!("dll_call", function = %name).entered();

    let (pairs, ret) = marshal::split_return(params);
    let (return_descriptor, convention) = match ret.map(marshal::return_descriptor) {
        Some(Ok(parsed)) => parsed,
        Some(Err(err)) => return rejected(&name, err.into(), ArgKind::Int32),
        None => (ArgDescriptor::default_return(), Convention::StandardCall),
    };
    let return_kind = return_descriptor.kind;

    let target = match FunctionRef::from_value(function.value())
        .map_err(ResolveError::from)
        .and_then(|function| loader.resolve(&function))
    {
        Ok(target) => target,
        Err(err) => return rejected(&name, err.into(), return_kind),
    };

    let mut plan = CallPlan::new(convention, return_descriptor);
    if let Err(err) = marshal::marshal_args(pairs, &mut plan) {
        return rejected(&name, err.into(), return_kind);
    }

    log_ffi_call(&name, plan.args.len());
    CALLS_MADE.fetch_add(1, Ordering::Relaxed);
    let result = unsafe { FunctionCall::new(target.as_ptr()).invoke(&mut plan) };

    let (value, status) = finish(&result, &mut plan, params);
    match status {
        Status::CalleeFault(code) => {
            FAULTS.fetch_add(1, Ordering::Relaxed);
            log_fault(&name, code);
        }
        Status::StackImbalance(delta) => {
            STACK_IMBALANCES.fetch_add(1, Ordering::Relaxed);
            log_stack_imbalance(&name, delta);
        }
        _ => {}
    }
    log_ffi_return(&name, &status.to_string());

    CallOutcome { value, status }
}

/// Outcome for a call stopped before any native code ran
fn rejected(name: &str, err: DllCallError, return_kind: ArgKind) -> CallOutcome {
    match &err {
        DllCallError::Marshal(inner) => {
            MARSHALING_ERRORS.fetch_add(1, Ordering::Relaxed);
            log_marshal_error(name, &inner.to_string());
        }
        other => log_ffi_error(name, &other.to_string()),
    }
    CallOutcome::failed(&err, return_kind)
}

/// Get interop statistics
pub fn stats() -> InteropStats {
    InteropStats {
        calls_made: CALLS_MADE.load(Ordering::Relaxed),
        marshaling_errors: MARSHALING_ERRORS.load(Ordering::Relaxed),
        faults: FAULTS.load(Ordering::Relaxed),
        stack_imbalances: STACK_IMBALANCES.load(Ordering::Relaxed),
        libraries_loaded: Loader::global().loaded_count(),
    }
}

/// Interop statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteropStats {
    pub calls_made: usize,
    pub marshaling_errors: usize,
    pub faults: usize,
    pub stack_imbalances: usize,
    pub libraries_loaded: usize,
}
