//! Status channel and pre-call errors

use core::fmt;

use super::library::{LoadError, ResolveError, SymbolError};
use super::marshal::MarshalError;
use super::types::ArgKind;
use crate::value::HostValue;

/// Outcome code reported next to every returned value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Success,
    /// Missing or malformed function reference
    InvalidInvocation,
    /// Bad type token or argument value
    InvalidDescriptor,
    LibraryLoadFailure,
    SymbolResolutionFailure,
    /// Bytes pushed minus bytes a standard-call callee popped
    StackImbalance(i32),
    /// Platform fault code raised inside the callee
    CalleeFault(u32),
}

impl Status {
    #[inline]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Post-call status for a raw result
    ///
    /// An imbalance is reported ahead of a fault since a wrong argument count
    /// is usually what made the callee fault.
    pub fn after_call(stack_delta: i32, fault_code: u32) -> Self {
        if stack_delta != 0 {
            Self::StackImbalance(stack_delta)
        } else if fault_code != 0 {
            Self::CalleeFault(fault_code)
        } else {
            Self::Success
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("0"),
            Self::InvalidInvocation => f.write_str("-1"),
            Self::InvalidDescriptor => f.write_str("-2"),
            Self::LibraryLoadFailure => f.write_str("-3"),
            Self::SymbolResolutionFailure => f.write_str("-4"),
            Self::StackImbalance(delta) => write!(f, "A{}", delta),
            Self::CalleeFault(code) => write!(f, "0x{:X}", code),
        }
    }
}

/// Errors that stop a call before any native code runs
#[derive(Debug)]
pub enum DllCallError {
    /// No function operand at all
    MissingFunction,
    /// Function operand that can't name a function
    InvalidFunction(String),
    Marshal(MarshalError),
    Load(LoadError),
    Symbol(SymbolError),
}

impl DllCallError {
    /// Status reported for this error
    pub fn status(&self) -> Status {
        match self {
            Self::MissingFunction | Self::InvalidFunction(_) => Status::InvalidInvocation,
            Self::Marshal(_) => Status::InvalidDescriptor,
            Self::Load(_) => Status::LibraryLoadFailure,
            Self::Symbol(_) => Status::SymbolResolutionFailure,
        }
    }
}

impl fmt::Display for DllCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFunction => write!(f, "No function given"),
            Self::InvalidFunction(text) => write!(f, "Invalid function reference: '{}'", text),
            Self::Marshal(err) => write!(f, "Marshaling failed: {}", err),
            Self::Load(err) => write!(f, "{}", err),
            Self::Symbol(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DllCallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Marshal(err) => Some(err),
            Self::Load(err) => Some(err),
            Self::Symbol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MarshalError> for DllCallError {
    fn from(err: MarshalError) -> Self {
        Self::Marshal(err)
    }
}

impl From<LoadError> for DllCallError {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

impl From<SymbolError> for DllCallError {
    fn from(err: SymbolError) -> Self {
        Self::Symbol(err)
    }
}

impl From<ResolveError> for DllCallError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Invalid(invalid) => Self::InvalidFunction(invalid.0),
            ResolveError::Load(err) => Self::Load(err),
            ResolveError::Symbol(err) => Self::Symbol(err),
        }
    }
}

/// What the host gets back from one call
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub value: HostValue,
    pub status: Status,
}

impl CallOutcome {
    /// Empty value of the declared return kind plus the error's status
    pub fn failed(err: &DllCallError, return_kind: ArgKind) -> Self {
        Self {
            value: HostValue::empty_for(return_kind),
            status: err.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(Status::Success.to_string(), "0");
        assert_eq!(Status::InvalidInvocation.to_string(), "-1");
        assert_eq!(Status::InvalidDescriptor.to_string(), "-2");
        assert_eq!(Status::LibraryLoadFailure.to_string(), "-3");
        assert_eq!(Status::SymbolResolutionFailure.to_string(), "-4");
        assert_eq!(Status::StackImbalance(4).to_string(), "A4");
        assert_eq!(Status::StackImbalance(-8).to_string(), "A-8");
        assert_eq!(Status::CalleeFault(0xC0000005).to_string(), "0xC0000005");
        assert_eq!(Status::CalleeFault(11).to_string(), "0xB");
    }

    #[test]
    fn test_imbalance_outranks_fault() {
        assert_eq!(Status::after_call(0, 0), Status::Success);
        assert_eq!(Status::after_call(0, 11), Status::CalleeFault(11));
        assert_eq!(Status::after_call(-4, 11), Status::StackImbalance(-4));
        assert_eq!(Status::after_call(4, 0), Status::StackImbalance(4));
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(DllCallError::MissingFunction.status(), Status::InvalidInvocation);
        assert_eq!(
            DllCallError::from(MarshalError::MissingValue { index: 0 }).status(),
            Status::InvalidDescriptor
        );
        let outcome = CallOutcome::failed(&DllCallError::InvalidFunction("".into()), ArgKind::Int32);
        assert_eq!(outcome.value, HostValue::Int(0));
        assert_eq!(outcome.status, Status::InvalidInvocation);

        let outcome = CallOutcome::failed(&DllCallError::MissingFunction, ArgKind::Str);
        assert_eq!(outcome.value, HostValue::Str(String::new()));
    }
}
