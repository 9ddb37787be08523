//! Argument marshaling - host operands to call plans
//!
//! Design: Every conversion happens up front. A single bad token or value
//! aborts the whole plan before anything native is touched.

use core::fmt;

use super::abi::Convention;
use super::descriptor::{self, DescriptorError};
use super::types::{ArgDescriptor, ArgKind, CallPlan, StringBuffer};
use crate::logging::log_type_conversion;
use crate::value::{HostValue, Operand};

/// Build a complete plan from the host list minus its function operand
///
/// An odd-length list ends with a return type token; an even-length one
/// declares a plain `Int` return.
pub fn marshal(params: &[Operand<'_>]) -> Result<CallPlan, MarshalError> {
    let (pairs, ret) = split_return(params);
    let (return_descriptor, convention) = match ret {
        Some(op) => return_descriptor(op)?,
        None => (ArgDescriptor::default_return(), Convention::StandardCall),
    };

    let mut plan = CallPlan::new(convention, return_descriptor);
    marshal_args(pairs, &mut plan)?;
    Ok(plan)
}

/// Separate `(type, value)` pairs from the trailing return token, if any
pub fn split_return<'a, 'v>(
    params: &'a [Operand<'v>],
) -> (&'a [Operand<'v>], Option<&'a Operand<'v>>) {
    match params.split_last() {
        Some((ret, pairs)) if params.len() % 2 == 1 => (pairs, Some(ret)),
        _ => (params, None),
    }
}

/// Resolve the return type operand
pub fn return_descriptor(op: &Operand<'_>) -> Result<(ArgDescriptor, Convention), MarshalError> {
    let result = match op {
        Operand::Literal(value) => descriptor::parse_return(&value.to_text()),
        Operand::Var(var) => descriptor::parse_return_var(&var.value().to_text(), var.name()),
    };
    result.map_err(|source| MarshalError::InvalidReturnType { source })
}

/// Append one descriptor per `(type, value)` pair to `plan`
pub fn marshal_args(pairs: &[Operand<'_>], plan: &mut CallPlan) -> Result<(), MarshalError> {
    for (index, pair) in pairs.chunks(2).enumerate() {
        let [type_op, value_op] = pair else {
            return Err(MarshalError::MissingValue { index });
        };

        let mut desc = descriptor::parse(&type_op.value().to_text())
            .map_err(|source| MarshalError::InvalidType { index, source })?;

        let buffer = fill_payload(&mut desc, value_op).map_err(|kind| kind.at(index))?;
        plan.push(desc, buffer);
    }
    Ok(())
}

/// Convert one value into `desc`'s payload
///
/// Strings come back as owned storage; the plan points the payload at it.
fn fill_payload(
    desc: &mut ArgDescriptor,
    op: &Operand<'_>,
) -> Result<Option<StringBuffer>, ValueError> {
    let value = op.value();
    log_type_conversion(value_type_name(value), desc.kind.name());

    match desc.kind {
        ArgKind::Str => string_buffer(op).map(Some),
        ArgKind::Int8 | ArgKind::Int16 | ArgKind::Int32 | ArgKind::Int64 => {
            let int = if desc.is_unsigned {
                value.to_u64().map(|v| v as i64)
            } else {
                value.to_i64()
            };
            let int = int.ok_or_else(|| ValueError::Malformed(value.to_text()))?;
            desc.store_integer(int);
            Ok(None)
        }
        ArgKind::Float32 | ArgKind::Float64 => {
            let float = value
                .to_f64()
                .ok_or_else(|| ValueError::Malformed(value.to_text()))?;
            desc.store_float(float);
            Ok(None)
        }
    }
}

/// Private storage for a string argument
///
/// Literals must already be text; a number here would otherwise hand the
/// callee a temporary rendering it has no business writing into. Variables
/// always qualify and get their full capacity.
fn string_buffer(op: &Operand<'_>) -> Result<StringBuffer, ValueError> {
    match op {
        Operand::Literal(HostValue::Str(text)) => Ok(StringBuffer::with_text(text, 0)),
        Operand::Literal(_) => Err(ValueError::NotAString),
        Operand::Var(var) => Ok(StringBuffer::with_text(
            &var.value().to_text(),
            var.capacity(),
        )),
    }
}

fn value_type_name(value: &HostValue) -> &'static str {
    match value {
        HostValue::Str(_) => "str",
        HostValue::Int(_) => "int",
        HostValue::Float(_) => "float",
    }
}

enum ValueError {
    NotAString,
    Malformed(String),
}

impl ValueError {
    fn at(self, index: usize) -> MarshalError {
        match self {
            Self::NotAString => MarshalError::NotAString { index },
            Self::Malformed(text) => MarshalError::MalformedNumber { index, text },
        }
    }
}

/// Marshaling failures; all of them surface as status `-2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    InvalidReturnType { source: DescriptorError },
    InvalidType { index: usize, source: DescriptorError },
    MissingValue { index: usize },
    NotAString { index: usize },
    MalformedNumber { index: usize, text: String },
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidReturnType { source } => write!(f, "return type: {}", source),
            Self::InvalidType { index, source } => write!(f, "argument {}: {}", index + 1, source),
            Self::MissingValue { index } => write!(f, "argument {}: missing value", index + 1),
            Self::NotAString { index } => {
                write!(f, "argument {}: Str requires a string or variable", index + 1)
            }
            Self::MalformedNumber { index, text } => {
                write!(f, "argument {}: '{}' is not a number", index + 1, text)
            }
        }
    }
}

impl std::error::Error for MarshalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidReturnType { source } | Self::InvalidType { source, .. } => Some(source),
            _ => None,
        }
    }
}
