//! Host values - the script engine's side of a native call
//!
//! Design: The host hands the engine a flat list of operands. Literals are
//! read-only; variables own storage and are the only targets for writeback.

use core::fmt;

use crate::interop::ArgKind;

/// A script-level value
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl HostValue {
    /// The empty value returned for `kind` when a call produces nothing usable
    pub fn empty_for(kind: ArgKind) -> Self {
        match kind {
            ArgKind::Str => Self::Str(String::new()),
            ArgKind::Float32 | ArgKind::Float64 => Self::Float(0.0),
            _ => Self::Int(0),
        }
    }

    /// True for the empty string
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Str(s) if s.is_empty())
    }

    /// Render as text, the way a variable's contents read back
    pub fn to_text(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
        }
    }

    /// Signed 64-bit integer view
    ///
    /// Floats truncate toward zero; text goes through [`parse_integer`].
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            Self::Str(s) => parse_integer(s).map(|v| v as i64),
        }
    }

    /// Unsigned 64-bit integer view
    ///
    /// Negative values wrap, and text may exceed `i64::MAX`.
    pub fn to_u64(&self) -> Option<u64> {
        match self {
            Self::Int(i) => Some(*i as u64),
            Self::Float(f) if *f < 0.0 => Some(*f as i64 as u64),
            Self::Float(f) => Some(*f as u64),
            Self::Str(s) => parse_integer(s).map(|v| v as u64),
        }
    }

    /// Double-precision view
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Str(s) => parse_float(s),
        }
    }
}

impl Default for HostValue {
    fn default() -> Self {
        Self::Str(String::new())
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

/// Parse integer text: optional sign, then decimal or `0x` hex digits.
///
/// Decimal text with a fraction or exponent truncates toward zero. Empty text
/// is zero. The result spans both `i64` and `u64` so callers can pick the
/// signed or unsigned reading.
pub fn parse_integer(text: &str) -> Option<i128> {
    let text = text.trim();
    if text.is_empty() {
        return Some(0);
    }

    let (negative, digits) = split_sign(text);
    if digits.is_empty() {
        return None;
    }

    let magnitude = if let Some(hex) = strip_hex_prefix(digits) {
        u64::from_str_radix(hex, 16).ok()? as i128
    } else if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse::<u64>().ok()? as i128
    } else {
        let value = parse_decimal_float(digits)?;
        if value >= 18_446_744_073_709_551_616.0 {
            return None;
        }
        value.trunc() as i128
    };

    Some(if negative { -magnitude } else { magnitude })
}

/// Parse floating-point text; hex integer text is accepted as well
pub fn parse_float(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return Some(0.0);
    }

    let (negative, digits) = split_sign(text);
    let magnitude = match strip_hex_prefix(digits) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()? as f64,
        None => parse_decimal_float(digits)?,
    };

    Some(if negative { -magnitude } else { magnitude })
}

fn split_sign(text: &str) -> (bool, &str) {
    match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    }
}

fn strip_hex_prefix(digits: &str) -> Option<&str> {
    digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .filter(|hex| !hex.is_empty())
}

/// Plain decimal notation only; `inf`, `nan` and friends are not numbers here
fn parse_decimal_float(digits: &str) -> Option<f64> {
    let plain = digits
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !plain || !digits.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<f64>().ok()
}

/// Named storage owned by the host
///
/// `capacity` is the size in bytes of the text buffer a callee may write into
/// when the variable is passed as a string; it never shrinks below the
/// current text plus its terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    value: HostValue,
    capacity: usize,
}

impl Variable {
    /// Create an empty variable
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, HostValue::default())
    }

    /// Create a variable holding `value`
    pub fn with_value(name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        let value = value.into();
        let capacity = text_len(&value) + 1;
        Self {
            name: name.into(),
            value,
            capacity,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &HostValue {
        &self.value
    }

    /// Buffer size in bytes, terminator included
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grow the text buffer to at least `bytes`; contents are kept
    pub fn set_capacity(&mut self, bytes: usize) {
        self.capacity = self.capacity.max(bytes);
    }

    /// Replace the contents
    pub fn assign(&mut self, value: impl Into<HostValue>) {
        self.value = value.into();
        self.capacity = self.capacity.max(text_len(&self.value) + 1);
    }
}

fn text_len(value: &HostValue) -> usize {
    match value {
        HostValue::Str(s) => s.len(),
        other => other.to_text().len(),
    }
}

/// One entry of the host's parameter list
#[derive(Debug)]
pub enum Operand<'v> {
    Literal(HostValue),
    Var(&'v mut Variable),
}

impl<'v> Operand<'v> {
    /// Current value, whether literal or variable
    pub fn value(&self) -> &HostValue {
        match self {
            Self::Literal(v) => v,
            Self::Var(var) => var.value(),
        }
    }

    /// The backing variable, if any
    pub fn variable(&self) -> Option<&Variable> {
        match self {
            Self::Var(var) => Some(&**var),
            Self::Literal(_) => None,
        }
    }

    pub fn variable_mut(&mut self) -> Option<&mut Variable> {
        match self {
            Self::Var(var) => Some(&mut **var),
            Self::Literal(_) => None,
        }
    }
}

impl From<&str> for Operand<'_> {
    fn from(s: &str) -> Self {
        Self::Literal(s.into())
    }
}

impl From<String> for Operand<'_> {
    fn from(s: String) -> Self {
        Self::Literal(s.into())
    }
}

impl From<i64> for Operand<'_> {
    fn from(i: i64) -> Self {
        Self::Literal(i.into())
    }
}

impl From<f64> for Operand<'_> {
    fn from(f: f64) -> Self {
        Self::Literal(f.into())
    }
}

impl From<HostValue> for Operand<'_> {
    fn from(v: HostValue) -> Self {
        Self::Literal(v)
    }
}

impl<'v> From<&'v mut Variable> for Operand<'v> {
    fn from(var: &'v mut Variable) -> Self {
        Self::Var(var)
    }
}
