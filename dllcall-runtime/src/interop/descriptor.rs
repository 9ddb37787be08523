//! Type token parsing
//!
//! Grammar: `[U]<TypeName>[ ][*|p|P]`, case-insensitive, where an empty type
//! name means `Int`. Return tokens may start with `CDecl`.

use core::fmt;

use super::abi::Convention;
use super::types::{ArgDescriptor, ArgKind};

/// Parse an argument type token
pub fn parse(token: &str) -> Result<ArgDescriptor, DescriptorError> {
    let mut rest = token.trim();
    let mut is_unsigned = false;
    let mut by_address = false;

    if let Some(stripped) = rest.strip_prefix(&['U', 'u'][..]) {
        is_unsigned = true;
        rest = stripped;
    }

    if let Some(stripped) = rest.strip_suffix(&['*', 'p', 'P'][..]) {
        by_address = true;
        rest = stripped.trim_end();
    }

    let kind = kind_from_name(rest).ok_or_else(|| DescriptorError::new(token))?;

    Ok(ArgDescriptor {
        kind,
        is_unsigned,
        by_address,
        ..ArgDescriptor::new(kind)
    })
}

/// Parse a return type token, including the optional `CDecl` word
pub fn parse_return(token: &str) -> Result<(ArgDescriptor, Convention), DescriptorError> {
    let trimmed = token.trim_start();
    let (convention, rest) = match strip_word(trimmed, "CDecl") {
        Some(rest) => (Convention::CCall, rest),
        None => (Convention::StandardCall, trimmed),
    };

    let desc = parse(rest).map_err(|_| DescriptorError::new(token))?;
    Ok((desc, convention))
}

/// Resolve a return type held by a variable
///
/// A variable whose contents are not a type token is taken at its name, so a
/// variable literally called `Int64` still declares an `Int64` return.
pub fn parse_return_var(
    contents: &str,
    name: &str,
) -> Result<(ArgDescriptor, Convention), DescriptorError> {
    parse_return(contents).or_else(|err| parse_return(name).map_err(|_| err))
}

fn kind_from_name(name: &str) -> Option<ArgKind> {
    const CATALOG: [(&str, ArgKind); 7] = [
        ("Str", ArgKind::Str),
        ("Int", ArgKind::Int32),
        ("Short", ArgKind::Int16),
        ("Char", ArgKind::Int8),
        ("Int64", ArgKind::Int64),
        ("Float", ArgKind::Float32),
        ("Double", ArgKind::Float64),
    ];

    if name.is_empty() {
        return Some(ArgKind::Int32);
    }
    CATALOG
        .iter()
        .find(|(token, _)| token.eq_ignore_ascii_case(name))
        .map(|&(_, kind)| kind)
}

fn strip_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let head = text.get(..word.len())?;
    if head.eq_ignore_ascii_case(word) {
        Some(text[word.len()..].trim_start())
    } else {
        None
    }
}

/// Type token that is not in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorError {
    pub token: String,
}

impl DescriptorError {
    fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid type token: '{}'", self.token)
    }
}

impl std::error::Error for DescriptorError {}
