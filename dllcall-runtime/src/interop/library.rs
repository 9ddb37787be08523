//! Dynamic library loading and symbol resolution
//!
//! Libraries are cached process-wide by the name they were requested under
//! and stay loaded for the life of the process, so a resolved address never
//! dangles.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::sync::Arc;

use dashmap::DashMap;
use libloading::Library;
use once_cell::sync::OnceCell;

use crate::logging::log_library_load;
use crate::value::{parse_integer, HostValue};

/// Parsed function operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionRef {
    /// Raw function address
    Address(usize),
    /// Symbol, optionally qualified with the library that exports it
    Symbol {
        library: Option<String>,
        symbol: String,
    },
}

impl FunctionRef {
    /// Interpret the host's function operand
    ///
    /// Text with a backslash is `library\symbol`, split at the last one.
    /// Otherwise numbers and numeric text are addresses and other text is a
    /// bare symbol.
    pub fn from_value(value: &HostValue) -> Result<Self, InvalidFunction> {
        match value {
            HostValue::Int(0) => Err(InvalidFunction::new(value)),
            HostValue::Int(address) => Ok(Self::Address(*address as usize)),
            HostValue::Float(_) => Err(InvalidFunction::new(value)),
            HostValue::Str(text) => Self::from_text(text),
        }
    }

    fn from_text(text: &str) -> Result<Self, InvalidFunction> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InvalidFunction(String::new()));
        }

        match text.rsplit_once('\\') {
            Some((library, symbol)) if !library.is_empty() && !symbol.is_empty() => {
                Ok(Self::Symbol {
                    library: Some(library.to_string()),
                    symbol: symbol.to_string(),
                })
            }
            Some(_) => Err(InvalidFunction(text.to_string())),
            None if text.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') => {
                match parse_integer(text) {
                    Some(0) | None => Err(InvalidFunction(text.to_string())),
                    Some(address) => Ok(Self::Address(address as u64 as usize)),
                }
            }
            None => Ok(Self::Symbol {
                library: None,
                symbol: text.to_string(),
            }),
        }
    }
}

/// Which libraries a bare symbol name is searched in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Libraries searched in order after the process itself
    pub default_libraries: Vec<String>,
    /// Search the running executable and everything it already loaded first
    pub search_process: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            default_libraries: platform_defaults().iter().map(|s| s.to_string()).collect(),
            search_process: cfg!(unix),
        }
    }
}

fn platform_defaults() -> &'static [&'static str] {
    if cfg!(windows) {
        &["user32.dll", "kernel32.dll", "comctl32.dll", "gdi32.dll"]
    } else if cfg!(target_os = "macos") {
        &["libSystem.B.dylib"]
    } else if cfg!(target_os = "linux") {
        &["libc.so.6", "libm.so.6"]
    } else {
        &["libc.so", "libm.so"]
    }
}

static GLOBAL: OnceCell<Loader> = OnceCell::new();

/// Library cache plus symbol search policy
pub struct Loader {
    config: LoaderConfig,
    libraries: DashMap<String, Arc<Library>>,
    defaults: OnceCell<Vec<(String, Arc<Library>)>>,
}

impl Loader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            libraries: DashMap::new(),
            defaults: OnceCell::new(),
        }
    }

    /// Process-wide loader, created with the default config on first use
    pub fn global() -> &'static Loader {
        GLOBAL.get_or_init(|| Loader::new(LoaderConfig::default()))
    }

    /// Configure the process-wide loader
    ///
    /// Returns false if it was already in use.
    pub fn install_global(config: LoaderConfig) -> bool {
        GLOBAL.set(Loader::new(config)).is_ok()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Number of libraries loaded by name so far
    pub fn loaded_count(&self) -> usize {
        self.libraries.len()
    }

    /// Load `name`, or return the cached handle
    pub fn load(&self, name: &str) -> Result<Arc<Library>, LoadError> {
        if let Some(library) = self.libraries.get(name) {
            return Ok(Arc::clone(&library));
        }

        let library = unsafe { Library::new(name) }.map_err(|err| LoadError::LoadFailed {
            name: name.to_string(),
            reason: err.to_string(),
        });
        log_library_load(name, library.is_ok());
        let library = Arc::new(library?);

        // A racing loader may have won; keep whichever landed first
        let entry = self
            .libraries
            .entry(name.to_string())
            .or_insert(library);
        Ok(Arc::clone(&entry))
    }

    /// Resolve a function operand to a callable address
    pub fn resolve(&self, function: &FunctionRef) -> Result<NonNull<c_void>, ResolveError> {
        match function {
            FunctionRef::Address(address) => NonNull::new(*address as *mut c_void)
                .ok_or(ResolveError::Invalid(InvalidFunction("0".into()))),
            FunctionRef::Symbol {
                library: Some(library),
                symbol,
            } => {
                let handle = self.load(library)?;
                lookup(&handle, symbol).ok_or_else(|| {
                    ResolveError::Symbol(SymbolError::NotFound {
                        symbol: symbol.clone(),
                        library: Some(library.clone()),
                    })
                })
            }
            FunctionRef::Symbol {
                library: None,
                symbol,
            } => self
                .default_libraries()
                .iter()
                .find_map(|(_, handle)| lookup(handle, symbol))
                .ok_or_else(|| {
                    ResolveError::Symbol(SymbolError::NotFound {
                        symbol: symbol.clone(),
                        library: None,
                    })
                }),
        }
    }

    /// Search list for bare symbols, loaded once
    ///
    /// Libraries that fail to load are skipped.
    fn default_libraries(&self) -> &[(String, Arc<Library>)] {
        self.defaults.get_or_init(|| {
            let mut found = Vec::new();
            if self.config.search_process {
                if let Some(process) = process_library() {
                    found.push(("<process>".to_string(), Arc::new(process)));
                }
            }
            for name in &self.config.default_libraries {
                if let Ok(library) = self.load(name) {
                    found.push((name.clone(), library));
                }
            }
            found
        })
    }
}

#[cfg(unix)]
fn process_library() -> Option<Library> {
    Some(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn process_library() -> Option<Library> {
    libloading::os::windows::Library::this().ok().map(Into::into)
}

#[cfg(not(any(unix, windows)))]
fn process_library() -> Option<Library> {
    None
}

/// Find `symbol`, falling back to its ANSI-suffixed name
fn lookup(library: &Library, symbol: &str) -> Option<NonNull<c_void>> {
    find(library, symbol).or_else(|| find(library, &format!("{}A", symbol)))
}

fn find(library: &Library, symbol: &str) -> Option<NonNull<c_void>> {
    if symbol.contains('\0') {
        return None;
    }
    unsafe {
        let found = library.get::<*mut c_void>(symbol.as_bytes()).ok()?;
        NonNull::new(*found)
    }
}

/// Function operand that names nothing callable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidFunction(pub String);

impl InvalidFunction {
    fn new(value: &HostValue) -> Self {
        Self(value.to_text())
    }
}

impl core::fmt::Display for InvalidFunction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Invalid function reference: '{}'", self.0)
    }
}

impl std::error::Error for InvalidFunction {}

/// Library loading errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    LoadFailed { name: String, reason: String },
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::LoadFailed { name, reason } => {
                write!(f, "Failed to load library '{}': {}", name, reason)
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// Symbol lookup errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    NotFound {
        symbol: String,
        library: Option<String>,
    },
}

impl core::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound {
                symbol,
                library: Some(library),
            } => write!(f, "Symbol '{}' not found in '{}'", symbol, library),
            Self::NotFound {
                symbol,
                library: None,
            } => write!(f, "Symbol '{}' not found in the default libraries", symbol),
        }
    }
}

impl std::error::Error for SymbolError {}

/// Anything that stops a function operand from becoming an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    Invalid(InvalidFunction),
    Load(LoadError),
    Symbol(SymbolError),
}

impl From<InvalidFunction> for ResolveError {
    fn from(err: InvalidFunction) -> Self {
        Self::Invalid(err)
    }
}

impl From<LoadError> for ResolveError {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

impl From<SymbolError> for ResolveError {
    fn from(err: SymbolError) -> Self {
        Self::Symbol(err)
    }
}

impl core::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Invalid(err) => err.fmt(f),
            Self::Load(err) => err.fmt(f),
            Self::Symbol(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ResolveError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_ref_forms() {
        assert_eq!(
            FunctionRef::from_value(&HostValue::Int(0x1000)).unwrap(),
            FunctionRef::Address(0x1000)
        );
        assert_eq!(
            FunctionRef::from_value(&"0x2000".into()).unwrap(),
            FunctionRef::Address(0x2000)
        );
        assert_eq!(
            FunctionRef::from_value(&"MessageBox".into()).unwrap(),
            FunctionRef::Symbol {
                library: None,
                symbol: "MessageBox".into()
            }
        );
        assert_eq!(
            FunctionRef::from_value(&r"C:\dir\my.dll\Entry".into()).unwrap(),
            FunctionRef::Symbol {
                library: Some(r"C:\dir\my.dll".into()),
                symbol: "Entry".into()
            }
        );
        assert_eq!(
            FunctionRef::from_value(&r"7zip.dll\Entry".into()).unwrap(),
            FunctionRef::Symbol {
                library: Some("7zip.dll".into()),
                symbol: "Entry".into()
            }
        );
        assert_eq!(
            FunctionRef::from_value(&r"32bit\lib.so\f".into()).unwrap(),
            FunctionRef::Symbol {
                library: Some(r"32bit\lib.so".into()),
                symbol: "f".into()
            }
        );
    }

    #[test]
    fn test_invalid_function_refs() {
        for value in [
            HostValue::Int(0),
            HostValue::Float(1.0),
            "".into(),
            "   ".into(),
            "0".into(),
            r"lib\".into(),
            r"\sym".into(),
            "12abc".into(),
        ] {
            assert!(FunctionRef::from_value(&value).is_err(), "{value:?}");
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_default_search_finds_libc() {
        let loader = Loader::new(LoaderConfig::default());
        let strlen = FunctionRef::Symbol {
            library: None,
            symbol: "strlen".into(),
        };
        assert!(loader.resolve(&strlen).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_library_cache_is_shared() {
        let loader = Loader::new(LoaderConfig::default());
        let first = loader.load("libc.so.6").unwrap();
        let second = loader.load("libc.so.6").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loaded_count(), 1);
    }

    #[test]
    fn test_missing_library_and_symbol() {
        let loader = Loader::new(LoaderConfig {
            default_libraries: Vec::new(),
            search_process: false,
        });

        let missing_lib = FunctionRef::Symbol {
            library: Some("definitely-not-a-library-7f3a".into()),
            symbol: "f".into(),
        };
        assert!(matches!(
            loader.resolve(&missing_lib),
            Err(ResolveError::Load(_))
        ));

        let missing_sym = FunctionRef::Symbol {
            library: None,
            symbol: "definitely_not_a_symbol_7f3a".into(),
        };
        assert!(matches!(
            loader.resolve(&missing_sym),
            Err(ResolveError::Symbol(_))
        ));
    }
}
