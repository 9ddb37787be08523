use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use dllcall_runtime::LoaderConfig;

use crate::logging::{parse_level, LogConfig, LogFormat, LogOutput};

/// File name searched for by [`Config::find_and_load`]
pub const CONFIG_FILE: &str = "dllcall.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub loader: LoaderSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: OutputKind,

    #[serde(default = "default_directory")]
    pub directory: String,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub span_events: bool,

    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Stdout,
    #[default]
    Stderr,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSection {
    /// Libraries searched for bare symbol names, in order
    #[serde(default = "default_libraries")]
    pub default_libraries: Vec<String>,

    /// Search the running process before the default libraries
    #[serde(default = "default_search_process")]
    pub search_process: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            output: OutputKind::default(),
            directory: default_directory(),
            prefix: default_prefix(),
            span_events: false,
            filter: None,
        }
    }
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            default_libraries: default_libraries(),
            search_process: default_search_process(),
        }
    }
}

fn default_level() -> String { "warn".to_string() }
fn default_directory() -> String { "logs".to_string() }
fn default_prefix() -> String { "dllcall".to_string() }
fn default_libraries() -> Vec<String> { LoaderConfig::default().default_libraries }
fn default_search_process() -> bool { LoaderConfig::default().search_process }

impl LoggingConfig {
    /// Subscriber settings for this section
    pub fn to_log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = parse_level(&self.level)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "logging.level",
                value: self.level.clone(),
            })?;

        let output = match self.output {
            OutputKind::Stdout => LogOutput::Stdout,
            OutputKind::Stderr => LogOutput::Stderr,
            OutputKind::File => LogOutput::File {
                directory: self.directory.clone(),
                prefix: self.prefix.clone(),
            },
        };

        let mut config = LogConfig::new()
            .with_level(level)
            .with_format(self.format)
            .with_output(output)
            .with_span_events(self.span_events);
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        Ok(config)
    }
}

impl LoaderSection {
    pub fn to_loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            default_libraries: self.default_libraries.clone(),
            search_process: self.search_process,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse { path: None, source })
    }

    /// Find `dllcall.toml` in `start` or its parents
    pub fn find(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|path| path.is_file())
    }

    /// Load the nearest `dllcall.toml` above the current directory
    ///
    /// No file means the defaults; a file that fails to load is an error.
    pub fn find_and_load() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
            path: PathBuf::from("."),
            source,
        })?;

        match Self::find(&cwd) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
    InvalidValue {
        key: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Failed to read config {}: {}", path.display(), source)
            }
            Self::Parse { path: Some(path), source } => {
                write!(f, "Failed to parse config {}: {}", path.display(), source)
            }
            Self::Parse { path: None, source } => write!(f, "Failed to parse config: {}", source),
            Self::InvalidValue { key, value } => write!(f, "Invalid value for {}: '{}'", key, value),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::InvalidValue { .. } => None,
        }
    }
}
