//! Command-line front end
//!
//! `dllcall [OPTIONS] <function> [<type> <value>]... [<return>]`
//!
//! Values are passed as literal text. A value written `$name=init` (or
//! `$name:bytes=init` to reserve a text buffer) becomes a variable, and its
//! contents after the call are printed next to the result.

use std::path::PathBuf;

use dllcall_runtime::{interop, CallOutcome, HostValue, Operand, Variable};
use serde_json::json;

use crate::config::{Config, ConfigError};
use crate::logging::{init_logging, parse_level, LogFormat};

/// Exit code for a call that completed with a zero status
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for a call that reported a non-zero status
pub const EXIT_CALL_FAILED: i32 = 1;
/// Exit code for bad arguments or configuration
pub const EXIT_USAGE: i32 = 2;

const USAGE: &str = "Usage: dllcall [OPTIONS] <function> [<type> <value>]... [<return>]\n\n\
Options:\n  \
  --config PATH     Read settings from PATH instead of the nearest dllcall.toml\n  \
  --json            Print the outcome as JSON\n  \
  --log-level LVL   Override the configured log level\n  \
  --log-json        Write log lines as JSON\n  \
  -h, --help        Show this message\n\n\
Values written as $name=init or $name:bytes=init are passed as variables.";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliConfig {
    pub config_path: Option<PathBuf>,
    pub json: bool,
    pub log_level: Option<String>,
    pub log_json: bool,
    pub help: bool,
    /// Function reference followed by the raw operand words
    pub operands: Vec<CliOperand>,
}

/// One operand word from the command line
#[derive(Debug, Clone, PartialEq)]
pub enum CliOperand {
    Literal(String),
    Var {
        name: String,
        capacity: Option<usize>,
        init: String,
    },
}

impl CliOperand {
    fn parse(word: &str) -> Result<Self, String> {
        let Some(rest) = word.strip_prefix('$') else {
            return Ok(Self::Literal(word.to_string()));
        };

        let (head, init) = rest.split_once('=').unwrap_or((rest, ""));
        let (name, capacity) = match head.split_once(':') {
            Some((name, bytes)) => {
                let bytes = bytes
                    .parse()
                    .map_err(|_| format!("Invalid buffer size in {}", word))?;
                (name, Some(bytes))
            }
            None => (head, None),
        };

        if name.is_empty() {
            return Err(format!("Missing variable name in {}", word));
        }

        Ok(Self::Var {
            name: name.to_string(),
            capacity,
            init: init.to_string(),
        })
    }
}

/// Parse arguments, program name excluded
///
/// Options are only recognized ahead of the function operand so that
/// negative numbers can be passed as values.
pub fn parse_args<I, S>(args: I) -> Result<CliConfig, String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let mut config = CliConfig::default();
    let mut i = 0;

    while i < args.len() && config.operands.is_empty() {
        match args[i].as_str() {
            "-h" | "--help" => {
                config.help = true;
                return Ok(config);
            }
            "--json" => config.json = true,
            "--log-json" => config.log_json = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires an argument")?;
                config.config_path = Some(PathBuf::from(path));
            }
            "--log-level" => {
                i += 1;
                let level = args.get(i).ok_or("--log-level requires an argument")?;
                if parse_level(level).is_none() {
                    return Err(format!("Invalid value for --log-level: {}", level));
                }
                config.log_level = Some(level.clone());
            }
            "--" => {
                i += 1;
                break;
            }
            arg if arg.starts_with("--") => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => break,
        }
        i += 1;
    }

    config.operands = args[i..]
        .iter()
        .map(|word| CliOperand::parse(word))
        .collect::<Result<_, _>>()?;

    if config.operands.is_empty() {
        return Err("No function specified".to_string());
    }

    Ok(config)
}

pub struct Cli {
    config: CliConfig,
}

impl Cli {
    pub fn new(config: CliConfig) -> Self {
        Self { config }
    }

    /// Load settings, set up logging and the loader, then make the call
    pub fn run(&self) -> Result<i32, String> {
        if self.config.help {
            println!("{}", USAGE);
            return Ok(EXIT_SUCCESS);
        }

        let settings = self.load_settings().map_err(|e| e.to_string())?;
        let mut log_config = settings.logging.to_log_config().map_err(|e| e.to_string())?;
        if self.config.log_json {
            log_config = log_config.with_format(LogFormat::Json);
        }
        let _guard = init_logging(log_config);

        if !interop::init(settings.loader.to_loader_config()) {
            tracing::debug!("Loader already initialized; keeping existing configuration");
        }

        let (outcome, variables) = self.call();
        self.print_outcome(&outcome, &variables);

        Ok(if outcome.status.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_CALL_FAILED
        })
    }

    fn load_settings(&self) -> Result<Config, ConfigError> {
        let mut settings = match &self.config.config_path {
            Some(path) => Config::from_file(path)?,
            None => Config::find_and_load()?,
        };
        if let Some(level) = &self.config.log_level {
            settings.logging.level = level.clone();
        }
        Ok(settings)
    }

    /// Build operands, invoke, and hand back the variables afterwards
    pub fn call(&self) -> (CallOutcome, Vec<Variable>) {
        let mut variables: Vec<Variable> = self
            .config
            .operands
            .iter()
            .filter_map(|op| match op {
                CliOperand::Var { name, capacity, init } => {
                    let mut var = Variable::with_value(name.as_str(), init.as_str());
                    if let Some(bytes) = capacity {
                        var.set_capacity(*bytes);
                    }
                    Some(var)
                }
                CliOperand::Literal(_) => None,
            })
            .collect();

        let outcome = {
            let mut slots = variables.iter_mut();
            let mut operands: Vec<Operand<'_>> = Vec::with_capacity(self.config.operands.len());
            for op in &self.config.operands {
                match op {
                    CliOperand::Literal(text) => operands.push(Operand::from(text.as_str())),
                    CliOperand::Var { .. } => {
                        if let Some(var) = slots.next() {
                            operands.push(Operand::from(var));
                        }
                    }
                }
            }
            interop::dll_call(&mut operands)
        };

        (outcome, variables)
    }

    fn print_outcome(&self, outcome: &CallOutcome, variables: &[Variable]) {
        if self.config.json {
            println!("{}", outcome_json(outcome, variables));
            return;
        }

        println!("value: {}", outcome.value.to_text());
        println!("status: {}", outcome.status);
        for var in variables {
            println!("${} = {}", var.name(), var.value().to_text());
        }
    }
}

/// JSON rendering of a call outcome
pub fn outcome_json(outcome: &CallOutcome, variables: &[Variable]) -> serde_json::Value {
    let vars: serde_json::Map<String, serde_json::Value> = variables
        .iter()
        .map(|var| (var.name().to_string(), value_json(var.value())))
        .collect();

    json!({
        "value": value_json(&outcome.value),
        "status": outcome.status.to_string(),
        "variables": vars,
    })
}

fn value_json(value: &HostValue) -> serde_json::Value {
    match value {
        HostValue::Str(s) => json!(s),
        HostValue::Int(i) => json!(i),
        HostValue::Float(f) => json!(f),
    }
}

pub fn usage() -> &'static str {
    USAGE
}
