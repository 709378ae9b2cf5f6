//! Configuration loading for lintwire.
//!
//! The config file lives at `~/.lintwire/config.toml` unless a path is given
//! explicitly. Every section is optional at parse time; only `[server]` is
//! required once a server actually has to be started.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lintwire_lsp::types::{DEFAULT_LANGUAGE_ID, DEFAULT_SHUTDOWN_GRACE};
use lintwire_lsp::{RuleSelection, ServerConfig, SessionOptions, UnhandledRequestPolicy};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no [server] command configured")]
    MissingServerCommand,
    #[error("invalid initialization_options: {0}")]
    InitializationOptions(String),
}

#[derive(Debug, Default, Deserialize)]
pub struct LintwireConfig {
    pub server: Option<ServerSection>,
    pub rules: Option<RulesSection>,
    pub session: Option<SessionSection>,
}

/// `[server]`: how to launch the analysis language server.
#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    /// Executable, `${VAR}` references are expanded.
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub language_id: Option<String>,
    /// Forwarded to the server as `initializationOptions`.
    pub initialization_options: Option<toml::Table>,
}

/// `[rules]`
#[derive(Debug, Default, Deserialize)]
pub struct RulesSection {
    /// When present, only these rules are on.
    pub enabled: Option<Vec<String>>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionSection {
    /// Append a timestamped protocol trace to this file.
    pub debug_log: Option<String>,
    pub shutdown_grace_ms: Option<u64>,
    #[serde(default)]
    pub reply_method_not_found: bool,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("${")
            && let Some(end) = after.find('}')
        {
            let var = &after[..end];
            if !var.is_empty() {
                out.push_str(&env::var(var).unwrap_or_default());
            }
            rest = &after[end + 1..];
            continue;
        }

        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            out.push(ch);
        }
        rest = chars.as_str();
    }

    out
}

/// Convert a TOML value to a JSON value.
fn toml_to_json(value: &toml::Value) -> Result<serde_json::Value, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        toml::Value::Integer(i) => Ok(serde_json::Value::Number((*i).into())),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| ConfigError::InitializationOptions(format!("invalid float: {f}"))),
        toml::Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        toml::Value::Array(arr) => {
            let json_arr: Result<Vec<_>, _> = arr.iter().map(toml_to_json).collect();
            Ok(serde_json::Value::Array(json_arr?))
        }
        toml::Value::Table(table) => table_to_json(table),
        toml::Value::Datetime(dt) => Ok(serde_json::Value::String(dt.to_string())),
    }
}

fn table_to_json(table: &toml::Table) -> Result<serde_json::Value, ConfigError> {
    let mut map = serde_json::Map::new();
    for (k, v) in table {
        map.insert(k.clone(), toml_to_json(v)?);
    }
    Ok(serde_json::Value::Object(map))
}

impl LintwireConfig {
    /// Load from the default location. A missing file is not an error.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file");
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    /// Load from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let server = self
            .server
            .as_ref()
            .ok_or(ConfigError::MissingServerCommand)?;
        let command = server
            .command
            .as_deref()
            .map(expand_env_vars)
            .filter(|command| !command.trim().is_empty())
            .ok_or(ConfigError::MissingServerCommand)?;
        let initialization_options = match &server.initialization_options {
            Some(table) => table_to_json(table)?,
            None => serde_json::Value::Null,
        };

        Ok(ServerConfig {
            command,
            args: server.args.iter().map(|arg| expand_env_vars(arg)).collect(),
            language_id: server
                .language_id
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE_ID.to_string()),
            initialization_options,
        })
    }

    /// Rule selection from `[rules]`, with command-line additions merged in.
    ///
    /// Extra enabled rules extend (or create) the enable-list; extra disabled
    /// rules are added to the disable set.
    #[must_use]
    pub fn rule_selection(&self, extra_enabled: &[String], extra_disabled: &[String]) -> RuleSelection {
        let rules = self.rules.as_ref();

        let mut enabled: Option<HashSet<String>> = rules
            .and_then(|r| r.enabled.as_ref())
            .map(|list| list.iter().cloned().collect());
        if !extra_enabled.is_empty() {
            enabled
                .get_or_insert_with(HashSet::new)
                .extend(extra_enabled.iter().cloned());
        }

        let disabled: HashSet<String> = rules
            .map(|r| r.disabled.iter())
            .into_iter()
            .flatten()
            .chain(extra_disabled)
            .cloned()
            .collect();

        RuleSelection::new(enabled, disabled)
    }

    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        let session = self.session.as_ref();
        let shutdown_grace = session
            .and_then(|s| s.shutdown_grace_ms)
            .map_or(DEFAULT_SHUTDOWN_GRACE, Duration::from_millis);
        let unhandled_requests = if session.is_some_and(|s| s.reply_method_not_found) {
            UnhandledRequestPolicy::MethodNotFound
        } else {
            UnhandledRequestPolicy::Drop
        };

        SessionOptions {
            shutdown_grace,
            unhandled_requests,
        }
    }

    #[must_use]
    pub fn debug_log_path(&self) -> Option<PathBuf> {
        self.session
            .as_ref()
            .and_then(|s| s.debug_log.as_deref())
            .map(|path| PathBuf::from(expand_env_vars(path)))
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lintwire").join("config.toml"))
}
