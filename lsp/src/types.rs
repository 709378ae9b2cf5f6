//! Public types consumed by the CLI and config crates.
//!
//! The outer layer builds a [`ServerConfig`], a [`RuleSelection`] and
//! [`SessionOptions`], and reads back [`BatchReport`]s made of
//! [`Diagnostic`]s.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::UnhandledRequestPolicy;

/// Default wait between the `exit` notification and killing the process.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Language identifier used when none is configured.
pub const DEFAULT_LANGUAGE_ID: &str = "javascript";

/// How to launch the analysis server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Executable command (e.g. a `java` binary).
    pub command: String,
    /// Arguments to pass to the command (jar, stdio flag, analyzer plugins).
    pub args: Vec<String>,
    /// LSP language identifier sent with every opened document.
    pub language_id: String,
    /// Passed verbatim as `initializationOptions`.
    pub initialization_options: serde_json::Value,
}

/// Knobs for one client session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub shutdown_grace: Duration,
    pub unhandled_requests: UnhandledRequestPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            unhandled_requests: UnhandledRequestPolicy::Drop,
        }
    }
}

/// Per-rule activation level reported back to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleLevel {
    On,
    Off,
}

impl RuleLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

/// Which rules the user asked to enable or disable.
///
/// `enabled == None` means "no enable-list given": everything not disabled
/// stays on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSelection {
    enabled: Option<HashSet<String>>,
    disabled: HashSet<String>,
}

impl RuleSelection {
    #[must_use]
    pub fn new(enabled: Option<HashSet<String>>, disabled: HashSet<String>) -> Self {
        Self { enabled, disabled }
    }

    /// Disabled wins; then an enable-list, when present, is exhaustive.
    #[must_use]
    pub fn level(&self, rule: &str) -> RuleLevel {
        if self.disabled.contains(rule) {
            return RuleLevel::Off;
        }
        match &self.enabled {
            Some(enabled) if !enabled.contains(rule) => RuleLevel::Off,
            _ => RuleLevel::On,
        }
    }
}

/// A single issue reported by the server, with 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    path: PathBuf,
    line: u32,
    column: u32,
    message: String,
    code: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(path: PathBuf, line: u32, column: u32, message: String, code: String) -> Self {
        Self {
            path,
            line,
            column,
            message,
            code,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 1-based line number.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 1-based column.
    #[must_use]
    pub fn column(&self) -> u32 {
        self.column
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Rule id (e.g. `javascript:S3504`).
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} - {} ({})",
            self.path.display(),
            self.line,
            self.column,
            self.message,
            self.code,
        )
    }
}

/// Outcome of one analysis batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Deduplicated diagnostics in arrival order.
    diagnostics: Vec<Diagnostic>,
    issues_found: bool,
}

impl BatchReport {
    pub(crate) fn new(diagnostics: Vec<Diagnostic>, issues_found: bool) -> Self {
        Self {
            diagnostics,
            issues_found,
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Rendered `path:line:col - message (code)` lines.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.diagnostics.iter().map(ToString::to_string)
    }

    /// Whether any diagnostic was emitted in the batch.
    #[must_use]
    pub fn issues_found(&self) -> bool {
        self.issues_found
    }
}
