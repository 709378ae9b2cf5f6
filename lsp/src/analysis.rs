//! Analysis coordinator state and the server-facing handlers that mutate it.
//!
//! A batch moves `Idle → Open → Complete → Idle`. Opening records every file
//! in the pending set; each `publishDiagnostics` removes its file, whether or
//! not it carried any diagnostics, and the batch completes the moment the
//! set is empty.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::dispatch::Dispatcher;
use crate::protocol::{self, PublishDiagnosticsParams, method};
use crate::types::{BatchReport, Diagnostic, RuleSelection};

/// A file about to be opened in a batch.
#[derive(Debug, Clone)]
pub(crate) struct BatchFile {
    /// Absolute, lexically normalized path; the pending-set key.
    pub normalized: PathBuf,
    /// Path as the caller supplied it, used when rendering diagnostics.
    pub display: PathBuf,
}

struct Batch {
    pending: HashSet<PathBuf>,
    display: HashMap<PathBuf, PathBuf>,
    done: Option<oneshot::Sender<()>>,
}

pub struct AnalysisState {
    rules: RuleSelection,
    catalog: Vec<String>,
    batch: Option<Batch>,
    /// Rendered lines already emitted in the current batch.
    seen: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
    issues_found: bool,
}

impl AnalysisState {
    #[must_use]
    pub fn new(rules: RuleSelection) -> Self {
        Self {
            rules,
            catalog: Vec::new(),
            batch: None,
            seen: HashSet::new(),
            diagnostics: Vec::new(),
            issues_found: false,
        }
    }

    pub fn set_rules(&mut self, rules: RuleSelection) {
        self.rules = rules;
    }

    pub(crate) fn set_catalog(&mut self, catalog: Vec<String>) {
        self.catalog = catalog;
    }

    #[must_use]
    pub fn catalog(&self) -> &[String] {
        &self.catalog
    }

    /// Files opened in the current batch that have not reported yet.
    #[must_use]
    pub fn pending_files(&self) -> usize {
        self.batch.as_ref().map_or(0, |batch| batch.pending.len())
    }

    /// Open a batch and return its completion signal.
    ///
    /// Resets dedup state and the issues flag. An empty batch is complete
    /// before this returns.
    pub(crate) fn begin_batch(&mut self, files: Vec<BatchFile>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.seen.clear();
        self.diagnostics.clear();
        self.issues_found = false;

        let mut batch = Batch {
            pending: HashSet::new(),
            display: HashMap::new(),
            done: Some(tx),
        };
        for file in files {
            batch.pending.insert(file.normalized.clone());
            batch.display.insert(file.normalized, file.display);
        }
        self.batch = Some(batch);
        self.complete_if_drained();
        rx
    }

    /// Hand back the batch's output and return to idle.
    pub(crate) fn finish_batch(&mut self) -> BatchReport {
        self.batch = None;
        BatchReport::new(std::mem::take(&mut self.diagnostics), self.issues_found)
    }

    pub(crate) fn publish_diagnostics(&mut self, params: &PublishDiagnosticsParams) {
        let path = uri_to_normalized_path(&params.uri);
        let shown = self
            .batch
            .as_ref()
            .and_then(|batch| batch.display.get(&path))
            .cloned()
            .unwrap_or_else(|| path.clone());

        for lsp_diag in &params.diagnostics {
            let diagnostic = lsp_diag.to_diagnostic(&shown);
            let line = diagnostic.to_string();
            if self.seen.insert(line) {
                tracing::debug!(path = %shown.display(), code = diagnostic.code(), "Diagnostic");
                self.diagnostics.push(diagnostic);
                self.issues_found = true;
            }
        }

        if let Some(batch) = self.batch.as_mut() {
            batch.pending.remove(&path);
        }
        self.complete_if_drained();
    }

    fn complete_if_drained(&mut self) {
        let Some(batch) = self.batch.as_mut() else {
            return;
        };
        if batch.pending.is_empty()
            && let Some(done) = batch.done.take()
        {
            // Receiver may be gone if the caller stopped waiting.
            let _ = done.send(());
        }
    }

    /// Settings object answering a configuration pull.
    ///
    /// Recomputed on every pull; the rule selection may change between
    /// batches.
    #[must_use]
    pub fn rule_configuration(&self) -> Value {
        let rules: serde_json::Map<String, Value> = self
            .catalog
            .iter()
            .map(|rule| {
                let level = self.rules.level(rule).as_str();
                (rule.clone(), serde_json::json!({ "level": level }))
            })
            .collect();
        serde_json::json!({ "rules": rules })
    }
}

/// The handler table for the analysis server.
#[must_use]
pub fn dispatcher() -> Dispatcher<AnalysisState> {
    let mut dispatcher: Dispatcher<AnalysisState> = Dispatcher::new();
    dispatcher
        .on_request(method::CONFIGURATION, on_configuration)
        .on_request(method::IS_OPEN_IN_EDITOR, on_is_open_in_editor)
        .on_request(method::IS_IGNORED_BY_SCM, on_is_ignored_by_scm)
        .on_notification(method::PUBLISH_DIAGNOSTICS, on_publish_diagnostics)
        .on_notification(method::LOG_MESSAGE, on_log_message);
    dispatcher
}

fn on_configuration(state: &mut AnalysisState, params: Option<Value>) -> Value {
    // One settings object per requested item.
    let items = params
        .as_ref()
        .and_then(|p| p.get("items"))
        .and_then(Value::as_array)
        .map_or(1, Vec::len);
    let settings = state.rule_configuration();
    Value::Array(vec![settings; items])
}

fn on_is_open_in_editor(_state: &mut AnalysisState, _params: Option<Value>) -> Value {
    Value::Bool(true)
}

fn on_is_ignored_by_scm(_state: &mut AnalysisState, _params: Option<Value>) -> Value {
    Value::Bool(false)
}

fn on_publish_diagnostics(state: &mut AnalysisState, params: Option<Value>) {
    let Some(params) = params else { return };
    match serde_json::from_value::<PublishDiagnosticsParams>(params) {
        Ok(params) => state.publish_diagnostics(&params),
        Err(e) => tracing::debug!("Failed to parse publishDiagnostics: {e}"),
    }
}

fn on_log_message(_state: &mut AnalysisState, params: Option<Value>) {
    if let Some(message) = params
        .as_ref()
        .and_then(|p| p.get("message"))
        .and_then(Value::as_str)
    {
        tracing::debug!(target: "lintwire_lsp::server", "{message}");
    }
}

/// Map a diagnostics URI back to the pending-set key.
///
/// Falls back to stripping the scheme when the URI is not a local file URL.
fn uri_to_normalized_path(uri: &str) -> PathBuf {
    protocol::file_uri_to_path(uri).map_or_else(
        || PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri)),
        |path| normalize_path(&path),
    )
}

/// Make `path` absolute and resolve `.`/`..` lexically.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = Vec::new();
    for c in absolute.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}
