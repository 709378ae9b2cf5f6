//! Analysis client: the coordinator's public face over any duplex stream.
//!
//! [`AnalysisClient`] owns the RPC session and sequences the protocol:
//! startup handshake, rule catalog, batches of opened documents, and the
//! shutdown notifications. It knows nothing about processes; see
//! [`AnalysisServer`](crate::AnalysisServer) for that.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::analysis::{self, AnalysisState, BatchFile, normalize_path};
use crate::debug_log::DebugLog;
use crate::protocol::{self, method};
use crate::session::RpcSession;
use crate::types::{BatchReport, RuleSelection, SessionOptions};

/// Version sent with every `didOpen`; documents are never edited.
const DOCUMENT_VERSION: i32 = 1;

pub struct AnalysisClient<R, W> {
    session: RpcSession<R, W, AnalysisState>,
    language_id: String,
}

impl<R, W> AnalysisClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: R,
        writer: W,
        language_id: &str,
        rules: RuleSelection,
        options: &SessionOptions,
        debug_log: Box<dyn DebugLog>,
    ) -> Self {
        let session = RpcSession::new(
            reader,
            writer,
            analysis::dispatcher(),
            AnalysisState::new(rules),
        )
        .with_debug_log(debug_log)
        .with_unhandled_requests(options.unhandled_requests);

        Self {
            session,
            language_id: language_id.to_string(),
        }
    }

    /// Run the startup handshake and load the rule catalog.
    ///
    /// `initialize` and the rule listing are awaited; the two notifications
    /// in between are fire-and-forget.
    pub async fn initialize(
        &mut self,
        root_uri: Option<&str>,
        initialization_options: &Value,
    ) -> Result<()> {
        self.session.record("initialize");
        let params = protocol::initialize_params(root_uri, initialization_options);
        self.session
            .request(method::INITIALIZE, Some(params))
            .await
            .context("LSP initialize failed")?;

        self.session
            .notify(method::INITIALIZED, Some(serde_json::json!({})))
            .await?;
        self.session
            .notify(
                method::DID_CHANGE_CONFIGURATION,
                Some(protocol::did_change_configuration_params()),
            )
            .await?;

        let listing = self
            .session
            .request(method::LIST_ALL_RULES, None)
            .await
            .context("listing rules")?;
        let catalog = protocol::flatten_rule_groups(&listing);
        tracing::info!(rules = catalog.len(), "Rule catalog loaded");
        self.session.record(&format!("rule catalog: {} rules", catalog.len()));
        self.session.state_mut().set_catalog(catalog);

        Ok(())
    }

    /// Rule ids known to the server, in listing order.
    #[must_use]
    pub fn rules(&self) -> &[String] {
        self.session.state().catalog()
    }

    /// Replace the enable/disable sets used by later configuration pulls.
    pub fn set_rule_selection(&mut self, rules: RuleSelection) {
        self.session.state_mut().set_rules(rules);
    }

    /// Open every file and wait until the server has reported on all of them.
    ///
    /// All files are read before anything is sent, so an unreadable path
    /// fails the batch without opening any document.
    pub async fn analyze(&mut self, paths: &[PathBuf]) -> Result<BatchReport> {
        let mut files = Vec::with_capacity(paths.len());
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let normalized = normalize_path(path);
            let uri = protocol::path_to_file_uri(&normalized)?;
            documents.push((uri.to_string(), text));
            files.push(BatchFile {
                normalized,
                display: path.clone(),
            });
        }

        tracing::debug!(files = files.len(), "Opening batch");
        self.session
            .record(&format!("batch open: {} files", files.len()));
        let done = self.session.state_mut().begin_batch(files);

        for (uri, text) in &documents {
            let params = protocol::did_open_params(uri, &self.language_id, DOCUMENT_VERSION, text);
            self.session.notify(method::DID_OPEN, Some(params)).await?;
        }

        self.session.pump_until(done).await?;
        let report = self.session.state_mut().finish_batch();
        self.session.record(&format!(
            "batch complete: {} diagnostics",
            report.diagnostics().len()
        ));
        Ok(report)
    }

    /// Send `shutdown` then `exit`, both as notifications.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.session.record("shutdown");
        self.session.notify(method::SHUTDOWN, None).await?;
        self.session.notify(method::EXIT, None).await?;
        Ok(())
    }

    pub fn record(&mut self, event: &str) {
        self.session.record(event);
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &RpcSession<R, W, AnalysisState> {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::debug_log::NoDebugLog;
    use crate::session::tests::{RecordingLog, inbound, outbound};

    fn client(frames: &[Value]) -> AnalysisClient<Cursor<Vec<u8>>, Vec<u8>> {
        AnalysisClient::new(
            inbound(frames),
            Vec::new(),
            "javascript",
            RuleSelection::default(),
            &SessionOptions::default(),
            Box::new(NoDebugLog),
        )
    }

    #[tokio::test]
    async fn test_initialize_sequence_and_catalog() {
        let mut client = client(&[
            serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": { "capabilities": {} } }),
            serde_json::json!({
                "jsonrpc": "2.0", "id": 2,
                "result": { "JavaScript": [ { "key": "javascript:S3504" }, { "key": "javascript:S100" } ] }
            }),
        ]);
        client.initialize(None, &Value::Null).await.unwrap();

        assert_eq!(client.rules(), ["javascript:S3504", "javascript:S100"]);
        let sent = outbound(client.session().written());
        let methods: Vec<&str> = sent.iter().map(|m| m["method"].as_str().unwrap()).collect();
        assert_eq!(
            methods,
            vec![
                "initialize",
                "initialized",
                "workspace/didChangeConfiguration",
                "sonarlint/listAllRules"
            ]
        );
    }

    #[tokio::test]
    async fn test_initialize_error_fails_startup() {
        let mut client = client(&[serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "error": { "code": -32002, "message": "not ready" }
        })]);
        let err = client.initialize(None, &Value::Null).await.unwrap_err();
        assert!(format!("{err:#}").contains("not ready"));
    }

    #[tokio::test]
    async fn test_empty_batch_completes_without_reading() {
        let mut client = client(&[]);
        let report = client.analyze(&[]).await.unwrap();
        assert!(!report.issues_found());
        assert!(outbound(client.session().written()).is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_file_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = client(&[]);
        let err = client
            .analyze(&[dir.path().join("missing.js")])
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("missing.js"));
        assert!(outbound(client.session().written()).is_empty());
    }

    #[tokio::test]
    async fn test_batch_opens_documents_and_waits_for_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.js");
        std::fs::write(&path, "var x = 1").unwrap();
        let uri = protocol::path_to_file_uri(&normalize_path(&path))
            .unwrap()
            .to_string();

        let log = RecordingLog::default();
        let mut client = AnalysisClient::new(
            inbound(&[serde_json::json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": { "uri": uri, "diagnostics": [] }
            })]),
            Vec::new(),
            "javascript",
            RuleSelection::default(),
            &SessionOptions::default(),
            Box::new(log.clone()),
        );

        let report = client.analyze(&[path]).await.unwrap();
        assert!(!report.issues_found());

        let sent = outbound(client.session().written());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "textDocument/didOpen");
        assert_eq!(sent[0]["params"]["textDocument"]["uri"], uri);
        assert_eq!(sent[0]["params"]["textDocument"]["languageId"], "javascript");
        assert_eq!(sent[0]["params"]["textDocument"]["version"], 1);
        assert_eq!(sent[0]["params"]["textDocument"]["text"], "var x = 1");

        let events = log.0.lock().unwrap();
        assert!(events.iter().any(|e| e == "batch open: 1 files"));
        assert!(events.iter().any(|e| e == "batch complete: 0 diagnostics"));
    }

    #[tokio::test]
    async fn test_shutdown_sends_two_notifications() {
        let mut client = client(&[]);
        client.shutdown().await.unwrap();
        let sent = outbound(client.session().written());
        assert_eq!(sent[0]["method"], "shutdown");
        assert!(sent[0].get("id").is_none());
        assert_eq!(sent[1]["method"], "exit");
    }
}
