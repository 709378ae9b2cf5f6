//! Server handle: owns the analysis child process and its client session.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::client::AnalysisClient;
use crate::debug_log::DebugLog;
use crate::protocol;
use crate::types::{BatchReport, RuleSelection, ServerConfig, SessionOptions};

/// One analysis process and the session talking to it.
///
/// Construction is initialization: holding an `AnalysisServer` means the
/// handshake succeeded and the rule catalog is loaded.
pub struct AnalysisServer {
    child: Child,
    client: AnalysisClient<ChildStdout, ChildStdin>,
    options: SessionOptions,
    stderr_handle: JoinHandle<()>,
}

impl AnalysisServer {
    pub async fn start(
        config: &ServerConfig,
        rules: RuleSelection,
        options: SessionOptions,
        debug_log: Box<dyn DebugLog>,
    ) -> Result<Self> {
        let resolved_cmd = which::which(&config.command)
            .with_context(|| format!("{} not found in PATH", config.command))?;
        let mut cmd = Command::new(&resolved_cmd);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", config.command))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;
        let stderr = child.stderr.take().context("no stderr from child")?;
        let stderr_handle = tokio::spawn(log_stderr(stderr));

        let mut client = AnalysisClient::new(
            stdout,
            stdin,
            &config.language_id,
            rules,
            &options,
            debug_log,
        );
        client.record(&format!("started {}", resolved_cmd.display()));
        tracing::info!(command = %resolved_cmd.display(), "Analysis server started");

        let root_uri = std::env::current_dir()
            .ok()
            .and_then(|dir| protocol::path_to_file_uri(&dir).ok());
        client
            .initialize(
                root_uri.as_ref().map(url::Url::as_str),
                &config.initialization_options,
            )
            .await?;

        Ok(Self {
            child,
            client,
            options,
            stderr_handle,
        })
    }

    /// Rule ids the server knows, fetched once at startup.
    #[must_use]
    pub fn rules(&self) -> &[String] {
        self.client.rules()
    }

    pub fn set_rule_selection(&mut self, rules: RuleSelection) {
        self.client.set_rule_selection(rules);
    }

    pub async fn analyze(&mut self, paths: &[PathBuf]) -> Result<BatchReport> {
        self.client.analyze(paths).await
    }

    /// Notify the server, give it the grace period to exit, then kill it.
    /// Consumes self.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.client.shutdown().await {
            tracing::debug!("Failed to send shutdown notifications: {e:#}");
        }

        if stop_child(&mut self.child, self.options.shutdown_grace).await == Stopped::Killed {
            self.client.record("killed server");
        }
        self.stderr_handle.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stopped {
    Exited,
    Killed,
}

/// Wait up to `grace` for the child to exit on its own, then kill it.
async fn stop_child(child: &mut Child, grace: Duration) -> Stopped {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(%status, "Analysis server exited");
            Stopped::Exited
        }
        Ok(Err(e)) => {
            tracing::debug!("Failed to wait for analysis server: {e}");
            Stopped::Exited
        }
        Err(_) => {
            tracing::debug!("Analysis server didn't exit in time, killing");
            if let Err(e) = child.kill().await {
                tracing::debug!("Failed to kill analysis server: {e}");
            }
            Stopped::Killed
        }
    }
}

/// Forward the server's stderr to the log. Never fatal.
async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::warn!(target: "lintwire_lsp::server", "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Stopped reading server stderr: {e}");
                break;
            }
        }
    }
}
