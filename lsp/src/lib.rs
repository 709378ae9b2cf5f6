//! LSP client for driving an external static-analysis language server.
//!
//! Layers, leaf first: [`codec`] frames bytes, [`session`] correlates
//! requests and routes server traffic through [`dispatch`], and
//! [`AnalysisClient`] coordinates batches of opened files until every one of
//! them has reported diagnostics.

pub mod codec;
pub mod debug_log;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod session;
pub mod types;

mod analysis;
mod client;
mod server;

pub use analysis::AnalysisState;
pub use client::AnalysisClient;
pub use debug_log::{DebugLog, FileDebugLog, NoDebugLog};
pub use dispatch::UnhandledRequestPolicy;
pub use error::RpcError;
pub use server::AnalysisServer;
pub use types::{
    BatchReport, Diagnostic, RuleLevel, RuleSelection, ServerConfig, SessionOptions,
};
