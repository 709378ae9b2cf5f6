//! JSON-RPC envelope and the LSP message shapes this client exchanges.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::Diagnostic;

/// JSON-RPC "method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC "internal error"; stands in for error objects we cannot decode.
const INTERNAL_ERROR: i64 = -32603;

pub(crate) mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE_CONFIGURATION: &str = "workspace/didChangeConfiguration";
    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";
    pub const CONFIGURATION: &str = "workspace/configuration";
    pub const LOG_MESSAGE: &str = "window/logMessage";
    pub const LIST_ALL_RULES: &str = "sonarlint/listAllRules";
    pub const IS_OPEN_IN_EDITOR: &str = "sonarlint/isOpenInEditor";
    pub const IS_IGNORED_BY_SCM: &str = "sonarlint/isIgnoredByScm";
}

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

/// Error object carried by a failed JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 message, classified by which envelope fields it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Response {
        id: Value,
        outcome: Result<Value, ResponseError>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl Message {
    /// Classify a decoded frame. Returns `None` for frames that are not a
    /// JSON object or carry neither a method nor a result/error.
    #[must_use]
    pub fn from_value(frame: Value) -> Option<Self> {
        let Value::Object(mut map) = frame else {
            return None;
        };

        let id = map.remove("id");
        let method = match map.remove("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        };
        let params = map.remove("params");
        let result = map.remove("result");
        let error = map.remove("error");

        match (id, method) {
            (Some(id), None) => {
                let outcome = match (result, error) {
                    (_, Some(error)) => Err(decode_error(error)),
                    (Some(result), None) => Ok(result),
                    (None, None) => return None,
                };
                Some(Self::Response { id, outcome })
            }
            (Some(id), Some(method)) => Some(Self::Request { id, method, params }),
            (None, Some(method)) => Some(Self::Notification { method, params }),
            (None, None) => None,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".into(), Value::from("2.0"));
        match self {
            Self::Request { id, method, params } => {
                map.insert("id".into(), id.clone());
                map.insert("method".into(), Value::from(method.as_str()));
                if let Some(params) = params {
                    map.insert("params".into(), params.clone());
                }
            }
            Self::Response { id, outcome } => {
                map.insert("id".into(), id.clone());
                match outcome {
                    Ok(result) => {
                        map.insert("result".into(), result.clone());
                    }
                    Err(error) => {
                        map.insert("error".into(), serde_json::json!(error));
                    }
                }
            }
            Self::Notification { method, params } => {
                map.insert("method".into(), Value::from(method.as_str()));
                if let Some(params) = params {
                    map.insert("params".into(), params.clone());
                }
            }
        }
        Value::Object(map)
    }
}

fn decode_error(error: Value) -> ResponseError {
    serde_json::from_value(error.clone()).unwrap_or_else(|_| ResponseError {
        code: INTERNAL_ERROR,
        message: error.to_string(),
        data: None,
    })
}

pub(crate) fn initialize_params(
    root_uri: Option<&str>,
    initialization_options: &Value,
) -> Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {
            "workspace": {
                "configuration": true,
                "didChangeConfiguration": { "dynamicRegistration": false }
            },
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            }
        },
        "initializationOptions": initialization_options
    })
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_configuration_params() -> Value {
    serde_json::json!({ "settings": {} })
}

/// Flatten the grouped rule listing (`{ "<language>": [ { "key": .. }, .. ] }`)
/// into rule ids, in the order the server listed them.
pub(crate) fn flatten_rule_groups(listing: &Value) -> Vec<String> {
    let Some(groups) = listing.as_object() else {
        return Vec::new();
    };
    groups
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|rule| match rule {
            Value::String(key) => Some(key.clone()),
            other => other.get("key").and_then(Value::as_str).map(String::from),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: LspRange,
    pub message: String,
    #[serde(default)]
    pub code: Option<DiagnosticCode>,
    #[serde(default)]
    pub source: Option<String>,
}

/// LSP allows `code` to be either an integer or a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum DiagnosticCode {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspRange {
    pub start: LspPosition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspPosition {
    pub line: u32,
    pub character: u32,
}

impl LspDiagnostic {
    /// Convert to a 1-based diagnostic reported against `path`.
    pub fn to_diagnostic(&self, path: &Path) -> Diagnostic {
        let code = match &self.code {
            Some(DiagnosticCode::Text(code)) => code.clone(),
            Some(DiagnosticCode::Number(code)) => code.to_string(),
            None => self
                .source
                .clone()
                .unwrap_or_else(|| String::from("unknown")),
        };
        Diagnostic::new(
            path.to_path_buf(),
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.message.clone(),
            code,
        )
    }
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
