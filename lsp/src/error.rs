//! Request-level failures surfaced by the RPC session.

use crate::codec::FrameError;
use crate::protocol::ResponseError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The server answered the request with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },
    /// The server closed its output while a response or batch was awaited.
    #[error("server closed the stream")]
    StreamClosed,
    /// The completion slot was dropped before it resolved.
    #[error("pending call abandoned")]
    Abandoned,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<ResponseError> for RpcError {
    fn from(error: ResponseError) -> Self {
        Self::Server {
            code: error.code,
            message: error.message,
        }
    }
}
