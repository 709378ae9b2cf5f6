//! JSON-RPC session: request ids, pending-call correlation and routing of
//! server-initiated traffic into a [`Dispatcher`].
//!
//! Everything runs on the caller's task. Nothing reads the pipe in the
//! background; instead every suspension point ([`RpcSession::wait`],
//! [`RpcSession::pump_until`]) reads and dispatches frames until its own
//! one-shot slot resolves. Responses that arrive for other in-flight
//! requests are parked in their slots along the way, so correlation is by id
//! and independent of arrival order.
//!
//! Writes also read: while a frame is going out, inbound frames are drained
//! into a queue so a server blocked on its own stdout never stalls the write.
//! Queued frames are dispatched in arrival order by the next pump.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::codec::{FrameError, FrameReader, FrameWriter};
use crate::debug_log::{DebugLog, NoDebugLog};
use crate::dispatch::{Dispatcher, UnhandledRequestPolicy};
use crate::error::RpcError;
use crate::protocol::{self, Message, ResponseError};

type CallResult = Result<Value, RpcError>;

type Inbound = Result<Option<Value>, FrameError>;

/// EOF and fatal read errors end the inbound stream.
fn ends_stream(inbound: &Inbound) -> bool {
    match inbound {
        Ok(frame) => frame.is_none(),
        Err(e) => !e.is_recoverable(),
    }
}

/// Caller's side of a request sent with [`RpcSession::send_request`].
///
/// Resolves exactly once, via [`RpcSession::wait`].
#[derive(Debug)]
pub struct ResponseHandle {
    id: u64,
    rx: oneshot::Receiver<CallResult>,
}

impl ResponseHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct RpcSession<R, W, S> {
    reader: FrameReader<R>,
    /// Frames read while a write was in progress, not yet dispatched.
    inbox: VecDeque<Inbound>,
    read_closed: bool,
    writer: FrameWriter<W>,
    debug_log: Box<dyn DebugLog>,
    /// Monotonic; ids are never reused within a session.
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<CallResult>>,
    dispatcher: Dispatcher<S>,
    state: S,
    unhandled_requests: UnhandledRequestPolicy,
}

impl<R, W, S> RpcSession<R, W, S>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, dispatcher: Dispatcher<S>, state: S) -> Self {
        Self {
            reader: FrameReader::new(reader),
            inbox: VecDeque::new(),
            read_closed: false,
            writer: FrameWriter::new(writer),
            debug_log: Box::new(NoDebugLog),
            next_id: 1,
            pending: HashMap::new(),
            dispatcher,
            state,
            unhandled_requests: UnhandledRequestPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_debug_log(mut self, debug_log: Box<dyn DebugLog>) -> Self {
        self.debug_log = debug_log;
        self
    }

    #[must_use]
    pub fn with_unhandled_requests(mut self, policy: UnhandledRequestPolicy) -> Self {
        self.unhandled_requests = policy;
        self
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Number of requests still waiting for a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Append a lifecycle event to the debug log.
    pub fn record(&mut self, event: &str) {
        self.debug_log.record(event);
    }

    /// Send a request and return its completion handle without waiting.
    pub async fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<ResponseHandle, RpcError> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = Message::Request {
            id: Value::from(id),
            method: method.to_string(),
            params,
        };
        if let Err(e) = self.write(&request).await {
            // Don't leak the pending entry for a request that never went out.
            self.pending.remove(&id);
            return Err(e);
        }

        Ok(ResponseHandle { id, rx })
    }

    /// Send a request and wait for its response.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> CallResult {
        let handle = self.send_request(method, params).await?;
        self.wait(handle).await
    }

    /// Dispatch inbound traffic until `handle`'s response has arrived.
    ///
    /// Fails with [`RpcError::Server`] when the response carries an error.
    pub async fn wait(&mut self, handle: ResponseHandle) -> CallResult {
        self.pump_until(handle.rx).await?
    }

    /// Send a notification. Nothing is tracked.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let notification = Message::Notification {
            method: method.to_string(),
            params,
        };
        self.write(&notification).await
    }

    /// Dispatch inbound traffic until `rx` resolves.
    ///
    /// There is no timeout: if the server never resolves the slot and keeps
    /// the stream open, this never returns.
    pub async fn pump_until<T>(&mut self, mut rx: oneshot::Receiver<T>) -> Result<T, RpcError> {
        loop {
            match rx.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Closed) => return Err(RpcError::Abandoned),
                Err(TryRecvError::Empty) => self.pump_once().await?,
            }
        }
    }

    /// Read one frame and dispatch it.
    ///
    /// Malformed frames are logged and dropped; only I/O failure or EOF end
    /// the session.
    pub async fn pump_once(&mut self) -> Result<(), RpcError> {
        match self.next_inbound().await {
            Ok(Some(frame)) => {
                self.debug_log.record(&format!("recv: {frame}"));
                self.handle_frame(frame).await
            }
            Ok(None) => Err(RpcError::StreamClosed),
            Err(e) if e.is_recoverable() => {
                if let FrameError::Parse { body, .. } = &e {
                    self.debug_log.record(&format!("recv: {body}"));
                }
                tracing::warn!("Dropping malformed frame: {e}");
                self.debug_log.record(&format!("parse error: {e}"));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Oldest queued frame, or a fresh read when the queue is empty.
    async fn next_inbound(&mut self) -> Inbound {
        if let Some(inbound) = self.inbox.pop_front() {
            return inbound;
        }
        if self.read_closed {
            return Ok(None);
        }
        let inbound = self.reader.read_frame().await;
        self.read_closed = ends_stream(&inbound);
        inbound
    }

    async fn handle_frame(&mut self, frame: Value) -> Result<(), RpcError> {
        let Some(message) = Message::from_value(frame) else {
            tracing::trace!("Ignoring unclassifiable JSON-RPC frame");
            return Ok(());
        };
        self.handle_message(message).await
    }

    /// Route one inbound message: responses to their pending call, requests
    /// and notifications to the dispatcher.
    pub async fn handle_message(&mut self, message: Message) -> Result<(), RpcError> {
        match message {
            Message::Response { id, outcome } => {
                let sender = id.as_u64().and_then(|id| self.pending.remove(&id));
                match sender {
                    Some(tx) => {
                        // Receiver may be gone if the caller dropped its handle.
                        let _ = tx.send(outcome.map_err(RpcError::from));
                    }
                    None => tracing::trace!("Ignoring response for unknown id {id}"),
                }
            }
            Message::Request { id, method, params } => {
                match self
                    .dispatcher
                    .handle_request(&mut self.state, &method, params)
                {
                    Some(result) => {
                        let response = Message::Response {
                            id,
                            outcome: Ok(result),
                        };
                        self.write(&response).await?;
                    }
                    None => self.reply_unhandled(id, &method).await?,
                }
            }
            Message::Notification { method, params } => {
                if !self
                    .dispatcher
                    .handle_notification(&mut self.state, &method, params)
                {
                    tracing::trace!("Ignoring notification: {method}");
                }
            }
        }
        Ok(())
    }

    async fn reply_unhandled(&mut self, id: Value, method: &str) -> Result<(), RpcError> {
        match self.unhandled_requests {
            UnhandledRequestPolicy::Drop => {
                tracing::debug!("Server sent unhandled request {method}; not replying");
                Ok(())
            }
            UnhandledRequestPolicy::MethodNotFound => {
                tracing::debug!("Server sent unhandled request {method}; replying method not found");
                let response = Message::Response {
                    id,
                    outcome: Err(ResponseError {
                        code: protocol::METHOD_NOT_FOUND,
                        message: format!("Method not found: {method}"),
                        data: None,
                    }),
                };
                self.write(&response).await
            }
        }
    }

    async fn write(&mut self, message: &Message) -> Result<(), RpcError> {
        let value = message.to_value();
        self.debug_log.record(&format!("send: {value}"));

        let write = self.writer.write_frame(&value);
        tokio::pin!(write);
        loop {
            tokio::select! {
                written = &mut write => return written.map_err(RpcError::from),
                inbound = self.reader.read_frame(), if !self.read_closed => {
                    self.read_closed = ends_stream(&inbound);
                    self.inbox.push_back(inbound);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn written(&self) -> &W {
        self.writer.get_ref()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::codec::{FrameDecoder, encode_frame};

    /// Concatenate frames into a byte stream the session can read.
    pub(crate) fn inbound(frames: &[Value]) -> Cursor<Vec<u8>> {
        let mut bytes = Vec::new();
        for frame in frames {
            bytes.extend(encode_frame(frame).unwrap());
        }
        Cursor::new(bytes)
    }

    /// Decode everything the session wrote.
    pub(crate) fn outbound(bytes: &[u8]) -> Vec<Value> {
        let mut decoder = FrameDecoder::new();
        decoder.push(bytes);
        std::iter::from_fn(|| decoder.next_frame().map(Result::unwrap)).collect()
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingLog(pub Arc<Mutex<Vec<String>>>);

    impl DebugLog for RecordingLog {
        fn record(&mut self, event: &str) {
            self.0.lock().unwrap().push(event.to_string());
        }
    }

    #[derive(Default)]
    struct Seen {
        notes: Vec<Value>,
    }

    fn answer(_state: &mut Seen, params: Option<Value>) -> Value {
        serde_json::json!({ "echo": params })
    }

    fn note(state: &mut Seen, params: Option<Value>) {
        state.notes.push(params.unwrap_or(Value::Null));
    }

    type TestSession = RpcSession<Cursor<Vec<u8>>, Vec<u8>, Seen>;

    fn session(frames: &[Value]) -> TestSession {
        let mut dispatcher: Dispatcher<Seen> = Dispatcher::new();
        dispatcher
            .on_request("test/answer", answer)
            .on_notification("test/note", note);
        RpcSession::new(inbound(frames), Vec::new(), dispatcher, Seen::default())
    }

    fn response(id: u64, result: Value) -> Value {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_from_one() {
        let mut session = session(&[]);
        let a = session.send_request("a", None).await.unwrap();
        let b = session.send_request("b", None).await.unwrap();
        let c = session.send_request("c", None).await.unwrap();
        assert_eq!((a.id(), b.id(), c.id()), (1, 2, 3));
        assert_eq!(session.pending_count(), 3);

        let sent = outbound(session.written());
        let ids: Vec<u64> = sent.iter().map(|m| m["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(sent[0]["method"], "a");
    }

    #[tokio::test]
    async fn test_request_resolves_with_result() {
        let mut session = session(&[response(1, serde_json::json!({"capabilities": {}}))]);
        let result = session.request("initialize", None).await.unwrap();
        assert!(result["capabilities"].is_object());
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_permuted_responses_resolve_their_own_requests() {
        let mut session = session(&[
            response(3, Value::from("three")),
            response(1, Value::from("one")),
            response(2, Value::from("two")),
        ]);
        let h1 = session.send_request("m", None).await.unwrap();
        let h2 = session.send_request("m", None).await.unwrap();
        let h3 = session.send_request("m", None).await.unwrap();

        assert_eq!(session.wait(h2).await.unwrap(), "two");
        assert_eq!(session.wait(h3).await.unwrap(), "three");
        assert_eq!(session.wait(h1).await.unwrap(), "one");
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_response_rejects_only_that_request() {
        let mut session = session(&[
            serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "error": { "code": -32602, "message": "bad params" }
            }),
            response(2, Value::from(true)),
        ]);
        let h1 = session.send_request("first", None).await.unwrap();
        let h2 = session.send_request("second", None).await.unwrap();

        let err = session.wait(h1).await.unwrap_err();
        assert!(matches!(err, RpcError::Server { code: -32602, ref message } if message == "bad params"));
        assert_eq!(session.wait(h2).await.unwrap(), true);
    }

    #[tokio::test]
    async fn test_eof_while_waiting_is_stream_closed() {
        let mut session = session(&[]);
        let err = session.request("m", None).await.unwrap_err();
        assert!(matches!(err, RpcError::StreamClosed));
        // The call is left pending; nothing will ever resolve it.
        assert_eq!(session.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_notify_sends_without_id() {
        let mut session = session(&[]);
        session
            .notify("initialized", Some(serde_json::json!({})))
            .await
            .unwrap();
        let sent = outbound(session.written());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "initialized");
        assert!(sent[0].get("id").is_none());
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_server_request_is_answered_with_handler_result() {
        let mut session = session(&[
            serde_json::json!({
                "jsonrpc": "2.0", "id": "srv-1", "method": "test/answer", "params": [1]
            }),
            response(1, Value::Null),
        ]);
        session.request("m", None).await.unwrap();

        let sent = outbound(session.written());
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["id"], "srv-1");
        assert_eq!(sent[1]["result"]["echo"], serde_json::json!([1]));
    }

    #[tokio::test]
    async fn test_unhandled_server_request_is_dropped_by_default() {
        let mut session = session(&[
            serde_json::json!({ "jsonrpc": "2.0", "id": 5, "method": "client/registerCapability" }),
            response(1, Value::Null),
        ]);
        session.request("m", None).await.unwrap();

        let sent = outbound(session.written());
        assert_eq!(sent.len(), 1, "only the request itself goes out");
    }

    #[tokio::test]
    async fn test_unhandled_server_request_method_not_found_policy() {
        let mut session = session(&[
            serde_json::json!({ "jsonrpc": "2.0", "id": 5, "method": "client/registerCapability" }),
            response(1, Value::Null),
        ])
        .with_unhandled_requests(UnhandledRequestPolicy::MethodNotFound);
        session.request("m", None).await.unwrap();

        let sent = outbound(session.written());
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["id"], 5);
        assert_eq!(sent[1]["error"]["code"], -32601);
        let msg = sent[1]["error"]["message"].as_str().unwrap();
        assert!(msg.contains("client/registerCapability"));
    }

    #[tokio::test]
    async fn test_notifications_reach_handlers_unknown_ones_ignored() {
        let mut session = session(&[
            serde_json::json!({ "jsonrpc": "2.0", "method": "test/note", "params": 1 }),
            serde_json::json!({ "jsonrpc": "2.0", "method": "window/showMessage", "params": {} }),
            serde_json::json!({ "jsonrpc": "2.0", "method": "test/note", "params": 2 }),
            response(1, Value::Null),
        ]);
        session.request("m", None).await.unwrap();
        assert_eq!(session.state().notes, vec![Value::from(1), Value::from(2)]);
    }

    #[tokio::test]
    async fn test_response_for_unknown_id_ignored() {
        let mut session = session(&[response(999, Value::Null), response(1, Value::from(7))]);
        assert_eq!(session.request("m", None).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped_and_session_continues() {
        let mut bytes = b"Content-Length: 5\r\n\r\n{oops".to_vec();
        bytes.extend(encode_frame(&response(1, Value::from("ok"))).unwrap());

        let log = RecordingLog::default();
        let mut session = RpcSession::new(
            Cursor::new(bytes),
            Vec::new(),
            Dispatcher::new(),
            Seen::default(),
        )
        .with_debug_log(Box::new(log.clone()));

        assert_eq!(session.request("m", None).await.unwrap(), "ok");
        let events = log.0.lock().unwrap();
        assert!(events[0].starts_with("send: "));
        assert_eq!(events[1], "recv: {oops");
        assert!(events[2].starts_with("parse error: "));
        assert!(events[3].starts_with("recv: "));
    }

    #[tokio::test]
    async fn test_frames_read_during_write_are_dispatched_in_order() {
        let (client_io, mut server_io) = tokio::io::duplex(64);
        let (read, write) = tokio::io::split(client_io);
        let mut dispatcher: Dispatcher<Seen> = Dispatcher::new();
        dispatcher.on_notification("test/note", note);
        let mut session = RpcSession::new(read, write, dispatcher, Seen::default());

        // The peer floods the pipe before it reads anything.
        let peer = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            for n in 0..8 {
                let note = serde_json::json!({ "jsonrpc": "2.0", "method": "test/note", "params": n });
                server_io.write_all(&encode_frame(&note).unwrap()).await.unwrap();
            }
            let mut decoder = FrameDecoder::new();
            let mut chunk = vec![0u8; 256];
            let request = loop {
                if let Some(frame) = decoder.next_frame() {
                    break frame.unwrap();
                }
                let n = server_io.read(&mut chunk).await.unwrap();
                decoder.push(&chunk[..n]);
            };
            assert_eq!(request["method"], "m");
            let reply = response(1, Value::from("done"));
            server_io.write_all(&encode_frame(&reply).unwrap()).await.unwrap();
            server_io
        });

        let big = Value::from("x".repeat(2048));
        let result = session.request("m", Some(big)).await.unwrap();
        assert_eq!(result, "done");
        let expected: Vec<Value> = (0..8).map(Value::from).collect();
        assert_eq!(session.state().notes, expected);
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn test_pump_until_abandoned_slot() {
        let mut session = session(&[]);
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        assert!(matches!(
            session.pump_until(rx).await,
            Err(RpcError::Abandoned)
        ));
    }
}
