//! Method-name registry for server-initiated requests and notifications.
//!
//! Handlers are plain functions over the session's owned state `S`, so
//! dispatch needs no shared ownership or locking.

use std::collections::HashMap;

use serde_json::Value;

/// Handles a server-to-client request; the return value is sent back as the
/// response `result`.
pub type RequestHandler<S> = fn(&mut S, Option<Value>) -> Value;

/// Handles a server-to-client notification.
pub type NotificationHandler<S> = fn(&mut S, Option<Value>);

/// What to do with a server request nobody registered a handler for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnhandledRequestPolicy {
    /// Send nothing back. Some servers wait forever on such requests.
    #[default]
    Drop,
    /// Reply with JSON-RPC `-32601 Method not found`.
    MethodNotFound,
}

pub struct Dispatcher<S> {
    requests: HashMap<String, RequestHandler<S>>,
    notifications: HashMap<String, NotificationHandler<S>>,
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self {
            requests: HashMap::new(),
            notifications: HashMap::new(),
        }
    }
}

impl<S> Dispatcher<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `method`, replacing any earlier one.
    pub fn on_request(&mut self, method: &str, handler: RequestHandler<S>) -> &mut Self {
        self.requests.insert(method.to_string(), handler);
        self
    }

    /// Register the handler for `method`, replacing any earlier one.
    pub fn on_notification(&mut self, method: &str, handler: NotificationHandler<S>) -> &mut Self {
        self.notifications.insert(method.to_string(), handler);
        self
    }

    /// Returns `None` when no handler is registered for `method`.
    pub fn handle_request(&self, state: &mut S, method: &str, params: Option<Value>) -> Option<Value> {
        let handler = self.requests.get(method)?;
        Some(handler(state, params))
    }

    /// Returns `false` when no handler is registered for `method`.
    pub fn handle_notification(&self, state: &mut S, method: &str, params: Option<Value>) -> bool {
        match self.notifications.get(method) {
            Some(handler) => {
                handler(state, params);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        hits: Vec<String>,
    }

    fn first(state: &mut Counter, _params: Option<Value>) -> Value {
        state.hits.push("first".into());
        Value::from(1)
    }

    fn second(state: &mut Counter, _params: Option<Value>) -> Value {
        state.hits.push("second".into());
        Value::from(2)
    }

    fn echo(_state: &mut Counter, params: Option<Value>) -> Value {
        params.unwrap_or(Value::Null)
    }

    fn note(state: &mut Counter, params: Option<Value>) {
        state.hits.push(params.map(|p| p.to_string()).unwrap_or_default());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut dispatcher: Dispatcher<Counter> = Dispatcher::new();
        dispatcher.on_request("m", first).on_request("m", second);

        let mut state = Counter::default();
        let result = dispatcher.handle_request(&mut state, "m", None);
        assert_eq!(result, Some(Value::from(2)));
        assert_eq!(state.hits, vec!["second"]);
    }

    #[test]
    fn test_request_handler_receives_params() {
        let mut dispatcher: Dispatcher<Counter> = Dispatcher::new();
        dispatcher.on_request("echo", echo);

        let mut state = Counter::default();
        let result = dispatcher.handle_request(&mut state, "echo", Some(serde_json::json!([1])));
        assert_eq!(result, Some(serde_json::json!([1])));
    }

    #[test]
    fn test_unregistered_methods_are_ignored() {
        let dispatcher: Dispatcher<Counter> = Dispatcher::new();
        let mut state = Counter::default();
        assert!(dispatcher.handle_request(&mut state, "nope", None).is_none());
        assert!(!dispatcher.handle_notification(&mut state, "nope", None));
        assert!(state.hits.is_empty());
    }

    #[test]
    fn test_requests_and_notifications_are_separate_tables() {
        let mut dispatcher: Dispatcher<Counter> = Dispatcher::new();
        dispatcher.on_notification("n", note);

        let mut state = Counter::default();
        assert!(dispatcher.handle_request(&mut state, "n", None).is_none());
        assert!(dispatcher.handle_notification(&mut state, "n", Some(Value::from(5))));
        assert_eq!(state.hits, vec!["5"]);
    }
}
