use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::connection::ConnectionInfo;
use crate::error::ExchangeError;
use crate::payload::Payload;
use crate::stream::MessageStream;

/// How a handler finished its side of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Send this payload with the end sentinel.
    Reply(Payload),
    /// The handler already wrote its end sentinel.
    Ended,
}

impl Completion {
    pub fn reply(payload: impl Into<Payload>) -> HandlerResult {
        Ok(Completion::Reply(payload.into()))
    }

    /// Reply with `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> HandlerResult {
        Ok(Completion::Reply(Payload::from_json(value)?))
    }

    /// Reply with an empty end sentinel.
    pub fn empty() -> HandlerResult {
        Ok(Completion::Reply(Payload::new()))
    }
}

pub type HandlerResult = std::result::Result<Completion, ExchangeError>;

/// Server-side logic for one command.
///
/// The dispatcher has already acknowledged the command when `handle` runs;
/// the client's initial payload is the first frame waiting on `stream`.
pub trait Handler: Send + Sync {
    fn handle(&self, stream: &mut MessageStream, conn: &ConnectionInfo) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&mut MessageStream, &ConnectionInfo) -> HandlerResult + Send + Sync,
{
    fn handle(&self, stream: &mut MessageStream, conn: &ConnectionInfo) -> HandlerResult {
        self(stream, conn)
    }
}

/// Maps command names to handlers.
///
/// Filled once at startup and shared read-only (behind an `Arc`) by every
/// connection afterwards. Registering a name twice keeps the later handler.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure handler. Returns true when it replaced one.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> bool
    where
        F: Fn(&mut MessageStream, &ConnectionInfo) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_handler(name, Arc::new(handler))
    }

    /// Register any [`Handler`] implementation. Returns true when it
    /// replaced one.
    pub fn register_handler(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> bool {
        let name = name.into();
        let replaced = self.handlers.insert(name.clone(), handler).is_some();
        if replaced {
            debug!(command = %name, "replaced command handler");
        } else {
            debug!(command = %name, "registered command handler");
        }
        replaced
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut MessageStream, &ConnectionInfo) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(name, handler);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{FORGOT, LOGIN, REGISTRY};

    fn reply_with(
        text: &'static str,
    ) -> impl Fn(&mut MessageStream, &ConnectionInfo) -> HandlerResult + Send + Sync + 'static {
        move |_stream: &mut MessageStream, _conn: &ConnectionInfo| Completion::reply(text)
    }

    struct Fixed;

    impl Handler for Fixed {
        fn handle(&self, _stream: &mut MessageStream, _conn: &ConnectionInfo) -> HandlerResult {
            Ok(Completion::Ended)
        }
    }

    #[test]
    fn lookup_registered_and_missing() {
        let registry = CommandRegistry::new()
            .with(LOGIN, reply_with("login"))
            .with(REGISTRY, reply_with("registry"));

        assert!(registry.lookup(LOGIN).is_some());
        assert!(registry.lookup(FORGOT).is_none());
        assert!(registry.contains(REGISTRY));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn names_are_case_sensitive() {
        let registry = CommandRegistry::new().with(LOGIN, reply_with("login"));
        assert!(registry.lookup("/LOGIN").is_none());
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = CommandRegistry::new();
        assert!(!registry.register(LOGIN, reply_with("first")));
        assert!(registry.register(LOGIN, reply_with("second")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_sorted() {
        let mut registry = CommandRegistry::new()
            .with(REGISTRY, reply_with("r"))
            .with(FORGOT, reply_with("f"));
        registry.register_handler(LOGIN, Arc::new(Fixed));

        assert_eq!(registry.names(), vec![FORGOT, LOGIN, REGISTRY]);
        assert!(format!("{registry:?}").contains("/forgot"));
    }

    #[test]
    fn empty_registry() {
        let registry = CommandRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }

    #[test]
    fn completion_helpers() {
        assert_eq!(
            Completion::json(&serde_json::json!({"token": "xyz"})).unwrap(),
            Completion::Reply(Payload::from(r#"{"token":"xyz"}"#))
        );
        assert_eq!(Completion::empty().unwrap(), Completion::Reply(Payload::new()));
    }
}
