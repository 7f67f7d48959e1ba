use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::connection::ConnectionInfo;
use crate::error::{ErrCode, ExchangeError, Result, TypedError};
use crate::registry::{CommandRegistry, Completion, Handler};
use crate::stream::{MessageStream, Received};

/// Where one server-side exchange is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitCommand,
    Acknowledged,
    HandlerRunning,
    Completed,
    Failed,
    Draining,
    Closed,
}

/// How a served exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The handler finished and the end sentinel went out.
    Completed,
    /// The handler failed or panicked; the typed error went to the client.
    Failed(TypedError),
    /// The command name wasn't registered.
    Rejected(String),
}

/// Runs the server side of the exchange protocol against a registry.
///
/// Per command: read the name, acknowledge it (or reject it with
/// `COMMAND_UNDEFINED`), run the handler inside a fault boundary, send its
/// reply with the end sentinel, then drain to the client's end sentinel.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Serve commands until the peer closes the connection.
    ///
    /// Returns the number of exchanges served. A peer that hangs up or
    /// resets between frames ends the loop without error.
    pub fn serve(&self, stream: &mut MessageStream, conn: &ConnectionInfo) -> Result<usize> {
        let mut served = 0usize;
        loop {
            match self.serve_one(stream, conn) {
                Ok(Some(_)) => served += 1,
                Ok(None) => {
                    debug!(conn = %conn.id, served, "peer closed connection");
                    return Ok(served);
                }
                Err(err) if err.is_peer_reset() => {
                    debug!(conn = %conn.id, served, error = %err, "peer reset connection");
                    return Ok(served);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Serve a single command exchange.
    ///
    /// Returns `Ok(None)` when the connection closed cleanly before a command
    /// arrived. An unreadable command frame is answered with `READ_COMMAND`
    /// and then returned as an error, since the connection can't be trusted
    /// after it.
    pub fn serve_one(
        &self,
        stream: &mut MessageStream,
        conn: &ConnectionInfo,
    ) -> Result<Option<SessionOutcome>> {
        stream.begin_exchange();
        trace_state(conn, SessionState::AwaitCommand);

        let name = match read_command(stream) {
            Ok(Some(name)) => name,
            Ok(None) => return Ok(None),
            Err(err) => {
                if !err.is_peer_reset() {
                    let typed =
                        ErrCode::READ_COMMAND.error(format!("failed to read command: {err}"));
                    if let Err(write_err) = stream.write_error(&typed) {
                        debug!(conn = %conn.id, error = %write_err, "could not report read failure");
                    }
                }
                warn!(conn = %conn.id, error = %err, "failed to read command");
                return Err(err);
            }
        };

        let Some(handler) = self.registry.lookup(&name) else {
            warn!(conn = %conn.id, command = %name, "command undefined");
            let typed =
                ErrCode::COMMAND_UNDEFINED.error(format!("command [{name}] is not defined"));
            stream.write_error(&typed)?;
            close(stream, conn)?;
            return Ok(Some(SessionOutcome::Rejected(name)));
        };

        stream.write_message(b"")?;
        trace_state(conn, SessionState::Acknowledged);

        let outcome = run_handler(handler.as_ref(), stream, conn, &name)?;
        close(stream, conn)?;

        match &outcome {
            SessionOutcome::Completed => {
                info!(conn = %conn.id, command = %name, "command completed")
            }
            SessionOutcome::Failed(err) => warn!(
                conn = %conn.id,
                command = %name,
                code = err.code.0,
                error = %err.message,
                "command failed"
            ),
            SessionOutcome::Rejected(_) => {}
        }
        Ok(Some(outcome))
    }
}

fn read_command(stream: &mut MessageStream) -> Result<Option<String>> {
    match stream.receive() {
        Ok(Received::Message(payload)) => String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|_| ExchangeError::Protocol("command name is not valid UTF-8".to_string())),
        Ok(Received::End(_)) => Err(ExchangeError::Protocol(
            "end sentinel where a command name was expected".to_string(),
        )),
        Ok(Received::Error(err)) => Err(ExchangeError::Protocol(format!(
            "error frame where a command name was expected: {err}"
        ))),
        Err(err) if err.is_closed() => Ok(None),
        Err(err) => Err(err),
    }
}

fn run_handler(
    handler: &dyn Handler,
    stream: &mut MessageStream,
    conn: &ConnectionInfo,
    name: &str,
) -> Result<SessionOutcome> {
    trace_state(conn, SessionState::HandlerRunning);
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(stream, conn)));

    let failure = match result {
        Ok(Ok(Completion::Reply(payload))) if stream.end_sent() => {
            warn!(
                conn = %conn.id,
                command = %name,
                len = payload.len(),
                "handler already wrote the end sentinel; reply discarded"
            );
            None
        }
        Ok(Ok(Completion::Reply(payload))) => {
            stream.write_end_with_data(payload)?;
            None
        }
        Ok(Ok(Completion::Ended)) => {
            stream.write_end()?;
            None
        }
        // The client ended the exchange under the handler: a clean finish.
        Ok(Err(ExchangeError::UnexpectedEnd)) if stream.peer_ended() => None,
        Ok(Err(err)) if err.is_fatal() => {
            warn!(conn = %conn.id, command = %name, error = %err, "transport failed inside handler");
            return Err(err);
        }
        Ok(Err(err)) => Some(err.to_typed()),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(conn = %conn.id, command = %name, panic = %message, "command handler panicked");
            Some(ErrCode::UNKNOWN.error(format!("command [{name}] handler fault: {message}")))
        }
    };

    Ok(match failure {
        None => {
            trace_state(conn, SessionState::Completed);
            SessionOutcome::Completed
        }
        // Nothing may follow our end sentinel, so the handler's own end wins.
        Some(typed) if stream.end_sent() => {
            warn!(
                conn = %conn.id,
                command = %name,
                error = %typed,
                "handler failed after writing the end sentinel; treated as ended"
            );
            trace_state(conn, SessionState::Completed);
            SessionOutcome::Completed
        }
        Some(typed) => {
            trace_state(conn, SessionState::Failed);
            stream.write_error(&typed)?;
            SessionOutcome::Failed(typed)
        }
    })
}

/// Send our end sentinel if still owed and drain to the client's.
fn close(stream: &mut MessageStream, conn: &ConnectionInfo) -> Result<()> {
    trace_state(conn, SessionState::Draining);
    stream.finish()?;
    trace_state(conn, SessionState::Closed);
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn trace_state(conn: &ConnectionInfo, state: SessionState) {
    debug!(conn = %conn.id, ?state, "session state");
}

#[cfg(all(test, unix))]
mod tests {
    use std::thread;

    use super::*;
    use crate::exchanger::Exchanger;
    use crate::payload::Payload;
    use crate::registry::HandlerResult;

    fn conn() -> ConnectionInfo {
        ConnectionInfo {
            id: "conn-test".to_string(),
            transport: "unix-domain-socket",
            peer_credentials: None,
            peer_addr: None,
        }
    }

    fn dispatcher(registry: CommandRegistry) -> Dispatcher {
        Dispatcher::new(Arc::new(registry))
    }

    fn echo(stream: &mut MessageStream, _conn: &ConnectionInfo) -> HandlerResult {
        let initial = stream.receive_message()?;
        Ok(Completion::Reply(initial))
    }

    #[test]
    fn acknowledges_then_replies_with_end() {
        let (mut server, mut client) = MessageStream::pair().unwrap();
        let dispatcher = dispatcher(CommandRegistry::new().with("/echo", echo));

        let worker = thread::spawn(move || dispatcher.serve_one(&mut server, &conn()).unwrap());

        client.write_message(b"/echo").unwrap();
        client.write_message(b"hi").unwrap();
        assert_eq!(client.receive().unwrap(), Received::Message(Payload::new()));
        assert_eq!(client.receive().unwrap(), Received::End(Payload::from("hi")));
        client.write_end().unwrap();

        assert_eq!(worker.join().unwrap(), Some(SessionOutcome::Completed));
    }

    #[test]
    fn unknown_command_rejected_then_drained() {
        let (mut server, mut client) = MessageStream::pair().unwrap();
        let dispatcher = dispatcher(CommandRegistry::new());

        let worker = thread::spawn(move || dispatcher.serve_one(&mut server, &conn()).unwrap());

        client.write_message(b"/unknown").unwrap();
        client.write_message(b"ignored").unwrap();
        match client.receive().unwrap() {
            Received::Error(err) => {
                assert!(err.is(ErrCode::COMMAND_UNDEFINED));
                assert!(err.message.contains("/unknown"));
            }
            other => panic!("expected error frame, got {other:?}"),
        }
        assert_eq!(client.receive().unwrap(), Received::End(Payload::new()));
        client.write_end().unwrap();

        assert_eq!(
            worker.join().unwrap(),
            Some(SessionOutcome::Rejected("/unknown".to_string()))
        );
    }

    #[test]
    fn handler_error_becomes_typed_error() {
        let (mut server, mut client) = MessageStream::pair().unwrap();
        let dispatcher = dispatcher(CommandRegistry::new().with(
            "/deny",
            |_: &mut MessageStream, _: &ConnectionInfo| -> HandlerResult {
                Err(ErrCode(403).error("denied").into())
            },
        ));

        let worker = thread::spawn(move || dispatcher.serve_one(&mut server, &conn()).unwrap());

        client.write_message(b"/deny").unwrap();
        assert_eq!(client.receive().unwrap(), Received::Message(Payload::new()));
        assert_eq!(
            client.receive().unwrap(),
            Received::Error(ErrCode(403).error("denied"))
        );
        assert_eq!(client.finish().unwrap(), Some(Payload::new()));

        assert_eq!(
            worker.join().unwrap(),
            Some(SessionOutcome::Failed(ErrCode(403).error("denied")))
        );
    }

    #[test]
    fn panic_is_contained() {
        let (mut server, mut client) = MessageStream::pair().unwrap();
        let dispatcher = dispatcher(CommandRegistry::new().with(
            "/boom",
            |_: &mut MessageStream, _: &ConnectionInfo| -> HandlerResult { panic!("kaboom") },
        ));

        let worker = thread::spawn(move || dispatcher.serve_one(&mut server, &conn()).unwrap());

        client.write_message(b"/boom").unwrap();
        client.receive().unwrap();
        match client.receive().unwrap() {
            Received::Error(err) => {
                assert!(err.is(ErrCode::UNKNOWN));
                assert!(err.message.contains("kaboom"));
            }
            other => panic!("expected error frame, got {other:?}"),
        }
        client.finish().unwrap();

        assert!(matches!(
            worker.join().unwrap(),
            Some(SessionOutcome::Failed(err)) if err.is(ErrCode::UNKNOWN)
        ));
    }

    #[test]
    fn client_end_during_handler_is_clean() {
        let (mut server, mut client) = MessageStream::pair().unwrap();
        let dispatcher = dispatcher(CommandRegistry::new().with(
            "/stream",
            |stream: &mut MessageStream, _: &ConnectionInfo| -> HandlerResult {
                loop {
                    stream.receive_message()?;
                }
            },
        ));

        let worker = thread::spawn(move || dispatcher.serve_one(&mut server, &conn()).unwrap());

        client.write_message(b"/stream").unwrap();
        client.write_message(b"one").unwrap();
        client.receive().unwrap();
        client.write_end_with_data(b"done").unwrap();
        assert_eq!(client.receive().unwrap(), Received::End(Payload::new()));

        assert_eq!(worker.join().unwrap(), Some(SessionOutcome::Completed));
    }

    #[test]
    fn clean_close_before_command() {
        let (mut server, client) = MessageStream::pair().unwrap();
        drop(client);

        let dispatcher = dispatcher(CommandRegistry::new());
        assert_eq!(dispatcher.serve_one(&mut server, &conn()).unwrap(), None);
    }

    #[test]
    fn end_frame_instead_of_command_is_read_error() {
        let (mut server, mut client) = MessageStream::pair().unwrap();
        client.write_end().unwrap();

        let dispatcher = dispatcher(CommandRegistry::new());
        let err = dispatcher.serve_one(&mut server, &conn()).unwrap_err();
        assert!(matches!(err, ExchangeError::Protocol(_)));

        match client.receive().unwrap() {
            Received::Error(err) => assert!(err.is(ErrCode::READ_COMMAND)),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn serve_counts_exchanges_until_close() {
        let (mut server, mut client) = MessageStream::pair().unwrap();
        let dispatcher = dispatcher(CommandRegistry::new().with("/echo", echo));

        let worker = thread::spawn(move || dispatcher.serve(&mut server, &conn()).unwrap());

        for word in ["a", "b", "c"] {
            client.begin_exchange();
            client.write_message(b"/echo").unwrap();
            client.write_message(word).unwrap();
            client.receive().unwrap();
            assert_eq!(client.receive().unwrap(), Received::End(Payload::from(word)));
            client.write_end().unwrap();
        }
        drop(client);

        assert_eq!(worker.join().unwrap(), 3);
    }

    fn ok(stream: &mut MessageStream, _conn: &ConnectionInfo) -> HandlerResult {
        stream.receive_message()?;
        Completion::reply("fine")
    }

    /// Serves two exchanges on one connection and returns both outcomes.
    fn serve_two(
        registry: CommandRegistry,
        mut server: MessageStream,
    ) -> thread::JoinHandle<Vec<Option<SessionOutcome>>> {
        let dispatcher = dispatcher(registry);
        thread::spawn(move || {
            (0..2)
                .map(|_| dispatcher.serve_one(&mut server, &conn()).unwrap())
                .collect()
        })
    }

    #[test]
    fn failure_after_handler_end_keeps_connection_in_sync() {
        let (server, mut client) = MessageStream::pair().unwrap();
        let registry = CommandRegistry::new().with("/ok", ok).with(
            "/late",
            |stream: &mut MessageStream, _: &ConnectionInfo| -> HandlerResult {
                stream.write_end_with_data(b"partial")?;
                Err(ErrCode(77).error("late failure").into())
            },
        );
        let worker = serve_two(registry, server);

        let first = Exchanger::new(&mut client).exchange("/late").unwrap();
        assert_eq!(first.as_str(), Some("partial"));
        let second = Exchanger::new(&mut client).exchange("/ok").unwrap();
        assert_eq!(second.as_str(), Some("fine"));

        let outcomes = worker.join().unwrap();
        assert_eq!(outcomes, vec![Some(SessionOutcome::Completed); 2]);
    }

    #[test]
    fn reply_after_handler_end_is_discarded() {
        let (server, mut client) = MessageStream::pair().unwrap();
        let registry = CommandRegistry::new().with("/ok", ok).with(
            "/early",
            |stream: &mut MessageStream, _: &ConnectionInfo| -> HandlerResult {
                stream.write_end()?;
                Completion::reply("final")
            },
        );
        let worker = serve_two(registry, server);

        let first = Exchanger::new(&mut client).exchange("/early").unwrap();
        assert!(first.is_empty());
        let second = Exchanger::new(&mut client).exchange("/ok").unwrap();
        assert_eq!(second.as_str(), Some("fine"));

        let outcomes = worker.join().unwrap();
        assert_eq!(outcomes, vec![Some(SessionOutcome::Completed); 2]);
    }

    #[test]
    fn panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u32), "non-string panic payload");
    }
}
