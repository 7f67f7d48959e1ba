use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{ExchangeError, Result, TypedError};
use crate::payload::Payload;
use crate::stream::{MessageStream, Received};

/// What the client does after a server data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Keep going, optionally sending a reply frame first.
    Continue(Option<Payload>),
    /// Finish the exchange, sending this payload with the end sentinel.
    ///
    /// The exchange then returns the closing payload of the server's end
    /// sentinel, or an empty payload when the server hung up without one.
    End(Payload),
    /// Report a typed error to the server and keep listening.
    Fail(TypedError),
}

/// What the client does after a server error frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Send this error back and abandon the exchange with it.
    Break(TypedError),
    /// Keep listening, optionally sending an error back first.
    Continue(Option<TypedError>),
}

type MessageCallback<'a> = Box<dyn FnMut(Payload, &mut MessageStream) -> Step + 'a>;
type ErrorCallback<'a> = Box<dyn FnMut(&TypedError) -> ErrorDecision + 'a>;

/// Initial payload and callbacks for one client exchange.
///
/// Without `on_message` the exchange ends at the first server data frame.
/// Without `on_error` the first server error frame ends the exchange and is
/// returned as [`ExchangeError::Remote`].
#[derive(Default)]
pub struct ExchangeOptions<'a> {
    data: Option<Payload>,
    on_message: Option<MessageCallback<'a>>,
    on_error: Option<ErrorCallback<'a>>,
}

impl<'a> ExchangeOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial payload sent right after the acknowledgement.
    pub fn data(mut self, data: impl Into<Payload>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Initial payload serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        Ok(self.data(Payload::from_json(value)?))
    }

    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: FnMut(Payload, &mut MessageStream) -> Step + 'a,
    {
        self.on_message = Some(Box::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&TypedError) -> ErrorDecision + 'a,
    {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for ExchangeOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeOptions")
            .field("data", &self.data)
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Drives the client side of command exchanges on one stream.
///
/// Every exchange, however it exits, finishes by sending the client's end
/// sentinel and draining to the server's, so the stream is ready for the
/// next command.
pub struct Exchanger<'s> {
    stream: &'s mut MessageStream,
}

impl<'s> Exchanger<'s> {
    pub fn new(stream: &'s mut MessageStream) -> Self {
        Self { stream }
    }

    /// Send a command name and wait for the acknowledgement.
    ///
    /// This only opens the exchange; the caller owns the rest of it,
    /// including the final [`MessageStream::finish`].
    pub fn send_command(&mut self, name: &str) -> Result<()> {
        self.stream.begin_exchange();
        send_command(self.stream, name)
    }

    /// Send a command with an empty initial payload.
    pub fn exchange(&mut self, name: &str) -> Result<Payload> {
        self.exchange_with_options(name, ExchangeOptions::new())
    }

    pub fn exchange_with_data(&mut self, name: &str, data: impl Into<Payload>) -> Result<Payload> {
        self.exchange_with_options(name, ExchangeOptions::new().data(data))
    }

    /// Send a command with `value` as a JSON initial payload.
    pub fn exchange_json<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
    ) -> Result<Payload> {
        self.exchange_with_options(name, ExchangeOptions::new().json(value)?)
    }

    /// Run a full exchange and return the server's closing payload.
    pub fn exchange_with_options(
        &mut self,
        name: &str,
        options: ExchangeOptions<'_>,
    ) -> Result<Payload> {
        let ExchangeOptions {
            data,
            on_message,
            mut on_error,
        } = options;
        let mut on_message = on_message.unwrap_or_else(|| {
            Box::new(|_: Payload, _: &mut MessageStream| Step::End(Payload::new()))
        });

        self.stream.begin_exchange();
        let mut stream = FinishGuard(&mut *self.stream);

        send_command(&mut stream, name)?;
        stream.write_message(data.unwrap_or_default())?;

        loop {
            match stream.receive()? {
                Received::End(closing) => {
                    trace!(command = name, len = closing.len(), "server ended exchange");
                    return Ok(closing);
                }
                Received::Message(payload) => match on_message(payload, &mut *stream) {
                    Step::Continue(Some(reply)) => stream.write_message(reply)?,
                    Step::Continue(None) => {}
                    Step::End(last) => {
                        stream.write_end_with_data(last)?;
                        return Ok(stream.drain()?.unwrap_or_default());
                    }
                    Step::Fail(err) => stream.write_error(&err)?,
                },
                Received::Error(err) => match on_error.as_mut() {
                    Some(on_error) => match on_error(&err) {
                        ErrorDecision::Break(reported) => {
                            debug!(command = name, error = %reported, "exchange abandoned");
                            stream.write_error(&reported)?;
                            return Err(ExchangeError::Remote(reported));
                        }
                        ErrorDecision::Continue(Some(reported)) => stream.write_error(&reported)?,
                        ErrorDecision::Continue(None) => {}
                    },
                    None => {
                        debug!(command = name, error = %err, "server reported error");
                        return Err(ExchangeError::Remote(err));
                    }
                },
            }
        }
    }
}

fn send_command(stream: &mut MessageStream, name: &str) -> Result<()> {
    stream.write_message(name)?;
    match stream.receive()? {
        Received::Message(_) => {
            trace!(command = name, "command acknowledged");
            Ok(())
        }
        Received::Error(err) => Err(ExchangeError::Remote(err)),
        Received::End(_) => Err(ExchangeError::Protocol(format!(
            "end sentinel instead of acknowledgement for [{name}]"
        ))),
    }
}

/// Finishes the exchange when dropped, on every exit path.
struct FinishGuard<'a>(&'a mut MessageStream);

impl Deref for FinishGuard<'_> {
    type Target = MessageStream;

    fn deref(&self) -> &MessageStream {
        self.0
    }
}

impl DerefMut for FinishGuard<'_> {
    fn deref_mut(&mut self) -> &mut MessageStream {
        self.0
    }
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.0.finish() {
            debug!(error = %err, "failed to finish exchange");
        }
    }
}
