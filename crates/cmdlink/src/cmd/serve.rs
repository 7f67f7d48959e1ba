use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cmdlink_exchange::{
    CommandRegistry, CommandServer, Completion, ConnectionInfo, HandlerResult, MessageStream,
    ServerConfig,
};
use cmdlink_frame::{Encoding, FrameConfig};
use cmdlink_transport::IpcListener;

use crate::cmd::{parse_duration, Endpoint, ServeArgs};
use crate::exit::{exchange_error, CliError, CliResult, INTERNAL, SUCCESS};
#[cfg(not(unix))]
use crate::exit::USAGE;
use crate::output::OutputFormat;

pub const ECHO: &str = "/echo";
pub const PING: &str = "/ping";
pub const COMMANDS: &str = "/commands";

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let mut frame = FrameConfig::default();
    if let Some(idle) = &args.idle_timeout {
        frame.read_timeout = Some(parse_duration(idle)?);
    }
    if args.binary {
        frame.encoding = Encoding::Binary;
    }
    let config = ServerConfig {
        frame,
        max_connections: args.max_connections,
    };

    let server = bind(&args.endpoint, builtin_registry(), config)?;
    let wake = wake_endpoint(&args.endpoint, server.listener());

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), wake)?;

    tracing::info!(endpoint = %args.endpoint, "serving built-in commands");
    server
        .run(&running)
        .map_err(|err| exchange_error("server failed", err))?;

    Ok(SUCCESS)
}

fn bind(
    endpoint: &Endpoint,
    registry: CommandRegistry,
    config: ServerConfig,
) -> CliResult<CommandServer> {
    let bound = match endpoint {
        #[cfg(unix)]
        Endpoint::Unix(path) => CommandServer::bind_unix(path, registry, config),
        #[cfg(not(unix))]
        Endpoint::Unix(path) => {
            return Err(CliError::new(
                USAGE,
                format!("unix sockets are unavailable on this platform: {}", path.display()),
            ))
        }
        Endpoint::Tcp(addr) => CommandServer::bind_tcp(addr.as_str(), registry, config),
    };
    bound.map_err(|err| exchange_error("bind failed", err))
}

/// The endpoint a local connect must reach to unblock a pending accept.
fn wake_endpoint(endpoint: &Endpoint, listener: &IpcListener) -> Endpoint {
    match listener {
        IpcListener::Tcp(tcp) => Endpoint::Tcp(tcp.local_addr().to_string()),
        #[cfg(unix)]
        IpcListener::Unix(_) => endpoint.clone(),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>, wake: Endpoint) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        if let Err(err) = wake.connect(FrameConfig::default()) {
            tracing::debug!(error = %err, "wake-up connect failed");
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Commands every `cmdlink serve` instance answers.
pub fn builtin_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new().with(ECHO, echo).with(PING, ping);

    let mut names = registry.names();
    names.push(COMMANDS.to_string());
    names.sort();
    registry.register(
        COMMANDS,
        move |stream: &mut MessageStream, _: &ConnectionInfo| -> HandlerResult {
            stream.receive_message()?;
            Completion::json(&names)
        },
    );
    registry
}

fn echo(stream: &mut MessageStream, conn: &ConnectionInfo) -> HandlerResult {
    let data = stream.receive_message()?;
    tracing::debug!(conn = %conn.id, size = data.len(), "echoing payload");
    Ok(Completion::Reply(data))
}

fn ping(stream: &mut MessageStream, _conn: &ConnectionInfo) -> HandlerResult {
    stream.receive_message()?;
    Completion::reply("pong")
}
