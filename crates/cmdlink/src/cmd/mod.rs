use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Subcommand};
use cmdlink_exchange::MessageStream;
use cmdlink_frame::FrameConfig;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod exchange;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command server with the built-in commands.
    Serve(ServeArgs),
    /// Run one command exchange against a server and print the reply.
    Exchange(ExchangeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Exchange(args) => exchange::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where a server listens or a client connects.
///
/// `tcp://HOST:PORT` selects TCP; anything else (optionally prefixed with
/// `unix://`) is a Unix domain socket path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    pub fn connect(&self, config: FrameConfig) -> cmdlink_exchange::Result<MessageStream> {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => cmdlink_exchange::connect_unix(path, config),
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(cmdlink_exchange::ExchangeError::Protocol(format!(
                "unix sockets are unavailable on this platform: {}",
                path.display()
            ))),
            Endpoint::Tcp(addr) => cmdlink_exchange::connect_tcp(addr.as_str(), config),
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = input.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err("tcp endpoint needs HOST:PORT".to_string());
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        let path = input.strip_prefix("unix://").unwrap_or(input);
        if path.is_empty() {
            return Err("socket path must not be empty".to_string());
        }
        Ok(Endpoint::Unix(PathBuf::from(path)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path or tcp://HOST:PORT to listen on.
    #[arg(value_name = "ENDPOINT", env = "CMDLINK_SOCKET")]
    pub endpoint: Endpoint,
    /// Refuse connections beyond this many concurrent clients.
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,
    /// Close connections idle for longer than this (e.g. 30s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub idle_timeout: Option<String>,
    /// Encode outgoing envelopes with bincode instead of JSON.
    #[arg(long)]
    pub binary: bool,
}

#[derive(Args, Debug)]
pub struct ExchangeArgs {
    /// Socket path or tcp://HOST:PORT to connect to.
    #[arg(value_name = "ENDPOINT")]
    pub endpoint: Endpoint,
    /// Command name, e.g. /ping.
    pub command: String,
    /// JSON initial payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string initial payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read the initial payload from a file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Encode envelopes with bincode instead of JSON.
    #[arg(long)]
    pub binary: bool,
    /// Per-read and per-write timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parsing() {
        assert_eq!(
            "/tmp/a.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/a.sock"))
        );
        assert_eq!(
            "unix:///tmp/b.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/b.sock"))
        );
        assert_eq!(
            "tcp://127.0.0.1:7400".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:7400".to_string())
        );
        assert!("tcp://".parse::<Endpoint>().is_err());
        assert!("".parse::<Endpoint>().is_err());
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(
            Endpoint::Tcp("localhost:1".to_string()).to_string(),
            "tcp://localhost:1"
        );
        assert_eq!(
            Endpoint::Unix(PathBuf::from("/run/x.sock")).to_string(),
            "unix:///run/x.sock"
        );
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }
}
