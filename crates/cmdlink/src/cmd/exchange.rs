use std::fs;
use std::time::Instant;

use cmdlink_exchange::{Exchanger, Payload};
use cmdlink_frame::{Encoding, FrameConfig};

use crate::cmd::{parse_duration, ExchangeArgs};
use crate::exit::{exchange_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_reply, ExchangeReport, OutputFormat};

pub fn run(args: ExchangeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let encoding = if args.binary {
        Encoding::Binary
    } else {
        Encoding::Json
    };
    let config = FrameConfig {
        read_timeout: Some(timeout),
        write_timeout: Some(timeout),
        encoding,
        ..FrameConfig::default()
    };

    let data = resolve_payload(&args)?;
    let mut stream = args
        .endpoint
        .connect(config)
        .map_err(|err| exchange_error("connect failed", err))?;

    let started = Instant::now();
    let reply = Exchanger::new(&mut stream)
        .exchange_with_data(&args.command, data)
        .map_err(|err| exchange_error(&format!("{} failed", args.command), err))?;
    let elapsed = started.elapsed();

    tracing::debug!(
        command = %args.command,
        size = reply.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "exchange completed"
    );

    let endpoint = args.endpoint.to_string();
    print_reply(
        &ExchangeReport {
            endpoint: &endpoint,
            command: &args.command,
            encoding: encoding.as_str(),
            reply: &reply,
            elapsed,
        },
        format,
    );

    Ok(SUCCESS)
}

fn resolve_payload(args: &ExchangeArgs) -> CliResult<Payload> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Payload::from(json.clone()));
    }
    if let Some(data) = &args.data {
        return Ok(Payload::from(data.clone()));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map(Payload::from)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Payload::new())
}
