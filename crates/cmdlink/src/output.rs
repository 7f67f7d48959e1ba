use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use cmdlink_exchange::Payload;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One finished exchange, as reported to the user.
pub struct ExchangeReport<'a> {
    pub endpoint: &'a str,
    pub command: &'a str,
    pub encoding: &'a str,
    pub reply: &'a Payload,
    pub elapsed: Duration,
}

#[derive(Serialize)]
struct ExchangeOutput<'a> {
    command: &'a str,
    endpoint: &'a str,
    status: &'a str,
    encoding: &'a str,
    payload_size: usize,
    payload: String,
    elapsed_ms: u128,
    timestamp: String,
}

pub fn print_reply(report: &ExchangeReport<'_>, format: OutputFormat) {
    let reply = report.reply.as_bytes();
    match format {
        OutputFormat::Json => {
            let out = ExchangeOutput {
                command: report.command,
                endpoint: report.endpoint,
                status: "ok",
                encoding: report.encoding,
                payload_size: reply.len(),
                payload: payload_preview(reply),
                elapsed_ms: report.elapsed.as_millis(),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "STATUS", "SIZE", "ELAPSED", "PAYLOAD"])
                .add_row(vec![
                    report.command.to_string(),
                    "ok".to_string(),
                    reply.len().to_string(),
                    format!("{}ms", report.elapsed.as_millis()),
                    payload_preview(reply),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "command={} endpoint={} status=ok size={} elapsed={}ms payload={}",
                report.command,
                report.endpoint,
                reply.len(),
                report.elapsed.as_millis(),
                payload_preview(reply)
            );
        }
        OutputFormat::Raw => {
            print_raw(reply);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_shows_text_or_size() {
        assert_eq!(payload_preview(b"pong"), "pong");
        assert_eq!(payload_preview(&[0xff, 0xfe, 0x00]), "<binary 3 bytes>");
    }
}
