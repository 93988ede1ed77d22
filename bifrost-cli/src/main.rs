//! Operator CLI: a thin `reqwest` client against `bifrostd`'s local status
//! HTTP surface, structured the same way the original SSE-consuming CLI was
//! (clap subcommands, `colored` terminal output, a streamed `reqwest` body
//! for the tail command) but pointed at hook/plugin diagnostics instead of
//! process telemetry.
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures_util::StreamExt;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "bifrost-cli", about = "Query a running bifrostd")]
struct Args {
    /// Base URL of the bifrostd status API.
    #[arg(long, global = true, default_value = "http://127.0.0.1:7404")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a one-shot status snapshot.
    Status,
    /// Tail the diagnostic event stream until interrupted.
    Logs,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    uptime_seconds: u64,
    arena_free_bytes: u64,
    hooks_installed: usize,
    hook_chain_max_depth: usize,
    log_dropped_total: u64,
    recent_events: Vec<serde_json::Value>,
}

async fn run_status(client: &reqwest::Client, base_url: &str) -> anyhow::Result<()> {
    let response = client.get(format!("{base_url}/status")).send().await?.error_for_status()?;
    let status: StatusResponse = response.json().await?;

    println!("{}", "bifrostd status".bold());
    println!("  uptime:          {}s", status.uptime_seconds);
    println!("  arena free:      {} bytes", status.arena_free_bytes);
    println!("  hooks installed: {}", status.hooks_installed);
    println!("  max chain depth: {}", status.hook_chain_max_depth);
    if status.log_dropped_total > 0 {
        println!("  {}: {}", "log events dropped".yellow(), status.log_dropped_total);
    }
    println!("  recent events:   {}", status.recent_events.len());
    for event in &status.recent_events {
        println!("    {event}");
    }
    Ok(())
}

async fn run_logs(client: &reqwest::Client, base_url: &str) -> anyhow::Result<()> {
    let response = client.get(format!("{base_url}/logs/stream")).send().await?.error_for_status()?;
    let mut stream = response.bytes_stream();

    println!("{}", "tailing diagnostic events, ctrl-c to stop".dimmed());
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let text = String::from_utf8_lossy(&chunk);
        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                println!("{} {}", "event".green(), data);
            } else if let Some(comment) = line.strip_prefix(": ") {
                println!("{} {}", "keep-alive".dimmed(), comment);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();

    match args.command {
        Command::Status => run_status(&client, &args.url).await,
        Command::Logs => run_logs(&client, &args.url).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    #[tokio::test]
    async fn status_reports_the_mocked_snapshot() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/status");
            then.status(200).json_body(serde_json::json!({
                "uptime_seconds": 42,
                "arena_free_bytes": 1024,
                "hooks_installed": 2,
                "hook_chain_max_depth": 1,
                "log_dropped_total": 0,
                "recent_events": [],
            }));
        });

        let client = reqwest::Client::new();
        let result = run_status(&client, &server.base_url()).await;

        mock.assert();
        assert!(result.is_ok());
    }
}
