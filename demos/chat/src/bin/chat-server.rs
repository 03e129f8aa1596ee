//! Relay daemon with a small operator console on stdin.
//!
//! Console commands: `start [addr]`, `stop`, `status`, `quit`. With stdin
//! closed the server simply runs until Ctrl-C.

use std::path::PathBuf;

use chatrelay::prelude::*;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chat-server", version, about = "Text chat relay server")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_json_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let server = RelayServer::builder()
        .config(config)
        .event_sink(TracingSink)
        .build();
    server.listen().await?;

    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = console.next_line(), if console_open => match line? {
                Some(line) => {
                    if !run_command(&server, line.trim()).await {
                        break;
                    }
                }
                None => console_open = false,
            },
        }
    }

    server.stop().await;
    Ok(())
}

/// Runs one console command. Returns `false` to quit.
async fn run_command(server: &RelayServer, line: &str) -> bool {
    let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
    match cmd {
        "" => {}
        "start" => {
            let addr = match arg.trim() {
                "" => server.config().bind_addr.clone(),
                addr => addr.to_string(),
            };
            // Bind failures already reach the log through the event sink.
            if let Err(RelayError::AlreadyRunning(addr)) = server.start(&addr).await {
                println!("already listening on {addr}");
            }
        }
        "stop" => {
            if !server.stop().await {
                println!("not running");
            }
        }
        "status" => match server.local_addr().await {
            Some(addr) => {
                let ids = server.connected_ids().await;
                let ids: Vec<&str> = ids.iter().map(ClientId::as_str).collect();
                println!("listening on {addr}; {} connected: {}", ids.len(), ids.join(", "));
            }
            None => println!("stopped"),
        },
        "quit" | "exit" => return false,
        other => println!("unknown command {other:?}; try start [addr], stop, status, quit"),
    }
    true
}
