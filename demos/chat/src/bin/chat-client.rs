//! Line-oriented terminal client.
//!
//! Plain lines are broadcast. `/to <id> <text>` sends a direct message,
//! `/list` asks who is online, `/quit` leaves.

use std::sync::Arc;

use chatrelay::prelude::*;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chat-client", version, about = "Text chat relay client")]
struct Args {
    /// Identifier to register under
    id: String,

    /// Relay server address
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let client = Arc::new(RelayClient::connect(&args.server, &args.id).await?);
    println!("connected to {} as {}", args.server, client.id());

    let mut incoming = tokio::spawn(print_incoming(Arc::clone(&client)));
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = &mut incoming => break,
            line = input.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Skip => {}
                    Input::Usage => println!("usage: /to <id> <text> | /list | /quit | <text>"),
                    Input::Frame(frame) => {
                        if let Err(e) = client.send(&frame).await {
                            println!("not sent: {e}");
                        }
                    }
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}

enum Input {
    Frame(ClientFrame),
    Usage,
    Skip,
    Quit,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim_end();
    if line.is_empty() {
        return Input::Skip;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Frame(ClientFrame::Broadcast(line.to_string()));
    };
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "quit" => Input::Quit,
        "list" => Input::Frame(ClientFrame::List),
        "to" => match rest.trim_start().split_once(' ') {
            Some((target, text)) => Input::Frame(ClientFrame::Direct {
                target: target.to_string(),
                text: text.to_string(),
            }),
            None => Input::Usage,
        },
        _ => Input::Usage,
    }
}

/// Prints server frames until the connection ends.
async fn print_incoming(client: Arc<RelayClient>) {
    loop {
        match client.recv().await {
            Ok(Some(ServerFrame::Directory(ids))) => println!("online: {}", ids.join(", ")),
            Ok(Some(ServerFrame::Error(reason))) => println!("server: {reason}"),
            Ok(Some(frame)) => println!("{frame}"),
            Ok(None) => {
                println!("disconnected");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping unreadable frame");
                if matches!(e, RelayError::Transport(_)) {
                    return;
                }
            }
        }
    }
}
