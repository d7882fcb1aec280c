use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{ChatClient, ClientEvent, Message};
use feed_http::{HttpBlobStore, HttpFeed};
use shared::domain::{Identity, MessageId};
use storage::Storage;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    /// Base URL of the feed backend, e.g. http://localhost:8080
    #[arg(long)]
    server_url: String,
    /// SQLite database holding the local session
    #[arg(long, default_value = "sqlite://./data/chat.db")]
    database_url: String,
    /// Identity to log in as when no session is saved (He or She)
    #[arg(long)]
    identity: Option<String>,
    /// Secret for --identity
    #[arg(long)]
    secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let storage = Storage::new(&args.database_url).await?;
    let client = ChatClient::new(
        Arc::new(HttpFeed::new(&args.server_url)),
        Arc::new(HttpBlobStore::new(&args.server_url)),
        Arc::new(storage),
    );

    let identity = match client.restore().await? {
        Some(identity) => identity,
        None => {
            let (identity, secret) = credentials(&args)?;
            client.login(identity, &secret).await?;
            identity
        }
    };
    println!("Chatting as {identity}");

    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::ViewChanged(view)) => render(&view),
                Ok(ClientEvent::ConnectionLost(reason)) => {
                    println!("! connection lost: {reason}");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("event stream lagged, skipped {skipped} events");
                }
                Err(RecvError::Closed) => return,
            }
        }
    });

    println!("Commands: /photo <path>, /edit <id> <text>, /delete <id>, /logout, /quit.");
    println!("Anything else is sent as a message.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if let Some(path) = line.strip_prefix("/photo ") {
            if let Err(err) = send_photo(&client, path.trim()).await {
                println!("! photo failed: {err:#}");
            }
        } else if let Some(rest) = line.strip_prefix("/edit ") {
            match rest.trim().split_once(' ') {
                Some((id, text)) => {
                    if let Err(err) = client.edit(&MessageId(id.to_string()), text).await {
                        println!("! edit failed: {err}");
                    }
                }
                None => println!("usage: /edit <id> <new text>"),
            }
        } else if let Some(id) = line.strip_prefix("/delete ") {
            if let Err(err) = client.delete(&MessageId(id.trim().to_string())).await {
                println!("! delete failed: {err}");
            }
        } else if line == "/logout" {
            client.logout().await?;
            println!("Logged out.");
            break;
        } else if line == "/quit" {
            break;
        } else if !line.is_empty() {
            if let Err(err) = client.send(&line).await {
                println!("! send failed: {err}");
            }
        }
    }

    Ok(())
}

fn credentials(args: &Args) -> Result<(Identity, String)> {
    let (Some(label), Some(secret)) = (&args.identity, &args.secret) else {
        bail!("no saved session; pass --identity and --secret to log in");
    };
    let identity = Identity::from_label(label)
        .with_context(|| format!("unknown identity '{label}', expected He or She"))?;
    Ok((identity, secret.clone()))
}

async fn send_photo(client: &Arc<ChatClient>, path: &str) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {path}"))?;
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();
    let file_name = std::path::Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("photo");
    client.send_image(bytes, &content_type, file_name).await?;
    Ok(())
}

fn render(view: &[Message]) {
    println!("--- {} message(s) ---", view.len());
    for message in view {
        let id = message.id.as_ref().map(|id| id.0.as_str()).unwrap_or("-");
        let marker = if message.pending { "…" } else { " " };
        let edited = if message.edited { " (edited)" } else { "" };
        let when = message
            .timestamp
            .map(|timestamp| timestamp.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        println!(
            "{marker} [{when}] {} <{id}>{edited}: {}",
            message.sender.initial(),
            message.text
        );
        if let Some(url) = &message.gif_url {
            println!("      gif: {url}");
        }
        if let Some(image) = &message.image {
            println!("      image: {}", image.url);
        }
    }
}
