//! Local SFTP Server Example
//!
//! This example demonstrates how to:
//! - Serve a local directory tree over the SFTP session loop
//! - Accept plain TCP connections as the "channel"
//!
//! Usage:
//!   cargo run --example local_server [bind_address] [root_dir]
//!
//! Example:
//!   cargo run --example local_server 127.0.0.1:2022 /tmp
//!
//! A real deployment embeds `serve_channel` behind an SSH server and hands
//! it accepted "sftp" subsystem channels (see `is_sftp_subsystem`); plain
//! TCP is used here so the session loop can be exercised on its own.

use skiff_proto::sftp::{serve_channel, LocalFs};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let bind_addr = args.get(1).map(String::as_str).unwrap_or("127.0.0.1:2022");
    let root = args.get(2).map(String::as_str).unwrap_or(".");

    let vfs = Arc::new(LocalFs::new(root));
    let listener = TcpListener::bind(bind_addr).await?;
    println!("SFTP session server listening on {} (root: {})", bind_addr, root);

    loop {
        let (stream, peer) = listener.accept().await?;
        println!("Connection from {}", peer);

        let vfs = vfs.clone();
        tokio::spawn(async move {
            match serve_channel(stream, vfs.as_ref()).await {
                Ok(()) => println!("Session from {} ended", peer),
                Err(e) => println!("Session from {} failed: {}", peer, e),
            }
        });
    }
}
