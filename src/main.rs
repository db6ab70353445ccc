//! TCP Chat Relay
//!
//! Usage:
//!   ./TCPChat          # listen on the default port 8989
//!   ./TCPChat 2525     # listen on port 2525

use std::env;
use std::process;

use tracing::info;

use parley::{validate_port, ChatServer, Config};

const DEFAULT_PORT: u16 = 8989;

fn print_usage() {
    println!("[USAGE]: ./TCPChat $port");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt().init();

    let args: Vec<String> = env::args().collect();

    if args.len() > 2 {
        print_usage();
        process::exit(1);
    }

    let port = if args.len() == 2 {
        match validate_port(&args[1]) {
            Ok(port) => port,
            Err(_) => {
                print_usage();
                process::exit(1);
            }
        }
    } else {
        DEFAULT_PORT
    };

    let config = Config::default().with_listen_addr(format!("0.0.0.0:{}", port));
    let server = ChatServer::new(config);

    println!("Starting TCP chat server on port {}", port);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    server.stop().await;

    Ok(())
}
