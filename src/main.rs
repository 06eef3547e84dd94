//! Dotrelay - a DNS-over-TLS forwarding proxy.
//!
//! Accepts plaintext DNS over UDP or TCP and relays every query to a single
//! upstream resolver over an encrypted, certificate-verified connection.

// Use jemalloc as the global allocator (Linux/macOS only, better performance)
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod config;
mod handler;
mod server;
mod upstream;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::handler::{Forwarder, QueryHandler};
use crate::server::DnsServer;
use crate::upstream::DotClient;

/// Dotrelay - a DNS-over-TLS forwarding proxy.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to an optional TOML configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    transport: Transport,
}

/// Listening transport, chosen once per process invocation.
#[derive(Subcommand)]
enum Transport {
    /// Run the UDP/53 server
    Udp,
    /// Run the TCP/53 server
    Tcp,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };

    init_logging(&config.server.log_level)?;

    info!("Starting dotrelay DNS-over-TLS proxy");
    info!(
        "Upstream resolver: {} (certificate verified as {})",
        config.upstream.addr(),
        config.upstream.hostname
    );

    let dot_client = DotClient::new(
        config.upstream.addr(),
        config.upstream.hostname.clone(),
        config.upstream.timeout(),
    )
    .context("Failed to build upstream DOT client")?;
    let handler: Arc<dyn QueryHandler> = Arc::new(Forwarder::new(dot_client));

    let server = DnsServer::new(Arc::new(config), handler);

    // Each transport runs until a fatal listener failure; there is no
    // restart policy.
    match args.transport {
        Transport::Udp => {
            info!("try in cli: dig +short google.com @localhost");
            server.run_udp().await
        }
        Transport::Tcp => {
            info!("try in cli: dig +tcp +short google.com @localhost");
            server.run_tcp().await
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) -> Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(!cfg!(windows))
        .init();

    Ok(())
}
