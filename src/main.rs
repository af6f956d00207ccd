//! Command line interface for curated Nostr discovery. Lists categories,
//! aggregates a category's content from the curator's lists, resolves
//! addressable references and event ids, and serves the same over HTTP.

mod aggregator;
mod cache;
mod category;
mod config;
mod coordinate;
mod directory;
mod event;
mod filter;
mod lists;
mod pool;
mod resolver;
mod server;
mod storage;
#[cfg(test)]
mod testutil;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use aggregator::Aggregator;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::Settings;
use coordinate::Coordinate;
use pool::RelayPool;
use resolver::Resolver;
use serde::Serialize;
use storage::Store;
#[cfg(not(test))]
use tracing_subscriber::EnvFilter;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "curatr",
    author,
    version,
    about = "Curated Nostr content discovery",
    short_flag = 'v',
    long_flag = "version"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the local store at `STORE_ROOT`.
    Init,
    /// Print the category table.
    Categories,
    /// Aggregate and print one category's content.
    Load { category: String },
    /// Resolve a `kind:pubkey:identifier` reference.
    Resolve {
        coordinate: String,
        /// Relay hint; may be repeated.
        #[arg(long = "relay")]
        relays: Vec<String>,
    },
    /// Fetch one event by id.
    Event {
        id: String,
        /// Relay hint; may be repeated.
        #[arg(long = "relay")]
        relays: Vec<String>,
        /// Author pubkey, used to find the author's relays.
        #[arg(long)]
        author: Option<String>,
    },
    /// Launch the HTTP service.
    Serve,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let store = Store::new(cfg.store_root.clone(), cfg.verify_sig);
    match cli.command {
        Commands::Init => {
            // Create the on-disk directory structure.
            store.init()?;
        }
        Commands::Categories => print_json(&category::CATEGORIES)?,
        Commands::Load { category } => {
            let pool = Arc::new(RelayPool::new(cfg.pool_options()));
            let aggregator = Aggregator::new(pool, cfg.discovery()?);
            let content = aggregator.load_category_content(&category).await?;
            print_json(&content)?;
        }
        Commands::Resolve { coordinate, relays } => {
            let coord: Coordinate = coordinate.parse()?;
            store.init()?;
            let pool = Arc::new(RelayPool::new(cfg.pool_options()));
            let resolver = build_resolver(&cfg, store, pool);
            let Some(ev) = resolver.resolve_coordinate(&coord, &relays).await else {
                bail!("event not found: {coord}");
            };
            print_json(&ev)?;
        }
        Commands::Event { id, relays, author } => {
            store.init()?;
            let pool = Arc::new(RelayPool::new(cfg.pool_options()));
            let resolver = build_resolver(&cfg, store, pool);
            let Some(ev) = resolver.fetch_event(&id, &relays, author.as_deref()).await else {
                bail!("event not found: {id}");
            };
            print_json(&ev)?;
        }
        Commands::Serve => {
            // Initialize storage then start the HTTP server.
            store.init()?;
            let http_addr: SocketAddr = cfg
                .bind_http
                .as_str()
                .parse()
                .context("parsing BIND_HTTP")?;
            let pool = Arc::new(RelayPool::new(cfg.pool_options()));
            let aggregator = Aggregator::new(pool.clone(), cfg.discovery()?);
            let resolver = build_resolver(&cfg, store, pool);
            server::serve_http(http_addr, aggregator, resolver, shutdown_signal()).await?;
        }
    }
    Ok(())
}

fn build_resolver(cfg: &Settings, store: Store, pool: Arc<RelayPool>) -> Resolver {
    Resolver::new(pool, store, cfg.relays_general.clone(), cfg.query_timeout)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("curatr-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:7777\n");
    content.push_str("VERIFY_SIG=0\n");
    content.push_str("CURATOR_PUBKEY=\n");
    content.push_str("CURATOR_RELAY=\n");
    content.push_str("RELAYS_GENERAL=wss://relay.damus.io,wss://nos.lol,wss://relay.primal.net\n");
    content.push_str("TOR_SOCKS=\n");
    content.push_str("QUERY_TIMEOUT_MS=3000\n");
    content.push_str("STREAM_TIMEOUT_MS=5000\n");
    content.push_str("CONNECT_TIMEOUT_MS=5000\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}
