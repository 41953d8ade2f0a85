use clap::Parser;
use server::config::Config;
use server::store::Store;
use server::world;
use server::Server;
use std::path::PathBuf;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "4080")]
    port: u16,
    /// World snapshot file
    #[clap(short, long, default_value = "world.db")]
    db: PathBuf,
    /// Terrain seed; omit to serve an empty world
    #[clap(short, long)]
    seed: Option<u32>,
    /// Seconds per full day/night cycle
    #[clap(long, default_value = "600")]
    day_length: u32,
    /// Enforce per-connection frame budgets
    #[clap(long)]
    rate_limit: bool,
    /// Only logged in users may build
    #[clap(long)]
    auth_required: bool,
    /// Record accepted block edits for later inspection
    #[clap(long)]
    record_history: bool,
    /// Frames a slow client may queue before it is dropped
    #[clap(long, default_value = "4096")]
    outbox_capacity: usize,
    /// Worldgen script name advertised to clients
    #[clap(long)]
    worldgen: Option<String>,
    /// World option to store at startup, as NAME=VALUE (repeatable)
    #[clap(long = "option", value_name = "NAME=VALUE", value_parser = parse_option)]
    options: Vec<(String, String)>,
    /// Prune block rows the generator would recreate, then exit
    #[clap(long)]
    cleanup: bool,
}

/// Main-method of the application.
/// Parses command-line arguments into a [`Config`], then either runs the
/// offline snapshot cleanup or starts the server until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Parse command line arguments
    let args = Args::parse();

    let mut config = Config::default();
    config.host = args.host;
    config.port = args.port;
    config.db_path = Some(args.db);
    config.seed = args.seed;
    config.day_length = args.day_length;
    config.rate_limit = args.rate_limit;
    config.auth_required = args.auth_required;
    config.record_history = args.record_history;
    config.outbox_capacity = args.outbox_capacity;
    config.worldgen = args.worldgen;
    config.startup_options = args.options;

    if args.cleanup {
        return cleanup(config);
    }

    let server = Server::start(config).await?;

    // Handle shutdown gracefully
    tokio::signal::ctrl_c().await?;
    println!("Received Ctrl+C, shutting down gracefully...");
    server.shutdown();
    server.stopped().await;

    Ok(())
}

/// One `--option NAME=VALUE` pair.
fn parse_option(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got {:?}", raw)),
    }
}

/// Deletes stored block rows that a fresh generator run would recreate,
/// then commits the smaller snapshot and exits.
fn cleanup(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = Store::open(config.db_path.clone())?;
    let generator = world::generator_for(&config, &store);
    let removed = store.cleanup(generator.as_ref(), &config.indestructible_items);
    store.commit()?;
    println!("cleaned up {} block rows", removed);
    Ok(())
}
