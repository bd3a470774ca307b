use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use server::Lobby;
use std::path::PathBuf;

/// Main-method of the application.
/// Parses command-line arguments, loads the title catalog and runs the lobby
/// server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "11190")]
        port: u16,
        /// JSON configuration file (titles, timings, seed accounts)
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Overrides the sweep interval, in seconds
        #[clap(long)]
        sweep_interval: Option<u64>,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(secs) = args.sweep_interval {
        config.timings.sweep_interval_ms = secs * 1000;
    }
    info!("Serving {} titles", config.titles.len());

    let lobby = Lobby::in_memory(config);
    lobby.close_leftovers()?;

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, lobby.clone()).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    lobby.close_leftovers()?;
    Ok(())
}
