use clap::Parser;
use log::{error, info};
use server::game::{parse_half_extent, SpawnBounds};
use server::network::{Server, ServerConfig};
use shared::{local_ip, DEFAULT_ARENA_HALF_EXTENT, DEFAULT_POOL_SIZE, DEFAULT_PORT};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative city arena server")]
struct Args {
    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Map model streamed to clients after the handshake
    #[arg(short, long)]
    map: Option<PathBuf>,

    /// Number of collectibles kept in the world
    #[arg(short, long, default_value_t = DEFAULT_POOL_SIZE)]
    collectibles: usize,

    /// Half extent of the square collectibles spawn in
    #[arg(short, long, default_value_t = DEFAULT_ARENA_HALF_EXTENT, value_parser = parse_half_extent)]
    arena: f32,

    /// Seed for collectible placement
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        pool_size: args.collectibles,
        bounds: SpawnBounds::square(args.arena),
        map_path: args.map,
        seed: args.seed,
    };

    let server = Server::new(&config).await?;
    info!("SERVER RUNNING ON: {}:{}", local_ip(), args.port);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
