use clap::Parser;
use client::discovery::{self, DEFAULT_PROBE_TIMEOUT};
use client::game::{step_towards, ClientGameState, EntityOp, FrameUpdate};
use client::network::{ClientConfig, Connection};
use log::{debug, info, warn};
use shared::{local_ip, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

const FRAME: Duration = Duration::from_millis(16);
const LEADERBOARD_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to; the LAN is scanned when omitted
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Display name
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Requested color (red, orange, yellow, green, cyan, blue, violet, pink)
    #[arg(short = 'c', long)]
    color: Option<String>,

    /// Where the downloaded map is stored
    #[arg(long, default_value_os_t = std::env::temp_dir().join("city-arena"))]
    scratch_dir: PathBuf,

    /// List servers on the local network and exit
    #[arg(long)]
    scan: bool,

    /// Map used when the server does not provide one
    #[arg(long, default_value = "assets/city.obj")]
    fallback_map: PathBuf,

    /// Walking speed in units per second
    #[arg(long, default_value_t = 6.0)]
    speed: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    if args.scan {
        let servers = discovery::scan_subnet(local_ip(), DEFAULT_PORT, DEFAULT_PROBE_TIMEOUT).await;
        if servers.is_empty() {
            println!("No servers found");
        }
        for server in servers {
            println!("{}", server);
        }
        return Ok(());
    }

    let server = match args.server {
        Some(server) => server,
        None => {
            info!("No server given, scanning the local network...");
            match discovery::find_server(DEFAULT_PORT, DEFAULT_PROBE_TIMEOUT).await {
                Some(addr) => addr.to_string(),
                None => return Err("no server found on the local network".into()),
            }
        }
    };

    let config = ClientConfig {
        server,
        name: args.name,
        color: args.color,
        scratch_dir: args.scratch_dir,
        ..ClientConfig::default()
    };

    let mut connection = Connection::connect(&config).await?;
    let map = connection.map();
    info!(
        "Using {} map {}",
        if map.is_downloaded() { "server" } else { "bundled" },
        map.asset_path(&args.fallback_map).display()
    );

    let result = run(&mut connection, args.speed).await;
    connection.close().await;
    result
}

/// Stand-in for the renderer: one step per frame, walking to the nearest
/// collectible and picking it up.
async fn run(connection: &mut Connection, speed: f32) -> Result<(), Box<dyn std::error::Error>> {
    let mut game = ClientGameState::new(connection.player_id());
    let mut frame = interval(FRAME);
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut leaderboard = interval(LEADERBOARD_INTERVAL);
    let max_step = speed * FRAME.as_secs_f32();

    loop {
        tokio::select! {
            _ = frame.tick() => {
                if !connection.is_connected() {
                    warn!("Lost connection to the server");
                    return Ok(());
                }

                if let Some(snapshot) = connection.latest_snapshot() {
                    log_update(&game.apply_snapshot(snapshot));
                }

                if let Some(target) = game.nearest_collectible().map(|c| c.position()) {
                    game.set_position(step_towards(game.position(), target, max_step));
                }
                let (x, y, z) = game.position();
                connection.send_position(x, y, z).await?;

                for id in game.collect_requests() {
                    connection.send_collect(id).await?;
                }
            }
            _ = leaderboard.tick() => {
                for line in game.leaderboard() {
                    info!("{}", line);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving");
                return Ok(());
            }
        }
    }
}

fn log_update(update: &FrameUpdate) {
    for op in &update.players {
        match op {
            EntityOp::Create(p) => debug!("Player {} ({}) appeared at {:?}", p.id, p.name, p.position()),
            EntityOp::Update(p) => debug!("Player {} at {:?}, score {}", p.id, p.position(), p.score),
            EntityOp::Destroy(id) => debug!("Player {} left", id),
        }
    }
    for op in &update.collectibles {
        match op {
            EntityOp::Create(c) => debug!("Collectible {} at {:?}", c.id, c.position()),
            EntityOp::Update(c) => debug!("Collectible {} moved to {:?}", c.id, c.position()),
            EntityOp::Destroy(id) => debug!("Collectible {} gone", id),
        }
    }
}
