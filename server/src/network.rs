//! Server network layer: TCP listener, shared state and per-connection tasks

use crate::broadcast::ServerState;
use crate::game::{GameState, SpawnBounds};
use crate::map_transfer::MapAsset;
use crate::session;
use log::{debug, error, info, warn};
use shared::{DEFAULT_ARENA_HALF_EXTENT, DEFAULT_POOL_SIZE, DEFAULT_PORT};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, MutexGuard};

/// Server settings, normally filled in from the command line
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub pool_size: usize,
    pub bounds: SpawnBounds,
    pub map_path: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            pool_size: DEFAULT_POOL_SIZE,
            bounds: SpawnBounds::square(DEFAULT_ARENA_HALF_EXTENT),
            map_path: None,
            seed: None,
        }
    }
}

/// State shared by every connection task.
///
/// All world and session mutation happens through [`SharedState::lock`]; the
/// map asset is immutable after startup and read without locking.
#[derive(Debug)]
pub struct SharedState {
    state: Mutex<ServerState>,
    map: Option<MapAsset>,
}

impl SharedState {
    pub fn new(world: GameState, map: Option<MapAsset>) -> Self {
        Self {
            state: Mutex::new(ServerState::new(world)),
            map,
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().await
    }

    pub fn map(&self) -> Option<&MapAsset> {
        self.map.as_ref()
    }
}

/// Accepts connections and runs one session task per connection
pub struct Server {
    listener: TcpListener,
    shared: Arc<SharedState>,
}

impl Server {
    pub async fn new(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let world = match config.seed {
            Some(seed) => GameState::with_seed(config.pool_size, config.bounds, seed),
            None => GameState::new(config.pool_size, config.bounds),
        };

        let map = config
            .map_path
            .as_deref()
            .and_then(|path| match MapAsset::load(path) {
                Ok(asset) => Some(asset),
                Err(e) => {
                    warn!(
                        "Map file {} not available ({}), clients will use their bundled map",
                        path.display(),
                        e
                    );
                    None
                }
            });

        Ok(Server {
            listener,
            shared: Arc::new(SharedState::new(world, map)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shared(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    /// Accept loop. Each connection gets its own task; they only meet at the
    /// world lock.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not disable Nagle for {}: {}", addr, e);
                    }
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        session::handle_connection(stream, addr, shared).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}
