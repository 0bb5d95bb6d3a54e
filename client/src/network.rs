use crate::map_transfer::{receive_map, MapOutcome};
use log::{debug, error, info};
use shared::{
    write_message, ClientInit, ClientMessage, CollectibleId, MessageReader, PlayerId,
    ProtocolError, ServerMessage, Welcome, WorldSnapshot, DEFAULT_PORT,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The latest snapshot slot shared with the receiver task
pub type SnapshotSlot = Option<Arc<WorldSnapshot>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server
    pub server: String,
    pub name: Option<String>,
    pub color: Option<String>,
    /// Where a downloaded map is stored
    pub scratch_dir: PathBuf,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", DEFAULT_PORT),
            name: None,
            color: None,
            scratch_dir: std::env::temp_dir().join("city-arena"),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// A connection that has finished the handshake.
///
/// Snapshots are decoded by a background task and published into a single
/// slot. Readers always get a whole snapshot, and only the newest one.
pub struct Connection {
    player_id: PlayerId,
    map: MapOutcome,
    writer: OwnedWriteHalf,
    snapshots: watch::Receiver<SnapshotSlot>,
    receiver_task: JoinHandle<()>,
}

impl Connection {
    /// Connects, receives the player id and the map, then sends the init
    /// message. Returns once the session is active on the server.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ProtocolError> {
        info!("Connecting to {}...", config.server);
        let connect = TcpStream::connect(config.server.as_str());
        let stream = match timeout(config.connect_timeout, connect).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer from {} within {:?}", config.server, config.connect_timeout),
                )))
            }
        };
        stream.set_nodelay(true)?;

        let (read_half, mut writer) = stream.into_split();
        let mut reader = MessageReader::new(read_half);

        let welcome: Welcome = reader.read_message().await?;
        info!("Connected! Player ID: {}", welcome.id);

        let map = receive_map(&mut reader, &mut writer, &config.scratch_dir).await?;

        let init = ClientInit {
            name: config.name.clone(),
            color: config.color.clone(),
        };
        write_message(&mut writer, &init).await?;

        let (latest, snapshots) = watch::channel(None);
        let receiver_task = tokio::spawn(receive_snapshots(reader, latest));

        Ok(Connection {
            player_id: welcome.id,
            map,
            writer,
            snapshots,
            receiver_task,
        })
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn map(&self) -> &MapOutcome {
        &self.map
    }

    /// The newest snapshot received so far, if any.
    pub fn latest_snapshot(&self) -> Option<Arc<WorldSnapshot>> {
        self.snapshots.borrow().clone()
    }

    /// Waits for a snapshot newer than the last one returned by this method.
    /// `None` once the server has gone away.
    pub async fn next_snapshot(&mut self) -> Option<Arc<WorldSnapshot>> {
        self.snapshots.changed().await.ok()?;
        self.snapshots.borrow_and_update().clone()
    }

    pub fn is_connected(&self) -> bool {
        !self.receiver_task.is_finished()
    }

    pub async fn send_position(&mut self, x: f32, y: f32, z: f32) -> Result<(), ProtocolError> {
        write_message(&mut self.writer, &ClientMessage::Position { x, y, z }).await
    }

    pub async fn send_collect(&mut self, collectible_id: CollectibleId) -> Result<(), ProtocolError> {
        debug!("Requesting collectible {}", collectible_id);
        write_message(&mut self.writer, &ClientMessage::Collect { collectible_id }).await
    }

    /// Closes the write side and stops the receiver.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
        self.receiver_task.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.receiver_task.abort();
    }
}

async fn receive_snapshots<R>(mut reader: MessageReader<R>, latest: watch::Sender<SnapshotSlot>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.read_message::<ServerMessage>().await {
            Ok(ServerMessage::Snapshot(snapshot)) => {
                latest.send_replace(Some(Arc::new(snapshot)));
            }
            Ok(other) => debug!("Ignoring unexpected message {:?}", other),
            Err(e) if e.is_disconnect() => {
                info!("Server closed the connection");
                break;
            }
            Err(e) => {
                error!("Stopped receiving snapshots: {}", e);
                break;
            }
        }
    }
}
