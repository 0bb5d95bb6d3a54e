//! Per-connection session handler.
//!
//! A session walks `Connecting -> IdSent -> MapTransfer -> AwaitingInit ->
//! Active -> Closed`. Only the `Active` state has a player record and a place
//! in the broadcast set. End of stream, a transport error or a message that
//! does not decode all lead straight to `Closed`; nothing is retried.

use crate::broadcast::Applied;
use crate::game::CollectOutcome;
use crate::map_transfer;
use crate::network::SharedState;
use crate::session_manager::{mailbox, Frame};
use log::{debug, info, warn};
use shared::{
    write_message, ClientInit, ClientMessage, MessageReader, PlayerId, ProtocolError, Welcome,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    IdSent,
    MapTransfer,
    AwaitingInit,
    Active,
    Closed,
}

pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<SharedState>,
) -> SessionState {
    info!("Connection from {}", addr);
    let (read_half, write_half) = stream.into_split();
    SessionHandler::new(addr, shared)
        .run(read_half, write_half)
        .await
}

pub struct SessionHandler {
    id: Option<PlayerId>,
    addr: SocketAddr,
    state: SessionState,
    shared: Arc<SharedState>,
    writer_task: Option<JoinHandle<()>>,
}

impl SessionHandler {
    pub fn new(addr: SocketAddr, shared: Arc<SharedState>) -> Self {
        Self {
            id: None,
            addr,
            state: SessionState::Connecting,
            shared,
            writer_task: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion and returns its final state.
    pub async fn run<R, W>(mut self, reader: R, writer: W) -> SessionState
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = MessageReader::new(reader);
        match self.drive(&mut reader, writer).await {
            Ok(()) => debug!("Session from {} ended by the server", self.addr),
            Err(e) if e.is_disconnect() => info!(
                "Client {} disconnected during {:?}",
                self.addr, self.state
            ),
            Err(e) => warn!(
                "Closing session from {} in {:?}: {}",
                self.addr, self.state, e
            ),
        }
        self.close().await;
        self.state
    }

    async fn drive<R, W>(
        &mut self,
        reader: &mut MessageReader<R>,
        mut writer: W,
    ) -> Result<(), ProtocolError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.shared.lock().await.sessions.allocate_id();
        self.id = Some(id);
        write_message(&mut writer, &Welcome { id }).await?;
        self.transition(SessionState::IdSent);

        self.transition(SessionState::MapTransfer);
        map_transfer::send_map(reader, &mut writer, self.shared.map()).await?;

        self.transition(SessionState::AwaitingInit);
        let init: ClientInit = reader.read_message().await?;

        let (outbox, inbox) = mailbox();
        self.writer_task = Some(tokio::spawn(write_frames(writer, inbox, id)));
        let player = self.shared.lock().await.activate(id, self.addr, &init, outbox);
        self.transition(SessionState::Active);
        info!(
            "Player {} ({}, {}) joined from {}",
            id, player.name, player.color, self.addr
        );

        loop {
            let message: ClientMessage = reader.read_message().await?;
            let applied = self.shared.lock().await.apply(id, message);
            match applied {
                Applied::Moved => {}
                Applied::Collect(CollectOutcome::Collected { score, replacement }) => debug!(
                    "Player {} scored ({}), replacement collectible {}",
                    id, score, replacement.id
                ),
                Applied::Collect(outcome) => debug!("Player {} collect: {:?}", id, outcome),
                Applied::SessionGone => return Ok(()),
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            "Session {:?} from {}: {:?} -> {:?}",
            self.id, self.addr, self.state, next
        );
        self.state = next;
    }

    async fn close(&mut self) {
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        if self.state == SessionState::Active {
            if let Some(id) = self.id {
                self.shared.lock().await.disconnect(id);
            }
        }
        self.transition(SessionState::Closed);
    }
}

/// Drains a session's mailbox onto its socket. Exits on the first write
/// error, which closes the mailbox and lets the next broadcast notice.
async fn write_frames<W>(mut writer: W, mut inbox: watch::Receiver<Frame>, id: PlayerId)
where
    W: AsyncWrite + Unpin,
{
    while inbox.changed().await.is_ok() {
        let frame = Frame::clone(&inbox.borrow_and_update());
        if let Err(e) = writer.write_all(&frame).await {
            warn!("Write to session {} failed: {}", id, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}
