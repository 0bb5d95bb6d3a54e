//! Server half of the one-shot map transfer that precedes the init message.
//!
//! Sequence on the wire:
//! 1. `map_info` with the filename and the length of the base64 text
//!    (`size = 0`, `filename = null` when no asset is configured; stop here)
//! 2. the client answers with the two byte ready token
//! 3. exactly `size` bytes of base64 text, written in chunks of
//!    [`MAP_CHUNK_SIZE`] with no framing of their own
//! 4. `map_complete`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use shared::{
    write_message, MessageReader, ProtocolError, ServerMessage, MAP_CHUNK_SIZE, MAP_READY_TOKEN,
};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// The map model, base64-encoded once at startup and shared by all sessions.
#[derive(Debug, Clone)]
pub struct MapAsset {
    filename: String,
    encoded: Vec<u8>,
}

impl MapAsset {
    pub fn from_bytes(filename: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            encoded: STANDARD.encode(raw).into_bytes(),
        }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "map.bin".to_string());
        let asset = Self::from_bytes(filename, &raw);
        info!(
            "Loaded map {} ({} bytes, {} encoded)",
            asset.filename,
            raw.len(),
            asset.encoded_len()
        );
        Ok(asset)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Length of the base64 text, which is what `map_info.size` announces.
    pub fn encoded_len(&self) -> u64 {
        self.encoded.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }
}

/// Runs the server side of the transfer. Returns once `map_complete` is
/// written, or right after `map_info` when there is nothing to send.
pub async fn send_map<R, W>(
    reader: &mut MessageReader<R>,
    writer: &mut W,
    asset: Option<&MapAsset>,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(asset) = asset.filter(|asset| !asset.is_empty()) else {
        debug!("No map configured, announcing size 0");
        return write_message(
            writer,
            &ServerMessage::MapInfo {
                filename: None,
                size: 0,
            },
        )
        .await;
    };

    write_message(
        writer,
        &ServerMessage::MapInfo {
            filename: Some(asset.filename.clone()),
            size: asset.encoded_len(),
        },
    )
    .await?;

    let token = reader.read_raw(MAP_READY_TOKEN.len()).await?;
    if token[..] != MAP_READY_TOKEN[..] {
        return Err(ProtocolError::InvalidReadyToken(token));
    }

    for chunk in asset.encoded.chunks(MAP_CHUNK_SIZE) {
        writer.write_all(chunk).await?;
    }
    write_message(writer, &ServerMessage::MapComplete).await?;
    debug!("Streamed {} bytes of map data", asset.encoded_len());
    Ok(())
}
