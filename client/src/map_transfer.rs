//! Client half of the map transfer.
//!
//! Anything that goes wrong with the asset itself (payload length, base64,
//! writing the file) is recovered locally by falling back to the bundled map.
//! Only stream-level failures are returned as errors, since the connection
//! cannot continue after them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{info, warn};
use shared::{MessageReader, ProtocolError, ServerMessage, MAP_READY_TOKEN, MAX_MESSAGE_SIZE};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// File name used when the server does not supply a usable one.
pub const DEFAULT_MAP_NAME: &str = "map.bin";

#[derive(Debug, Error)]
pub enum MapTransferError {
    #[error("protocol error during map transfer: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("map payload was {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("map payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("could not store map: {0}")]
    Io(#[from] std::io::Error),

    #[error("server did not finish the transfer with map_complete")]
    MissingCompletion,
}

/// Where the asset loader should look for the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapOutcome {
    /// The server's map, decoded and stored in the scratch directory
    Downloaded(PathBuf),
    /// The server has no map configured
    Unavailable,
    /// A map was offered but the transfer failed
    Fallback,
}

impl MapOutcome {
    pub fn asset_path<'a>(&'a self, bundled_default: &'a Path) -> &'a Path {
        match self {
            MapOutcome::Downloaded(path) => path,
            MapOutcome::Unavailable | MapOutcome::Fallback => bundled_default,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self, MapOutcome::Downloaded(_))
    }
}

// The payload is raw text between two JSON objects. Whatever it holds, it ends
// where `map_complete` begins; validating it is left to the decoder.
fn is_payload_byte(byte: u8) -> bool {
    byte != b'{'
}

/// Runs the client side of the transfer, starting at `map_info`.
pub async fn receive_map<R, W>(
    reader: &mut MessageReader<R>,
    writer: &mut W,
    scratch_dir: &Path,
) -> Result<MapOutcome, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (filename, size) = match reader.read_message::<ServerMessage>().await? {
        ServerMessage::MapInfo { filename, size } => (filename, size),
        _ => return Err(ProtocolError::UnexpectedMessage { expected: "map_info" }),
    };

    if size == 0 {
        info!("Server has no map, using the bundled one");
        return Ok(MapOutcome::Unavailable);
    }

    info!(
        "Receiving map {} ({} bytes encoded)",
        filename.as_deref().unwrap_or(DEFAULT_MAP_NAME),
        size
    );
    writer.write_all(MAP_READY_TOKEN).await?;

    match transfer(reader, filename.as_deref(), size, scratch_dir).await {
        Ok(path) => {
            info!("Map stored at {}", path.display());
            Ok(MapOutcome::Downloaded(path))
        }
        Err(MapTransferError::Protocol(e)) => Err(e),
        Err(e) => {
            warn!("Map transfer failed ({}), falling back to the bundled map", e);
            Ok(MapOutcome::Fallback)
        }
    }
}

async fn transfer<R>(
    reader: &mut MessageReader<R>,
    filename: Option<&str>,
    size: u64,
    scratch_dir: &Path,
) -> Result<PathBuf, MapTransferError>
where
    R: AsyncRead + Unpin,
{
    let expected = usize::try_from(size).unwrap_or(usize::MAX);
    let payload = reader.read_raw_while(expected, is_payload_byte).await?;
    // Payload bytes the server sent beyond the announced size
    let overflow = reader
        .read_raw_while(MAX_MESSAGE_SIZE, is_payload_byte)
        .await?;

    if reader.read_message::<ServerMessage>().await? != ServerMessage::MapComplete {
        return Err(MapTransferError::MissingCompletion);
    }

    let actual = (payload.len() + overflow.len()) as u64;
    if actual != size {
        return Err(MapTransferError::SizeMismatch {
            expected: size,
            actual,
        });
    }

    let decoded = STANDARD.decode(&payload)?;
    persist(scratch_dir, filename, &decoded).await
}

/// Writes the map through a `.part` file so a failed write never leaves a
/// file the loader could pick up.
async fn persist(
    scratch_dir: &Path,
    filename: Option<&str>,
    bytes: &[u8],
) -> Result<PathBuf, MapTransferError> {
    let name = filename
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from(DEFAULT_MAP_NAME));
    let target = scratch_dir.join(&name);
    let mut part_name = name;
    part_name.push(".part");
    let part = scratch_dir.join(part_name);

    let written = async {
        tokio::fs::create_dir_all(scratch_dir).await?;
        tokio::fs::write(&part, bytes).await?;
        tokio::fs::rename(&part, &target).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(MapTransferError::Io(e));
    }
    Ok(target)
}
