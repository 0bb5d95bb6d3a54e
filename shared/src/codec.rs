//! Wire codec for the length-implicit JSON protocol.
//!
//! Messages are bare JSON objects written back to back with no delimiter or
//! length prefix. A single read from a stream socket may carry half a message
//! or several of them, so [`MessageReader`] keeps a byte buffer and peels one
//! complete object off the front at a time. The same buffer serves raw reads
//! (the map ready token and the base64 map payload), which means bytes that
//! arrive after a raw region are kept for the next message instead of lost.

use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of a single socket read.
pub const READ_BUFFER_SIZE: usize = 8192;
/// Upper bound on a buffered message that has not completed yet.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(ProtocolError::Json)
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = encode(message)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Buffered reader that yields whole messages or exact raw byte counts.
pub struct MessageReader<R> {
    inner: R,
    buffer: Vec<u8>,
    max_message_size: usize,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_MESSAGE_SIZE)
    }

    pub fn with_limit(inner: R, max_message_size: usize) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(READ_BUFFER_SIZE),
            max_message_size,
        }
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads the next complete JSON object and decodes it as `T`.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        loop {
            if let Some(message) = self.try_decode()? {
                return Ok(message);
            }
            if self.buffer.len() > self.max_message_size {
                return Err(ProtocolError::MessageTooLarge {
                    limit: self.max_message_size,
                });
            }
            self.fill().await?;
        }
    }

    /// Reads exactly `len` raw bytes. Anything past `len` stays buffered.
    pub async fn read_raw(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        while self.buffer.len() < len {
            self.fill().await?;
        }
        Ok(self.take_front(len))
    }

    /// Reads up to `len` raw bytes, stopping early at the first byte `accept`
    /// rejects. That byte and everything after it stay buffered.
    pub async fn read_raw_while<F>(&mut self, len: usize, accept: F) -> Result<Vec<u8>, ProtocolError>
    where
        F: Fn(u8) -> bool,
    {
        let mut scanned = 0;
        loop {
            let limit = self.buffer.len().min(len);
            if let Some(stop) = self.buffer[scanned..limit].iter().position(|b| !accept(*b)) {
                return Ok(self.take_front(scanned + stop));
            }
            if limit == len {
                return Ok(self.take_front(len));
            }
            scanned = limit;
            self.fill().await?;
        }
    }

    fn take_front(&mut self, len: usize) -> Vec<u8> {
        let rest = self.buffer.split_off(len);
        std::mem::replace(&mut self.buffer, rest)
    }

    fn try_decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        let Some(start) = self.buffer.iter().position(|b| !b.is_ascii_whitespace()) else {
            self.buffer.clear();
            return Ok(None);
        };

        let (next, offset) = {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buffer[start..]).into_iter::<T>();
            let next = stream.next();
            (next, stream.byte_offset())
        };

        match next {
            Some(Ok(message)) => {
                self.buffer.drain(..start + offset);
                Ok(Some(message))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(ProtocolError::Malformed(e)),
            None => Ok(None),
        }
    }

    async fn fill(&mut self) -> Result<(), ProtocolError> {
        let mut chunk = [0u8; READ_BUFFER_SIZE];
        let n = self.inner.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientMessage, ServerMessage, Welcome};
    use tokio::io::duplex;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_coalesced_messages_are_split() {
        let (mut tx, rx) = duplex(1024);
        let mut bytes = encode(&Welcome { id: 3 }).unwrap();
        bytes.extend(encode(&ClientMessage::Collect { collectible_id: 9 }).unwrap());
        tx.write_all(&bytes).await.unwrap();

        let mut reader = MessageReader::new(rx);
        let welcome: Welcome = assert_ok!(reader.read_message().await);
        assert_eq!(welcome.id, 3);
        let collect: ClientMessage = assert_ok!(reader.read_message().await);
        assert_eq!(collect, ClientMessage::Collect { collectible_id: 9 });
        assert!(reader.buffered().is_empty());
    }

    #[tokio::test]
    async fn test_message_split_across_reads() {
        let (mut tx, rx) = duplex(1024);
        let bytes = encode(&ServerMessage::MapComplete).unwrap();
        let (head, tail) = bytes.split_at(5);
        let tail = tail.to_vec();

        let mut reader = MessageReader::new(rx);
        tx.write_all(head).await.unwrap();
        let writer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            tx.write_all(&tail).await.unwrap();
            tx
        });

        let message: ServerMessage = assert_ok!(reader.read_message().await);
        assert_eq!(message, ServerMessage::MapComplete);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_whitespace_between_messages_is_skipped() {
        let (mut tx, rx) = duplex(1024);
        tx.write_all(b"  {\"id\": 1}\n\n {\"id\": 2}").await.unwrap();
        let mut reader = MessageReader::new(rx);
        let a: Welcome = reader.read_message().await.unwrap();
        let b: Welcome = reader.read_message().await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
    }

    #[tokio::test]
    async fn test_malformed_message_is_an_error() {
        let (mut tx, rx) = duplex(1024);
        tx.write_all(b"{\"type\": \"teleport\"}").await.unwrap();
        let mut reader = MessageReader::new(rx);
        let result = reader.read_message::<ClientMessage>().await;
        assert!(matches!(assert_err!(result), ProtocolError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_garbage_is_an_error() {
        let (mut tx, rx) = duplex(1024);
        tx.write_all(b"not json at all").await.unwrap();
        let mut reader = MessageReader::new(rx);
        let result = reader.read_message::<Welcome>().await;
        assert!(matches!(assert_err!(result), ProtocolError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_eof_reports_closed_connection() {
        let (mut tx, rx) = duplex(1024);
        tx.write_all(b"{\"id\":").await.unwrap();
        drop(tx);
        let mut reader = MessageReader::new(rx);
        let err = assert_err!(reader.read_message::<Welcome>().await);
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (mut tx, rx) = duplex(64 * 1024);
        let mut payload = b"{\"name\": \"".to_vec();
        payload.extend(std::iter::repeat(b'a').take(4096));
        tx.write_all(&payload).await.unwrap();

        let mut reader = MessageReader::with_limit(rx, 1024);
        let err = assert_err!(reader.read_message::<crate::ClientInit>().await);
        assert!(matches!(err, ProtocolError::MessageTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn test_raw_read_keeps_trailing_bytes() {
        let (mut tx, rx) = duplex(1024);
        let mut bytes = b"QUJD".to_vec();
        bytes.extend(encode(&ServerMessage::MapComplete).unwrap());
        tx.write_all(&bytes).await.unwrap();

        let mut reader = MessageReader::new(rx);
        let raw = assert_ok!(reader.read_raw(4).await);
        assert_eq!(raw, b"QUJD");
        let message: ServerMessage = assert_ok!(reader.read_message().await);
        assert_eq!(message, ServerMessage::MapComplete);
    }

    #[tokio::test]
    async fn test_bounded_raw_read_stops_at_rejected_byte() {
        let (mut tx, rx) = duplex(1024);
        tx.write_all(b"QUJD{\"type\":\"map_complete\"}").await.unwrap();

        let mut reader = MessageReader::new(rx);
        let raw = assert_ok!(
            reader
                .read_raw_while(8, |b| b.is_ascii_alphanumeric())
                .await
        );
        assert_eq!(raw, b"QUJD");
        let message: ServerMessage = assert_ok!(reader.read_message().await);
        assert_eq!(message, ServerMessage::MapComplete);
    }

    #[tokio::test]
    async fn test_bounded_raw_read_waits_for_full_length() {
        let (mut tx, rx) = duplex(1024);
        let mut reader = MessageReader::new(rx);
        tx.write_all(b"AAAA").await.unwrap();
        let writer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            tx.write_all(b"BBBBCC").await.unwrap();
            tx
        });

        let raw = assert_ok!(reader.read_raw_while(8, |b| b.is_ascii_uppercase()).await);
        assert_eq!(raw, b"AAAABBBB");
        assert_eq!(reader.buffered(), b"CC");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_write_message_round_trip() {
        let (mut tx, rx) = duplex(1024);
        write_message(&mut tx, &ClientMessage::Position { x: 1.0, y: 2.0, z: 3.0 })
            .await
            .unwrap();
        let mut reader = MessageReader::new(rx);
        let message: ClientMessage = reader.read_message().await.unwrap();
        assert_eq!(message, ClientMessage::Position { x: 1.0, y: 2.0, z: 3.0 });
    }
}
