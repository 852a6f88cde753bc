//! DBGp framing.
//!
//! Engine to client: `<decimal length>\0<payload>\0`.
//! Client to engine: `<command line>\0`.
//!
//! `ClientCodec` decodes engine frames and encodes commands. `EngineCodec`
//! is its mirror image, for anything that plays the engine side.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Command, DbgpError};

/// Longest accepted run of length digits.
const MAX_LENGTH_DIGITS: usize = 20;

/// Default cap on a single engine frame (64 MB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Length,
    Payload(usize),
}

/// Decodes engine frames, encodes client commands.
#[derive(Debug, Clone)]
pub struct ClientCodec {
    state: DecodeState,
    max_frame_len: usize,
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    #[must_use]
    pub const fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            state: DecodeState::Length,
            max_frame_len,
        }
    }

    fn parse_length(&self, digits: &[u8]) -> Result<usize, DbgpError> {
        let text = std::str::from_utf8(digits)
            .ok()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| {
                DbgpError::Protocol(format!(
                    "frame length is not numeric: {:?}",
                    String::from_utf8_lossy(digits)
                ))
            })?;
        let len: usize = text
            .parse()
            .map_err(|_| DbgpError::Protocol(format!("frame length out of range: {text}")))?;
        if len == 0 {
            return Err(DbgpError::Protocol("frame length must be positive".to_string()));
        }
        if len > self.max_frame_len {
            return Err(DbgpError::Protocol(format!(
                "frame length {len} exceeds limit {}",
                self.max_frame_len
            )));
        }
        Ok(len)
    }
}

impl Decoder for ClientCodec {
    type Item = Bytes;
    type Error = DbgpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Length => {
                    let Some(nul) = src.iter().position(|&b| b == 0) else {
                        if src.len() > MAX_LENGTH_DIGITS {
                            return Err(DbgpError::Protocol(format!(
                                "no length terminator within {MAX_LENGTH_DIGITS} bytes"
                            )));
                        }
                        return Ok(None);
                    };
                    let digits = src.split_to(nul);
                    src.advance(1);
                    let len = self.parse_length(&digits)?;
                    self.state = DecodeState::Payload(len);
                }
                DecodeState::Payload(len) => {
                    if src.len() < len + 1 {
                        src.reserve(len + 1 - src.len());
                        return Ok(None);
                    }
                    let payload = src.split_to(len).freeze();
                    let trailer = src.get_u8();
                    if trailer != 0 {
                        tracing::warn!(trailer, "Frame payload not followed by NUL");
                    }
                    self.state = DecodeState::Length;
                    tracing::trace!(len, "Decoded engine frame");
                    return Ok(Some(payload));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match self.state {
            DecodeState::Payload(len) if src.len() == len => {
                tracing::warn!(len, "Connection closed before trailing NUL");
                self.state = DecodeState::Length;
                Ok(Some(src.split_to(len).freeze()))
            }
            _ if src.is_empty() => Ok(None),
            _ => Err(DbgpError::ConnectionClosed),
        }
    }
}

impl Encoder<&Command> for ClientCodec {
    type Error = DbgpError;

    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_line();
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(0);
        Ok(())
    }
}

/// Decodes client commands, encodes engine frames.
#[derive(Debug, Clone, Default)]
pub struct EngineCodec {
    _private: (),
}

impl EngineCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl Decoder for EngineCodec {
    type Item = Command;
    type Error = DbgpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(nul) = src.iter().position(|&b| b == 0) else {
            return Ok(None);
        };
        let line = src.split_to(nul);
        src.advance(1);
        let line = std::str::from_utf8(&line)
            .map_err(|e| DbgpError::Protocol(format!("command is not UTF-8: {e}")))?;
        Command::parse(line).map(Some)
    }
}

impl Encoder<Bytes> for EngineCodec {
    type Error = DbgpError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        put_frame(&item, dst);
        Ok(())
    }
}

fn put_frame(payload: &[u8], dst: &mut BytesMut) {
    let len = payload.len().to_string();
    dst.reserve(len.len() + payload.len() + 2);
    dst.put_slice(len.as_bytes());
    dst.put_u8(0);
    dst.put_slice(payload);
    dst.put_u8(0);
}

/// Encode a payload as one engine frame.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    put_frame(payload, &mut buf);
    buf.freeze()
}

/// Write a payload as one engine frame and flush.
///
/// # Errors
/// Returns error if the write fails.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), DbgpError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next engine frame, bounded by `deadline`.
///
/// After a timeout the stream may hold a partial frame and must not be reused.
///
/// # Errors
/// Returns `Timeout` when the deadline passes, `ConnectionClosed` on EOF,
/// and any decode error unchanged.
pub async fn read_frame<S>(frames: &mut S, deadline: Duration) -> Result<Bytes, DbgpError>
where
    S: Stream<Item = Result<Bytes, DbgpError>> + Unpin,
{
    match tokio::time::timeout(deadline, frames.next()).await {
        Err(_) => Err(DbgpError::Timeout {
            after: deadline,
            waiting_for: "engine frame",
        }),
        Ok(None) => Err(DbgpError::ConnectionClosed),
        Ok(Some(frame)) => frame,
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::codec::FramedRead;

    use super::*;

    const DEADLINE: Duration = Duration::from_secs(5);

    #[test]
    fn test_encode_frame_layout() {
        assert_eq!(&encode_frame(b"<x/>")[..], b"4\0<x/>\0");
    }

    #[tokio::test]
    async fn test_roundtrip_single_chunk() {
        let payload = b"<?xml version=\"1.0\"?><response status=\"break\"/>";
        let mock = tokio_test::io::Builder::new()
            .read(&encode_frame(payload))
            .build();
        let mut frames = FramedRead::new(mock, ClientCodec::new());

        let frame = read_frame(&mut frames, DEADLINE).await.unwrap();
        assert_eq!(&frame[..], payload);
    }

    #[tokio::test]
    async fn test_roundtrip_across_partial_reads() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let wire = encode_frame(&payload);

        let mut builder = tokio_test::io::Builder::new();
        for chunk in wire.chunks(7) {
            builder.read(chunk);
        }
        let mut frames = FramedRead::new(builder.build(), ClientCodec::new());

        let frame = read_frame(&mut frames, DEADLINE).await.unwrap();
        assert_eq!(&frame[..], &payload[..]);
    }

    #[tokio::test]
    async fn test_back_to_back_frames_in_one_read() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_frame(b"first"));
        wire.extend_from_slice(&encode_frame(b"second"));
        let mock = tokio_test::io::Builder::new().read(&wire).build();
        let mut frames = FramedRead::new(mock, ClientCodec::new());

        assert_eq!(&read_frame(&mut frames, DEADLINE).await.unwrap()[..], b"first");
        assert_eq!(&read_frame(&mut frames, DEADLINE).await.unwrap()[..], b"second");
        assert!(matches!(
            read_frame(&mut frames, DEADLINE).await,
            Err(DbgpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_non_numeric_length_is_protocol_error() {
        let mock = tokio_test::io::Builder::new().read(b"12a\0payload\0").build();
        let mut frames = FramedRead::new(mock, ClientCodec::new());
        assert!(matches!(
            read_frame(&mut frames, DEADLINE).await,
            Err(DbgpError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_length_is_protocol_error() {
        let mock = tokio_test::io::Builder::new().read(b"0\0\0").build();
        let mut frames = FramedRead::new(mock, ClientCodec::new());
        assert!(matches!(
            read_frame(&mut frames, DEADLINE).await,
            Err(DbgpError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mock = tokio_test::io::Builder::new().read(b"1000\0").build();
        let mut frames = FramedRead::new(mock, ClientCodec::with_max_frame_len(16));
        assert!(matches!(
            read_frame(&mut frames, DEADLINE).await,
            Err(DbgpError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_trailer_is_tolerated() {
        let mock = tokio_test::io::Builder::new().read(b"3\0abcX").build();
        let mut frames = FramedRead::new(mock, ClientCodec::new());
        assert_eq!(&read_frame(&mut frames, DEADLINE).await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn test_missing_trailer_at_eof_is_tolerated() {
        let mock = tokio_test::io::Builder::new().read(b"3\0abc").build();
        let mut frames = FramedRead::new(mock, ClientCodec::new());
        assert_eq!(&read_frame(&mut frames, DEADLINE).await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn test_truncated_payload_is_connection_closed() {
        let mock = tokio_test::io::Builder::new().read(b"10\0abc").build();
        let mut frames = FramedRead::new(mock, ClientCodec::new());
        assert!(matches!(
            read_frame(&mut frames, DEADLINE).await,
            Err(DbgpError::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let (client, _engine) = tokio::io::duplex(64);
        let mut frames = FramedRead::new(client, ClientCodec::new());

        let started = tokio::time::Instant::now();
        let result = read_frame(&mut frames, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(DbgpError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[test]
    fn test_engine_codec_decodes_commands() {
        let mut codec = EngineCodec::new();
        let mut buf = BytesMut::from(&b"run -i 3\0stack_get -i 4 -d 0\0"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.name, "run");
        assert_eq!(first.transaction_id, 3);

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.name, "stack_get");
        assert_eq!(second.arg('d'), Some("0"));

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_client_encodes_command_with_nul() {
        let mut codec = ClientCodec::new();
        let mut buf = BytesMut::new();
        let command = Command::new("status", 1);
        codec.encode(&command, &mut buf).unwrap();
        assert_eq!(&buf[..], b"status -i 1\0");
    }
}
