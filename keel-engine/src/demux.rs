//! Combined stream demultiplexing
//!
//! The container runtime delivers stdout and stderr of a container over a
//! single connection. Each chunk is prefixed with an 8-byte header:
//!
//! ```text
//! [stream id, 0, 0, 0, size (u32 big endian)][payload; size]
//! ```
//!
//! [`Demuxer`] strips the framing and yields payloads in arrival order,
//! merging both channels into one plain byte stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::Decoder;
use tracing::debug;

const HEADER_LEN: usize = 8;
/// Upper bound on buffer space reserved ahead of a frame's payload
const MAX_RESERVE: usize = 64 * 1024;

/// Channel a frame was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    /// Error raised by the runtime itself while streaming
    System = 3,
}

impl StdStream {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            3 => Some(Self::System),
            _ => None,
        }
    }
}

/// Frames a payload the way the runtime does on the wire
pub fn encode_frame(stream: StdStream, payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u8(stream as u8);
    frame.put_bytes(0, 3);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}

/// Decoder for the runtime's combined stdout/stderr framing
#[derive(Debug, Default)]
pub struct Demuxer {
    _private: (),
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Demuxer {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            if src.len() < HEADER_LEN {
                src.reserve(HEADER_LEN - src.len());
                return Ok(None);
            }

            let stream = StdStream::from_byte(src[0]).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unrecognized stream id {}", src[0]),
                )
            })?;
            let size = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

            if src.len() < HEADER_LEN + size {
                src.reserve((HEADER_LEN + size - src.len()).min(MAX_RESERVE));
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            let payload = src.split_to(size).freeze();

            if stream == StdStream::System {
                return Err(io::Error::other(
                    String::from_utf8_lossy(&payload).into_owned(),
                ));
            }
            // empty frames carry nothing; returning one would look like EOF
            // to readers that treat a zero-length chunk as end of stream
            if payload.is_empty() {
                continue;
            }
            return Ok(Some(payload));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    debug!("discarding {} bytes of truncated log frame", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}
