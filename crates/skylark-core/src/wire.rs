//! Skylark wire format — the header framing each chunk payload on a socket.
//!
//! Every chunk sent between gateways is a 29-byte header followed by exactly
//! `chunk_len` payload bytes. There is no other framing: the declared length
//! is the only thing that tells the receiver where the next header begins.
//!
//! ```text
//! offset  size  field
//!      0     8  magic             0x534B595F4C41524B ("SKY_LARK")
//!      8     4  protocol_version  1
//!     12     8  chunk_id
//!     20     8  chunk_len
//!     28     1  end_of_stream     0 or 1
//! ```
//!
//! All integers are unsigned big-endian. The on-wire struct is built from
//! zerocopy byte-order types so the layout has no padding and no alignment
//! requirements. There is no unsafe code in this module.

use static_assertions::assert_eq_size;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use bytes::Bytes;

// ── Constants ─────────────────────────────────────────────────────────────────

/// "SKY_LARK" as a big-endian u64. Detects desync or garbage on the socket.
pub const MAGIC: u64 = 0x534B_595F_4C41_524B;

/// Current protocol version. A receiver rejects anything else.
pub const PROTOCOL_VERSION: u32 = 1;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 8 + 4 + 8 + 8 + 1;

/// Default upper bound on a single chunk payload (256 MiB).
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 256 * 1024 * 1024;

// ── Header ────────────────────────────────────────────────────────────────────

/// Lightweight header preceding each chunk payload on a stream.
///
/// Created per transfer attempt and consumed immediately; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireProtocolHeader {
    /// Correlates the payload with a chunk store row.
    pub chunk_id: u64,
    /// Exact number of payload bytes following the header.
    pub chunk_len: u64,
    /// The sender has no further chunks for this connection.
    pub end_of_stream: bool,
}

/// On-wire layout. Field order is the protocol.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct RawHeader {
    magic: U64<BigEndian>,
    protocol_version: U32<BigEndian>,
    chunk_id: U64<BigEndian>,
    chunk_len: U64<BigEndian>,
    end_of_stream: u8,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(RawHeader, [u8; HEADER_LEN]);

impl WireProtocolHeader {
    pub fn new(chunk_id: u64, chunk_len: u64, end_of_stream: bool) -> Self {
        Self {
            chunk_id,
            chunk_len,
            end_of_stream,
        }
    }

    /// Encode to the fixed 29-byte representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let raw = RawHeader {
            magic: U64::new(MAGIC),
            protocol_version: U32::new(PROTOCOL_VERSION),
            chunk_id: U64::new(self.chunk_id),
            chunk_len: U64::new(self.chunk_len),
            end_of_stream: u8::from(self.end_of_stream),
        };
        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Decode a header, rejecting any structural mismatch before the
    /// identity fields are trusted.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let raw = RawHeader::read_from(data).ok_or(ProtocolError::BadLength(data.len()))?;

        let magic = raw.magic.get();
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        let version = raw.protocol_version.get();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let end_of_stream = match raw.end_of_stream {
            0 => false,
            1 => true,
            other => return Err(ProtocolError::InvalidEndOfStream(other)),
        };

        Ok(Self {
            chunk_id: raw.chunk_id.get(),
            chunk_len: raw.chunk_len.get(),
            end_of_stream,
        })
    }
}

// ── Stream I/O ────────────────────────────────────────────────────────────────

/// Read exactly one header from `stream`.
///
/// A short read leaves the stream desynchronized; the caller must close it.
pub async fn read_header<R>(stream: &mut R) -> Result<WireProtocolHeader, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(ProtocolError::from_read)?;
    WireProtocolHeader::decode(&buf)
}

/// Write all 29 header bytes to `stream`. Does not flush.
pub async fn write_header<W>(stream: &mut W, header: &WireProtocolHeader) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&header.encode()).await?;
    Ok(())
}

/// Read the `len`-byte payload that follows a header.
///
/// Lengths above `max` are rejected before anything is allocated.
pub async fn read_payload<R>(stream: &mut R, len: u64, max: u64) -> Result<Bytes, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    if len > max {
        return Err(ProtocolError::PayloadTooLarge { len, max });
    }
    let len = usize::try_from(len).map_err(|_| ProtocolError::PayloadTooLarge { len, max })?;
    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(ProtocolError::from_read)?;
    Ok(Bytes::from(buf))
}

/// Write a header followed by its payload, then flush.
///
/// The payload must be exactly `header.chunk_len` bytes; this is checked once
/// up front rather than per byte.
pub async fn write_chunk<W>(
    stream: &mut W,
    header: &WireProtocolHeader,
    payload: &[u8],
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let actual = payload.len() as u64;
    if actual != header.chunk_len {
        return Err(ProtocolError::LengthMismatch {
            declared: header.chunk_len,
            actual,
        });
    }
    write_header(stream, header).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when framing or interpreting wire data.
///
/// Every variant is fatal to the connection it occurred on and to nothing else.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("header must be {} bytes, got {0}", HEADER_LEN)]
    BadLength(usize),

    #[error("bad magic: 0x{0:016x}")]
    BadMagic(u64),

    #[error("unsupported protocol version {0} (expected {})", PROTOCOL_VERSION)]
    UnsupportedVersion(u32),

    #[error("invalid end_of_stream byte: 0x{0:02x}")]
    InvalidEndOfStream(u8),

    #[error("payload length {len} exceeds limit {max}")]
    PayloadTooLarge { len: u64, max: u64 },

    #[error("header declares {declared} payload bytes, caller supplied {actual}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("stream ended mid-frame")]
    Truncated,

    #[error("socket i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    fn from_read(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            ProtocolError::Io(e)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
