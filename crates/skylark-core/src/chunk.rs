//! Chunk data model — what moves through the overlay and where it goes next.
//!
//! A [`Chunk`] is a contiguous byte range of a file and the atomic retryable
//! unit of a transfer. A [`ChunkRequest`] pairs a chunk with its remaining
//! route; each gateway pops the head hop once that hop's work is done.
//! [`ChunkState`] is kept separately (in the chunk store) so a request can be
//! handed to the next gateway while the local processing history stays here.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::wire::WireProtocolHeader;

// ── Chunk ─────────────────────────────────────────────────────────────────────

/// A contiguous piece of a file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Logical object path at the destination.
    pub key: String,
    /// Unique for the whole transfer job; doubles as the wire correlation id.
    pub chunk_id: u64,
    pub file_offset_bytes: u64,
    pub chunk_length_bytes: u64,
}

impl Chunk {
    pub fn to_wire_header(&self, end_of_stream: bool) -> WireProtocolHeader {
        WireProtocolHeader::new(self.chunk_id, self.chunk_length_bytes, end_of_stream)
    }

    /// Byte range of the source object covered by this chunk.
    pub fn byte_range(&self) -> Option<Range<u64>> {
        let end = self.file_offset_bytes.checked_add(self.chunk_length_bytes)?;
        Some(self.file_offset_bytes..end)
    }
}

// ── Hops ──────────────────────────────────────────────────────────────────────

/// Where the chunk lives at a given hop.
///
/// Serialized flat under `chunk_location_type`; store variants require their
/// matching `*_object_store_region` / `*_object_store_bucket` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "chunk_location_type", rename_all = "snake_case")]
pub enum ChunkLocation {
    SrcObjectStore {
        #[serde(rename = "src_object_store_region")]
        region: String,
        #[serde(rename = "src_object_store_bucket")]
        bucket: String,
    },
    DstObjectStore {
        #[serde(rename = "dst_object_store_region")]
        region: String,
        #[serde(rename = "dst_object_store_bucket")]
        bucket: String,
    },
    Relay,
}

impl ChunkLocation {
    pub fn name(&self) -> &'static str {
        match self {
            ChunkLocation::SrcObjectStore { .. } => "src_object_store",
            ChunkLocation::DstObjectStore { .. } => "dst_object_store",
            ChunkLocation::Relay => "relay",
        }
    }
}

/// Routing metadata for one step of a chunk's path through the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequestHop {
    /// `provider:region`, e.g. `aws:us-east-1`.
    pub hop_cloud_region: String,
    pub hop_ip_address: String,
    #[serde(flatten)]
    pub location: ChunkLocation,
}

impl ChunkRequestHop {
    pub fn src_object_store(
        hop_cloud_region: impl Into<String>,
        hop_ip_address: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            hop_cloud_region: hop_cloud_region.into(),
            hop_ip_address: hop_ip_address.into(),
            location: ChunkLocation::SrcObjectStore {
                region: region.into(),
                bucket: bucket.into(),
            },
        }
    }

    pub fn dst_object_store(
        hop_cloud_region: impl Into<String>,
        hop_ip_address: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            hop_cloud_region: hop_cloud_region.into(),
            hop_ip_address: hop_ip_address.into(),
            location: ChunkLocation::DstObjectStore {
                region: region.into(),
                bucket: bucket.into(),
            },
        }
    }

    pub fn relay(hop_cloud_region: impl Into<String>, hop_ip_address: impl Into<String>) -> Self {
        Self {
            hop_cloud_region: hop_cloud_region.into(),
            hop_ip_address: hop_ip_address.into(),
            location: ChunkLocation::Relay,
        }
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// A chunk plus its remaining path, head first.
///
/// Unknown top-level fields are kept in `extensions` so that fields added by
/// newer peers survive a pass through this gateway unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub chunk: Chunk,
    pub path: Vec<ChunkRequestHop>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl ChunkRequest {
    pub fn new(chunk: Chunk, path: Vec<ChunkRequestHop>) -> Self {
        Self {
            chunk,
            path,
            extensions: Map::new(),
        }
    }

    pub fn chunk_id(&self) -> u64 {
        self.chunk.chunk_id
    }

    /// The next action to perform.
    pub fn head(&self) -> Option<&ChunkRequestHop> {
        self.path.first()
    }

    /// Remove the head hop once its work is satisfied.
    pub fn pop_hop(&mut self) -> Option<ChunkRequestHop> {
        if self.path.is_empty() {
            None
        } else {
            Some(self.path.remove(0))
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Check the invariants a request must hold before it is registered.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let chunk_id = self.chunk.chunk_id;
        if self.path.is_empty() {
            return Err(ValidationError::EmptyPath(chunk_id));
        }
        if self.chunk.byte_range().is_none() {
            return Err(ValidationError::RangeOverflow(chunk_id));
        }
        for (index, hop) in self.path.iter().enumerate() {
            match &hop.location {
                ChunkLocation::Relay if hop.hop_ip_address.trim().is_empty() => {
                    return Err(ValidationError::MissingRelayAddress { chunk_id, index });
                }
                ChunkLocation::SrcObjectStore { region, bucket }
                | ChunkLocation::DstObjectStore { region, bucket }
                    if region.is_empty() || bucket.is_empty() =>
                {
                    return Err(ValidationError::MissingStoreCoordinates { chunk_id, index });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("chunk {0}: path is empty")]
    EmptyPath(u64),

    #[error("chunk {0}: offset + length overflows")]
    RangeOverflow(u64),

    #[error("chunk {chunk_id}: relay hop {index} has no address")]
    MissingRelayAddress { chunk_id: u64, index: usize },

    #[error("chunk {chunk_id}: object store hop {index} has empty region or bucket")]
    MissingStoreCoordinates { chunk_id: u64, index: usize },
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Lifecycle of one chunk at one gateway.
///
/// ```text
/// registered -> download_in_progress -> downloaded -> upload_in_progress -> upload_complete
///      \-> failed        \-> failed         \-> failed        \-> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Registered,
    DownloadInProgress,
    Downloaded,
    UploadInProgress,
    UploadComplete,
    Failed,
}

impl ChunkState {
    pub const ALL: [ChunkState; 6] = [
        ChunkState::Registered,
        ChunkState::DownloadInProgress,
        ChunkState::Downloaded,
        ChunkState::UploadInProgress,
        ChunkState::UploadComplete,
        ChunkState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkState::Registered => "registered",
            ChunkState::DownloadInProgress => "download_in_progress",
            ChunkState::Downloaded => "downloaded",
            ChunkState::UploadInProgress => "upload_in_progress",
            ChunkState::UploadComplete => "upload_complete",
            ChunkState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkState::UploadComplete | ChunkState::Failed)
    }

    /// Registered or held by a worker mid-hop.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ChunkState::Registered | ChunkState::DownloadInProgress | ChunkState::UploadInProgress
        )
    }

    /// The only legal edges. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: ChunkState) -> bool {
        use ChunkState::*;
        matches!(
            (*self, next),
            (Registered, DownloadInProgress)
                | (DownloadInProgress, Downloaded)
                | (Downloaded, UploadInProgress)
                | (UploadInProgress, UploadComplete)
                | (Registered | DownloadInProgress | Downloaded | UploadInProgress, Failed)
        )
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        ChunkState::ALL
            .into_iter()
            .find(|state| state.as_str() == lower)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chunk state: {0}")]
pub struct UnknownState(pub String);
