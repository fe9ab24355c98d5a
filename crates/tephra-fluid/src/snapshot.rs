//! Chunk snapshot serialization.
//!
//! Persists a chunk's fluid state so a region can be unloaded and later
//! resumed without a visible hitch: the primary fields plus the obstacle
//! field and the projection caches (so the first frame after a reload
//! warm-starts the pressure solve). Delta and working buffers are transient
//! by construction and are not persisted. Neighbor links are topology, not
//! state; callers relink after loading.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use tephra_common::{ChunkCoord, MagicBytes, SchemaVersion};

use crate::chunk::{Chunk, CELLS, DIM};

/// Number of field arrays in a snapshot payload, in a fixed order:
/// density, u, v, w, bounds, divergence cache, pressure cache.
const SNAPSHOT_FIELDS: usize = 7;

/// Snapshot errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
    /// Deserialization failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
    /// Invalid magic bytes
    #[error("Invalid snapshot format")]
    InvalidFormat,
    /// Version mismatch
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version
        actual: String,
    },
    /// Compression failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
}

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Snapshot header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Magic bytes for format identification
    pub magic: [u8; 4],
    /// Schema version
    pub version: SchemaVersion,
    /// Chunk X coordinate
    pub x: i32,
    /// Chunk Y coordinate
    pub y: i32,
    /// Chunk Z coordinate
    pub z: i32,
    /// Padded grid dimension
    pub dim: u32,
    /// Number of field arrays in the payload
    pub fields: u32,
    /// Compression type (0 = none, 1 = lz4)
    pub compression: u8,
}

impl SnapshotHeader {
    /// Creates a new header for a chunk.
    #[must_use]
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            magic: MagicBytes::SNAPSHOT.0,
            version: SchemaVersion::CHUNK_SNAPSHOT,
            x: coord.x,
            y: coord.y,
            z: coord.z,
            dim: DIM as u32,
            fields: SNAPSHOT_FIELDS as u32,
            compression: 1, // LZ4 by default
        }
    }

    /// Validates the header.
    pub fn validate(&self) -> SnapshotResult<()> {
        if self.magic != MagicBytes::SNAPSHOT.0 {
            return Err(SnapshotError::InvalidFormat);
        }
        if !SchemaVersion::CHUNK_SNAPSHOT.can_read(&self.version) {
            return Err(SnapshotError::VersionMismatch {
                expected: SchemaVersion::CHUNK_SNAPSHOT.to_string(),
                actual: self.version.to_string(),
            });
        }
        if self.dim != DIM as u32 || self.fields != SNAPSHOT_FIELDS as u32 {
            return Err(SnapshotError::DeserializationFailed(format!(
                "unexpected layout: dim {} fields {}",
                self.dim, self.fields
            )));
        }
        Ok(())
    }
}

/// The persisted field arrays of a chunk, in snapshot order.
fn tracked_fields(chunk: &Chunk) -> [&[f32]; SNAPSHOT_FIELDS] {
    [
        &chunk.d,
        &chunk.u,
        &chunk.v,
        &chunk.w,
        &chunk.bounds,
        &chunk.divergence_cache,
        &chunk.pressure_cache,
    ]
}

/// Serializes a chunk's persistent state to bytes.
pub fn serialize(chunk: &Chunk) -> SnapshotResult<Vec<u8>> {
    let header = SnapshotHeader::new(chunk.coord());

    let header_bytes = bincode::serialize(&header)
        .map_err(|e| SnapshotError::SerializationFailed(e.to_string()))?;

    let mut field_bytes = Vec::with_capacity(SNAPSHOT_FIELDS * CELLS * 4);
    for field in tracked_fields(chunk) {
        field_bytes.extend_from_slice(bytemuck::cast_slice(field));
    }

    let compressed = lz4_flex::compress_prepend_size(&field_bytes);

    let mut result = Vec::with_capacity(header_bytes.len() + compressed.len() + 4);
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&compressed);

    debug!(
        "Serialized chunk {}: {} bytes ({} raw)",
        chunk.coord(),
        result.len(),
        field_bytes.len()
    );
    Ok(result)
}

/// Deserializes a chunk from snapshot bytes.
///
/// The returned chunk is unlinked; run [`crate::chunk::link_neighbors`]
/// over the loaded set before simulating.
pub fn deserialize(bytes: &[u8]) -> SnapshotResult<Chunk> {
    if bytes.len() < 8 {
        return Err(SnapshotError::DeserializationFailed(
            "data too short".into(),
        ));
    }

    let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + header_len {
        return Err(SnapshotError::DeserializationFailed(
            "header length mismatch".into(),
        ));
    }

    let header: SnapshotHeader = bincode::deserialize(&bytes[4..4 + header_len])
        .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
    header.validate()?;

    let compressed = &bytes[4 + header_len..];
    let field_bytes = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| SnapshotError::CompressionFailed(e.to_string()))?;

    if field_bytes.len() != SNAPSHOT_FIELDS * CELLS * 4 {
        return Err(SnapshotError::DeserializationFailed(
            "field data size mismatch".into(),
        ));
    }

    let values: Vec<f32> = bytemuck::pod_collect_to_vec(&field_bytes);
    let mut chunk = Chunk::new(ChunkCoord::new(header.x, header.y, header.z));
    let mut fields = values.chunks_exact(CELLS);
    for dst in [
        &mut chunk.d,
        &mut chunk.u,
        &mut chunk.v,
        &mut chunk.w,
        &mut chunk.bounds,
        &mut chunk.divergence_cache,
        &mut chunk.pressure_cache,
    ] {
        let src = fields
            .next()
            .ok_or_else(|| SnapshotError::DeserializationFailed("truncated fields".into()))?;
        dst.copy_from_slice(src);
    }

    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::cell;

    #[test]
    fn test_snapshot_roundtrip() {
        let mut chunk = Chunk::new(ChunkCoord::new(3, -1, 7));
        chunk.d[cell(5, 5, 5)] = 0.75;
        chunk.u[cell(2, 9, 4)] = -1.5;
        chunk.bounds[cell(8, 8, 8)] = 1000.0;
        chunk.pressure_cache[cell(1, 1, 1)] = 42.0;

        let bytes = serialize(&chunk).expect("serialize");
        let restored = deserialize(&bytes).expect("deserialize");

        assert_eq!(restored.coord(), ChunkCoord::new(3, -1, 7));
        assert_eq!(restored.d[cell(5, 5, 5)], 0.75);
        assert_eq!(restored.u[cell(2, 9, 4)], -1.5);
        assert_eq!(restored.bounds[cell(8, 8, 8)], 1000.0);
        assert_eq!(restored.pressure_cache[cell(1, 1, 1)], 42.0);
        // Transient buffers come back zeroed.
        assert!(restored.d0.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_snapshot_compresses_sparse_chunks() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        let bytes = serialize(&chunk).expect("serialize");
        assert!(bytes.len() < SNAPSHOT_FIELDS * CELLS * 4 / 10);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        let mut bytes = serialize(&chunk).expect("serialize");
        // Corrupt the magic inside the bincode-encoded header.
        bytes[4] = b'X';
        assert!(matches!(
            deserialize(&bytes),
            Err(SnapshotError::InvalidFormat)
        ));
    }

    #[test]
    fn test_rejects_truncated_data() {
        assert!(matches!(
            deserialize(&[0, 1, 2]),
            Err(SnapshotError::DeserializationFailed(_))
        ));
    }
}
