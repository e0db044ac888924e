//! Configuration for building, opening and merging segments.
//!
//! All settings have defaults that match the on-disk format's expectations,
//! so `SegmentConfig::default()` is what most callers want. Configurations
//! serialize to JSON for the command line tool.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Legacy fixed chunk size.
pub const LEGACY_CHUNK_MODE: u32 = 1024;

/// Whole-list chunk for low cardinality terms, 1024 otherwise.
pub const LOW_CARDINALITY_CHUNK_MODE: u32 = 1025;

/// Fewest dense chunks holding at most ~1024 items each.
pub const BALANCED_CHUNK_MODE: u32 = 1026;

/// How per-document streams are split into chunks.
///
/// The mode is recorded in the segment footer; readers recompute the chunk
/// size of every posting list and doc-value stream from it, so it must never
/// change for an existing segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChunkMode {
    /// Always 1024 documents per chunk.
    Legacy,
    /// One chunk when the list holds at most 1024 entries.
    LowCardinalityWhole,
    /// `max_docs / (cardinality / 1024 + 1)` documents per chunk.
    #[default]
    Balanced,
}

impl ChunkMode {
    /// On-disk code of this mode.
    pub fn code(&self) -> u32 {
        match self {
            ChunkMode::Legacy => LEGACY_CHUNK_MODE,
            ChunkMode::LowCardinalityWhole => LOW_CARDINALITY_CHUNK_MODE,
            ChunkMode::Balanced => BALANCED_CHUNK_MODE,
        }
    }

    /// Parse an on-disk code.
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            LEGACY_CHUNK_MODE => Ok(ChunkMode::Legacy),
            LOW_CARDINALITY_CHUNK_MODE => Ok(ChunkMode::LowCardinalityWhole),
            BALANCED_CHUNK_MODE => Ok(ChunkMode::Balanced),
            _ => Err(StrataError::corrupt(format!("unknown chunk mode {code}"))),
        }
    }

    /// Number of documents per chunk for a stream with `cardinality`
    /// entries in a segment of `max_docs` documents.
    ///
    /// May return zero (for example when `max_docs` is zero); writers clamp
    /// that to one, readers treat it as corruption.
    pub fn chunk_size(&self, cardinality: u64, max_docs: u64) -> u64 {
        match self {
            ChunkMode::Legacy => 1024,
            ChunkMode::LowCardinalityWhole => {
                if cardinality <= 1024 {
                    max_docs
                } else {
                    1024
                }
            }
            ChunkMode::Balanced => {
                let num_chunks = (cardinality / 1024) + 1;
                max_docs / num_chunks
            }
        }
    }

    /// Chunk size to use when writing; never zero.
    pub fn write_chunk_size(&self, cardinality: u64, max_docs: u64) -> u64 {
        self.chunk_size(cardinality, max_docs).max(1)
    }

    /// Chunk size to use when reading; zero is a corruption error.
    pub fn read_chunk_size(&self, cardinality: u64, max_docs: u64) -> Result<u64> {
        match self.chunk_size(cardinality, max_docs) {
            0 => Err(StrataError::corrupt(format!(
                "zero chunk size (cardinality {cardinality}, max docs {max_docs})"
            ))),
            size => Ok(size),
        }
    }
}

/// Settings for vector index construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    /// Fields with fewer vectors than this get a brute-force flat index.
    pub flat_threshold: usize,

    /// From this many vectors on, use `4 * sqrt(n)` centroids instead of `n / 100`.
    pub large_corpus_threshold: usize,

    /// Number of k-means iterations when training centroids.
    pub kmeans_iterations: usize,

    /// Training sample cap, expressed per centroid.
    pub max_training_points_per_centroid: usize,

    /// Seed for centroid initialization. Fixed so rebuilding the same
    /// vectors produces the same index.
    pub training_seed: u64,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        VectorIndexConfig {
            flat_threshold: 1000,
            large_corpus_threshold: 200_000,
            kmeans_iterations: 25,
            max_training_points_per_centroid: 256,
            training_seed: 0x5EED_0F_C1u64,
        }
    }
}

/// Settings for the decoded vector index cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorCacheConfig {
    /// Interval between eviction sweeps, in milliseconds.
    pub sweep_interval_ms: u64,

    /// Smoothing factor of the hit-rate moving average.
    pub ewma_alpha: f64,
}

impl VectorCacheConfig {
    /// Sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for VectorCacheConfig {
    fn default() -> Self {
        VectorCacheConfig {
            sweep_interval_ms: 1000,
            ewma_alpha: 0.4,
        }
    }
}

/// Top-level segment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Chunking of posting and doc-value streams for new segments.
    pub chunk_mode: ChunkMode,

    /// Vector index construction settings.
    pub vector: VectorIndexConfig,

    /// Vector index cache settings for opened segments.
    pub cache: VectorCacheConfig,

    /// Verify the footer CRC when opening a segment.
    pub verify_checksum: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            chunk_mode: ChunkMode::default(),
            vector: VectorIndexConfig::default(),
            cache: VectorCacheConfig::default(),
            verify_checksum: true,
        }
    }
}

impl SegmentConfig {
    /// Load a configuration from a JSON file; missing keys take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: SegmentConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no segment could be built with.
    pub fn validate(&self) -> Result<()> {
        if self.vector.kmeans_iterations == 0 {
            return Err(StrataError::invalid_argument(
                "vector.kmeans_iterations must be positive",
            ));
        }
        if self.vector.max_training_points_per_centroid == 0 {
            return Err(StrataError::invalid_argument(
                "vector.max_training_points_per_centroid must be positive",
            ));
        }
        if !(self.cache.ewma_alpha > 0.0 && self.cache.ewma_alpha < 1.0) {
            return Err(StrataError::invalid_argument(
                "cache.ewma_alpha must be within (0, 1)",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(ChunkMode::Legacy.chunk_size(10, 5000), 1024);

        assert_eq!(ChunkMode::LowCardinalityWhole.chunk_size(1024, 5000), 5000);
        assert_eq!(ChunkMode::LowCardinalityWhole.chunk_size(1025, 5000), 1024);

        assert_eq!(ChunkMode::Balanced.chunk_size(10, 5000), 5000);
        assert_eq!(ChunkMode::Balanced.chunk_size(2048, 9000), 3000);
        assert_eq!(ChunkMode::Balanced.chunk_size(0, 0), 0);
    }

    #[test]
    fn test_zero_chunk_size() {
        assert_eq!(ChunkMode::Balanced.write_chunk_size(0, 0), 1);
        assert!(ChunkMode::Balanced.read_chunk_size(0, 0).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_chunk_mode_codes() {
        for mode in [
            ChunkMode::Legacy,
            ChunkMode::LowCardinalityWhole,
            ChunkMode::Balanced,
        ] {
            assert_eq!(ChunkMode::from_code(mode.code()).unwrap(), mode);
        }
        assert!(ChunkMode::from_code(7).is_err());
    }

    #[test]
    fn test_config_from_json_defaults() {
        let config = SegmentConfig::from_json_str(r#"{"chunk_mode": "Legacy"}"#).unwrap();
        assert_eq!(config.chunk_mode, ChunkMode::Legacy);
        assert_eq!(config.vector.flat_threshold, 1000);
        assert!(config.verify_checksum);

        assert!(SegmentConfig::from_json_str(r#"{"cache": {"ewma_alpha": 1.5}}"#).is_err());
    }
}
