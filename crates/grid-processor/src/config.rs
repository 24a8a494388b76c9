//! Configuration for archive layout and compression.

use serde::{Deserialize, Serialize};

/// Chunking, compression and write-strategy settings for archive groups.
///
/// The same settings apply to every tessellation level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Chunk length along the time axis.
    pub time_chunk: u64,

    /// Upper bound on the pixel-axis chunk length.
    pub max_pixel_chunk: u64,

    /// Compression codec for data arrays.
    pub zarr_compression: ZarrCompression,

    /// Compression level (1-9).
    pub zarr_compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub zarr_shuffle: bool,

    /// How new timestamps are merged into an existing group.
    pub append_strategy: AppendStrategy,

    /// Seconds after which a group lock is considered abandoned.
    pub lock_lease_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            time_chunk: 1,
            max_pixel_chunk: 262_144,
            zarr_compression: ZarrCompression::BloscZstd,
            zarr_compression_level: 1,
            zarr_shuffle: true,
            append_strategy: AppendStrategy::Auto,
            lock_lease_secs: 6 * 3600,
        }
    }
}

impl ArchiveConfig {
    /// Apply overrides from environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("ZARR_TIME_CHUNK") {
            if let Ok(size) = val.parse() {
                self.time_chunk = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_MAX_PIXEL_CHUNK") {
            if let Ok(size) = val.parse() {
                self.max_pixel_chunk = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            self.zarr_compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                self.zarr_compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            self.zarr_shuffle = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("APPEND_STRATEGY") {
            self.append_strategy = AppendStrategy::from_str(&val);
        }

        if let Ok(val) = std::env::var("ARCHIVE_LOCK_LEASE_SECS") {
            if let Ok(secs) = val.parse() {
                self.lock_lease_secs = secs;
            }
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.time_chunk == 0 {
            return Err("time_chunk must be > 0".to_string());
        }

        if self.max_pixel_chunk == 0 {
            return Err("max_pixel_chunk must be > 0".to_string());
        }

        if self.zarr_compression_level == 0 || self.zarr_compression_level > 9 {
            return Err("zarr_compression_level must be 1-9".to_string());
        }

        if self.lock_lease_secs == 0 {
            return Err("lock_lease_secs must be > 0".to_string());
        }

        Ok(())
    }

    pub fn lock_lease(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_lease_secs)
    }

    /// Chunk shape for a `[time, level, pixel]` data array.
    pub fn data_chunk_shape(&self, levels: u64, pixels: u64) -> Vec<u64> {
        vec![
            self.time_chunk,
            levels.max(1),
            pixels.min(self.max_pixel_chunk).max(1),
        ]
    }
}

/// Compression codec for Zarr arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// LZ4 compression.
    Lz4,
    /// Zstd compression.
    Zstd,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd (recommended).
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "lz4" => Self::Lz4,
            "zstd" => Self::Zstd,
            "blosc_lz4" => Self::BloscLz4,
            "blosc_zstd" => Self::BloscZstd,
            _ => Self::BloscZstd,
        }
    }

    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strategy for merging a field into an existing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendStrategy {
    /// Append in place when every new timestamp is later than the archive's
    /// last one, otherwise merge and rewrite the group.
    #[default]
    Auto,
    /// Always merge, sort, dedup and rewrite the whole group.
    AlwaysRewrite,
}

impl AppendStrategy {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always_rewrite" | "rewrite" => Self::AlwaysRewrite,
            _ => Self::Auto,
        }
    }
}
