//! Error types for tessellation levels.

use thiserror::Error;

/// Errors raised when a tessellation level or pixel index is not valid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealpixError {
    /// The resolution parameter is zero or above the supported maximum.
    #[error("invalid nside {nside}: must be between 1 and {max}")]
    InvalidNside { nside: u32, max: u32 },

    /// Nested ordering is only defined for power-of-two resolutions.
    #[error("nested ordering requires a power-of-two nside, got {0}")]
    NestedRequiresPowerOfTwo(u32),

    /// A pixel index beyond `12 * nside^2 - 1`.
    #[error("pixel {pixel} out of range for nside {nside} ({count} pixels)")]
    InvalidPixel { pixel: u64, nside: u32, count: u64 },

    /// Unrecognised pixel ordering name.
    #[error("unknown pixel ordering: {0}")]
    UnknownOrdering(String),
}

/// Result type for tessellation operations.
pub type Result<T> = std::result::Result<T, HealpixError>;
