//! HEALPix spherical tessellation.
//!
//! Implements the Hierarchical Equal Area isoLatitude Pixelization from
//! scratch without external dependencies. A [`TessellationLevel`] is fully
//! described by its resolution parameter `nside` and its pixel ordering; it is
//! cheap to construct and is never persisted as mutable state.
//!
//! Angles follow the HEALPix convention internally (colatitude `theta` in
//! `[0, pi]`, longitude `phi` in `[0, 2*pi)`), while the public API speaks
//! geographic degrees.
//!
//! # Example
//!
//! ```
//! use healpix::{PixelOrdering, TessellationLevel};
//!
//! let level = TessellationLevel::new(8, PixelOrdering::Ring).unwrap();
//! assert_eq!(level.pixel_count(), 768);
//!
//! let pixel = level.lonlat_to_pixel(10.0, 45.0);
//! let (lon, lat) = level.pixel_center(pixel).unwrap();
//! assert!((lat - 45.0).abs() < 10.0);
//! assert!((lon - 10.0).abs() < 10.0);
//! ```

pub mod error;
pub mod level;
mod nested;
mod ring;

pub use error::{HealpixError, Result};
pub use level::{PixelOrdering, TessellationLevel, MAX_NSIDE};
