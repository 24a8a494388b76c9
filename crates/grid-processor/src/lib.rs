//! Lat-lon to HEALPix regridding and the Zarr V3 archive it feeds.
//!
//! This crate provides:
//!
//! - **Field types**: [`RawField`] on a regular lat-lon mesh and
//!   [`PixelField`] on a HEALPix tessellation
//! - **Regridding**: binning aggregation and bilinear interpolation,
//!   processed slice by slice in parallel
//! - **Archive**: one Zarr group per resolution, appended along time, with
//!   staged promotion, a single-writer lock and consolidated metadata
//!
//! # Architecture
//!
//! ```text
//! RawField [time, level, lat, lon]
//!      │
//!      ▼
//! regrid(field, level, method)
//!      │
//!      ├─► plan once per level (pixel index / bilinear stencil)
//!      │
//!      └─► apply per (time, level) slice in parallel
//!               │
//!               ▼
//! PixelField [time, level, pixel]
//!      │
//!      ▼
//! ArchiveWriter::commit
//!      │
//!      ├─► create  (stage group, promote)
//!      ├─► append  (write rows, promote time index)
//!      └─► rewrite (merge + dedup, stage group, promote)
//!               │
//!               ▼
//!          consolidate root metadata
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grid_processor::{regrid, ArchiveConfig, Archive, RegridMethod, ZarrArchive};
//! use healpix::{PixelOrdering, TessellationLevel};
//!
//! let level = TessellationLevel::new(8, PixelOrdering::Ring)?;
//! let pixels = regrid(&raw, &level, RegridMethod::Binning, f32::NAN)?;
//!
//! let archive = ZarrArchive::new("/data/era5_healpix", ArchiveConfig::default());
//! archive.commit(&pixels)?;
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod regrid;
pub mod types;
pub mod writer;

// Re-export commonly used types at crate root
pub use archive::{
    Archive, ArchiveInspector, ArchiveState, Completion, GroupSummary, ZarrArchive,
};
pub use config::{AppendStrategy, ArchiveConfig, ZarrCompression};
pub use error::{GridProcessorError, Result};
pub use regrid::{regrid, RegridMethod};
pub use types::{AxisRole, PixelField, RawField};
pub use writer::{ArchiveWriter, CommitOutcome};
