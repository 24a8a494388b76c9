//! Writer for committing regridded fields to the archive.
//!
//! Groups are built in staging and promoted by rename; a per-group lock
//! file keeps a single writer per group.

pub mod lock;
pub mod staging;
mod zarr_writer;

pub use lock::GroupLock;
pub use zarr_writer::{ArchiveWriter, CommitOutcome};
