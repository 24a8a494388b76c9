//! The HEALPix archive: one Zarr group per resolution under a root directory.

pub mod consolidate;
pub mod group;
pub mod inspector;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use healpix::TessellationLevel;

use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::types::PixelField;
use crate::writer::{ArchiveWriter, CommitOutcome};

pub use group::{group_name, GroupAttributes, TIME_UNITS};
pub use inspector::{ArchiveInspector, GroupSummary};

/// Completion of one day at one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completion {
    /// None of the expected timestamps are archived.
    Missing,
    /// Some, but not all, expected timestamps are archived.
    Partial,
    /// Every expected timestamp is archived.
    Complete,
}

impl Completion {
    pub fn of(expected: &[DateTime<Utc>], present: &BTreeSet<DateTime<Utc>>) -> Self {
        let found = expected.iter().filter(|t| present.contains(t)).count();
        if found == expected.len() {
            Completion::Complete
        } else if found == 0 {
            Completion::Missing
        } else {
            Completion::Partial
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Completion::Complete)
    }
}

/// Snapshot of archived timestamps per resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveState {
    by_nside: BTreeMap<u32, BTreeSet<DateTime<Utc>>>,
}

impl ArchiveState {
    pub fn insert(&mut self, level: &TessellationLevel, times: BTreeSet<DateTime<Utc>>) {
        self.by_nside.insert(level.nside(), times);
    }

    pub fn timestamps(&self, level: &TessellationLevel) -> Option<&BTreeSet<DateTime<Utc>>> {
        self.by_nside.get(&level.nside())
    }

    /// Completion of `expected` at `level`; an unknown level is treated as empty.
    pub fn completion(&self, level: &TessellationLevel, expected: &[DateTime<Utc>]) -> Completion {
        match self.timestamps(level) {
            Some(present) => Completion::of(expected, present),
            None if expected.is_empty() => Completion::Complete,
            None => Completion::Missing,
        }
    }
}

/// Storage strategy used by the pipeline.
pub trait Archive: Send + Sync {
    /// Timestamps already committed for `level`.
    fn known_timestamps(&self, level: &TessellationLevel) -> Result<BTreeSet<DateTime<Utc>>>;

    /// Persist a regridded field.
    fn commit(&self, field: &PixelField) -> Result<CommitOutcome>;

    /// Timestamps for every level, as one snapshot.
    fn snapshot(&self, levels: &[TessellationLevel]) -> Result<ArchiveState> {
        let mut state = ArchiveState::default();
        for level in levels {
            state.insert(level, self.known_timestamps(level)?);
        }
        Ok(state)
    }
}

/// Filesystem Zarr archive.
pub struct ZarrArchive {
    inspector: ArchiveInspector,
    writer: ArchiveWriter,
}

impl ZarrArchive {
    pub fn new(root: impl Into<PathBuf>, config: ArchiveConfig) -> Self {
        let root = root.into();
        Self {
            inspector: ArchiveInspector::new(root.clone()),
            writer: ArchiveWriter::new(root, config),
        }
    }

    pub fn inspector(&self) -> &ArchiveInspector {
        &self.inspector
    }
}

impl Archive for ZarrArchive {
    fn known_timestamps(&self, level: &TessellationLevel) -> Result<BTreeSet<DateTime<Utc>>> {
        self.inspector.known_timestamps(level)
    }

    fn commit(&self, field: &PixelField) -> Result<CommitOutcome> {
        self.writer.commit(field)
    }

    fn snapshot(&self, levels: &[TessellationLevel]) -> Result<ArchiveState> {
        self.inspector.snapshot(levels)
    }
}
