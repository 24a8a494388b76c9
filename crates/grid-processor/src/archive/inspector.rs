//! Read-only view of what the archive already holds.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use healpix::TessellationLevel;
use serde::Serialize;
use tracing::{debug, instrument};

use super::group::{group_name, GroupReader};
use super::ArchiveState;
use crate::error::{GridProcessorError, Result};

/// Summary of one group for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub nside: u32,
    pub ordering: String,
    pub variable: String,
    pub units: String,
    pub regrid_method: String,
    pub time_count: usize,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    pub levels: Vec<f64>,
    pub data_shape: Vec<u64>,
}

/// Answers "which timestamps are already archived for this level".
#[derive(Debug, Clone)]
pub struct ArchiveInspector {
    root: PathBuf,
}

impl ArchiveInspector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open(&self, level: &TessellationLevel) -> Result<Option<GroupReader>> {
        let reader = match GroupReader::open(&self.root.join(group_name(level.nside())))? {
            Some(r) => r,
            None => return Ok(None),
        };
        if !reader.attrs.matches_level(level) {
            return Err(GridProcessorError::archive_unavailable(format!(
                "{} is nside={} order={}, expected {}",
                reader.dir().display(),
                reader.attrs.healpix_nside,
                reader.attrs.healpix_order,
                level
            )));
        }
        Ok(Some(reader))
    }

    /// Timestamps committed for `level`. A missing group is empty.
    #[instrument(skip(self), fields(nside = level.nside()))]
    pub fn known_timestamps(&self, level: &TessellationLevel) -> Result<BTreeSet<DateTime<Utc>>> {
        let times = match self.open(level)? {
            Some(reader) => reader.checked_times()?,
            None => Vec::new(),
        };
        debug!(count = times.len(), "Inspected archive group");
        Ok(times.into_iter().collect())
    }

    /// Timestamps for every level, as one snapshot.
    pub fn snapshot(&self, levels: &[TessellationLevel]) -> Result<ArchiveState> {
        let mut state = ArchiveState::default();
        for level in levels {
            state.insert(level, self.known_timestamps(level)?);
        }
        Ok(state)
    }

    /// Status summary for `level`, `None` if the group does not exist.
    pub fn summary(&self, level: &TessellationLevel) -> Result<Option<GroupSummary>> {
        let reader = match self.open(level)? {
            Some(r) => r,
            None => return Ok(None),
        };
        let times = reader.checked_times()?;
        Ok(Some(GroupSummary {
            nside: reader.attrs.healpix_nside,
            ordering: reader.attrs.healpix_order.clone(),
            variable: reader.attrs.variable.clone(),
            units: reader.attrs.units.clone(),
            regrid_method: reader.attrs.regrid_method.clone(),
            time_count: times.len(),
            first_time: times.first().copied(),
            last_time: times.last().copied(),
            levels: reader.levels()?,
            data_shape: reader.data_shape()?,
        }))
    }
}
