//! Incremental writer for archive groups.
//!
//! Three write paths:
//! - **create**: the group is built under `.staging/` and promoted with one
//!   rename;
//! - **append**: when every incoming timestamp is later than the archive's
//!   last one, data rows are written past the committed length and a new
//!   `time` array is promoted over the old one;
//! - **rewrite**: otherwise existing and incoming rows are merged (the
//!   incoming row wins on a duplicate timestamp), sorted, and the whole group
//!   is rebuilt in staging and promoted.
//!
//! In every path the time index is the last thing to change, so a failure
//! leaves the committed timestamps untouched.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use crate::archive::consolidate::consolidate;
use crate::archive::group::{
    group_name, to_epoch_seconds, GroupAttributes, GroupReader, LEVEL_ARRAY, TIME_ARRAY,
    TIME_UNITS,
};
use crate::config::{AppendStrategy, ArchiveConfig, ZarrCompression};
use crate::error::{GridProcessorError, Result};
use crate::types::PixelField;
use crate::writer::lock::GroupLock;
use crate::writer::staging;

/// How a commit changed the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The group did not exist and was created.
    Created,
    /// Rows were appended after the last committed timestamp.
    Appended,
    /// The group was merged, deduplicated and rebuilt.
    Rewritten,
}

/// Time-sorted, deduplicated rows of `[level, pixel]` values.
struct Rows {
    times: Vec<i64>,
    values: Vec<f32>,
}

impl Rows {
    fn from_field(field: &PixelField) -> Self {
        let mut by_time = BTreeMap::new();
        for (t, time) in field.times.iter().enumerate() {
            by_time.insert(to_epoch_seconds(time), field.time_slice(t));
        }
        Self::from_map(by_time)
    }

    /// Merge `incoming` into `existing`; incoming rows replace existing rows
    /// with the same timestamp.
    fn merge(existing_times: &[i64], existing: &[f32], incoming: &Rows, row_len: usize) -> Self {
        let mut by_time = BTreeMap::new();
        for (i, t) in existing_times.iter().enumerate() {
            by_time.insert(*t, &existing[i * row_len..(i + 1) * row_len]);
        }
        for (i, t) in incoming.times.iter().enumerate() {
            by_time.insert(*t, &incoming.values[i * row_len..(i + 1) * row_len]);
        }
        Self::from_map(by_time)
    }

    fn from_map(by_time: BTreeMap<i64, &[f32]>) -> Self {
        let mut times = Vec::with_capacity(by_time.len());
        let mut values = Vec::new();
        for (t, row) in by_time {
            times.push(t);
            values.extend_from_slice(row);
        }
        Self { times, values }
    }

    fn len(&self) -> u64 {
        self.times.len() as u64
    }
}

/// Writer for HEALPix archive groups under one root directory.
pub struct ArchiveWriter {
    root: PathBuf,
    config: ArchiveConfig,
}

impl ArchiveWriter {
    /// Create a new ArchiveWriter with the given configuration.
    pub fn new(root: impl Into<PathBuf>, config: ArchiveConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `field` into the group for its tessellation level.
    ///
    /// Holds the group lock for the whole commit. The consolidated metadata
    /// is refreshed after the time index moves; a failed refresh is logged
    /// and repaired by the next commit.
    #[instrument(skip(self, field), fields(nside = field.level.nside(), times = field.times.len()))]
    pub fn commit(&self, field: &PixelField) -> Result<CommitOutcome> {
        check_field(field)?;
        let rows = Rows::from_field(field);

        fs::create_dir_all(&self.root)?;
        let name = group_name(field.level.nside());
        let _lock = GroupLock::acquire(&self.root, &name, self.config.lock_lease())?;
        staging::sweep(&self.root, &name);

        let target = self.root.join(&name);
        staging::recover(&target)?;
        if target.exists() {
            staging::recover(&target.join(TIME_ARRAY))?;
        }

        let outcome = match GroupReader::open(&target)? {
            None => {
                self.create(&target, &name, field, &rows)?;
                CommitOutcome::Created
            }
            Some(reader) => {
                let existing_times = reader.times()?;
                validate_against(&reader, field)?;

                let strictly_later = match (existing_times.last(), rows.times.first()) {
                    (Some(last), Some(first)) => first > last,
                    _ => true,
                };
                if self.config.append_strategy == AppendStrategy::Auto && strictly_later {
                    self.append(&target, &reader, &existing_times, field, &rows)?;
                    CommitOutcome::Appended
                } else {
                    self.rewrite(&target, &name, &reader, &existing_times, field, &rows)?;
                    CommitOutcome::Rewritten
                }
            }
        };

        if let Err(e) = consolidate(&self.root) {
            warn!(error = %e, "Committed, but failed to refresh consolidated metadata");
        }

        info!(
            group = %name,
            outcome = ?outcome,
            new_times = rows.times.len(),
            "Committed field to archive"
        );
        Ok(outcome)
    }

    fn create(&self, target: &Path, name: &str, field: &PixelField, rows: &Rows) -> Result<()> {
        let staged = staging::staging_path(&self.root, name);
        let result = self
            .build_group(&staged, &GroupAttributes::for_field(field), field, rows)
            .and_then(|_| staging::promote(&staged, target).map_err(Into::into));
        if result.is_err() {
            staging::discard(&staged);
        }
        result
    }

    fn append(
        &self,
        target: &Path,
        reader: &GroupReader,
        existing_times: &[i64],
        field: &PixelField,
        rows: &Rows,
    ) -> Result<()> {
        let offset = existing_times.len() as u64;
        let nl = field.levels.len() as u64;
        let npix = field.pixel_count() as u64;

        // Data rows first; they stay invisible until the time index grows
        let mut data = reader.data_array()?;
        data.set_shape(vec![offset + rows.len(), nl, npix]);
        data.store_metadata()
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?;
        let subset = ArraySubset::new_with_start_shape(vec![offset, 0, 0], vec![rows.len(), nl, npix])
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?;
        data.store_array_subset_elements(&subset, &rows.values)
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?;

        // Commit point: swap in the extended time index
        let time_dir = target.join(TIME_ARRAY);
        let next_dir = staging::next_path(&time_dir);
        staging::discard(&next_dir);

        let mut all_times = existing_times.to_vec();
        all_times.extend_from_slice(&rows.times);

        let store = Arc::new(
            FilesystemStore::new(target).map_err(|e| GridProcessorError::store_write(e.to_string()))?,
        );
        let next_name = next_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.next", TIME_ARRAY));
        let result = write_time_array(store, &format!("/{}", next_name), &all_times)
            .and_then(|_| staging::promote(&next_dir, &time_dir).map_err(Into::into));
        if result.is_err() {
            staging::discard(&next_dir);
        }

        debug!(offset, appended = rows.len(), "Appended rows");
        result
    }

    fn rewrite(
        &self,
        target: &Path,
        name: &str,
        reader: &GroupReader,
        existing_times: &[i64],
        field: &PixelField,
        rows: &Rows,
    ) -> Result<()> {
        let existing = reader.read_rows(existing_times.len() as u64)?;
        let row_len = field.levels.len() * field.pixel_count();
        let merged = Rows::merge(existing_times, &existing, rows, row_len);

        debug!(
            existing = existing_times.len(),
            incoming = rows.times.len(),
            merged = merged.times.len(),
            "Rewriting group"
        );
        self.create(target, name, field, &merged)
    }

    /// Build a complete group at `dir`.
    fn build_group(
        &self,
        dir: &Path,
        attrs: &GroupAttributes,
        field: &PixelField,
        rows: &Rows,
    ) -> Result<()> {
        fs::create_dir_all(dir)?;
        let store = Arc::new(
            FilesystemStore::new(dir).map_err(|e| GridProcessorError::store_write(e.to_string()))?,
        );

        GroupBuilder::new()
            .attributes(attrs.to_map())
            .build(store.clone(), "/")
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?
            .store_metadata()
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?;

        write_level_array(store.clone(), &field.levels)?;
        write_time_array(store.clone(), &format!("/{}", TIME_ARRAY), &rows.times)?;

        let nl = field.levels.len() as u64;
        let npix = field.pixel_count() as u64;
        let chunk_grid: zarrs::array::ChunkGrid = self
            .config
            .data_chunk_shape(nl, npix)
            .try_into()
            .map_err(|e| GridProcessorError::Config(format!("{:?}", e)))?;

        let mut attributes = serde_json::Map::new();
        attributes.insert("units".to_string(), serde_json::json!(field.units));
        attributes.insert("long_name".to_string(), serde_json::json!(field.variable));

        let mut builder = ArrayBuilder::new(
            vec![rows.len(), nl, npix],
            DataType::Float32,
            chunk_grid,
            FillValue::from(field.fill_value),
        );
        builder
            .dimension_names(["time", "level", "pixel"].into())
            .attributes(attributes);
        if self.config.zarr_compression != ZarrCompression::None {
            builder.bytes_to_bytes_codecs(vec![self.create_compression_codec()?]);
        }
        let array = builder
            .build(store, &format!("/{}", field.variable))
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?;
        let subset = ArraySubset::new_with_start_shape(vec![0, 0, 0], vec![rows.len(), nl, npix])
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?;
        array
            .store_array_subset_elements(&subset, &rows.values)
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?;

        Ok(())
    }

    /// Create the compression codec based on configuration.
    fn create_compression_codec(
        &self,
    ) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.zarr_compression_level)
            .map_err(|_| GridProcessorError::config("Invalid compression level"))?;

        let shuffle = if self.config.zarr_shuffle {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };

        // typesize is required when shuffle is enabled
        let typesize = if self.config.zarr_shuffle {
            Some(4)
        } else {
            None
        };

        let compressor = match self.config.zarr_compression {
            ZarrCompression::None => {
                return Err(GridProcessorError::config("No compression configured"))
            }
            ZarrCompression::Lz4 | ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::Zstd | ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| GridProcessorError::config(e.to_string()))?;

        Ok(Arc::new(codec))
    }
}

fn check_field(field: &PixelField) -> Result<()> {
    if field.times.is_empty() {
        return Err(GridProcessorError::store_write("field has no timestamps"));
    }
    if field.levels.is_empty() {
        return Err(GridProcessorError::store_write("field has no levels"));
    }
    let expected = field.times.len() * field.levels.len() * field.pixel_count();
    if field.values.len() != expected {
        return Err(GridProcessorError::store_write(format!(
            "field has {} values, expected {}",
            field.values.len(),
            expected
        )));
    }
    Ok(())
}

/// Reject a field that does not fit the existing group.
fn validate_against(reader: &GroupReader, field: &PixelField) -> Result<()> {
    let attrs = &reader.attrs;
    if !attrs.matches_level(&field.level) {
        return Err(GridProcessorError::store_write(format!(
            "group is nside={} order={}, field is {}",
            attrs.healpix_nside, attrs.healpix_order, field.level
        )));
    }
    if attrs.variable != field.variable {
        return Err(GridProcessorError::store_write(format!(
            "group holds '{}', field is '{}'",
            attrs.variable, field.variable
        )));
    }

    let levels = reader.levels()?;
    let same_levels = levels.len() == field.levels.len()
        && levels
            .iter()
            .zip(&field.levels)
            .all(|(a, b)| (a - b).abs() < 1e-6);
    if !same_levels {
        return Err(GridProcessorError::store_write(format!(
            "level axis mismatch: group {:?}, field {:?}",
            levels, field.levels
        )));
    }

    let shape = reader.data_shape()?;
    if shape.len() != 3 || shape[2] != field.pixel_count() as u64 {
        return Err(GridProcessorError::store_write(format!(
            "pixel axis mismatch: group shape {:?}, field has {} pixels",
            shape,
            field.pixel_count()
        )));
    }
    Ok(())
}

fn write_time_array(store: Arc<FilesystemStore>, path: &str, times: &[i64]) -> Result<()> {
    let chunk_grid: zarrs::array::ChunkGrid = vec![(times.len() as u64).max(1)]
        .try_into()
        .map_err(|e| GridProcessorError::Config(format!("{:?}", e)))?;

    let mut attributes = serde_json::Map::new();
    attributes.insert("units".to_string(), serde_json::json!(TIME_UNITS));
    attributes.insert("calendar".to_string(), serde_json::json!("proleptic_gregorian"));
    attributes.insert("standard_name".to_string(), serde_json::json!("time"));

    let array = ArrayBuilder::new(
        vec![times.len() as u64],
        DataType::Int64,
        chunk_grid,
        FillValue::from(0i64),
    )
    .dimension_names(["time"].into())
    .attributes(attributes)
    .build(store, path)
    .map_err(|e| GridProcessorError::store_write(e.to_string()))?;

    array
        .store_metadata()
        .map_err(|e| GridProcessorError::store_write(e.to_string()))?;
    array
        .store_array_subset_elements(&array.subset_all(), times)
        .map_err(|e| GridProcessorError::store_write(e.to_string()))?;
    Ok(())
}

fn write_level_array(store: Arc<FilesystemStore>, levels: &[f64]) -> Result<()> {
    let chunk_grid: zarrs::array::ChunkGrid = vec![levels.len() as u64]
        .try_into()
        .map_err(|e| GridProcessorError::Config(format!("{:?}", e)))?;

    let mut attributes = serde_json::Map::new();
    attributes.insert("units".to_string(), serde_json::json!("hPa"));
    attributes.insert("standard_name".to_string(), serde_json::json!("air_pressure"));

    let array = ArrayBuilder::new(
        vec![levels.len() as u64],
        DataType::Float64,
        chunk_grid,
        FillValue::from(f64::NAN),
    )
    .dimension_names(["level"].into())
    .attributes(attributes)
    .build(store, &format!("/{}", LEVEL_ARRAY))
    .map_err(|e| GridProcessorError::store_write(e.to_string()))?;

    array
        .store_metadata()
        .map_err(|e| GridProcessorError::store_write(e.to_string()))?;
    array
        .store_array_subset_elements(&array.subset_all(), levels)
        .map_err(|e| GridProcessorError::store_write(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regrid::RegridMethod;
    use chrono::{DateTime, TimeZone, Utc};
    use healpix::{PixelOrdering, TessellationLevel};

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(h as i64)
    }

    fn field(hours: &[u32], value_of: impl Fn(u32) -> f32) -> PixelField {
        let level = TessellationLevel::new(1, PixelOrdering::Ring).unwrap();
        let levels = vec![850.0, 500.0];
        let mut values = Vec::new();
        for h in hours {
            values.extend(std::iter::repeat(value_of(*h)).take(levels.len() * 12));
        }
        PixelField {
            variable: "t".to_string(),
            units: "K".to_string(),
            level,
            method: RegridMethod::Binning,
            times: hours.iter().map(|h| hour(*h)).collect(),
            levels,
            values,
            fill_value: f32::NAN,
        }
    }

    fn writer(root: &Path) -> ArchiveWriter {
        let config = ArchiveConfig {
            zarr_compression: ZarrCompression::None,
            ..Default::default()
        };
        ArchiveWriter::new(root, config)
    }

    fn read_back(root: &Path) -> (Vec<i64>, Vec<f32>) {
        let reader = GroupReader::open(&root.join("nside_1")).unwrap().unwrap();
        let times = reader.times().unwrap();
        let values = reader.read_rows(times.len() as u64).unwrap();
        (times, values)
    }

    #[test]
    fn test_create_then_append() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());

        assert_eq!(w.commit(&field(&[0, 6], |h| h as f32)).unwrap(), CommitOutcome::Created);
        assert_eq!(w.commit(&field(&[12, 18], |h| h as f32)).unwrap(), CommitOutcome::Appended);

        let (times, values) = read_back(root.path());
        let expected: Vec<i64> = [0, 6, 12, 18].iter().map(|h| to_epoch_seconds(&hour(*h))).collect();
        assert_eq!(times, expected);
        assert_eq!(values.len(), 4 * 2 * 12);
        assert_eq!(values[3 * 24], 18.0);

        assert!(!root.path().join("nside_1/time.next").exists());
        assert!(!root.path().join(".locks/nside_1.lock").exists());
    }

    #[test]
    fn test_overlap_rewrites_with_newer_winning() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());

        w.commit(&field(&[0, 6, 12], |_| 1.0)).unwrap();
        let outcome = w.commit(&field(&[6, 18], |_| 2.0)).unwrap();
        assert_eq!(outcome, CommitOutcome::Rewritten);

        let (times, values) = read_back(root.path());
        assert_eq!(times.len(), 4);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        let row = |i: usize| values[i * 24];
        assert_eq!([row(0), row(1), row(2), row(3)], [1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_out_of_order_rewrites() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());

        w.commit(&field(&[24], |_| 1.0)).unwrap();
        assert_eq!(w.commit(&field(&[0], |_| 0.0)).unwrap(), CommitOutcome::Rewritten);

        let (times, values) = read_back(root.path());
        assert_eq!(times, vec![to_epoch_seconds(&hour(0)), to_epoch_seconds(&hour(24))]);
        assert_eq!(values[0], 0.0);
        assert_eq!(values[24], 1.0);
    }

    #[test]
    fn test_always_rewrite_strategy() {
        let root = tempfile::tempdir().unwrap();
        let config = ArchiveConfig {
            zarr_compression: ZarrCompression::None,
            append_strategy: AppendStrategy::AlwaysRewrite,
            ..Default::default()
        };
        let w = ArchiveWriter::new(root.path(), config);
        w.commit(&field(&[0], |_| 0.0)).unwrap();
        assert_eq!(w.commit(&field(&[6], |_| 0.0)).unwrap(), CommitOutcome::Rewritten);
    }

    #[test]
    fn test_mismatched_levels_rejected() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());
        w.commit(&field(&[0], |_| 0.0)).unwrap();

        let mut other = field(&[6], |_| 0.0);
        other.levels = vec![850.0, 300.0];
        assert!(matches!(w.commit(&other), Err(GridProcessorError::StoreWrite(_))));

        // Time index unchanged
        let (times, _) = read_back(root.path());
        assert_eq!(times.len(), 1);
    }

    #[test]
    fn test_mismatched_ordering_rejected() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());
        w.commit(&field(&[0], |_| 0.0)).unwrap();

        let mut other = field(&[6], |_| 0.0);
        other.level = TessellationLevel::new(1, PixelOrdering::Nested).unwrap();
        assert!(matches!(w.commit(&other), Err(GridProcessorError::StoreWrite(_))));
    }

    #[test]
    fn test_locked_group_rejected() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());
        let _held =
            GroupLock::acquire(root.path(), "nside_1", std::time::Duration::from_secs(60)).unwrap();
        assert!(matches!(
            w.commit(&field(&[0], |_| 0.0)),
            Err(GridProcessorError::ArchiveLocked(_))
        ));
        assert!(!root.path().join("nside_1").exists());
    }

    #[test]
    fn test_compressed_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let w = ArchiveWriter::new(root.path(), ArchiveConfig::default());
        w.commit(&field(&[0, 6], |h| 250.0 + h as f32)).unwrap();
        w.commit(&field(&[12], |h| 250.0 + h as f32)).unwrap();

        let (times, values) = read_back(root.path());
        assert_eq!(times.len(), 3);
        assert_eq!(values[2 * 24], 262.0);
    }

    #[test]
    fn test_recovers_interrupted_time_swap() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());
        w.commit(&field(&[0], |_| 0.0)).unwrap();

        // Simulate a crash between `time -> time.prev` and `time.next -> time`
        let group = root.path().join("nside_1");
        fs::rename(group.join("time"), group.join("time.prev")).unwrap();
        let (times, _) = read_back(root.path());
        assert_eq!(times.len(), 1);

        assert_eq!(w.commit(&field(&[6], |_| 1.0)).unwrap(), CommitOutcome::Appended);
        let (times, _) = read_back(root.path());
        assert_eq!(times.len(), 2);
        assert!(!group.join("time.prev").exists());
    }

    #[test]
    fn test_consolidated_after_commit() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());
        w.commit(&field(&[0], |_| 0.0)).unwrap();

        let meta = crate::archive::consolidate::read_consolidated(root.path())
            .unwrap()
            .unwrap();
        assert!(meta.contains_key("nside_1"));
        assert!(meta.contains_key("nside_1/t"));
        assert!(meta.contains_key("nside_1/time"));
        assert!(meta.contains_key("nside_1/level"));
        assert_eq!(meta["nside_1"]["attributes"]["healpix_order"], "ring");
    }

    #[test]
    fn test_failed_consolidation_still_commits() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());
        w.commit(&field(&[0], |_| 0.0)).unwrap();

        // Root metadata that cannot be rewritten
        fs::remove_file(root.path().join("zarr.json")).unwrap();
        fs::create_dir(root.path().join("zarr.json")).unwrap();

        assert_eq!(w.commit(&field(&[6], |_| 1.0)).unwrap(), CommitOutcome::Appended);
        let (times, _) = read_back(root.path());
        assert_eq!(times.len(), 2);

        // The next commit repairs the consolidated view
        fs::remove_dir(root.path().join("zarr.json")).unwrap();
        w.commit(&field(&[12], |_| 2.0)).unwrap();
        let meta = crate::archive::consolidate::read_consolidated(root.path())
            .unwrap()
            .unwrap();
        assert!(meta.contains_key("nside_1/time"));
    }

    #[test]
    fn test_failed_time_swap_leaves_index_unchanged() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());
        w.commit(&field(&[0], |_| 0.0)).unwrap();

        // Block the replacement time array after the data rows are written
        let blocker = root.path().join("nside_1/time.next");
        fs::write(&blocker, "not a directory").unwrap();
        assert!(w.commit(&field(&[6], |_| 1.0)).is_err());

        let (times, values) = read_back(root.path());
        assert_eq!(times, vec![to_epoch_seconds(&hour(0))]);
        assert_eq!(values.len(), 24);
        assert!(!root.path().join(".locks/nside_1.lock").exists());

        // The retry overwrites the orphaned rows
        fs::remove_file(&blocker).unwrap();
        assert_eq!(w.commit(&field(&[6], |_| 1.0)).unwrap(), CommitOutcome::Appended);
        let (times, values) = read_back(root.path());
        assert_eq!(times.len(), 2);
        assert_eq!(values[24], 1.0);
    }

    #[test]
    fn test_failed_rewrite_leaves_group_unchanged() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());
        w.commit(&field(&[0, 6], |_| 1.0)).unwrap();

        // Staging area that cannot hold a rebuilt group
        let staging_dir = root.path().join(staging::STAGING_DIR);
        let _ = fs::remove_dir_all(&staging_dir);
        fs::write(&staging_dir, "not a directory").unwrap();

        assert!(w.commit(&field(&[6], |_| 2.0)).is_err());
        let (times, values) = read_back(root.path());
        assert_eq!(times.len(), 2);
        assert!(values.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_dead_writer_leftovers_are_cleared() {
        let root = tempfile::tempdir().unwrap();
        let w = writer(root.path());

        // A writer killed mid-create: expired lock and a half-built group
        let locks = root.path().join(crate::writer::lock::LOCK_DIR);
        fs::create_dir_all(&locks).unwrap();
        fs::write(
            locks.join("nside_1.lock"),
            "pid=4194305 acquired=2000-01-01T00:00:00+00:00\n",
        )
        .unwrap();
        let abandoned = staging::staging_path(root.path(), "nside_1");
        fs::create_dir_all(&abandoned).unwrap();

        assert_eq!(w.commit(&field(&[0], |_| 0.0)).unwrap(), CommitOutcome::Created);
        assert!(!abandoned.exists());
        assert!(!locks.join("nside_1.lock").exists());
    }
}
