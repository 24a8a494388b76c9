//! On-disk layout of one archive group.
//!
//! A group `nside_{n}` holds the data array `{variable}` with axes
//! `[time, level, pixel]`, a `time` coordinate (i64 seconds since the Unix
//! epoch) and a `level` coordinate (f64 hPa). The `time` array is the commit
//! point: rows of the data array beyond its length are not part of the
//! archive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use healpix::TessellationLevel;
use serde::{Deserialize, Serialize};
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::group::Group;
use zarrs_filesystem::FilesystemStore;

use crate::error::{GridProcessorError, Result};
use crate::types::PixelField;
use crate::writer::staging;

pub const TIME_ARRAY: &str = "time";
pub const LEVEL_ARRAY: &str = "level";

/// CF units of the stored time coordinate.
pub const TIME_UNITS: &str = "seconds since 1970-01-01 00:00:00";

/// Directory name of the group for a resolution.
pub fn group_name(nside: u32) -> String {
    format!("nside_{}", nside)
}

/// Group attributes. `healpix_nside` and `healpix_order` are load-bearing:
/// readers must not reinterpret pixels under a different ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAttributes {
    pub healpix_nside: u32,
    pub healpix_order: String,
    pub variable: String,
    pub units: String,
    pub fill_value: serde_json::Value,
    pub regrid_method: String,
}

impl GroupAttributes {
    pub fn for_field(field: &PixelField) -> Self {
        Self {
            healpix_nside: field.level.nside(),
            healpix_order: field.level.ordering().as_str().to_string(),
            variable: field.variable.clone(),
            units: field.units.clone(),
            fill_value: fill_value_json(field.fill_value),
            regrid_method: field.method.as_str().to_string(),
        }
    }

    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    pub fn matches_level(&self, level: &TessellationLevel) -> bool {
        self.healpix_nside == level.nside() && self.healpix_order == level.ordering().as_str()
    }
}

/// JSON has no NaN, so non-finite fill values are written as strings the
/// way Zarr V3 writes them.
pub fn fill_value_json(fill: f32) -> serde_json::Value {
    if fill.is_nan() {
        serde_json::json!("NaN")
    } else if fill.is_infinite() {
        serde_json::json!(if fill > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        serde_json::json!(fill)
    }
}

pub fn to_epoch_seconds(t: &DateTime<Utc>) -> i64 {
    t.timestamp()
}

pub fn from_epoch_seconds(s: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(s, 0).ok_or_else(|| {
        GridProcessorError::archive_unavailable(format!("time value {} out of range", s))
    })
}

/// Read access to an existing group.
pub struct GroupReader {
    dir: PathBuf,
    store: Arc<FilesystemStore>,
    pub attrs: GroupAttributes,
}

impl GroupReader {
    /// Open the group at `dir`, falling back to the journal copy left by an
    /// interrupted promotion.
    pub fn open(dir: &Path) -> Result<Option<Self>> {
        let dir = match staging::resolve(dir) {
            Some(d) => d,
            None => return Ok(None),
        };
        if !dir.join("zarr.json").exists() {
            return Err(GridProcessorError::archive_unavailable(format!(
                "{} exists but is not a Zarr group",
                dir.display()
            )));
        }

        let store = Arc::new(FilesystemStore::new(&dir).map_err(|e| {
            GridProcessorError::archive_unavailable(format!("{}: {}", dir.display(), e))
        })?);
        let group = Group::open(store.clone(), "/").map_err(|e| {
            GridProcessorError::archive_unavailable(format!("{}: {}", dir.display(), e))
        })?;
        let attrs: GroupAttributes =
            serde_json::from_value(serde_json::Value::Object(group.attributes().clone()))
                .map_err(|e| {
                    GridProcessorError::archive_unavailable(format!(
                        "{}: bad group attributes: {}",
                        dir.display(),
                        e
                    ))
                })?;

        Ok(Some(Self { dir, store, attrs }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn open_array(&self, name: &str) -> Result<Array<FilesystemStore>> {
        // The time array is swapped in place on append
        let node = match staging::resolve(&self.dir.join(name)) {
            Some(path) if !self.dir.join(name).exists() => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string()),
            _ => name.to_string(),
        };
        Array::open(self.store.clone(), &format!("/{}", node)).map_err(|e| {
            GridProcessorError::archive_unavailable(format!(
                "{}/{}: {}",
                self.dir.display(),
                name,
                e
            ))
        })
    }

    /// Committed time index, epoch seconds.
    pub fn times(&self) -> Result<Vec<i64>> {
        let array = self.open_array(TIME_ARRAY)?;
        array
            .retrieve_array_subset_elements::<i64>(&array.subset_all())
            .map_err(|e| GridProcessorError::archive_unavailable(format!("reading time: {}", e)))
    }

    /// Committed time index, checked to be strictly increasing.
    pub fn checked_times(&self) -> Result<Vec<DateTime<Utc>>> {
        let raw = self.times()?;
        if let Some(w) = raw.windows(2).find(|w| w[0] >= w[1]) {
            return Err(GridProcessorError::archive_unavailable(format!(
                "{}: time index not strictly increasing ({} then {})",
                self.dir.display(),
                w[0],
                w[1]
            )));
        }
        raw.into_iter().map(from_epoch_seconds).collect()
    }

    pub fn levels(&self) -> Result<Vec<f64>> {
        let array = self.open_array(LEVEL_ARRAY)?;
        array
            .retrieve_array_subset_elements::<f64>(&array.subset_all())
            .map_err(|e| GridProcessorError::archive_unavailable(format!("reading level: {}", e)))
    }

    pub fn data_array(&self) -> Result<Array<FilesystemStore>> {
        self.open_array(&self.attrs.variable)
    }

    /// Shape of the data array, which may run ahead of the time index.
    pub fn data_shape(&self) -> Result<Vec<u64>> {
        Ok(self.data_array()?.shape().to_vec())
    }

    /// The first `rows` time rows of the data array.
    pub fn read_rows(&self, rows: u64) -> Result<Vec<f32>> {
        let array = self.data_array()?;
        let shape = array.shape().to_vec();
        if shape.len() != 3 || shape[0] < rows {
            return Err(GridProcessorError::archive_unavailable(format!(
                "{}: data shape {:?} does not cover {} committed times",
                self.dir.display(),
                shape,
                rows
            )));
        }
        let subset = ArraySubset::new_with_start_shape(vec![0, 0, 0], vec![rows, shape[1], shape[2]])
            .map_err(|e| GridProcessorError::archive_unavailable(e.to_string()))?;
        array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| GridProcessorError::archive_unavailable(format!("reading data: {}", e)))
    }
}
