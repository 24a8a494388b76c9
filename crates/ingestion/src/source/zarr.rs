//! Daily Zarr stores dropped by the download collaborator.
//!
//! Layout of `{raw_dir}/{YYYY-MM-DD}.zarr`:
//!
//! ```text
//! {variable}      4-D values, dimension names in any order
//! valid_time      CF time coordinate ("<unit> since <datetime>")
//! pressure_level  hPa
//! latitude        degrees north, either direction
//! longitude       degrees east, [0, 360) or [-180, 180)
//! ```
//!
//! Dimension names come from the Zarr V3 `dimension_names` field or the
//! `_ARRAY_DIMENSIONS` attribute. Any recognised alias may be used as long as
//! a coordinate array of the same name exists.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use grid_processor::{AxisRole, GridProcessorError, RawField};
use tracing::{debug, info, instrument};
use zarrs::array::{Array, ArrayBuilder, DataType, Element, FillValue};
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use super::FieldSource;
use crate::error::{IngestionError, Result};

const EPOCH_UNITS: &str = "seconds since 1970-01-01 00:00:00";

/// Reads `{raw_dir}/{YYYY-MM-DD}.zarr`.
#[derive(Debug, Clone)]
pub struct ZarrFieldSource {
    raw_dir: PathBuf,
    variable: String,
}

impl ZarrFieldSource {
    pub fn new(raw_dir: impl Into<PathBuf>, variable: impl Into<String>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            variable: variable.into(),
        }
    }

    /// Store path for `day`.
    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.raw_dir.join(format!("{}.zarr", day.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl FieldSource for ZarrFieldSource {
    #[instrument(skip(self), fields(variable = %self.variable))]
    async fn fetch(&self, day: NaiveDate) -> Result<RawField> {
        let path = self.path_for(day);
        if !path.is_dir() {
            return Err(IngestionError::fetch(format!(
                "raw store {} not found",
                path.display()
            )));
        }

        let variable = self.variable.clone();
        let store_path = path.clone();
        let field =
            tokio::task::spawn_blocking(move || read_raw_field(&store_path, &variable)).await??;

        debug!(path = %path.display(), shape = ?field.shape(), "Read raw field");
        Ok(field)
    }

    fn describe(&self) -> String {
        format!("zarr ({})", self.raw_dir.display())
    }
}

fn schema(msg: impl Into<String>) -> IngestionError {
    GridProcessorError::schema(msg).into()
}

fn write_err(e: impl std::fmt::Display) -> IngestionError {
    GridProcessorError::store_write(e.to_string()).into()
}

/// Read `variable` and its coordinates from the store at `path`.
pub fn read_raw_field(path: &Path, variable: &str) -> Result<RawField> {
    let store = Arc::new(
        FilesystemStore::new(path)
            .map_err(|e| schema(format!("{}: cannot open store: {}", path.display(), e)))?,
    );

    let data = Array::open(store.clone(), &format!("/{}", variable))
        .map_err(|e| schema(format!("{}: no array '{}': {}", path.display(), variable, e)))?;
    let dims = dimension_names(path, variable, data.attributes())?;
    if dims.len() != data.shape().len() {
        return Err(schema(format!(
            "'{}' has {} dimension names for {} dimensions",
            variable,
            dims.len(),
            data.shape().len()
        )));
    }

    let attrs = data.attributes();
    let units = attrs
        .get("units")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let fill = attrs
        .get("_FillValue")
        .or_else(|| attrs.get("missing_value"))
        .and_then(|v| v.as_f64());
    let scale = attrs.get("scale_factor").and_then(|v| v.as_f64());
    let offset = attrs.get("add_offset").and_then(|v| v.as_f64());

    let raw = read_numeric(&data)?;
    let (values, fill_value) = if scale.is_some() || offset.is_some() {
        // Packed values: mask on the stored integers, then unpack
        let (scale, offset) = (scale.unwrap_or(1.0), offset.unwrap_or(0.0));
        let values = raw
            .iter()
            .map(|v| {
                if fill == Some(*v) {
                    f32::NAN
                } else {
                    (v * scale + offset) as f32
                }
            })
            .collect();
        (values, None)
    } else {
        (raw.iter().map(|v| *v as f32).collect(), fill.map(|f| f as f32))
    };

    let mut times = Vec::new();
    let mut levels = Vec::new();
    let mut latitudes = Vec::new();
    let mut longitudes = Vec::new();
    for name in &dims {
        let role = AxisRole::from_name(name)
            .ok_or_else(|| schema(format!("unknown axis '{}'", name)))?;
        let coord = Array::open(store.clone(), &format!("/{}", name))
            .map_err(|e| schema(format!("missing coordinate array '{}': {}", name, e)))?;
        let values = read_numeric(&coord)?;
        match role {
            AxisRole::Time => {
                let units = coord
                    .attributes()
                    .get("units")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| schema(format!("time coordinate '{}' has no units", name)))?;
                times = decode_cf_times(&values, units)?;
            }
            AxisRole::Level => levels = values,
            AxisRole::Latitude => latitudes = values,
            AxisRole::Longitude => longitudes = values,
        }
    }

    RawField::from_named_axes(
        variable, units, &dims, times, levels, latitudes, longitudes, values, fill_value,
    )
    .map_err(Into::into)
}

/// Dimension names of `variable`, from its metadata document.
fn dimension_names(
    path: &Path,
    variable: &str,
    attributes: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<String>> {
    let meta_path = path.join(variable).join("zarr.json");
    let meta: serde_json::Value = fs::read_to_string(&meta_path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);

    let names = meta
        .get("dimension_names")
        .filter(|v| !v.is_null())
        .or_else(|| attributes.get("_ARRAY_DIMENSIONS"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| schema(format!("'{}' has no dimension names", variable)))?;

    names
        .iter()
        .map(|n| {
            n.as_str()
                .map(str::to_string)
                .ok_or_else(|| schema(format!("'{}' has an unnamed dimension", variable)))
        })
        .collect()
}

/// Every element of `array` as f64, whatever its numeric type.
fn read_numeric(array: &Array<FilesystemStore>) -> Result<Vec<f64>> {
    let subset = array.subset_all();
    let err = |e: zarrs::array::ArrayError| schema(format!("cannot read array: {}", e));
    let values = match array.data_type() {
        DataType::Float64 => array
            .retrieve_array_subset_elements::<f64>(&subset)
            .map_err(err)?,
        DataType::Float32 => widen(array.retrieve_array_subset_elements::<f32>(&subset).map_err(err)?),
        DataType::Int64 => array
            .retrieve_array_subset_elements::<i64>(&subset)
            .map_err(err)?
            .into_iter()
            .map(|v| v as f64)
            .collect(),
        DataType::Int32 => widen(array.retrieve_array_subset_elements::<i32>(&subset).map_err(err)?),
        DataType::Int16 => widen(array.retrieve_array_subset_elements::<i16>(&subset).map_err(err)?),
        DataType::Int8 => widen(array.retrieve_array_subset_elements::<i8>(&subset).map_err(err)?),
        DataType::UInt64 => array
            .retrieve_array_subset_elements::<u64>(&subset)
            .map_err(err)?
            .into_iter()
            .map(|v| v as f64)
            .collect(),
        DataType::UInt32 => widen(array.retrieve_array_subset_elements::<u32>(&subset).map_err(err)?),
        DataType::UInt16 => widen(array.retrieve_array_subset_elements::<u16>(&subset).map_err(err)?),
        DataType::UInt8 => widen(array.retrieve_array_subset_elements::<u8>(&subset).map_err(err)?),
        other => return Err(schema(format!("unsupported data type {:?}", other))),
    };
    Ok(values)
}

fn widen<T: Into<f64>>(values: Vec<T>) -> Vec<f64> {
    values.into_iter().map(Into::into).collect()
}

/// Decode CF time values (`"<unit> since <reference>"`).
pub fn decode_cf_times(values: &[f64], units: &str) -> Result<Vec<DateTime<Utc>>> {
    let (unit, since) = units
        .split_once(" since ")
        .ok_or_else(|| schema(format!("unrecognised time units '{}'", units)))?;

    let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
        "days" | "day" | "d" => 86400.0,
        other => return Err(schema(format!("unsupported time unit '{}'", other))),
    };
    let reference = parse_reference(since.trim())
        .ok_or_else(|| schema(format!("unparseable reference time '{}'", since)))?;

    values
        .iter()
        .map(|v| {
            if !v.is_finite() {
                return Err(schema("non-finite time value"));
            }
            let seconds = (v * seconds_per_unit).round() as i64;
            Ok(reference + Duration::seconds(seconds))
        })
        .collect()
}

fn parse_reference(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    let s = s.trim_end_matches(" UTC").trim_end_matches('Z');
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Write `field` as a daily raw store at `path`, replacing any existing one.
///
/// The store is written next to `path` and renamed into place.
pub fn write_raw_field(path: &Path, field: &RawField) -> Result<()> {
    let partial = path.with_extension("zarr.partial");
    if partial.exists() {
        fs::remove_dir_all(&partial).map_err(write_err)?;
    }
    fs::create_dir_all(&partial).map_err(write_err)?;

    let store = Arc::new(FilesystemStore::new(&partial).map_err(write_err)?);

    let mut root_attrs = serde_json::Map::new();
    root_attrs.insert("Conventions".to_string(), serde_json::json!("CF-1.7"));
    GroupBuilder::new()
        .attributes(root_attrs)
        .build(store.clone(), "/")
        .map_err(write_err)?
        .store_metadata()
        .map_err(write_err)?;

    let times: Vec<i64> = field.times.iter().map(|t| t.timestamp()).collect();
    write_coordinate(
        store.clone(),
        "valid_time",
        DataType::Int64,
        FillValue::from(0i64),
        &[("units", EPOCH_UNITS), ("calendar", "proleptic_gregorian")],
        &times,
    )?;
    write_coordinate(
        store.clone(),
        "pressure_level",
        DataType::Float64,
        FillValue::from(f64::NAN),
        &[("units", "hPa")],
        &field.levels,
    )?;
    write_coordinate(
        store.clone(),
        "latitude",
        DataType::Float64,
        FillValue::from(f64::NAN),
        &[("units", "degrees_north")],
        &field.latitudes,
    )?;
    write_coordinate(
        store.clone(),
        "longitude",
        DataType::Float64,
        FillValue::from(f64::NAN),
        &[("units", "degrees_east")],
        &field.longitudes,
    )?;

    let [nt, nl, ny, nx] = field.shape();
    let shape = vec![nt as u64, nl as u64, ny as u64, nx as u64];
    let chunk_grid: zarrs::array::ChunkGrid = vec![1, (nl as u64).max(1), ny as u64, nx as u64]
        .try_into()
        .map_err(|e| write_err(format!("{:?}", e)))?;

    let mut attrs = serde_json::Map::new();
    attrs.insert("units".to_string(), serde_json::json!(field.units));
    if let Some(fill) = field.fill_value.filter(|f| f.is_finite()) {
        attrs.insert("_FillValue".to_string(), serde_json::json!(fill));
    }

    let array = ArrayBuilder::new(shape, DataType::Float32, chunk_grid, FillValue::from(f32::NAN))
        .dimension_names(["valid_time", "pressure_level", "latitude", "longitude"].into())
        .attributes(attrs)
        .build(store, &format!("/{}", field.variable))
        .map_err(write_err)?;
    array.store_metadata().map_err(write_err)?;
    array
        .store_array_subset_elements(&array.subset_all(), &field.values)
        .map_err(write_err)?;

    if path.exists() {
        fs::remove_dir_all(path).map_err(write_err)?;
    }
    fs::rename(&partial, path).map_err(write_err)?;

    info!(path = %path.display(), times = nt, levels = nl, "Wrote raw store");
    Ok(())
}

/// A 1-D coordinate array named after its own dimension.
fn write_coordinate<T: Element>(
    store: Arc<FilesystemStore>,
    name: &str,
    data_type: DataType,
    fill: FillValue,
    attributes: &[(&str, &str)],
    values: &[T],
) -> Result<()> {
    let chunk_grid: zarrs::array::ChunkGrid = vec![(values.len() as u64).max(1)]
        .try_into()
        .map_err(|e| write_err(format!("{:?}", e)))?;

    let attributes = attributes
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
        .collect();

    let array = ArrayBuilder::new(vec![values.len() as u64], data_type, chunk_grid, fill)
        .dimension_names([name].into())
        .attributes(attributes)
        .build(store, &format!("/{}", name))
        .map_err(write_err)?;
    array.store_metadata().map_err(write_err)?;
    array
        .store_array_subset_elements(&array.subset_all(), values)
        .map_err(write_err)?;
    Ok(())
}
