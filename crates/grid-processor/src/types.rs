//! Core field types: lat-lon input fields and pixelised output fields.

use chrono::{DateTime, Utc};
use healpix::TessellationLevel;
use serde::{Deserialize, Serialize};

use crate::error::{GridProcessorError, Result};
use crate::regrid::RegridMethod;

/// Role of an axis in a raw field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisRole {
    Time,
    Level,
    Latitude,
    Longitude,
}

impl AxisRole {
    /// Canonical axis order of a [`RawField`].
    pub const CANONICAL: [AxisRole; 4] = [
        AxisRole::Time,
        AxisRole::Level,
        AxisRole::Latitude,
        AxisRole::Longitude,
    ];

    /// Resolve a dimension name, accepting the usual aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "time" | "valid_time" => Some(Self::Time),
            "level" | "pressure_level" | "isobaricinhpa" | "plev" => Some(Self::Level),
            "latitude" | "lat" => Some(Self::Latitude),
            "longitude" | "lon" => Some(Self::Longitude),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Level => "level",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
        }
    }

    fn position(&self) -> usize {
        match self {
            Self::Time => 0,
            Self::Level => 1,
            Self::Latitude => 2,
            Self::Longitude => 3,
        }
    }
}

/// A reanalysis field on a regular latitude-longitude mesh.
///
/// Values are stored row-major in canonical order
/// `[time, level, latitude, longitude]`. Either spatial axis may be
/// descending. A value is missing when it is NaN or equals `fill_value`.
#[derive(Debug, Clone)]
pub struct RawField {
    pub variable: String,
    pub units: String,
    pub times: Vec<DateTime<Utc>>,
    pub levels: Vec<f64>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub values: Vec<f32>,
    pub fill_value: Option<f32>,
}

impl RawField {
    /// Construct a field whose values are already in canonical order.
    pub fn new(
        variable: impl Into<String>,
        units: impl Into<String>,
        times: Vec<DateTime<Utc>>,
        levels: Vec<f64>,
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
        values: Vec<f32>,
        fill_value: Option<f32>,
    ) -> Result<Self> {
        let field = Self {
            variable: variable.into(),
            units: units.into(),
            times,
            levels,
            latitudes,
            longitudes,
            values,
            fill_value,
        };
        field.validate()?;
        Ok(field)
    }

    /// Construct a field from values laid out along named dimensions.
    ///
    /// `dims` names the axes of `values` in storage order; any of the
    /// recognised aliases may be used. The data is transposed into canonical
    /// order.
    pub fn from_named_axes(
        variable: impl Into<String>,
        units: impl Into<String>,
        dims: &[String],
        times: Vec<DateTime<Utc>>,
        levels: Vec<f64>,
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
        values: Vec<f32>,
        fill_value: Option<f32>,
    ) -> Result<Self> {
        if dims.len() != 4 {
            return Err(GridProcessorError::schema(format!(
                "expected 4 dimensions, got {}: {:?}",
                dims.len(),
                dims
            )));
        }

        let mut roles = Vec::with_capacity(4);
        for name in dims {
            let role = AxisRole::from_name(name)
                .ok_or_else(|| GridProcessorError::schema(format!("unknown axis '{}'", name)))?;
            if roles.contains(&role) {
                return Err(GridProcessorError::schema(format!(
                    "duplicate {} axis ('{}')",
                    role.as_str(),
                    name
                )));
            }
            roles.push(role);
        }

        let canonical_shape = [times.len(), levels.len(), latitudes.len(), longitudes.len()];
        let src_shape: Vec<usize> = roles.iter().map(|r| canonical_shape[r.position()]).collect();
        let expected: usize = src_shape.iter().product();
        if values.len() != expected {
            return Err(GridProcessorError::schema(format!(
                "data has {} values but axes {:?} imply {}",
                values.len(),
                dims,
                expected
            )));
        }

        let values = if roles[..] == AxisRole::CANONICAL[..] {
            values
        } else {
            transpose_to_canonical(&values, &roles, &src_shape, canonical_shape)
        };

        Self::new(
            variable, units, times, levels, latitudes, longitudes, values, fill_value,
        )
    }

    fn validate(&self) -> Result<()> {
        let expected = self.times.len() * self.levels.len() * self.slice_len();
        if self.values.len() != expected {
            return Err(GridProcessorError::schema(format!(
                "data has {} values, coordinates imply {}",
                self.values.len(),
                expected
            )));
        }
        if self.latitudes.is_empty() || self.longitudes.is_empty() {
            return Err(GridProcessorError::schema("empty spatial axis"));
        }
        Ok(())
    }

    /// Shape in canonical order.
    pub fn shape(&self) -> [usize; 4] {
        [
            self.times.len(),
            self.levels.len(),
            self.latitudes.len(),
            self.longitudes.len(),
        ]
    }

    /// Number of values in one `(time, level)` slice.
    pub fn slice_len(&self) -> usize {
        self.latitudes.len() * self.longitudes.len()
    }

    /// Number of `(time, level)` slices.
    pub fn slice_count(&self) -> usize {
        self.times.len() * self.levels.len()
    }

    /// The `[latitude, longitude]` slice at index `k = t * levels + l`.
    pub fn slice(&self, k: usize) -> &[f32] {
        let n = self.slice_len();
        &self.values[k * n..(k + 1) * n]
    }

    /// Whether a value counts as missing.
    pub fn is_missing(&self, v: f32) -> bool {
        v.is_nan() || self.fill_value.is_some_and(|fill| v == fill)
    }

    /// Subset the level axis to `wanted`, in that order.
    pub fn select_levels(&self, wanted: &[f64]) -> Result<RawField> {
        let idx = wanted
            .iter()
            .map(|w| {
                self.levels
                    .iter()
                    .position(|l| (l - w).abs() < 1e-6)
                    .ok_or_else(|| {
                        GridProcessorError::schema(format!(
                            "pressure level {} not present in field (have {:?})",
                            w, self.levels
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        if idx.iter().copied().eq(0..self.levels.len()) {
            return Ok(self.clone());
        }

        let n = self.slice_len();
        let mut values = Vec::with_capacity(self.times.len() * idx.len() * n);
        for t in 0..self.times.len() {
            for &l in &idx {
                values.extend_from_slice(self.slice(t * self.levels.len() + l));
            }
        }

        Ok(RawField {
            levels: idx.iter().map(|&i| self.levels[i]).collect(),
            values,
            ..self.without_values()
        })
    }

    /// Subset the time axis to `wanted`, in that order.
    pub fn select_times(&self, wanted: &[DateTime<Utc>]) -> Result<RawField> {
        let idx = wanted
            .iter()
            .map(|w| {
                self.times.iter().position(|t| t == w).ok_or_else(|| {
                    GridProcessorError::schema(format!("timestamp {} not present in field", w))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let per_time = self.levels.len() * self.slice_len();
        let mut values = Vec::with_capacity(idx.len() * per_time);
        for &t in &idx {
            values.extend_from_slice(&self.values[t * per_time..(t + 1) * per_time]);
        }

        Ok(RawField {
            times: idx.iter().map(|&i| self.times[i]).collect(),
            values,
            ..self.without_values()
        })
    }

    fn without_values(&self) -> RawField {
        RawField {
            variable: self.variable.clone(),
            units: self.units.clone(),
            times: self.times.clone(),
            levels: self.levels.clone(),
            latitudes: self.latitudes.clone(),
            longitudes: self.longitudes.clone(),
            values: Vec::new(),
            fill_value: self.fill_value,
        }
    }
}

fn transpose_to_canonical(
    values: &[f32],
    roles: &[AxisRole],
    src_shape: &[usize],
    canonical_shape: [usize; 4],
) -> Vec<f32> {
    // Source strides, then reordered so strides[i] belongs to canonical axis i
    let mut src_strides = vec![1usize; 4];
    for i in (0..3).rev() {
        src_strides[i] = src_strides[i + 1] * src_shape[i + 1];
    }
    let mut strides = [0usize; 4];
    for (i, role) in roles.iter().enumerate() {
        strides[role.position()] = src_strides[i];
    }

    let [nt, nl, ny, nx] = canonical_shape;
    let mut out = Vec::with_capacity(values.len());
    for t in 0..nt {
        for l in 0..nl {
            for y in 0..ny {
                let base = t * strides[0] + l * strides[1] + y * strides[2];
                for x in 0..nx {
                    out.push(values[base + x * strides[3]]);
                }
            }
        }
    }
    out
}

/// A field on a HEALPix tessellation, axes `[time, level, pixel]`.
#[derive(Debug, Clone)]
pub struct PixelField {
    pub variable: String,
    pub units: String,
    pub level: TessellationLevel,
    pub method: RegridMethod,
    pub times: Vec<DateTime<Utc>>,
    pub levels: Vec<f64>,
    pub values: Vec<f32>,
    pub fill_value: f32,
}

impl PixelField {
    pub fn pixel_count(&self) -> usize {
        self.level.pixel_count() as usize
    }

    /// Values for one timestamp, `[level, pixel]`.
    pub fn time_slice(&self, t: usize) -> &[f32] {
        let n = self.levels.len() * self.pixel_count();
        &self.values[t * n..(t + 1) * n]
    }

    /// Values for one `(time, level)` pair.
    pub fn pixels(&self, t: usize, l: usize) -> &[f32] {
        let npix = self.pixel_count();
        let start = (t * self.levels.len() + l) * npix;
        &self.values[start..start + npix]
    }
}
