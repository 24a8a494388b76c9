//! Lat-lon to HEALPix regridding.
//!
//! Every method follows the same shape: a per-level plan is computed once
//! from the source coordinates (pixel index per sample for binning, corner
//! weights per pixel for interpolation), then applied independently to each
//! `(time, level)` slice. Slices are processed in parallel.

mod binning;
mod interpolation;

use healpix::TessellationLevel;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{GridProcessorError, Result};
use crate::types::{PixelField, RawField};

pub use binning::BinningPlan;
pub use interpolation::BilinearPlan;

/// Regridding method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegridMethod {
    /// Mean of every source sample falling inside each pixel.
    #[default]
    Binning,
    /// Bilinear interpolation of the source mesh at each pixel center.
    Bilinear,
}

impl RegridMethod {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binning" | "bin" | "mean" => Some(Self::Binning),
            "bilinear" | "interpolation" | "linear" => Some(Self::Bilinear),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binning => "binning",
            Self::Bilinear => "bilinear",
        }
    }
}

impl std::fmt::Display for RegridMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A precomputed mapping from one source mesh to one tessellation level.
pub trait SlicePlan: Sync {
    /// Regrid one `[latitude, longitude]` slice into `out` (one value per pixel).
    fn apply(&self, field: &RawField, slice: &[f32], fill: f32, out: &mut [f32]);
}

/// Regrid `field` onto `level`.
///
/// Output axes are `[time, level, pixel]`; pixels that receive no data hold
/// `fill`.
#[instrument(skip(field), fields(variable = %field.variable, nside = level.nside()))]
pub fn regrid(
    field: &RawField,
    level: &TessellationLevel,
    method: RegridMethod,
    fill: f32,
) -> Result<PixelField> {
    let [_, _, ny, nx] = field.shape();
    if ny == 0 || nx == 0 {
        return Err(GridProcessorError::schema("field has an empty spatial axis"));
    }
    check_coordinates(field)?;

    let values = match method {
        RegridMethod::Binning => {
            let plan = BinningPlan::new(field, level);
            apply_per_slice(field, level, &plan, fill)
        }
        RegridMethod::Bilinear => {
            let plan = BilinearPlan::new(field, level)?;
            apply_per_slice(field, level, &plan, fill)
        }
    };

    debug!(
        slices = field.slice_count(),
        pixels = level.pixel_count(),
        method = %method,
        "Regridded field"
    );

    Ok(PixelField {
        variable: field.variable.clone(),
        units: field.units.clone(),
        level: *level,
        method,
        times: field.times.clone(),
        levels: field.levels.clone(),
        values,
        fill_value: fill,
    })
}

/// Stack the non-spatial axes, regrid each slice, and unstack.
fn apply_per_slice<P: SlicePlan>(
    field: &RawField,
    level: &TessellationLevel,
    plan: &P,
    fill: f32,
) -> Vec<f32> {
    let npix = level.pixel_count() as usize;
    let mut out = vec![fill; field.slice_count() * npix];
    out.par_chunks_mut(npix)
        .enumerate()
        .for_each(|(k, dst)| plan.apply(field, field.slice(k), fill, dst));
    out
}

fn check_coordinates(field: &RawField) -> Result<()> {
    if let Some(lat) = field.latitudes.iter().find(|v| !(-90.0..=90.0).contains(*v)) {
        return Err(GridProcessorError::schema(format!(
            "latitude {} outside [-90, 90]",
            lat
        )));
    }
    if field.longitudes.iter().any(|v| !v.is_finite()) {
        return Err(GridProcessorError::schema("non-finite longitude"));
    }
    Ok(())
}
