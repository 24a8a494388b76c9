//! Bilinear interpolation of a regular lat-lon mesh at pixel centers.

use healpix::TessellationLevel;
use rayon::prelude::*;

use super::SlicePlan;
use crate::error::{GridProcessorError, Result};
use crate::types::RawField;

/// Four source offsets and their weights.
type Stencil = [(usize, f32); 4];

/// Corner offsets and weights for each pixel center, `None` outside the
/// source mesh.
pub struct BilinearPlan {
    stencils: Vec<Option<Stencil>>,
}

/// One axis sorted ascending, keeping the original index of each coordinate.
struct SortedAxis {
    coords: Vec<f64>,
    index: Vec<usize>,
}

impl SortedAxis {
    fn new(values: &[f64], name: &str) -> Result<Self> {
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let coords: Vec<f64> = order.iter().map(|&i| values[i]).collect();
        if coords.windows(2).any(|w| w[0] == w[1]) {
            return Err(GridProcessorError::schema(format!(
                "{} axis has repeated coordinates",
                name
            )));
        }
        Ok(Self {
            coords,
            index: order,
        })
    }

    /// Lower bracket index and fraction, `None` outside the axis.
    fn locate(&self, v: f64) -> Option<(usize, usize, f64)> {
        let n = self.coords.len();
        let (lo, hi) = (self.coords[0], self.coords[n - 1]);
        if v < lo || v > hi {
            return None;
        }
        if n == 1 {
            return Some((0, 0, 0.0));
        }
        let i = self.coords.partition_point(|c| *c <= v).clamp(1, n - 1) - 1;
        let frac = (v - self.coords[i]) / (self.coords[i + 1] - self.coords[i]);
        Some((self.index[i], self.index[i + 1], frac))
    }
}

impl BilinearPlan {
    pub fn new(field: &RawField, level: &TessellationLevel) -> Result<Self> {
        let lat_axis = SortedAxis::new(&field.latitudes, "latitude")?;
        let lon_axis = SortedAxis::new(&field.longitudes, "longitude")?;
        let nx = field.longitudes.len();

        // Pixel centers come back in [0, 360); match the source convention
        let signed_lons = lon_axis.coords[0] < 0.0;

        let stencils = level
            .pixel_centers()
            .into_par_iter()
            .map(|(lon, lat)| {
                let lon = if signed_lons && lon >= 180.0 {
                    lon - 360.0
                } else {
                    lon
                };
                let (y0, y1, fy) = lat_axis.locate(lat)?;
                let (x0, x1, fx) = lon_axis.locate(lon)?;
                let (fx, fy) = (fx as f32, fy as f32);
                Some([
                    (y0 * nx + x0, (1.0 - fx) * (1.0 - fy)),
                    (y0 * nx + x1, fx * (1.0 - fy)),
                    (y1 * nx + x0, (1.0 - fx) * fy),
                    (y1 * nx + x1, fx * fy),
                ])
            })
            .collect();

        Ok(Self { stencils })
    }

    /// Number of pixel centers inside the source mesh.
    pub fn covered(&self) -> usize {
        self.stencils.iter().filter(|s| s.is_some()).count()
    }
}

impl SlicePlan for BilinearPlan {
    fn apply(&self, field: &RawField, slice: &[f32], fill: f32, out: &mut [f32]) {
        for (dst, stencil) in out.iter_mut().zip(&self.stencils) {
            *dst = match stencil {
                Some(corners) if corners.iter().all(|(i, _)| !field.is_missing(slice[*i])) => {
                    corners.iter().map(|(i, w)| slice[*i] * w).sum()
                }
                _ => fill,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regrid::{regrid, RegridMethod};
    use chrono::{TimeZone, Utc};
    use healpix::PixelOrdering;

    fn slice_field(lats: Vec<f64>, lons: Vec<f64>, f: impl Fn(f64, f64) -> f32) -> RawField {
        let mut values = Vec::new();
        for &lat in &lats {
            for &lon in &lons {
                values.push(f(lat, lon));
            }
        }
        RawField::new(
            "t",
            "K",
            vec![Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap()],
            vec![500.0],
            lats,
            lons,
            values,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_linear_field_reproduced_exactly() {
        // Descending latitude as delivered by reanalysis providers
        let lats: Vec<f64> = (0..37).map(|i| 90.0 - 5.0 * i as f64).collect();
        let lons: Vec<f64> = (0..72).map(|i| 5.0 * i as f64).collect();
        let field = slice_field(lats, lons, |lat, lon| (2.0 * lat + 0.5 * lon) as f32);
        let level = TessellationLevel::new(4, PixelOrdering::Ring).unwrap();

        let out = regrid(&field, &level, RegridMethod::Bilinear, f32::NAN).unwrap();
        for (p, v) in out.values.iter().enumerate() {
            let (lon, lat) = level.pixel_center(p as u64).unwrap();
            if lon > 355.0 {
                // Past the last source column, no wrap across the seam
                assert!(v.is_nan());
            } else {
                let expected = 2.0 * lat + 0.5 * lon;
                assert!((*v as f64 - expected).abs() < 1e-3, "pixel {}: {} vs {}", p, v, expected);
            }
        }
    }

    #[test]
    fn test_outside_bounds_gets_fill() {
        // Regional mesh covering 0..30N, 0..30E
        let lats: Vec<f64> = (0..7).map(|i| 5.0 * i as f64).collect();
        let lons: Vec<f64> = (0..7).map(|i| 5.0 * i as f64).collect();
        let field = slice_field(lats, lons, |_, _| 7.0);
        let level = TessellationLevel::new(8, PixelOrdering::Ring).unwrap();

        let out = regrid(&field, &level, RegridMethod::Bilinear, -1.0).unwrap();
        for (p, v) in out.values.iter().enumerate() {
            let (lon, lat) = level.pixel_center(p as u64).unwrap();
            let inside = (0.0..=30.0).contains(&lat) && (0.0..=30.0).contains(&lon);
            if inside {
                assert!((*v - 7.0).abs() < 1e-5);
            } else {
                assert_eq!(*v, -1.0);
            }
        }
    }

    #[test]
    fn test_signed_longitudes_are_matched() {
        // Mesh in [-180, 180) covering only the western hemisphere
        let lats: Vec<f64> = (0..19).map(|i| -90.0 + 10.0 * i as f64).collect();
        let lons: Vec<f64> = (0..19).map(|i| -180.0 + 10.0 * i as f64).collect();
        let field = slice_field(lats, lons, |_, _| 3.0);
        let level = TessellationLevel::new(2, PixelOrdering::Ring).unwrap();

        let plan = BilinearPlan::new(&field, &level).unwrap();
        let western = level
            .pixel_centers()
            .iter()
            .filter(|(lon, _)| *lon >= 180.0 || *lon == 0.0)
            .count();
        assert_eq!(plan.covered(), western);
    }

    #[test]
    fn test_missing_corner_gets_fill() {
        let lats = vec![-90.0, 0.0, 90.0];
        let lons = vec![0.0, 120.0, 240.0, 359.0];
        let field = slice_field(lats, lons, |lat, lon| {
            if lat == 0.0 && lon == 120.0 {
                f32::NAN
            } else {
                1.0
            }
        });
        let level = TessellationLevel::new(1, PixelOrdering::Ring).unwrap();
        let out = regrid(&field, &level, RegridMethod::Bilinear, -5.0).unwrap();
        // Pixel 5 is centered at (90E, 0N), bracketed by the NaN at (120E, 0N)
        assert_eq!(out.values[5], -5.0);
    }

    #[test]
    fn test_repeated_coordinates_rejected() {
        let field = slice_field(vec![0.0, 0.0], vec![0.0, 1.0], |_, _| 1.0);
        let level = TessellationLevel::new(1, PixelOrdering::Ring).unwrap();
        assert!(BilinearPlan::new(&field, &level).is_err());
    }
}
