//! Binning aggregation: each pixel is the mean of the source samples whose
//! coordinates fall inside it.

use healpix::TessellationLevel;
use rayon::prelude::*;

use super::SlicePlan;
use crate::types::RawField;

/// Pixel index of every source sample, row-major `[latitude, longitude]`.
pub struct BinningPlan {
    pixel_of: Vec<usize>,
    npix: usize,
}

impl BinningPlan {
    pub fn new(field: &RawField, level: &TessellationLevel) -> Self {
        let nx = field.longitudes.len();
        let pixel_of = (0..field.slice_len())
            .into_par_iter()
            .map(|i| {
                let lat = field.latitudes[i / nx];
                let lon = field.longitudes[i % nx];
                level.lonlat_to_pixel(lon, lat) as usize
            })
            .collect();

        Self {
            pixel_of,
            npix: level.pixel_count() as usize,
        }
    }

    /// Number of source samples assigned to each pixel.
    pub fn counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.npix];
        for &p in &self.pixel_of {
            counts[p] += 1;
        }
        counts
    }
}

impl SlicePlan for BinningPlan {
    fn apply(&self, field: &RawField, slice: &[f32], fill: f32, out: &mut [f32]) {
        let mut sums = vec![0.0f64; self.npix];
        let mut counts = vec![0u32; self.npix];

        for (&v, &p) in slice.iter().zip(&self.pixel_of) {
            if field.is_missing(v) {
                continue;
            }
            sums[p] += v as f64;
            counts[p] += 1;
        }

        for ((dst, sum), count) in out.iter_mut().zip(sums).zip(counts) {
            *dst = if count == 0 {
                fill
            } else {
                (sum / count as f64) as f32
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

    fn single_slice(lats: Vec<f64>, lons: Vec<f64>, values: Vec<f32>, fill: Option<f32>) -> RawField {
        RawField::new(
            "t",
            "K",
            vec![Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap()],
            vec![500.0],
            lats,
            lons,
            values,
            fill,
        )
        .unwrap()
    }

    #[test]
    fn test_single_sample_lands_in_its_pixel() {
        let level = TessellationLevel::new(4, PixelOrdering::Ring).unwrap();
        let field = single_slice(vec![37.0], vec![123.0], vec![42.0], None);
        let out = regrid(&field, &level, RegridMethod::Binning, f32::NAN).unwrap();

        let target = level.lonlat_to_pixel(123.0, 37.0) as usize;
        for (p, v) in out.values.iter().enumerate() {
            if p == target {
                assert_eq!(*v, 42.0);
            } else {
                assert!(v.is_nan());
            }
        }
    }

    #[test]
    fn test_pixel_is_mean_of_its_samples() {
        // nside=1 pixels are huge; these three points share one pixel
        let level = TessellationLevel::new(1, PixelOrdering::Nested).unwrap();
        let lats = vec![1.0, 2.0, 3.0];
        let lons = vec![1.0];
        let p = level.lonlat_to_pixel(1.0, 1.0);
        assert!(lats.iter().all(|&lat| level.lonlat_to_pixel(1.0, lat) == p));

        let field = single_slice(lats, lons, vec![1.0, 2.0, 6.0], None);
        let out = regrid(&field, &level, RegridMethod::Binning, f32::NAN).unwrap();
        assert!((out.values[p as usize] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_samples_are_skipped() {
        let level = TessellationLevel::new(1, PixelOrdering::Ring).unwrap();
        let field = single_slice(
            vec![1.0, 2.0, 3.0],
            vec![1.0],
            vec![4.0, -999.0, f32::NAN],
            Some(-999.0),
        );
        let out = regrid(&field, &level, RegridMethod::Binning, -1.0).unwrap();
        let p = level.lonlat_to_pixel(1.0, 1.0) as usize;
        assert_eq!(out.values[p], 4.0);
    }

    #[test]
    fn test_empty_pixels_get_fill() {
        let level = TessellationLevel::new(8, PixelOrdering::Ring).unwrap();
        let field = single_slice(vec![0.0, 1.0], vec![0.0, 1.0], vec![1.0; 4], None);
        let out = regrid(&field, &level, RegridMethod::Binning, -9999.0).unwrap();
        let filled = out.values.iter().filter(|v| **v == -9999.0).count();
        let counts = BinningPlan::new(&field, &level).counts();
        let empty = counts.iter().filter(|c| **c == 0).count();
        assert_eq!(filled, empty);
        assert!(empty >= 768 - 4);
    }

    #[test]
    fn test_counts_cover_every_sample() {
        let level = TessellationLevel::new(2, PixelOrdering::Ring).unwrap();
        let lats: Vec<f64> = (0..10).map(|i| -80.0 + 17.0 * i as f64).collect();
        let lons: Vec<f64> = (0..12).map(|i| 30.0 * i as f64).collect();
        let field = single_slice(lats, lons, vec![0.0; 120], None);
        let plan = BinningPlan::new(&field, &level);
        assert_eq!(plan.counts().iter().sum::<u32>(), 120);
    }
}
