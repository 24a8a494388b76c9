//! Test data generators for synthetic reanalysis-like fields.
//!
//! These generators create predictable, verifiable values on regular
//! latitude-longitude meshes.

/// Creates a regular latitude axis from north to south (the order reanalysis
/// providers deliver), or south to north when `descending` is false.
///
/// # Example
///
/// ```
/// use test_utils::lat_axis;
///
/// let lats = lat_axis(45.0, true);
/// assert_eq!(lats, vec![90.0, 45.0, 0.0, -45.0, -90.0]);
/// ```
pub fn lat_axis(step: f64, descending: bool) -> Vec<f64> {
    let n = (180.0 / step).round() as usize + 1;
    let mut lats: Vec<f64> = (0..n).map(|i| -90.0 + step * i as f64).collect();
    if descending {
        lats.reverse();
    }
    lats
}

/// Creates a regular longitude axis covering the globe once.
///
/// With `signed` the axis spans `[-180, 180)`, otherwise `[0, 360)`.
///
/// # Example
///
/// ```
/// use test_utils::lon_axis;
///
/// assert_eq!(lon_axis(90.0, false), vec![0.0, 90.0, 180.0, 270.0]);
/// assert_eq!(lon_axis(90.0, true), vec![-180.0, -90.0, 0.0, 90.0]);
/// ```
pub fn lon_axis(step: f64, signed: bool) -> Vec<f64> {
    let n = (360.0 / step).round() as usize;
    let start = if signed { -180.0 } else { 0.0 };
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Temperature-like value in Kelvin: warm at the equator, cooling with
/// altitude (lower pressure), with a weak longitudinal wave and a diurnal
/// signal.
pub fn temperature_like(lat: f64, lon: f64, level_hpa: f64, hour: u32) -> f32 {
    let base = 300.0 - 40.0 * (lat.to_radians().sin()).powi(2);
    let lapse = 60.0 * (1.0 - level_hpa / 1000.0);
    let wave = 2.0 * (3.0 * lon.to_radians()).cos();
    let diurnal = ((hour as f64) / 24.0 * std::f64::consts::TAU).sin();
    (base - lapse + wave + diurnal) as f32
}

/// Values for a `[time, level, lat, lon]` field computed by `f(t, level, lat, lon)`.
pub fn layered_values(
    times: usize,
    levels: &[f64],
    lats: &[f64],
    lons: &[f64],
    f: impl Fn(usize, f64, f64, f64) -> f32,
) -> Vec<f32> {
    let mut values = Vec::with_capacity(times * levels.len() * lats.len() * lons.len());
    for t in 0..times {
        for &level in levels {
            for &lat in lats {
                for &lon in lons {
                    values.push(f(t, level, lat, lon));
                }
            }
        }
    }
    values
}

/// Replaces every `every`-th value with NaN, starting at `offset`.
pub fn punch_holes(values: &mut [f32], every: usize, offset: usize) {
    for v in values.iter_mut().skip(offset).step_by(every.max(1)) {
        *v = f32::NAN;
    }
}
