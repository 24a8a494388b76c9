//! In-process analytic fields.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Timelike};
use grid_processor::RawField;
use tracing::{debug, warn};

use super::FieldSource;
use crate::error::{IngestionError, Result};
use crate::scheduler::expected_timestamps;

/// Generates a smooth humidity-like field on a global regular mesh.
///
/// Days listed in `fail_days` fail with a fetch error.
#[derive(Debug, Clone)]
pub struct SyntheticFieldSource {
    variable: String,
    units: String,
    hours: Vec<u32>,
    levels: Vec<f64>,
    grid_step: f64,
    fail_days: BTreeSet<NaiveDate>,
}

impl SyntheticFieldSource {
    pub fn new(
        variable: impl Into<String>,
        units: impl Into<String>,
        hours: Vec<u32>,
        levels: Vec<f64>,
        grid_step: f64,
    ) -> Self {
        Self {
            variable: variable.into(),
            units: units.into(),
            hours,
            levels,
            grid_step,
            fail_days: BTreeSet::new(),
        }
    }

    pub fn with_failures(mut self, days: BTreeSet<NaiveDate>) -> Self {
        self.fail_days = days;
        self
    }

    /// Build the field for `day` without the failure check.
    pub fn generate(&self, day: NaiveDate) -> Result<RawField> {
        let times = expected_timestamps(day, &self.hours);
        let ny = (180.0 / self.grid_step).round() as usize + 1;
        let nx = (360.0 / self.grid_step).round() as usize;
        let latitudes: Vec<f64> = (0..ny).map(|i| 90.0 - self.grid_step * i as f64).collect();
        let longitudes: Vec<f64> = (0..nx).map(|i| self.grid_step * i as f64).collect();

        let seasonal = (day.ordinal() as f64 / 365.25 * std::f64::consts::TAU).cos();
        let mut values =
            Vec::with_capacity(times.len() * self.levels.len() * latitudes.len() * longitudes.len());
        for t in &times {
            let diurnal = (t.hour() as f64 / 24.0 * std::f64::consts::TAU).sin();
            for level in &self.levels {
                let moisture = (level / 1000.0).powi(3);
                for lat in &latitudes {
                    let zonal = lat.to_radians().cos().powi(2) + 0.1 * seasonal * lat.to_radians().sin();
                    for lon in &longitudes {
                        let wave = 0.05 * (2.0 * lon.to_radians() + diurnal).cos();
                        values.push((0.018 * moisture * (zonal + wave).max(0.0)) as f32);
                    }
                }
            }
        }

        RawField::new(
            self.variable.clone(),
            self.units.clone(),
            times,
            self.levels.clone(),
            latitudes,
            longitudes,
            values,
            None,
        )
        .map_err(Into::into)
    }
}

#[async_trait]
impl FieldSource for SyntheticFieldSource {
    async fn fetch(&self, day: NaiveDate) -> Result<RawField> {
        if self.fail_days.contains(&day) {
            warn!(day = %day, "Simulated fetch failure");
            return Err(IngestionError::fetch(format!("simulated failure for {}", day)));
        }
        let field = self.generate(day)?;
        debug!(day = %day, shape = ?field.shape(), "Generated synthetic field");
        Ok(field)
    }

    fn describe(&self) -> String {
        format!("synthetic ({}° mesh)", self.grid_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SyntheticFieldSource {
        SyntheticFieldSource::new("q", "kg kg**-1", vec![0, 6, 12, 18], vec![900.0, 500.0], 10.0)
    }

    #[tokio::test]
    async fn test_generates_full_day() {
        let day = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let field = source().fetch(day).await.unwrap();
        assert_eq!(field.shape(), [4, 2, 19, 36]);
        assert_eq!(field.latitudes[0], 90.0);
        assert_eq!(field.times[3].hour(), 18);
        assert!(field.values.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[tokio::test]
    async fn test_configured_days_fail() {
        let day = NaiveDate::from_ymd_opt(2024, 12, 3).unwrap();
        let source = source().with_failures([day].into_iter().collect());
        let err = source.fetch(day).await.unwrap_err();
        assert!(matches!(err, IngestionError::Fetch(_)));
        assert!(source.fetch(day.succ_opt().unwrap()).await.is_ok());
    }

    #[test]
    fn test_days_differ() {
        let s = source();
        let a = s.generate(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()).unwrap();
        let b = s.generate(NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()).unwrap();
        assert_ne!(a.values, b.values);
    }
}
