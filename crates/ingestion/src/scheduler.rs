//! Deciding which days still need work.
//!
//! The scheduler is a pure function of the request, an [`ArchiveState`]
//! snapshot and the current date. Completeness is evaluated per resolution:
//! a day is outstanding when any configured level lacks any of its expected
//! timestamps, and only those levels are listed for it.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use grid_processor::ArchiveState;
use healpix::TessellationLevel;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{IngestionError, Result};

/// What the caller asked to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// A single day.
    Day(NaiveDate),
    /// Every day of `[start, end]`.
    Range { start: NaiveDate, end: NaiveDate },
    /// From the earliest incomplete day since the configured start up to the
    /// latest available day.
    Resume,
}

/// One day to process and the levels it still lacks.
#[derive(Debug, Clone, PartialEq)]
pub struct DayPlan {
    pub day: NaiveDate,
    pub missing: Vec<TessellationLevel>,
}

impl DayPlan {
    /// True when every level is already complete for this day.
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Computes outstanding days against an archive snapshot.
#[derive(Debug, Clone)]
pub struct Scheduler {
    levels: Vec<TessellationLevel>,
    hours: Vec<u32>,
    default_start: NaiveDate,
    availability_lag_days: u32,
}

impl Scheduler {
    pub fn new(
        levels: Vec<TessellationLevel>,
        hours: Vec<u32>,
        default_start: NaiveDate,
        availability_lag_days: u32,
    ) -> Self {
        let mut hours = hours;
        hours.sort_unstable();
        hours.dedup();
        Self {
            levels,
            hours,
            default_start,
            availability_lag_days,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(
            config.levels()?,
            config.hours.clone(),
            config.default_start,
            config.availability_lag_days,
        ))
    }

    pub fn levels(&self) -> &[TessellationLevel] {
        &self.levels
    }

    /// Timestamps a complete day carries.
    pub fn expected_timestamps(&self, day: NaiveDate) -> Vec<DateTime<Utc>> {
        expected_timestamps(day, &self.hours)
    }

    /// Most recent day the provider is expected to have published.
    pub fn latest_available(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.availability_lag_days as i64)
    }

    /// Levels at which `day` is not complete.
    pub fn missing_levels(&self, day: NaiveDate, state: &ArchiveState) -> Vec<TessellationLevel> {
        let expected = self.expected_timestamps(day);
        self.levels
            .iter()
            .filter(|level| !state.completion(level, &expected).is_complete())
            .copied()
            .collect()
    }

    /// Ordered list of days the request still requires.
    pub fn outstanding_days(
        &self,
        request: Request,
        state: &ArchiveState,
        today: NaiveDate,
    ) -> Result<Vec<DayPlan>> {
        let latest = self.latest_available(today);

        let plans = match request {
            Request::Day(day) => self.plan_range(day, day, latest, state),
            Request::Range { start, end } => {
                if start > end {
                    return Err(IngestionError::InvalidRange(format!(
                        "start {} is after end {}",
                        start, end
                    )));
                }
                self.plan_range(start, end, latest, state)
            }
            Request::Resume => {
                let all = self.plan_all(self.default_start, latest, state);
                match all.iter().position(|p| !p.is_satisfied()) {
                    Some(first) => all.into_iter().skip(first).collect(),
                    None => Vec::new(),
                }
            }
        };

        debug!(
            request = ?request,
            latest_available = %latest,
            outstanding = plans.len(),
            "Scheduled days"
        );
        Ok(plans)
    }

    /// Incomplete days of `[start, min(end, latest)]`.
    fn plan_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        latest: NaiveDate,
        state: &ArchiveState,
    ) -> Vec<DayPlan> {
        self.plan_all(start, end.min(latest), state)
            .into_iter()
            .filter(|p| !p.is_satisfied())
            .collect()
    }

    /// A plan for every day of `[start, end]`; empty when `start > end`.
    fn plan_all(&self, start: NaiveDate, end: NaiveDate, state: &ArchiveState) -> Vec<DayPlan> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|day| DayPlan {
                day,
                missing: self.missing_levels(day, state),
            })
            .collect()
    }
}

/// `day` at each of `hours`, UTC.
pub fn expected_timestamps(day: NaiveDate, hours: &[u32]) -> Vec<DateTime<Utc>> {
    hours
        .iter()
        .filter_map(|h| day.and_hms_opt(*h, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .collect()
}
