//! The day loop: schedule, fetch, regrid, commit.
//!
//! Days run strictly one after another because each scheduling decision
//! depends on what the previous day committed. Within a day every missing
//! resolution is regridded in parallel, then committed one at a time.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use grid_processor::{regrid, Archive, ArchiveState, PixelField, RegridMethod, ZarrArchive};
use healpix::TessellationLevel;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{FailurePolicy, PipelineConfig};
use crate::error::Result;
use crate::ledger::{DayStatus, Ledger};
use crate::scheduler::{DayPlan, Request, Scheduler};
use crate::source::{self, FieldSource};

/// What happened over one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Days whose missing resolutions were all committed.
    pub succeeded: Vec<NaiveDate>,
    /// Days that failed, with the reason.
    pub failed: Vec<(NaiveDate, String)>,
    /// Days found complete on re-inspection; nothing was written.
    pub skipped: Vec<NaiveDate>,
    /// Whether the run stopped early under [`FailurePolicy::Halt`].
    pub halted: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.halted
    }
}

enum DayOutcome {
    Committed,
    AlreadyComplete,
}

/// Regridding settings applied to every day.
#[derive(Debug, Clone)]
struct RegridSettings {
    method: RegridMethod,
    fill: f32,
    pressure_levels: Vec<f64>,
}

/// Orchestrates the pipeline over a fetch strategy and a storage strategy.
pub struct PipelineDriver {
    scheduler: Scheduler,
    source: Arc<dyn FieldSource>,
    archive: Arc<dyn Archive>,
    ledger: Option<Ledger>,
    settings: RegridSettings,
    failure_policy: FailurePolicy,
}

impl PipelineDriver {
    pub fn new(
        config: &PipelineConfig,
        source: Arc<dyn FieldSource>,
        archive: Arc<dyn Archive>,
    ) -> Result<Self> {
        Ok(Self {
            scheduler: Scheduler::from_config(config)?,
            source,
            archive,
            ledger: None,
            settings: RegridSettings {
                method: config.regrid_method,
                fill: config.fill(),
                pressure_levels: config.pressure_levels.clone(),
            },
            failure_policy: config.failure_policy,
        })
    }

    /// Driver over the configured Zarr archive, source and ledger.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        let archive = Arc::new(ZarrArchive::new(
            config.archive_path.clone(),
            config.archive.clone(),
        ));
        let driver = Self::new(config, source::from_config(config), archive)?;

        let driver = match &config.ledger_path {
            Some(path) => driver.with_ledger(Ledger::open(path).await?),
            None => driver,
        };

        info!(
            archive = %config.archive_path.display(),
            source = %driver.source.describe(),
            nsides = ?config.nsides,
            method = %config.regrid_method,
            "Pipeline configured"
        );
        Ok(driver)
    }

    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn ledger(&self) -> Option<&Ledger> {
        self.ledger.as_ref()
    }

    /// Process `request` as of today (UTC).
    pub async fn run(&self, request: Request) -> Result<RunReport> {
        self.run_at(request, Utc::now().date_naive()).await
    }

    /// Process `request` as of `today`.
    ///
    /// Per-day failures are recorded in the report; only an unreadable
    /// archive aborts the run with an error.
    #[instrument(skip(self), fields(policy = ?self.failure_policy))]
    pub async fn run_at(&self, request: Request, today: NaiveDate) -> Result<RunReport> {
        let state = self.snapshot().await?;
        let plans = self.scheduler.outstanding_days(request, &state, today)?;
        info!(days = plans.len(), "Starting run");

        let mut report = RunReport::default();
        for plan in &plans {
            match self.process_day(plan).await {
                Ok(DayOutcome::Committed) => report.succeeded.push(plan.day),
                Ok(DayOutcome::AlreadyComplete) => report.skipped.push(plan.day),
                Err(e) if e.is_fatal() => {
                    error!(day = %plan.day, error = %e, "Archive unavailable, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    warn!(day = %plan.day, error = %e, "Day failed");
                    report.failed.push((plan.day, e.to_string()));
                    if self.failure_policy == FailurePolicy::Halt {
                        report.halted = true;
                        break;
                    }
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            halted = report.halted,
            "Run finished"
        );
        Ok(report)
    }

    #[instrument(skip(self, plan), fields(day = %plan.day))]
    async fn process_day(&self, plan: &DayPlan) -> Result<DayOutcome> {
        let day = plan.day;

        // The archive may have moved since scheduling
        let state = self.snapshot().await?;
        let missing = self.scheduler.missing_levels(day, &state);
        self.reconcile_ledger(day, &missing).await;
        if missing.is_empty() {
            debug!("Already complete");
            return Ok(DayOutcome::AlreadyComplete);
        }

        let mut committed = Vec::new();
        let result = self.fetch_regrid_commit(day, &missing, &mut committed).await;
        if let Err(e) = &result {
            for level in missing.iter().filter(|l| !committed.contains(&l.nside())) {
                self.record(day, level.nside(), DayStatus::Failed, Some(&e.to_string()))
                    .await;
            }
        }
        result.map(|_| DayOutcome::Committed)
    }

    async fn fetch_regrid_commit(
        &self,
        day: NaiveDate,
        missing: &[TessellationLevel],
        committed: &mut Vec<u32>,
    ) -> Result<()> {
        let raw = self.source.fetch(day).await?;
        let raw = raw
            .select_times(&self.scheduler.expected_timestamps(day))?
            .select_levels(&self.settings.pressure_levels)?;

        let levels = missing.to_vec();
        let settings = self.settings.clone();
        let fields: Vec<PixelField> = tokio::task::spawn_blocking(move || {
            levels
                .par_iter()
                .map(|level| regrid(&raw, level, settings.method, settings.fill))
                .collect::<grid_processor::Result<Vec<_>>>()
        })
        .await??;

        for field in fields {
            let nside = field.level.nside();
            let archive = self.archive.clone();
            let outcome = tokio::task::spawn_blocking(move || archive.commit(&field)).await??;
            info!(day = %day, nside, outcome = ?outcome, "Committed");
            committed.push(nside);
            self.record(day, nside, DayStatus::Completed, None).await;
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<ArchiveState> {
        let archive = self.archive.clone();
        let levels = self.scheduler.levels().to_vec();
        let state = tokio::task::spawn_blocking(move || archive.snapshot(&levels)).await??;
        Ok(state)
    }

    /// Reset markers the archive contradicts.
    async fn reconcile_ledger(&self, day: NaiveDate, missing: &[TessellationLevel]) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        for level in missing {
            match ledger.get(day, level.nside()).await {
                Ok(Some(record)) if record.status == DayStatus::Completed => {
                    warn!(
                        day = %day,
                        nside = level.nside(),
                        "Ledger marks day completed but the archive lacks it; resetting"
                    );
                    if let Err(e) = ledger.reset(day, level.nside()).await {
                        warn!(error = %e, "Failed to reset ledger marker");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to read ledger"),
            }
        }
    }

    async fn record(&self, day: NaiveDate, nside: u32, status: DayStatus, error: Option<&str>) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        let result = match status {
            DayStatus::Completed => ledger.mark_completed(day, nside).await,
            DayStatus::Failed => {
                ledger
                    .mark_failed(day, nside, error.unwrap_or("unknown error"))
                    .await
            }
        };
        if let Err(e) = result {
            warn!(day = %day, nside, error = %e, "Failed to update ledger");
        }
    }
}
