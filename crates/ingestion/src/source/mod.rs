//! Fetch strategies for raw daily fields.
//!
//! The download itself belongs to an external collaborator; a strategy only
//! turns "the field for this day" into a [`RawField`] or a fetch error.

mod synthetic;
mod zarr;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use grid_processor::RawField;

use crate::config::{PipelineConfig, SourceConfig};
use crate::error::Result;

pub use synthetic::SyntheticFieldSource;
pub use zarr::{decode_cf_times, read_raw_field, write_raw_field, ZarrFieldSource};

/// Supplies the raw field of one day.
#[async_trait]
pub trait FieldSource: Send + Sync {
    /// Fetch every timestamp and level of `day`.
    ///
    /// A missing or unreachable day is [`IngestionError::Fetch`]; a field
    /// that exists but cannot be interpreted is a schema error.
    ///
    /// [`IngestionError::Fetch`]: crate::IngestionError::Fetch
    async fn fetch(&self, day: NaiveDate) -> Result<RawField>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Build the strategy selected by the configuration.
pub fn from_config(config: &PipelineConfig) -> Arc<dyn FieldSource> {
    match &config.source {
        SourceConfig::Zarr { raw_dir } => {
            Arc::new(ZarrFieldSource::new(raw_dir.clone(), config.variable.clone()))
        }
        SourceConfig::Synthetic {
            fail_days,
            grid_step,
        } => Arc::new(
            SyntheticFieldSource::new(
                config.variable.clone(),
                config.units.clone(),
                config.hours.clone(),
                config.pressure_levels.clone(),
                *grid_step,
            )
            .with_failures(fail_days.iter().copied().collect::<BTreeSet<_>>()),
        ),
    }
}
