//! Daily reanalysis ingestion into the HEALPix archive.
//!
//! Provides the pieces around the regridding core:
//!
//! - [`Scheduler`]: which days (and which resolutions of each day) are still
//!   outstanding against an archive snapshot
//! - [`FieldSource`] strategies: daily Zarr stores dropped by the download
//!   collaborator, or synthetic fields
//! - [`PipelineDriver`]: the sequential day loop with a configurable
//!   failure policy
//! - [`Ledger`]: an SQLite record of completed and failed days
//!
//! # Architecture
//!
//! ```text
//! Request ──► Scheduler ──► [DayPlan]
//!                               │
//!                for each day   ▼
//!   re-inspect ─► FieldSource::fetch ─► regrid (per missing nside, rayon)
//!                                             │
//!                                             ▼
//!                                   Archive::commit (per nside)
//!                                             │
//!                                             ▼
//!                                        Ledger update
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod scheduler;
pub mod source;

// Re-exports
pub use config::{FailurePolicy, PipelineConfig, SourceConfig};
pub use driver::{PipelineDriver, RunReport};
pub use error::{IngestionError, Result};
pub use ledger::{DayRecord, DayStatus, Ledger, LedgerStats};
pub use scheduler::{expected_timestamps, DayPlan, Request, Scheduler};
pub use source::{FieldSource, SyntheticFieldSource, ZarrFieldSource};
