//! Pipeline configuration.
//!
//! Loaded from a YAML file, then overridden by environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `ARCHIVE_PATH` | `archive_path` |
//! | `ARCHIVE_NSIDES` | `nsides` (comma separated) |
//! | `REGRID_METHOD` | `regrid_method` |
//! | `FAILURE_POLICY` | `failure_policy` |
//! | `RAW_DATA_DIR` | `source` (switches to the Zarr drop directory) |
//! | `LEDGER_PATH` | `ledger_path` |
//! | `ZARR_*`, `APPEND_STRATEGY` | `archive` |

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use grid_processor::{ArchiveConfig, RegridMethod};
use healpix::{PixelOrdering, TessellationLevel};
use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, Result};

/// What the driver does when a day fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failure and move on to the next day.
    #[default]
    Continue,
    /// Stop the run at the first failed day.
    Halt,
}

impl FailurePolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "continue" => Some(Self::Continue),
            "halt" | "stop" => Some(Self::Halt),
            _ => None,
        }
    }
}

/// Where raw daily fields come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Daily Zarr stores named `YYYY-MM-DD.zarr` in `raw_dir`.
    Zarr { raw_dir: PathBuf },
    /// Analytic fields generated in process.
    Synthetic {
        /// Days whose fetch fails.
        #[serde(default)]
        fail_days: Vec<NaiveDate>,
        /// Mesh spacing in degrees.
        #[serde(default = "default_grid_step")]
        grid_step: f64,
    },
}

fn default_grid_step() -> f64 {
    2.5
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Zarr {
            raw_dir: PathBuf::from("./data/raw"),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory of the HEALPix archive.
    pub archive_path: PathBuf,

    /// Variable short name, used as the data array name.
    pub variable: String,

    /// Units recorded in the group attributes.
    pub units: String,

    /// Resolutions to maintain.
    pub nsides: Vec<u32>,

    pub ordering: PixelOrdering,

    /// Pressure levels (hPa) kept from the raw field, in archive order.
    pub pressure_levels: Vec<f64>,

    /// Sub-daily hours (UTC) every complete day carries.
    pub hours: Vec<u32>,

    pub regrid_method: RegridMethod,

    /// Sentinel for pixels without data; NaN when unset.
    pub fill_value: Option<f32>,

    pub archive: ArchiveConfig,

    /// First day considered by a resume.
    pub default_start: NaiveDate,

    /// Days between a date and the provider publishing it.
    pub availability_lag_days: u32,

    pub failure_policy: FailurePolicy,

    pub source: SourceConfig,

    /// SQLite completion ledger; disabled when unset.
    pub ledger_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            archive_path: PathBuf::from("./data/era5_healpix.zarr"),
            variable: "q".to_string(),
            units: "kg kg**-1".to_string(),
            nsides: vec![8, 16],
            ordering: PixelOrdering::Ring,
            pressure_levels: vec![975.0, 900.0, 800.0, 500.0, 300.0],
            hours: vec![0, 6, 12, 18],
            regrid_method: RegridMethod::Binning,
            fill_value: None,
            archive: ArchiveConfig::default(),
            default_start: NaiveDate::from_ymd_opt(2024, 12, 1).unwrap_or(NaiveDate::MIN),
            availability_lag_days: 5,
            failure_policy: FailurePolicy::Continue,
            source: SourceConfig::default(),
            ledger_path: None,
        }
    }
}

impl PipelineConfig {
    /// Parse a YAML configuration file. Missing fields take their defaults.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestionError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            IngestionError::config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from an optional file, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.archive.apply_env();
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(val) = lookup("ARCHIVE_PATH") {
            self.archive_path = PathBuf::from(val);
        }

        if let Some(val) = lookup("ARCHIVE_NSIDES") {
            self.nsides = val
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u32>().map_err(|_| {
                        IngestionError::config(format!("ARCHIVE_NSIDES: '{}' is not an integer", s))
                    })
                })
                .collect::<Result<_>>()?;
        }

        if let Some(val) = lookup("REGRID_METHOD") {
            self.regrid_method = RegridMethod::from_str(&val).ok_or_else(|| {
                IngestionError::config(format!("REGRID_METHOD: unknown method '{}'", val))
            })?;
        }

        if let Some(val) = lookup("FAILURE_POLICY") {
            self.failure_policy = FailurePolicy::from_str(&val).ok_or_else(|| {
                IngestionError::config(format!("FAILURE_POLICY: unknown policy '{}'", val))
            })?;
        }

        if let Some(val) = lookup("RAW_DATA_DIR") {
            self.source = SourceConfig::Zarr {
                raw_dir: PathBuf::from(val),
            };
        }

        if let Some(val) = lookup("LEDGER_PATH") {
            self.ledger_path = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.variable.is_empty() {
            return Err(IngestionError::config("variable must not be empty"));
        }

        if self.nsides.is_empty() {
            return Err(IngestionError::config("at least one nside is required"));
        }
        let unique: BTreeSet<_> = self.nsides.iter().collect();
        if unique.len() != self.nsides.len() {
            return Err(IngestionError::config("nsides must be unique"));
        }
        self.levels()?;

        if self.hours.is_empty() {
            return Err(IngestionError::config("at least one hour is required"));
        }
        if let Some(h) = self.hours.iter().find(|h| **h > 23) {
            return Err(IngestionError::config(format!("hour {} is out of range", h)));
        }
        let unique: BTreeSet<_> = self.hours.iter().collect();
        if unique.len() != self.hours.len() {
            return Err(IngestionError::config("hours must be unique"));
        }

        if self.pressure_levels.is_empty() {
            return Err(IngestionError::config("at least one pressure level is required"));
        }

        if let SourceConfig::Synthetic { grid_step, .. } = &self.source {
            if !(*grid_step > 0.0 && *grid_step <= 90.0) {
                return Err(IngestionError::config("grid_step must be in (0, 90]"));
            }
        }

        self.archive.validate().map_err(IngestionError::config)?;
        Ok(())
    }

    /// Tessellation levels for every configured nside.
    pub fn levels(&self) -> Result<Vec<TessellationLevel>> {
        self.nsides
            .iter()
            .map(|n| {
                TessellationLevel::new(*n, self.ordering)
                    .map_err(|e| IngestionError::config(format!("nside {}: {}", n, e)))
            })
            .collect()
    }

    /// Fill sentinel written for pixels without data.
    pub fn fill(&self) -> f32 {
        self.fill_value.unwrap_or(f32::NAN)
    }
}
