//! Calibration data shipped with the build.

use crate::calibration::CalibrationType;
use crate::error::{GcalError, GcalResult};
use crate::file::CalibrationFile;
use crate::repository::CalibrationRepository;
use async_trait::async_trait;
use std::collections::HashMap;

/// Repository backed by table text compiled into the deployable artifact.
///
/// Instrument code registers its bundled tables (typically `include_str!`
/// data) at startup. This repository seeds the cache fallback chain, so a
/// fresh install can answer lookups before any network access has happened.
#[derive(Debug, Default)]
pub struct BundledRepository {
    tables: HashMap<(CalibrationType, String), String>,
}

impl BundledRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the bundled table text (version line included) for one
    /// `(instrument, type)` pair.
    pub fn with_table(
        mut self,
        calibration_type: CalibrationType,
        instrument: &str,
        text: impl Into<String>,
    ) -> Self {
        self.tables
            .insert((calibration_type, instrument.to_string()), text.into());
        self
    }
}

#[async_trait]
impl CalibrationRepository for BundledRepository {
    async fn calibration_file(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<CalibrationFile> {
        let text = self
            .tables
            .get(&(calibration_type, instrument.to_string()))
            .ok_or_else(|| GcalError::NoData {
                instrument: instrument.to_string(),
                calibration_type,
            })?;
        CalibrationFile::parse(text)
    }
}
