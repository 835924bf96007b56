//! Process-wide calibration lookup state.
//!
//! A [`CalibrationStore`] owns one fully built map per `(instrument, type)`
//! pair. Stores are loaded from a repository in one pass and never mutated:
//! after a successful cache update the owner loads a fresh store and swaps
//! it in wholesale (e.g. behind an `Arc`), so in-flight lookups keep seeing
//! a consistent snapshot and readers need no locks.

use crate::calibration::{Calibration, CalibrationType};
use crate::error::GcalResult;
use crate::file::CalibrationFile;
use crate::keys::ConfigurationKey;
use crate::maps::CalibrationMap;
use crate::reader::CalibrationMapReader;
use crate::registry::CalibrationRegistry;
use crate::repository::CalibrationRepository;
use crate::version::Version;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable snapshot of every loaded calibration map.
pub struct CalibrationStore {
    maps: HashMap<(String, CalibrationType), Arc<dyn CalibrationMap>>,
}

impl CalibrationStore {
    /// Builds maps for every registry pair from `repository`. A pair whose
    /// table cannot be fetched is logged and skipped; its lookups return
    /// empty lists until the next load.
    pub async fn load(
        registry: &CalibrationRegistry,
        repository: &dyn CalibrationRepository,
    ) -> Self {
        let mut maps = HashMap::new();
        for (instrument, calibration_type) in registry.pairs() {
            match Self::load_pair(registry, repository, &instrument, calibration_type).await {
                Ok(map) => {
                    maps.insert((instrument, calibration_type), map);
                }
                Err(e) => {
                    log::warn!(
                        "could not load calibration map for {} {}: {}",
                        instrument,
                        calibration_type,
                        e
                    );
                }
            }
        }
        Self { maps }
    }

    async fn load_pair(
        registry: &CalibrationRegistry,
        repository: &dyn CalibrationRepository,
        instrument: &str,
        calibration_type: CalibrationType,
    ) -> GcalResult<Arc<dyn CalibrationMap>> {
        let file: CalibrationFile = repository
            .calibration_file(calibration_type, instrument)
            .await?;
        let mut map = registry.new_map(instrument, file.version().clone())?;
        let mut reader = CalibrationMapReader::new(map.as_mut());
        reader.read(file.raw_data());
        if reader.has_errors() {
            // Invalid cache files are deleted at startup, so errors here mean
            // bundled or freshly downloaded data is bad; keep the good rows.
            log::warn!(
                "calibration table {} {} has {} bad rows, first: {}",
                instrument,
                calibration_type,
                reader.errors().len(),
                reader.errors()[0]
            );
        }
        Ok(Arc::from(map))
    }

    pub fn map(
        &self,
        instrument: &str,
        calibration_type: CalibrationType,
    ) -> Option<&Arc<dyn CalibrationMap>> {
        self.maps
            .get(&(instrument.to_string(), calibration_type))
    }

    /// The version of one loaded table.
    pub fn version(
        &self,
        instrument: &str,
        calibration_type: CalibrationType,
    ) -> Option<&Version> {
        self.map(instrument, calibration_type).map(|m| m.version())
    }

    /// Calibrations for an exact key. Empty if the pair or key is unknown.
    pub fn lookup(
        &self,
        instrument: &str,
        calibration_type: CalibrationType,
        key: &ConfigurationKey,
    ) -> Vec<Arc<Calibration>> {
        self.map(instrument, calibration_type)
            .map(|m| m.get(key))
            .unwrap_or_default()
    }

    /// Calibrations for a key at a central wavelength. Empty if the pair or
    /// key is unknown or no range covers the wavelength.
    pub fn lookup_at(
        &self,
        instrument: &str,
        calibration_type: CalibrationType,
        key: &ConfigurationKey,
        wavelength: i64,
    ) -> Vec<Arc<Calibration>> {
        self.map(instrument, calibration_type)
            .map(|m| m.get_at(key, wavelength))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
