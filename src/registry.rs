//! Instrument registry.
//!
//! The registry is the declarative list of instruments the engine knows
//! about: for each one, the key-space schema and the calibration types it
//! supports. Everything that iterates all known `(instrument, type)` pairs
//! (cache validation, reconciliation, version reporting) goes through here.
//! Instrument descriptions are plain TOML files, one per instrument, so
//! supporting a new instrument is a data change.

use crate::calibration::CalibrationType;
use crate::error::{GcalError, GcalResult};
use crate::file::CalibrationFile;
use crate::keys::KeySchema;
use crate::maps::{CalibrationMap, CentralWavelengthMap, SimpleCalibrationMap};
use crate::reader::CalibrationMapReader;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One instrument's schema plus the calibration types it provides.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstrumentEntry {
    #[serde(flatten)]
    pub schema: KeySchema,
    pub types: Vec<CalibrationType>,
}

/// All instruments known to the engine.
#[derive(Clone, Debug, Default)]
pub struct CalibrationRegistry {
    entries: BTreeMap<String, InstrumentEntry>,
}

impl CalibrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an instrument, replacing any previous entry with the same
    /// name.
    pub fn insert(&mut self, entry: InstrumentEntry) {
        self.entries.insert(entry.schema.instrument.clone(), entry);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_instrument(mut self, schema: KeySchema, types: Vec<CalibrationType>) -> Self {
        self.insert(InstrumentEntry { schema, types });
        self
    }

    /// Loads every `*.toml` instrument description in a directory.
    pub fn load_dir(path: &Path) -> GcalResult<Self> {
        let mut registry = Self::new();
        for entry in fs::read_dir(path)? {
            let file = entry?.path();
            if file.extension().map_or(true, |ext| ext != "toml") {
                continue;
            }
            let text = fs::read_to_string(&file)?;
            let parsed: InstrumentEntry = toml::from_str(&text).map_err(|e| {
                GcalError::Configuration(format!(
                    "invalid instrument description {}: {}",
                    file.display(),
                    e
                ))
            })?;
            registry.insert(parsed);
        }
        Ok(registry)
    }

    pub fn instrument_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn available_types(&self, instrument: &str) -> &[CalibrationType] {
        self.entries
            .get(instrument)
            .map(|entry| entry.types.as_slice())
            .unwrap_or(&[])
    }

    pub fn schema(&self, instrument: &str) -> Option<&KeySchema> {
        self.entries.get(instrument).map(|entry| &entry.schema)
    }

    /// Every known `(instrument, type)` pair, in deterministic order.
    pub fn pairs(&self) -> Vec<(String, CalibrationType)> {
        self.entries
            .values()
            .flat_map(|entry| {
                entry
                    .types
                    .iter()
                    .map(|t| (entry.schema.instrument.clone(), *t))
            })
            .collect()
    }

    /// Creates an empty map of the right kind for an instrument.
    pub fn new_map(
        &self,
        instrument: &str,
        version: Version,
    ) -> GcalResult<Box<dyn CalibrationMap>> {
        let schema = self
            .schema(instrument)
            .ok_or_else(|| {
                GcalError::Configuration(format!("unknown instrument '{}'", instrument))
            })?
            .clone();
        if schema.is_wavelength_sensitive() {
            Ok(Box::new(CentralWavelengthMap::new(version, schema)))
        } else {
            Ok(Box::new(SimpleCalibrationMap::new(version, schema)))
        }
    }

    /// Fully parses a calibration file against an instrument's schema and
    /// returns every row error found. An empty list means the file is valid.
    pub fn validate_file(
        &self,
        instrument: &str,
        file: &CalibrationFile,
    ) -> GcalResult<Vec<String>> {
        let mut map = self.new_map(instrument, file.version().clone())?;
        let mut reader = CalibrationMapReader::new(map.as_mut());
        reader.read(file.raw_data());
        Ok(reader.into_errors())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
