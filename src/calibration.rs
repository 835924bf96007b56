//! Calibration-unit settings.
//!
//! A [`Calibration`] is one ordered tuple of named calibration-unit settings
//! (lamp, filter, shutter, exposure parameters and so on). The engine treats
//! it as opaque data: the names and the order of the settings come from the
//! instrument's declarative schema, and the values are carried as strings so
//! that they round-trip through the table file format unchanged.
//!
//! Large tables repeat the same calibration for thousands of configuration
//! keys, so [`CalibrationInterner`] deduplicates identical tuples behind an
//! `Arc` while a table is being read. This cuts the number of live
//! calibration values by roughly an order of magnitude for the bigger
//! instruments.

use crate::error::{GcalError, GcalResult};
use crate::keys::Record;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The kind of calibration a table provides.
///
/// Each `(instrument, type)` pair is an independent unit of versioning,
/// caching and update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CalibrationType {
    Flat,
    Arc,
}

impl CalibrationType {
    /// All known calibration types.
    pub const ALL: [CalibrationType; 2] = [CalibrationType::Flat, CalibrationType::Arc];
}

impl fmt::Display for CalibrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationType::Flat => write!(f, "FLAT"),
            CalibrationType::Arc => write!(f, "ARC"),
        }
    }
}

impl FromStr for CalibrationType {
    type Err = GcalError;

    fn from_str(s: &str) -> GcalResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FLAT" => Ok(CalibrationType::Flat),
            "ARC" => Ok(CalibrationType::Arc),
            other => Err(GcalError::Format(format!(
                "unknown calibration type '{}'",
                other
            ))),
        }
    }
}

/// One set of calibration-unit settings, ordered per the instrument schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Calibration {
    values: Vec<String>,
}

impl Calibration {
    /// Creates a calibration directly from ordered setting values.
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    /// Builds a calibration from a name/value record, pulling one value per
    /// attribute name in schema order.
    pub fn parse(attribute_names: &[String], record: &Record) -> GcalResult<Self> {
        let mut values = Vec::with_capacity(attribute_names.len());
        for name in attribute_names {
            let value = record
                .get(name)
                .ok_or_else(|| GcalError::MissingAttribute(name.clone()))?;
            values.push(value.clone());
        }
        Ok(Self { values })
    }

    /// The ordered setting values, suitable for writing back as one table row.
    pub fn export(&self) -> &[String] {
        &self.values
    }

    /// Looks up a single setting by its schema name.
    pub fn value(&self, attribute_names: &[String], name: &str) -> Option<&str> {
        attribute_names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }
}

/// Deduplicates identical calibrations while a table is loaded.
#[derive(Debug, Default)]
pub struct CalibrationInterner {
    pool: HashSet<Arc<Calibration>>,
}

impl CalibrationInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a shared handle for `calibration`, reusing an existing
    /// allocation if an identical calibration was interned before.
    pub fn intern(&mut self, calibration: Calibration) -> Arc<Calibration> {
        if let Some(existing) = self.pool.get(&calibration) {
            return Arc::clone(existing);
        }
        let shared = Arc::new(calibration);
        self.pool.insert(Arc::clone(&shared));
        shared
    }

    /// Number of distinct calibrations seen so far.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
