//! Serialized calibration tables.
//!
//! A [`CalibrationFile`] is the on-disk and on-the-wire form of one
//! calibration map: a version line, a header row naming every column, and
//! one CSV row per map entry. Lines starting with `#` are comments. The
//! version line is split off here; the header and data rows are handled by
//! the reader.

use crate::error::{GcalError, GcalResult};
use crate::maps::CalibrationMap;
use crate::version::Version;
use std::fs;
use std::path::Path;

/// One serialized calibration table: a version and the raw table body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalibrationFile {
    version: Version,
    raw_data: String,
}

impl CalibrationFile {
    /// Creates a file from a version and a table body (header plus rows,
    /// without the version line).
    pub fn new(version: Version, raw_data: impl Into<String>) -> Self {
        Self {
            version,
            raw_data: raw_data.into(),
        }
    }

    /// Parses the textual form: the first non-blank line is the version,
    /// everything after it is the table body.
    pub fn parse(text: &str) -> GcalResult<Self> {
        let mut rest = text;
        loop {
            let (line, remainder) = match rest.split_once('\n') {
                Some((line, remainder)) => (line, remainder),
                None => (rest, ""),
            };
            if line.trim().is_empty() {
                if remainder.is_empty() {
                    return Err(GcalError::Format(
                        "calibration file is empty".to_string(),
                    ));
                }
                rest = remainder;
                continue;
            }
            let version: Version = line.parse()?;
            return Ok(Self::new(version, remainder));
        }
    }

    /// Reads and parses a file from disk.
    pub fn from_path(path: &Path) -> GcalResult<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Serializes a map back into its file form: version line, header row,
    /// one row per entry.
    pub fn from_map(map: &dyn CalibrationMap) -> GcalResult<Self> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(map.schema().column_names())?;
        for row in map.export() {
            writer.write_record(&row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| GcalError::Format(format!("could not flush table rows: {}", e)))?;
        let raw_data = String::from_utf8(bytes)
            .map_err(|e| GcalError::Format(format!("table rows are not UTF-8: {}", e)))?;
        Ok(Self::new(map.version().clone(), raw_data))
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The table body: header row plus data rows, no version line.
    pub fn raw_data(&self) -> &str {
        &self.raw_data
    }

    /// The full textual form, version line included.
    pub fn to_text(&self) -> String {
        format!("{}\n{}", self.version, self.raw_data)
    }
}
