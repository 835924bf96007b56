//! In-memory calibration lookup maps.
//!
//! A calibration map holds the fully expanded key space for one
//! `(instrument, type)` pair and answers lookups. Two kinds exist:
//!
//! - [`SimpleCalibrationMap`]: key to ordered calibration list.
//! - [`CentralWavelengthMap`]: key to a set of disjoint wavelength ranges,
//!   each carrying its own calibration list, for dispersive instruments
//!   where the central wavelength is a secondary lookup dimension.
//!
//! Maps are rebuilt wholesale whenever a calibration file is parsed and are
//! never mutated afterwards, so lookups are lock-free.

use crate::calibration::{Calibration, CalibrationInterner};
use crate::error::{GcalError, GcalResult};
use crate::keys::{ConfigurationKey, KeySchema, Record};
use crate::version::Version;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A wavelength interval in integer angstroms, half-open: `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WavelengthRange {
    pub start_angstrom: i64,
    pub end_angstrom: i64,
}

impl WavelengthRange {
    pub fn new(start_angstrom: i64, end_angstrom: i64) -> Self {
        Self {
            start_angstrom,
            end_angstrom,
        }
    }

    pub fn contains(&self, wavelength: i64) -> bool {
        self.start_angstrom <= wavelength && wavelength < self.end_angstrom
    }

    pub fn overlaps(&self, other: &WavelengthRange) -> bool {
        self.start_angstrom < other.end_angstrom && other.start_angstrom < self.end_angstrom
    }
}

impl fmt::Display for WavelengthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_angstrom, self.end_angstrom)
    }
}

impl FromStr for WavelengthRange {
    type Err = GcalError;

    /// Parses `<start>-<end>`, tolerating whitespace around the separator.
    fn from_str(s: &str) -> GcalResult<Self> {
        let malformed = || GcalError::Format(format!("malformed wavelength range '{}'", s));
        let (start, end) = s.trim().split_once('-').ok_or_else(malformed)?;
        let start = start.trim().parse::<i64>().map_err(|_| malformed())?;
        let end = end.trim().parse::<i64>().map_err(|_| malformed())?;
        if end <= start {
            return Err(GcalError::Format(format!(
                "empty wavelength range '{}'",
                s
            )));
        }
        Ok(Self::new(start, end))
    }
}

/// Ordered set of wavelength ranges, each with its calibration list.
///
/// Ranges for one key are expected to be disjoint. The loader rejects
/// overlapping inserts, but should overlapping ranges end up here anyway the
/// lookup still resolves deterministically to the first-inserted range.
#[derive(Clone, Debug, Default)]
pub struct WavelengthRangeSet {
    ranges: Vec<(WavelengthRange, Vec<Arc<Calibration>>)>,
}

impl WavelengthRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a calibration for `range`, appending if the identical range is
    /// already present and rejecting ranges that overlap an existing one.
    pub fn add(
        &mut self,
        range: WavelengthRange,
        calibration: Arc<Calibration>,
    ) -> GcalResult<()> {
        for (existing, calibrations) in &mut self.ranges {
            if *existing == range {
                calibrations.push(calibration);
                return Ok(());
            }
            if existing.overlaps(&range) {
                return Err(GcalError::Format(format!(
                    "wavelength ranges overlap: {} and {}",
                    existing, range
                )));
            }
        }
        self.ranges.push((range, vec![calibration]));
        Ok(())
    }

    /// The calibrations of the range containing `wavelength`, or an empty
    /// list if no range contains it.
    pub fn find_calibrations(&self, wavelength: i64) -> Vec<Arc<Calibration>> {
        self.ranges
            .iter()
            .find(|(range, _)| range.contains(wavelength))
            .map(|(_, calibrations)| calibrations.clone())
            .unwrap_or_default()
    }

    /// The ranges and their calibrations, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&WavelengthRange, &[Arc<Calibration>])> {
        self.ranges
            .iter()
            .map(|(range, calibrations)| (range, calibrations.as_slice()))
    }
}

/// Shared capability surface of both map kinds.
///
/// `get` and `get_at` never fail: an unknown key or an uncovered wavelength
/// yields an empty list, so calibration lookups always return some answer.
/// The one exception is calling the key-only [`CalibrationMap::get`] on a
/// wavelength-sensitive map, which is a programming error and panics.
pub trait CalibrationMap: Send + Sync {
    /// The version of the table this map was built from.
    fn version(&self) -> &Version;

    /// The instrument schema this map is keyed by.
    fn schema(&self) -> &KeySchema;

    /// Expands one rule record into the configuration keys it denotes.
    fn create_config(&self, record: &Record) -> GcalResult<Vec<ConfigurationKey>>;

    /// Builds (and interns) the calibration a record maps to.
    fn create_calibration(&mut self, record: &Record) -> GcalResult<Arc<Calibration>>;

    /// Adds one key/calibration entry. Duplicate entries accumulate, they
    /// never replace earlier ones.
    fn put(
        &mut self,
        key: ConfigurationKey,
        record: &Record,
        calibration: Arc<Calibration>,
    ) -> GcalResult<()>;

    /// The ordered calibrations for an exact key.
    fn get(&self, key: &ConfigurationKey) -> Vec<Arc<Calibration>>;

    /// The ordered calibrations for a key at a central wavelength.
    fn get_at(&self, key: &ConfigurationKey, wavelength: i64) -> Vec<Arc<Calibration>>;

    /// Flattened rows for every entry, suitable for writing back to a
    /// definition file. Deterministic given the same map contents.
    fn export(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_>;
}

/// Key to ordered calibration list.
pub struct SimpleCalibrationMap {
    version: Version,
    schema: KeySchema,
    interner: CalibrationInterner,
    entries: BTreeMap<ConfigurationKey, Vec<Arc<Calibration>>>,
}

impl SimpleCalibrationMap {
    pub fn new(version: Version, schema: KeySchema) -> Self {
        Self {
            version,
            schema,
            interner: CalibrationInterner::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CalibrationMap for SimpleCalibrationMap {
    fn version(&self) -> &Version {
        &self.version
    }

    fn schema(&self) -> &KeySchema {
        &self.schema
    }

    fn create_config(&self, record: &Record) -> GcalResult<Vec<ConfigurationKey>> {
        self.schema.expand(record)
    }

    fn create_calibration(&mut self, record: &Record) -> GcalResult<Arc<Calibration>> {
        let calibration = Calibration::parse(&self.schema.calibration_attributes, record)?;
        Ok(self.interner.intern(calibration))
    }

    fn put(
        &mut self,
        key: ConfigurationKey,
        _record: &Record,
        calibration: Arc<Calibration>,
    ) -> GcalResult<()> {
        self.entries.entry(key).or_default().push(calibration);
        Ok(())
    }

    fn get(&self, key: &ConfigurationKey) -> Vec<Arc<Calibration>> {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    fn get_at(&self, key: &ConfigurationKey, _wavelength: i64) -> Vec<Arc<Calibration>> {
        // Not wavelength sensitive; the extra dimension is ignored.
        self.get(key)
    }

    fn export(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_> {
        Box::new(self.entries.iter().flat_map(|(key, calibrations)| {
            calibrations.iter().map(move |calibration| {
                let mut row: Vec<String> = key.export().to_vec();
                row.extend(calibration.export().iter().cloned());
                row
            })
        }))
    }
}

/// Key to disjoint wavelength ranges, each with its own calibration list.
pub struct CentralWavelengthMap {
    version: Version,
    schema: KeySchema,
    interner: CalibrationInterner,
    entries: BTreeMap<ConfigurationKey, WavelengthRangeSet>,
}

impl CentralWavelengthMap {
    pub fn new(version: Version, schema: KeySchema) -> Self {
        Self {
            version,
            schema,
            interner: CalibrationInterner::new(),
            entries: BTreeMap::new(),
        }
    }

    fn wavelength_column(&self) -> &str {
        self.schema
            .wavelength_column
            .as_deref()
            .unwrap_or("Central Wavelength")
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CalibrationMap for CentralWavelengthMap {
    fn version(&self) -> &Version {
        &self.version
    }

    fn schema(&self) -> &KeySchema {
        &self.schema
    }

    fn create_config(&self, record: &Record) -> GcalResult<Vec<ConfigurationKey>> {
        self.schema.expand(record)
    }

    fn create_calibration(&mut self, record: &Record) -> GcalResult<Arc<Calibration>> {
        let calibration = Calibration::parse(&self.schema.calibration_attributes, record)?;
        Ok(self.interner.intern(calibration))
    }

    fn put(
        &mut self,
        key: ConfigurationKey,
        record: &Record,
        calibration: Arc<Calibration>,
    ) -> GcalResult<()> {
        let column = self.wavelength_column().to_string();
        let rule = record
            .get(&column)
            .ok_or_else(|| GcalError::MissingAttribute(column))?;
        let range: WavelengthRange = rule.parse()?;
        self.entries
            .entry(key)
            .or_default()
            .add(range, calibration)
    }

    #[allow(clippy::panic)]
    fn get(&self, _key: &ConfigurationKey) -> Vec<Arc<Calibration>> {
        // This map needs the central wavelength to answer; a key-only lookup
        // is a caller bug, not missing data.
        panic!("central wavelength map requires a wavelength for lookups, use get_at")
    }

    fn get_at(&self, key: &ConfigurationKey, wavelength: i64) -> Vec<Arc<Calibration>> {
        self.entries
            .get(key)
            .map(|ranges| ranges.find_calibrations(wavelength))
            .unwrap_or_default()
    }

    fn export(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_> {
        Box::new(self.entries.iter().flat_map(|(key, ranges)| {
            ranges.entries().flat_map(move |(range, calibrations)| {
                calibrations.iter().map(move |calibration| {
                    let mut row: Vec<String> = key.export().to_vec();
                    row.push(range.to_string());
                    row.extend(calibration.export().iter().cloned());
                    row
                })
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{AttributeDomain, DomainValue};
    use chrono::{TimeZone, Utc};

    fn version() -> Version {
        Version::new(1, Utc.timestamp_opt(1_700_000_000, 0).single().unwrap())
    }

    fn simple_schema() -> KeySchema {
        KeySchema {
            instrument: "Flamingos2".to_string(),
            key_attributes: vec![AttributeDomain::new(
                "Filter",
                vec![DomainValue::new("JH"), DomainValue::new("HK")],
            )],
            wavelength_column: None,
            calibration_attributes: vec!["Lamps".to_string()],
        }
    }

    fn wavelength_schema() -> KeySchema {
        KeySchema {
            wavelength_column: Some("Central Wavelength".to_string()),
            ..simple_schema()
        }
    }

    fn key(filter: &str) -> ConfigurationKey {
        ConfigurationKey::new("Flamingos2", vec![filter.to_string()])
    }

    fn cal(lamps: &str) -> Arc<Calibration> {
        Arc::new(Calibration::new(vec![lamps.to_string()]))
    }

    fn record(filter: &str, range: Option<&str>, lamps: &str) -> Record {
        let mut r = Record::new();
        r.insert("Filter".to_string(), filter.to_string());
        if let Some(range) = range {
            r.insert("Central Wavelength".to_string(), range.to_string());
        }
        r.insert("Lamps".to_string(), lamps.to_string());
        r
    }

    #[test]
    fn test_range_parse_and_containment() {
        let range: WavelengthRange = " 9000 - 25000 ".parse().unwrap();
        assert!(range.contains(9000));
        assert!(range.contains(24999));
        assert!(!range.contains(25000));
        assert!("25000-9000".parse::<WavelengthRange>().is_err());
        assert!("9000".parse::<WavelengthRange>().is_err());
    }

    #[test]
    fn test_simple_map_accumulates_duplicates() {
        let mut map = SimpleCalibrationMap::new(version(), simple_schema());
        let record = record("JH", None, "IR");
        map.put(key("JH"), &record, cal("IR")).unwrap();
        map.put(key("JH"), &record, cal("Ar arc")).unwrap();
        let found = map.get(&key("JH"));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].export(), ["IR"]);
        assert_eq!(found[1].export(), ["Ar arc"]);
        assert!(map.get(&key("HK")).is_empty());
    }

    #[test]
    fn test_wavelength_map_lookup() {
        let mut map = CentralWavelengthMap::new(version(), wavelength_schema());
        map.put(key("JH"), &record("JH", Some("9000-14000"), "IR"), cal("IR"))
            .unwrap();
        map.put(
            key("JH"),
            &record("JH", Some("14000-25000"), "Ar arc"),
            cal("Ar arc"),
        )
        .unwrap();

        assert_eq!(map.get_at(&key("JH"), 10_000)[0].export(), ["IR"]);
        assert_eq!(map.get_at(&key("JH"), 14_000)[0].export(), ["Ar arc"]);
        assert!(map.get_at(&key("JH"), 30_000).is_empty());
        assert!(map.get_at(&key("HK"), 10_000).is_empty());
    }

    #[test]
    fn test_wavelength_map_rejects_overlap() {
        let mut map = CentralWavelengthMap::new(version(), wavelength_schema());
        map.put(key("JH"), &record("JH", Some("9000-14000"), "IR"), cal("IR"))
            .unwrap();
        let err = map
            .put(
                key("JH"),
                &record("JH", Some("12000-16000"), "IR"),
                cal("IR"),
            )
            .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_wavelength_map_same_range_appends() {
        let mut map = CentralWavelengthMap::new(version(), wavelength_schema());
        let r = record("JH", Some("9000-14000"), "IR");
        map.put(key("JH"), &r, cal("IR")).unwrap();
        map.put(key("JH"), &r, cal("Ar arc")).unwrap();
        assert_eq!(map.get_at(&key("JH"), 9_500).len(), 2);
    }

    #[test]
    #[should_panic(expected = "requires a wavelength")]
    fn test_wavelength_map_key_only_get_panics() {
        let map = CentralWavelengthMap::new(version(), wavelength_schema());
        map.get(&key("JH"));
    }

    #[test]
    fn test_export_is_deterministic_and_flat() {
        let mut map = CentralWavelengthMap::new(version(), wavelength_schema());
        map.put(
            key("JH"),
            &record("JH", Some("9000-14000"), "IR"),
            cal("IR"),
        )
        .unwrap();
        map.put(
            key("HK"),
            &record("HK", Some("14000-25000"), "Ar arc"),
            cal("Ar arc"),
        )
        .unwrap();

        let rows: Vec<Vec<String>> = map.export().collect();
        // BTreeMap order: HK before JH
        assert_eq!(rows[0], ["HK", "14000-25000", "Ar arc"]);
        assert_eq!(rows[1], ["JH", "9000-14000", "IR"]);
        let again: Vec<Vec<String>> = map.export().collect();
        assert_eq!(rows, again);
    }
}
