//! Calibration table reader.
//!
//! Feeds the body of a [`CalibrationFile`](crate::file::CalibrationFile) into
//! a [`CalibrationMap`], row by row. A malformed row never aborts the load:
//! every failure is accumulated as a `"line N: message"` entry and the caller
//! decides what a non-empty error list means. The file cache treats any
//! error as "invalid file"; the store keeps the rows that did parse.

use crate::keys::Record;
use crate::maps::CalibrationMap;
use std::collections::HashSet;

/// Reads definition rows into a map, accumulating row-level errors.
pub struct CalibrationMapReader<'a> {
    map: &'a mut dyn CalibrationMap,
    errors: Vec<String>,
}

impl<'a> CalibrationMapReader<'a> {
    pub fn new(map: &'a mut dyn CalibrationMap) -> Self {
        Self {
            map,
            errors: Vec::new(),
        }
    }

    /// Parses the table body: a header row naming every column, then one
    /// CSV row per entry. `#` lines and blank lines are skipped. The header
    /// must carry every schema column exactly once; if it does not, reading
    /// stops after the header since rows could not be zipped reliably.
    pub fn read(&mut self, data: &str) {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(data.as_bytes());

        let mut header: Option<Vec<String>> = None;
        for result in csv_reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    self.errors.push(format!("unreadable row: {}", e));
                    continue;
                }
            };
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            match &header {
                None => {
                    let columns: Vec<String> =
                        record.iter().map(|field| field.to_string()).collect();
                    if !self.check_header(&columns) {
                        return;
                    }
                    header = Some(columns);
                }
                Some(columns) => self.read_row(line, columns, &record),
            }
        }

        if header.is_none() {
            self.errors.push("table has no header row".to_string());
        }
    }

    fn check_header(&mut self, columns: &[String]) -> bool {
        let expected = self.map.schema().column_names();
        if columns.len() != expected.len() {
            self.errors.push(format!(
                "header has {} columns, expected {}",
                columns.len(),
                expected.len()
            ));
        }
        let mut seen = HashSet::new();
        for column in columns {
            if !seen.insert(column.as_str()) {
                self.errors.push(format!("duplicate column '{}'", column));
            }
        }
        for column in &expected {
            if !columns.contains(column) {
                self.errors.push(format!("missing column '{}'", column));
            }
        }
        self.errors.is_empty()
    }

    fn read_row(&mut self, line: u64, columns: &[String], record: &csv::StringRecord) {
        if record.len() != columns.len() {
            self.errors.push(format!(
                "line {}: expected {} columns, found {}",
                line,
                columns.len(),
                record.len()
            ));
            return;
        }
        let record: Record = columns
            .iter()
            .cloned()
            .zip(record.iter().map(|field| field.to_string()))
            .collect();
        if let Err(e) = self.put_row(&record) {
            self.errors.push(format!("line {}: {}", line, e));
        }
    }

    fn put_row(&mut self, record: &Record) -> crate::error::GcalResult<()> {
        let keys = self.map.create_config(record)?;
        let calibration = self.map.create_calibration(record)?;
        for key in keys {
            self.map.put(key, record, calibration.clone())?;
        }
        Ok(())
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }
}
