//! Instrument configuration key spaces.
//!
//! Every instrument declares its key space as an ordered list of named
//! attribute domains ([`KeySchema`]). One row of a calibration definition
//! file carries a *rule* per attribute (exact value, `prefix*` wildcard or
//! `$regex`), and expanding those rules over the domains produces the set of
//! concrete [`ConfigurationKey`]s the row applies to. A single compact rule
//! row commonly expands to thousands of keys for instruments with many
//! binning/gain/filter combinations.
//!
//! Schemas are plain data and deserialize from TOML, so adding an instrument
//! means shipping a description file rather than writing code.

use crate::error::{GcalError, GcalResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One raw definition row: attribute name to rule/value string.
pub type Record = HashMap<String, String>;

/// A single legal value of an attribute domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainValue {
    /// Display form, as it appears in definition files and lookups.
    pub value: String,
    /// Obsolete values are kept for historical data but never match rules.
    #[serde(default)]
    pub obsolete: bool,
}

impl DomainValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            obsolete: false,
        }
    }

    pub fn obsolete(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            obsolete: true,
        }
    }
}

/// A named attribute and the ordered set of values it may take.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDomain {
    pub name: String,
    pub values: Vec<DomainValue>,
}

impl AttributeDomain {
    pub fn new(name: impl Into<String>, values: Vec<DomainValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Expands one rule string into the matching subset of this domain.
    ///
    /// Precedence: a leading `$` makes the remainder a regex tested against
    /// each value, a trailing `*` makes the rule a case-insensitive prefix
    /// test, anything else is a case-insensitive exact match that stops at
    /// the first hit. Obsolete values never match. An empty result is an
    /// error: a rule that matches nothing indicates a stale definition file.
    pub fn matching_values(&self, rule: &str) -> GcalResult<Vec<&str>> {
        let rule = rule.trim();
        let matched: Vec<&str> = if let Some(pattern) = rule.strip_prefix('$') {
            let re = Regex::new(pattern).map_err(|source| GcalError::Pattern {
                attribute: self.name.clone(),
                source,
            })?;
            self.current_values()
                .filter(|v| re.is_match(v))
                .collect()
        } else if let Some(prefix) = rule.strip_suffix('*') {
            let prefix = prefix.to_lowercase();
            self.current_values()
                .filter(|v| v.to_lowercase().starts_with(&prefix))
                .collect()
        } else {
            let rule_lower = rule.to_lowercase();
            self.current_values()
                .find(|v| v.to_lowercase() == rule_lower)
                .into_iter()
                .collect()
        };

        if matched.is_empty() {
            return Err(GcalError::NoMatchingValue {
                attribute: self.name.clone(),
                rule: rule.to_string(),
            });
        }
        Ok(matched)
    }

    fn current_values(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter(|v| !v.obsolete)
            .map(|v| v.value.as_str())
    }
}

/// Declarative description of one instrument's key space.
///
/// Orders matter throughout: key attributes define both the lookup-key tuple
/// order and the leading table columns, and `calibration_attributes` name the
/// trailing columns. Wavelength-sensitive instruments name the extra range
/// column between the two.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub instrument: String,
    pub key_attributes: Vec<AttributeDomain>,
    #[serde(default)]
    pub wavelength_column: Option<String>,
    pub calibration_attributes: Vec<String>,
}

impl KeySchema {
    /// The ordered key attribute names.
    pub fn key_attribute_names(&self) -> Vec<String> {
        self.key_attributes.iter().map(|a| a.name.clone()).collect()
    }

    /// Every column of a table row for this instrument, in order.
    pub fn column_names(&self) -> Vec<String> {
        let mut columns = self.key_attribute_names();
        if let Some(wavelength) = &self.wavelength_column {
            columns.push(wavelength.clone());
        }
        columns.extend(self.calibration_attributes.iter().cloned());
        columns
    }

    /// True if rows carry a wavelength-range column.
    pub fn is_wavelength_sensitive(&self) -> bool {
        self.wavelength_column.is_some()
    }

    /// Expands one rule record into the full set of configuration keys it
    /// denotes: the Cartesian product of each attribute's matched values.
    pub fn expand(&self, record: &Record) -> GcalResult<Vec<ConfigurationKey>> {
        let mut tuples: Vec<Vec<String>> = vec![Vec::with_capacity(self.key_attributes.len())];
        for attribute in &self.key_attributes {
            let rule = record
                .get(&attribute.name)
                .ok_or_else(|| GcalError::MissingAttribute(attribute.name.clone()))?;
            let matched = attribute.matching_values(rule)?;
            let mut expanded = Vec::with_capacity(tuples.len() * matched.len());
            for tuple in &tuples {
                for value in &matched {
                    let mut next = tuple.clone();
                    next.push((*value).to_string());
                    expanded.push(next);
                }
            }
            tuples = expanded;
        }
        Ok(tuples
            .into_iter()
            .map(|values| ConfigurationKey::new(self.instrument.clone(), values))
            .collect())
    }
}

/// An exact-value lookup key: one concrete domain value per key attribute.
///
/// Keys are immutable with structural equality and hashing. They never hold
/// wildcards; the wildcard/regex *rules* live only in definition files and
/// are expanded away by [`KeySchema::expand`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigurationKey {
    instrument: String,
    values: Vec<String>,
}

impl ConfigurationKey {
    pub fn new(instrument: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            instrument: instrument.into(),
            values,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// The ordered concrete values, suitable for serialization.
    pub fn export(&self) -> &[String] {
        &self.values
    }
}
