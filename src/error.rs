//! Custom error types for the calibration engine.
//!
//! This module defines the primary error type, `GcalError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from I/O and configuration issues to calibration rule problems.
//!
//! ## Error Hierarchy
//!
//! `GcalError` is an enum that consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from the `config` crate, typically related to
//!   file parsing or format issues in the configuration files.
//! - **`Configuration`**: Represents semantic errors in the configuration,
//!   such as values that parse but are logically incorrect.
//! - **`MissingAttribute` / `NoMatchingValue` / `Pattern`**: Rule-expansion
//!   errors raised while turning one calibration definition row into the set
//!   of configuration keys it denotes. These are surfaced synchronously to
//!   whoever loads a definition file; a row that fails to expand is never
//!   silently dropped.
//! - **`Format`**: Malformed textual data such as version strings, wavelength
//!   ranges or table rows.
//! - **`Io` / `Http` / `RemoteStatus`**: File system and network failures.
//!   During a reconciliation cycle these are caught per instrument/type pair
//!   and recorded as "failed" rather than aborting the cycle.
//!
//! By using `#[from]`, `GcalError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the crate with the `?`
//! operator.

use crate::calibration::CalibrationType;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type GcalResult<T> = std::result::Result<T, GcalError>;

#[derive(Error, Debug)]
pub enum GcalError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("value for '{0}' is missing")]
    MissingAttribute(String),

    #[error("no value of '{attribute}' matches '{rule}'")]
    NoMatchingValue { attribute: String, rule: String },

    #[error("invalid pattern for '{attribute}': {source}")]
    Pattern {
        attribute: String,
        #[source]
        source: regex::Error,
    },

    #[error("Format error: {0}")]
    Format(String),

    #[error("no calibration data for {instrument} {calibration_type}")]
    NoData {
        instrument: String,
        calibration_type: CalibrationType,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("calibration service returned {status} for {url}")]
    RemoteStatus { status: u16, url: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("calibration updater has not been started")]
    UpdaterNotStarted,
}
