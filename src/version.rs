//! Calibration dataset versions.
//!
//! A [`Version`] identifies one snapshot of a calibration table as a
//! `(revision, timestamp)` pair. Versions are totally ordered by revision and
//! then timestamp, which is what the updater uses to decide whether the
//! remote service holds newer data than the local cache. The textual form is
//! written as the first line of every cached calibration file and must
//! round-trip exactly.

use crate::error::{GcalError, GcalResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a calibration dataset snapshot.
///
/// Ordered by revision first, timestamp second. The textual round-trip
/// format is `rev=<n> <rfc3339-timestamp>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    revision: u32,
    timestamp: DateTime<Utc>,
}

impl Version {
    /// Creates a version from a revision number and a timestamp.
    pub fn new(revision: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            revision,
            timestamp,
        }
    }

    /// The revision number of this snapshot.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// The time this snapshot was published.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rev={} {}",
            self.revision,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

impl FromStr for Version {
    type Err = GcalError;

    /// Parses a version string.
    ///
    /// The canonical form is `rev=<n> <timestamp>`. Anything up to and
    /// including the last `=` is discarded first, which also makes this
    /// parser accept the `...=<version>` lines returned by the remote
    /// service's `versions` command.
    fn from_str(s: &str) -> GcalResult<Self> {
        let s = s.trim();
        let body = match s.rfind('=') {
            Some(i) => &s[i + 1..],
            None => s,
        };
        let (revision, timestamp) = body
            .trim()
            .split_once(' ')
            .ok_or_else(|| GcalError::Format(format!("malformed version '{}'", s)))?;
        let revision = revision
            .parse::<u32>()
            .map_err(|_| GcalError::Format(format!("malformed version revision '{}'", s)))?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp.trim())
            .map_err(|e| GcalError::Format(format!("malformed version timestamp '{}': {}", s, e)))?
            .with_timezone(&Utc);
        Ok(Self {
            revision,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_round_trip() {
        let version = Version::new(17, at(1_700_000_000));
        let parsed: Version = version.to_string().parse().unwrap();
        assert_eq!(version, parsed);
    }

    #[test]
    fn test_parses_service_response_line() {
        let version: Version = "version=3 2024-05-01T12:00:00Z".parse().unwrap();
        assert_eq!(version.revision(), 3);
    }

    #[test]
    fn test_ordering() {
        let older = Version::new(1, at(2_000));
        let newer_rev = Version::new(2, at(1_000));
        let newer_time = Version::new(1, at(3_000));
        assert!(newer_rev > older);
        assert!(newer_time > older);
        assert!(newer_rev > newer_time);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("not a version".parse::<Version>().is_err());
        assert!("rev=x 2024-05-01T12:00:00Z".parse::<Version>().is_err());
        assert!("rev=1 yesterday".parse::<Version>().is_err());
    }
}
