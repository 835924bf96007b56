//! Read-only calibration data sources.
//!
//! A [`CalibrationRepository`] answers two questions for any
//! `(instrument, type)` pair: which [`Version`] is available, and what is
//! the full [`CalibrationFile`]. Three implementations are composed into a
//! fallback chain:
//!
//! - [`BundledRepository`]: data shipped with the deployable artifact,
//!   always available, used as the last-resort default.
//! - [`CalibrationFileCache`](crate::cache::CalibrationFileCache): fast
//!   local reads of previously downloaded files.
//! - [`RemoteRepository`]: network fetch of the authoritative latest data.

pub mod bundled;
pub mod mock;
pub mod remote;

pub use bundled::BundledRepository;
pub use mock::MockRepository;
pub use remote::RemoteRepository;

use crate::calibration::CalibrationType;
use crate::error::GcalResult;
use crate::file::CalibrationFile;
use crate::version::Version;
use async_trait::async_trait;

/// Read-only access to versioned calibration tables.
#[async_trait]
pub trait CalibrationRepository: Send + Sync {
    /// The full calibration file for one `(instrument, type)` pair.
    async fn calibration_file(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<CalibrationFile>;

    /// The available version for one `(instrument, type)` pair.
    ///
    /// The default reads the whole file just to get the version number.
    /// That carries some overhead but is fast enough and simpler than a
    /// dedicated header read; sources that can answer cheaper override it.
    async fn version(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<Version> {
        Ok(self
            .calibration_file(calibration_type, instrument)
            .await?
            .version()
            .clone())
    }
}
