//! In-memory repository for tests and dry runs.

use crate::calibration::CalibrationType;
use crate::error::{GcalError, GcalResult};
use crate::file::CalibrationFile;
use crate::repository::CalibrationRepository;
use crate::version::Version;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A repository whose contents are set directly, with per-pair failure
/// injection and a download counter for asserting update behavior.
#[derive(Debug, Default)]
pub struct MockRepository {
    files: Mutex<HashMap<(CalibrationType, String), CalibrationFile>>,
    failing: Mutex<HashSet<(CalibrationType, String)>>,
    downloads: AtomicUsize,
    delay: Mutex<Duration>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artificial delay to every request, for exercising in-flight
    /// cycle behavior.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    async fn apply_delay(&self) {
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn set_file(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
        file: CalibrationFile,
    ) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((calibration_type, instrument.to_string()), file);
    }

    /// Makes every request for the pair fail with an I/O error until reset.
    pub fn set_failing(&self, calibration_type: CalibrationType, instrument: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        let pair = (calibration_type, instrument.to_string());
        if failing {
            set.insert(pair);
        } else {
            set.remove(&pair);
        }
    }

    /// How many full files have been fetched.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn check_failing(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<()> {
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(calibration_type, instrument.to_string()));
        if failing {
            return Err(GcalError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "simulated repository failure",
            )));
        }
        Ok(())
    }

    fn lookup(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<CalibrationFile> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(calibration_type, instrument.to_string()))
            .cloned()
            .ok_or_else(|| GcalError::NoData {
                instrument: instrument.to_string(),
                calibration_type,
            })
    }
}

#[async_trait]
impl CalibrationRepository for MockRepository {
    async fn version(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<Version> {
        self.apply_delay().await;
        self.check_failing(calibration_type, instrument)?;
        Ok(self
            .lookup(calibration_type, instrument)?
            .version()
            .clone())
    }

    async fn calibration_file(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<CalibrationFile> {
        self.apply_delay().await;
        self.check_failing(calibration_type, instrument)?;
        let file = self.lookup(calibration_type, instrument)?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_counts_downloads_but_not_version_checks() {
        let repository = MockRepository::new();
        let version = Version::new(1, Utc.timestamp_opt(1_700_000_000, 0).single().unwrap());
        repository.set_file(
            CalibrationType::Flat,
            "Flamingos2",
            CalibrationFile::new(version, "Filter,Lamps\nJH,IR\n"),
        );

        repository
            .version(CalibrationType::Flat, "Flamingos2")
            .await
            .unwrap();
        assert_eq!(repository.download_count(), 0);
        repository
            .calibration_file(CalibrationType::Flat, "Flamingos2")
            .await
            .unwrap();
        assert_eq!(repository.download_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let repository = MockRepository::new();
        repository.set_failing(CalibrationType::Flat, "Flamingos2", true);
        assert!(repository
            .version(CalibrationType::Flat, "Flamingos2")
            .await
            .is_err());
        repository.set_failing(CalibrationType::Flat, "Flamingos2", false);
        assert!(matches!(
            repository
                .version(CalibrationType::Flat, "Flamingos2")
                .await
                .unwrap_err(),
            GcalError::NoData { .. }
        ));
    }
}
