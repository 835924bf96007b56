//! Durable local calibration file cache.
//!
//! The cache persists downloaded calibration tables to a directory so a
//! process restart does not depend on the network. It is the only writer of
//! that directory, and every write is staged through a sibling `*.new` file
//! so a crash can never leave a half-written canonical file in place. On
//! startup every cached file is fully validated; files that have been
//! damaged or hand-edited are deleted together with the shared timestamp
//! marker, forcing a fresh download on the next reconciliation cycle. Until
//! that happens, reads fall back to the configured initial-data repository.
//!
//! Directory layout: `<dir>/<instrument>_<TYPE>.csv` (canonical),
//! `<dir>/<instrument>_<TYPE>.new` (staging), `<dir>/timestamp` (shared
//! last-attempt marker).

use crate::calibration::CalibrationType;
use crate::error::GcalResult;
use crate::file::CalibrationFile;
use crate::registry::CalibrationRegistry;
use crate::repository::CalibrationRepository;
use crate::version::Version;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File-system cache for downloaded calibration tables, with a fallback
/// repository for pairs that have not been downloaded yet.
pub struct CalibrationFileCache {
    path: PathBuf,
    registry: Arc<CalibrationRegistry>,
    fallback: Arc<dyn CalibrationRepository>,
}

impl CalibrationFileCache {
    /// Opens (creating if needed) the cache directory and deletes any cached
    /// file that fails validation.
    pub fn new(
        path: impl Into<PathBuf>,
        registry: Arc<CalibrationRegistry>,
        fallback: Arc<dyn CalibrationRepository>,
    ) -> GcalResult<Self> {
        let cache = Self {
            path: path.into(),
            registry,
            fallback,
        };
        log::info!(
            "initializing calibration file cache: {}",
            cache.path.display()
        );
        fs::create_dir_all(&cache.path)?;
        cache.delete_invalid_files();
        Ok(cache)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.path
    }

    fn calibration_file_path(&self, calibration_type: CalibrationType, instrument: &str) -> PathBuf {
        self.path
            .join(format!("{}_{}.csv", instrument, calibration_type))
    }

    fn staging_file_path(&self, calibration_type: CalibrationType, instrument: &str) -> PathBuf {
        self.path
            .join(format!("{}_{}.new", instrument, calibration_type))
    }

    fn timestamp_path(&self) -> PathBuf {
        self.path.join("timestamp")
    }

    /// Checks every cached file and deletes the ones that cannot be read or
    /// that contain bad rows. Deleting the timestamp file alongside makes
    /// sure an update runs as soon as possible.
    fn delete_invalid_files(&self) {
        log::debug!("checking cached files");
        for instrument in self.registry.instrument_names() {
            for calibration_type in self.registry.available_types(instrument) {
                let file = self.calibration_file_path(*calibration_type, instrument);
                if !file.exists() {
                    continue;
                }
                let valid = match CalibrationFile::from_path(&file)
                    .and_then(|parsed| self.registry.validate_file(instrument, &parsed))
                {
                    Ok(errors) if errors.is_empty() => true,
                    Ok(errors) => {
                        log::debug!(
                            "calibration file has errors, first error is: {}",
                            errors[0]
                        );
                        false
                    }
                    Err(e) => {
                        log::debug!("could not read calibration file: {}", e);
                        false
                    }
                };
                if !valid {
                    log::warn!("deleting invalid calibration file: {}", file.display());
                    if let Err(e) = fs::remove_file(&file) {
                        log::warn!("could not delete {}: {}", file.display(), e);
                    }
                    let _ = fs::remove_file(self.timestamp_path());
                }
            }
        }
    }

    /// Installs a newer version of one cached table.
    ///
    /// The new content is written to the staging file first with the version
    /// as its first line, then the old canonical file is deleted and the
    /// staging file renamed into place. A crash between those two steps can
    /// leave no file present, which the next startup or update cycle repairs
    /// by re-downloading; it can never leave a truncated canonical file.
    pub fn update_calibration_file(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
        version: &Version,
        data: &str,
    ) -> GcalResult<()> {
        let canonical = self.calibration_file_path(calibration_type, instrument);
        let staging = self.staging_file_path(calibration_type, instrument);

        // A leftover staging file from an interrupted update must go first.
        match fs::remove_file(&staging) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::error!(
                    "removing stale staging file failed {}: {}",
                    staging.display(),
                    e
                );
                return Err(e.into());
            }
        }

        let mut content = format!("{}\n", version);
        content.push_str(data);
        if !content.ends_with('\n') {
            content.push('\n');
        }
        fs::write(&staging, content)?;

        // renames replace existing files on UNIX but fail on Windows, so the
        // old file is deleted first
        if canonical.exists() {
            if let Err(e) = fs::remove_file(&canonical) {
                log::info!(
                    "removing old calibration file failed {}: {}",
                    canonical.display(),
                    e
                );
            }
        }
        fs::rename(&staging, &canonical)?;
        Ok(())
    }

    /// Records the time of the latest reconciliation attempt.
    pub fn write_update_timestamp(&self) -> GcalResult<()> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        fs::write(self.timestamp_path(), format!("{}\n", now))?;
        Ok(())
    }

    /// The time of the latest reconciliation attempt. Defaults to one year
    /// in the past when the marker is absent or unreadable, which guarantees
    /// an update is attempted soon after a fresh install.
    pub fn last_update_timestamp(&self) -> DateTime<Utc> {
        let fallback = Utc::now() - Duration::days(365);
        let Ok(text) = fs::read_to_string(self.timestamp_path()) else {
            return fallback;
        };
        text.lines()
            .next()
            .and_then(|line| DateTime::parse_from_rfc3339(line.trim()).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(fallback)
    }

    /// Deletes every file in the cache directory (forced full resync).
    pub fn clear(&self) -> GcalResult<()> {
        log::info!("clearing cache");
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CalibrationRepository for CalibrationFileCache {
    async fn calibration_file(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<CalibrationFile> {
        let file = self.calibration_file_path(calibration_type, instrument);
        if file.exists() {
            log::debug!(
                "accessing calibration file from file cache: {}",
                file.display()
            );
            CalibrationFile::from_path(&file)
        } else {
            self.fallback
                .calibration_file(calibration_type, instrument)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{AttributeDomain, DomainValue, KeySchema};
    use crate::repository::BundledRepository;
    use chrono::TimeZone;

    const INSTRUMENT: &str = "Flamingos2";

    fn registry() -> Arc<CalibrationRegistry> {
        let schema = KeySchema {
            instrument: INSTRUMENT.to_string(),
            key_attributes: vec![AttributeDomain::new(
                "Filter",
                vec![DomainValue::new("JH"), DomainValue::new("HK")],
            )],
            wavelength_column: None,
            calibration_attributes: vec!["Lamps".to_string()],
        };
        Arc::new(CalibrationRegistry::new().with_instrument(schema, vec![CalibrationType::Flat]))
    }

    fn version(revision: u32) -> Version {
        Version::new(
            revision,
            Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
        )
    }

    fn bundled() -> Arc<BundledRepository> {
        Arc::new(BundledRepository::new().with_table(
            CalibrationType::Flat,
            INSTRUMENT,
            format!("{}\nFilter,Lamps\nJH,IR\n", version(1)),
        ))
    }

    fn open(dir: &Path) -> CalibrationFileCache {
        CalibrationFileCache::new(dir, registry(), bundled()).unwrap()
    }

    #[tokio::test]
    async fn test_falls_back_until_first_download() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let file = cache
            .calibration_file(CalibrationType::Flat, INSTRUMENT)
            .await
            .unwrap();
        assert_eq!(file.version(), &version(1));
    }

    #[tokio::test]
    async fn test_update_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        cache
            .update_calibration_file(
                CalibrationType::Flat,
                INSTRUMENT,
                &version(2),
                "Filter,Lamps\nHK,Ar arc\n",
            )
            .unwrap();
        let file = cache
            .calibration_file(CalibrationType::Flat, INSTRUMENT)
            .await
            .unwrap();
        assert_eq!(file.version(), &version(2));
        assert_eq!(file.raw_data(), "Filter,Lamps\nHK,Ar arc\n");
    }

    #[tokio::test]
    async fn test_update_replaces_existing_and_removes_stale_staging() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        fs::write(
            dir.path().join(format!("{}_FLAT.new", INSTRUMENT)),
            "leftover from a crash",
        )
        .unwrap();
        cache
            .update_calibration_file(
                CalibrationType::Flat,
                INSTRUMENT,
                &version(2),
                "Filter,Lamps\nJH,IR\n",
            )
            .unwrap();
        cache
            .update_calibration_file(
                CalibrationType::Flat,
                INSTRUMENT,
                &version(3),
                "Filter,Lamps\nHK,IR\n",
            )
            .unwrap();
        assert!(!dir.path().join(format!("{}_FLAT.new", INSTRUMENT)).exists());
        let file = cache
            .calibration_file(CalibrationType::Flat, INSTRUMENT)
            .await
            .unwrap();
        assert_eq!(file.version(), &version(3));
    }

    #[tokio::test]
    async fn test_startup_deletes_corrupt_file_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path());
            cache
                .update_calibration_file(
                    CalibrationType::Flat,
                    INSTRUMENT,
                    &version(2),
                    "Filter,Lamps\nJH,IR\n",
                )
                .unwrap();
            cache.write_update_timestamp().unwrap();
        }
        // corrupt one row by hand
        let canonical = dir.path().join(format!("{}_FLAT.csv", INSTRUMENT));
        fs::write(
            &canonical,
            format!("{}\nFilter,Lamps\nKs,IR\n", version(2)),
        )
        .unwrap();

        let cache = open(dir.path());
        assert!(!canonical.exists());
        assert!(!dir.path().join("timestamp").exists());
        // reads fall back to the bundled data again
        let file = cache
            .calibration_file(CalibrationType::Flat, INSTRUMENT)
            .await
            .unwrap();
        assert_eq!(file.version(), &version(1));
    }

    #[test]
    fn test_timestamp_defaults_to_one_year_ago() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let stale = cache.last_update_timestamp();
        assert!(Utc::now() - stale >= Duration::days(364));

        cache.write_update_timestamp().unwrap();
        let fresh = cache.last_update_timestamp();
        assert!(Utc::now() - fresh < Duration::minutes(1));

        fs::write(dir.path().join("timestamp"), "not a timestamp\n").unwrap();
        assert!(Utc::now() - cache.last_update_timestamp() >= Duration::days(364));
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        cache
            .update_calibration_file(
                CalibrationType::Flat,
                INSTRUMENT,
                &version(2),
                "Filter,Lamps\nJH,IR\n",
            )
            .unwrap();
        cache.write_update_timestamp().unwrap();
        cache.clear().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
