//! Remote calibration service client.
//!
//! Speaks the calibration service's query protocol: HTTP GET against a
//! service root with `command=versions` for the current version of a table
//! and `command=download&versioned=true` for the full versioned table text.
//! Any non-success response or transport failure surfaces as an error; no
//! retry happens at this layer, the updater's next cycle is the retry.

use crate::calibration::CalibrationType;
use crate::config::RemoteSettings;
use crate::error::{GcalError, GcalResult};
use crate::file::CalibrationFile;
use crate::repository::CalibrationRepository;
use crate::version::Version;
use async_trait::async_trait;
use std::time::Duration;

/// HTTP client for the authoritative calibration service.
#[derive(Debug, Clone)]
pub struct RemoteRepository {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteRepository {
    /// Builds a client for the configured service endpoint. The request
    /// timeout bounds every call so one unreachable service instance cannot
    /// starve a reconciliation cycle.
    pub fn new(settings: &RemoteSettings) -> GcalResult<Self> {
        Self::with_base_url(settings.service_url(), settings.request_timeout)
    }

    /// Builds a client against an explicit service root, e.g.
    /// `http://gsodb:8443/gcal`.
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> GcalResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn get(
        &self,
        command: &str,
        calibration_type: CalibrationType,
        instrument: &str,
        versioned: bool,
    ) -> GcalResult<String> {
        let mut url = format!(
            "{}?command={}&type={}&instrument={}",
            self.base_url, command, calibration_type, instrument
        );
        if versioned {
            url.push_str("&versioned=true");
        }
        log::debug!("requesting {}", url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(GcalError::RemoteStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl CalibrationRepository for RemoteRepository {
    async fn version(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<Version> {
        let body = self
            .get("versions", calibration_type, instrument, false)
            .await?;
        // Response is a line of the form "...=<version>"; the version
        // parser discards everything up to the last '='.
        let line = body
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| {
                GcalError::Format(format!(
                    "empty versions response for {} {}",
                    instrument, calibration_type
                ))
            })?;
        line.parse()
    }

    async fn calibration_file(
        &self,
        calibration_type: CalibrationType,
        instrument: &str,
    ) -> GcalResult<CalibrationFile> {
        let body = self
            .get("download", calibration_type, instrument, true)
            .await?;
        CalibrationFile::parse(&body)
    }
}
