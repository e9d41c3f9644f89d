use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// The device answers on its local API within this window or the poll is failed
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("AccessType {0} is not supported")]
    UnsupportedAccessType(String),
    #[error("no Host configured for on-premise access")]
    MissingHost,
    #[error("no response from HomeWizard - {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HomeWizard answered with HTTP {status} - {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("empty response from HomeWizard - {0}")]
    EmptyResponse(String),
    #[error("converting response to JSON failed: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("HomeWizard returned an empty JSON document")]
    EmptyDocument,
    #[error("response is not a usable reading: {0}")]
    InvalidReading(#[source] serde_json::Error),
}

impl FetchError {
    /// True when the failure comes from configuration rather than the network or the device
    pub fn is_unsupported_config(&self) -> bool {
        matches!(
            self,
            FetchError::UnsupportedAccessType(_) | FetchError::MissingHost
        )
    }
}

/// One snapshot of `/api/v1/data`
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(rename = "active_voltage_v")]
    pub active_voltage: f64,
    #[serde(rename = "active_current_a")]
    pub active_current: f64,
    #[serde(rename = "active_power_w")]
    pub active_power: f64,
    #[serde(rename = "total_power_import_kwh")]
    pub total_import_kwh: f64,
    #[serde(rename = "total_power_export_kwh")]
    pub total_export_kwh: f64,
}

impl DeviceReading {
    pub fn from_document(document: serde_json::Value) -> Result<Self, FetchError> {
        serde_json::from_value(document).map_err(FetchError::InvalidReading)
    }
}

/// Thin client for the HomeWizard local HTTP API
#[derive(Clone)]
pub struct HomeWizardAPI {
    client: reqwest::Client,
}

impl HomeWizardAPI {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// GETs `url` and returns the decoded, non-empty JSON document
    pub async fn read_document(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let request_failed = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(request_failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.text().await.map_err(request_failed)?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyResponse(url.to_string()));
        }

        let document: serde_json::Value =
            serde_json::from_str(&body).map_err(FetchError::InvalidJson)?;
        if is_empty_document(&document) {
            return Err(FetchError::EmptyDocument);
        }
        Ok(document)
    }
}

fn is_empty_document(document: &serde_json::Value) -> bool {
    match document {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
