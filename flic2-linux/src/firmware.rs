//! Firmware update lookup against the vendor's HTTP service.

use std::time::Duration;

use flic2_core::FirmwareCheck;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const MAX_IMAGE_LEN: usize = 256 * 1024;

const RETRY_HTTP_STATUS_MINUTES: u32 = 60;
const RETRY_NO_UPDATE_MINUTES: u32 = 24 * 60;
const RETRY_IO_ERROR_MINUTES: u32 = 2 * 60;
const RETRY_AFTER_DOWNLOAD_MINUTES: u32 = 20;

#[derive(Serialize)]
struct CheckRequest<'a> {
    uuid: &'a str,
    current_version: u32,
    platform: &'static str,
    lib_version: &'static str,
}

#[derive(Deserialize)]
struct CheckResponse {
    firmware_download_url: String,
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("image larger than {MAX_IMAGE_LEN} bytes")]
    TooLarge,
}

fn no_update(retry_minutes: u32) -> FirmwareCheck {
    FirmwareCheck {
        image: None,
        retry_minutes,
    }
}

/// Download URL from a check response. `null` and malformed bodies mean no update.
fn download_url(body: &str) -> Option<String> {
    serde_json::from_str::<Option<CheckResponse>>(body)
        .ok()
        .flatten()
        .map(|r| r.firmware_download_url)
}

pub struct FirmwareClient {
    http: reqwest::Client,
    url: String,
}

impl FirmwareClient {
    pub fn new(url: &str) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    /// Never fails: errors become a retry time.
    pub async fn check(&self, uuid: &str, current_version: u32) -> FirmwareCheck {
        match self.fetch(uuid, current_version).await {
            Ok(check) => check,
            Err(e) => {
                log::warn!("firmware check for {uuid}: {e}");
                no_update(RETRY_IO_ERROR_MINUTES)
            }
        }
    }

    async fn fetch(&self, uuid: &str, current_version: u32) -> Result<FirmwareCheck, FetchError> {
        let body = serde_json::to_vec(&CheckRequest {
            uuid,
            current_version,
            platform: "linux",
            lib_version: env!("CARGO_PKG_VERSION"),
        })?;
        let resp = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        if resp.status() != StatusCode::OK {
            log::debug!("firmware check for {uuid}: http {}", resp.status());
            return Ok(no_update(RETRY_HTTP_STATUS_MINUTES));
        }
        let Some(url) = download_url(&resp.text().await?) else {
            return Ok(no_update(RETRY_NO_UPDATE_MINUTES));
        };

        let mut resp = self.http.get(&url).send().await?.error_for_status()?;
        let mut image = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if image.len() + chunk.len() > MAX_IMAGE_LEN {
                return Err(FetchError::TooLarge);
            }
            image.extend_from_slice(&chunk);
        }
        log::info!("firmware image for {uuid}: {} bytes", image.len());
        Ok(FirmwareCheck {
            image: Some(image),
            retry_minutes: RETRY_AFTER_DOWNLOAD_MINUTES,
        })
    }
}
