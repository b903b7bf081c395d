use reqwest::Client;
use std::time::Duration;

use crate::error::{UpdaterError, UpdaterResult};
use crate::extractor::{parse_calendar, SourceEvent};

/// Attempts per address before a malformed payload becomes a download error
pub const MAX_DOWNLOAD_ATTEMPTS: u32 = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches calendar feeds over HTTP(S).
///
/// Connection failures and error statuses are reported at once. A body that
/// is not a calendar is fetched again, up to [`MAX_DOWNLOAD_ATTEMPTS`] times:
/// some feed servers answer with an HTML maintenance page for a few seconds.
#[derive(Debug, Clone)]
pub struct CalendarDownloader {
    client: Client,
    max_attempts: u32,
}

impl CalendarDownloader {
    pub fn new() -> UpdaterResult<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> UpdaterResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("planning-updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdaterError::Unexpected(e.into()))?;

        Ok(Self {
            client,
            max_attempts: MAX_DOWNLOAD_ATTEMPTS,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Raw body of `address`, without any validation.
    pub async fn fetch_text(&self, address: &str) -> UpdaterResult<String> {
        let response = self
            .client
            .get(address)
            .send()
            .await
            .map_err(|e| UpdaterError::download(address, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdaterError::download(
                address,
                format!("server answered {}", status),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| UpdaterError::download(address, e.to_string()))
    }

    /// Download `address` and parse it, retrying while the payload is malformed.
    pub async fn fetch_calendar(&self, address: &str) -> UpdaterResult<Vec<SourceEvent>> {
        let mut attempts = 0;

        while attempts < self.max_attempts {
            let body = self.fetch_text(address).await?;
            match parse_calendar(&body) {
                Ok(events) => return Ok(events),
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        "Failed to download a calendar file from {} ({}/{}): {}",
                        address,
                        attempts,
                        self.max_attempts,
                        e
                    );
                }
            }
        }

        Err(UpdaterError::download(
            address,
            format!("no valid calendar after {} attempts", self.max_attempts),
        ))
    }
}
