//! Error taxonomy for the updater.
//!
//! Configuration errors stop the process before any network activity. Every
//! other variant aborts the branch being processed and is handed to the
//! scheduler, which decides whether it counts toward the error streak.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum UpdaterError {
    /// Parameter file missing, malformed or invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Network failure or a payload that stayed malformed after every attempt
    #[error("Download error for {address}: {message}")]
    Download { address: String, message: String },

    /// Body that could not be parsed as an iCalendar document
    #[error("Malformed calendar: {0}")]
    MalformedCalendar(String),

    /// Calendar entry lacking one of the mandatory properties
    #[error("Invalid event {uid}: {message}")]
    Extraction { uid: String, message: String },

    /// Upsert, history append or archive move failed
    #[error("Database error: {0}")]
    Database(#[from] StoreError),

    /// Anything not classified above
    #[error("Unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl UpdaterError {
    pub fn download(address: impl Into<String>, message: impl Into<String>) -> Self {
        UpdaterError::Download {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn extraction(uid: impl Into<String>, message: impl Into<String>) -> Self {
        UpdaterError::Extraction {
            uid: uid.into(),
            message: message.into(),
        }
    }

    pub fn is_download(&self) -> bool {
        matches!(self, UpdaterError::Download { .. })
    }

    /// Download failures are expected to clear up by the next pass and
    /// neither count toward nor reset the streak.
    pub fn counts_toward_streak(&self) -> bool {
        !self.is_download()
    }
}

pub type UpdaterResult<T> = Result<T, UpdaterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_does_not_count_toward_streak() {
        let err = UpdaterError::download("https://example.com/a.ics", "connection refused");
        assert!(err.is_download());
        assert!(!err.counts_toward_streak());
        assert_eq!(
            err.to_string(),
            "Download error for https://example.com/a.ics: connection refused"
        );
    }

    #[test]
    fn test_other_errors_count_toward_streak() {
        let err = UpdaterError::from(StoreError::Backend("write refused".to_string()));
        assert!(err.counts_toward_streak());

        let err = UpdaterError::from(anyhow::anyhow!("boom"));
        assert!(err.counts_toward_streak());
        assert_eq!(err.to_string(), "Unexpected error: boom");
    }
}
