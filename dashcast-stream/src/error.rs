use dashcast_core::TimeoutError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("No capturable target: {0}")]
    NoTarget(String),

    #[error("Page setup failed: {0}")]
    Page(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Browser error: {0}")]
    Browser(String),
}

impl From<reqwest::Error> for CaptureError {
    fn from(err: reqwest::Error) -> Self {
        Self::Browser(err.to_string())
    }
}
