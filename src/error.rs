use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No response from {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Server answered {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unexpected response envelope: {0}")]
    Envelope(String),
}

impl ApiError {
    pub fn network(url: &str, err: &reqwest::Error) -> Self {
        ApiError::Network {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}
