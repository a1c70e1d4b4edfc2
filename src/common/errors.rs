use thiserror::Error;

/// Maximum response body size accepted from the FC2 HTTP API (16 MB).
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Errors surfaced by the resolver pipeline.
///
/// Negotiation errors are raised before any control socket is opened;
/// control-channel errors are raised after the socket has been closed.
#[derive(Debug, Error)]
pub enum Fc2Error {
    #[error("Unsupported URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status} for {url}")]
    Http {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Unexpected response shape: {0}")]
    Validation(String),

    #[error("A login is required for this stream")]
    LoginRequired,

    #[error("Only streams without a fee are supported")]
    FeeRequired,

    #[error("The broadcaster is currently not available")]
    Unavailable,

    #[error("No media server was granted after {messages} control messages")]
    Timeout { messages: u32 },

    #[error("Malformed control message: {0}")]
    Protocol(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Fc2Error>;

impl From<reqwest::Error> for Fc2Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for Fc2Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Fc2Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<toml::de::Error> for Fc2Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Check the HTTP status before reading the body.
pub fn check_response(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(Fc2Error::Http {
            status,
            url: resp.url().to_string(),
        });
    }
    Ok(resp)
}

/// Read a response body with a size limit and deserialize it as JSON.
pub async fn json_with_limit<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T> {
    if let Some(len) = resp.content_length() {
        if len as usize > MAX_RESPONSE_SIZE {
            return Err(Fc2Error::Validation(format!(
                "response too large ({} bytes)",
                len
            )));
        }
    }
    let bytes = resp.bytes().await?;
    if bytes.len() > MAX_RESPONSE_SIZE {
        return Err(Fc2Error::Validation(format!(
            "response too large ({} bytes)",
            bytes.len()
        )));
    }
    serde_json::from_slice(&bytes).map_err(Into::into)
}
