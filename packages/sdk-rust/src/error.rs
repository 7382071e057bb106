use thiserror::Error;

pub type SdkResult<T> = Result<T, SdkError>;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// An action needed a live broker session and there was none
    #[error("Not connected (state: {state})")]
    NotConnected { state: crate::signaling::ConnectionState },

    #[error("STOMP protocol error: {0}")]
    Protocol(String),

    #[error("Signaling client has shut down")]
    ClientClosed,
}

impl SdkError {
    /// True for the precondition failure returned by actions issued while offline
    pub fn is_not_connected(&self) -> bool {
        matches!(self, SdkError::NotConnected { .. })
    }
}
