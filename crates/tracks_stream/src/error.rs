/// Errors raised while consuming a chat stream
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Network or read failure; the request ends in `Failed`
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A frame's payload was not valid JSON; the frame is dropped
    #[error("Failed to decode '{event}' frame: {source}")]
    Decode {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    /// Reading or writing a chunk recording failed
    #[error("Recording error: {0}")]
    Recording(String),
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        StreamError::Transport(e.to_string())
    }
}
