/// Core error type for the relay.
///
/// Adapter crates should map their transport-specific errors into this type
/// so the engine can handle failures consistently. Delivery never propagates
/// transport errors to the scheduling loop; they are converted to a boolean
/// outcome after logging.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("no chat found for {channel} after {} candidate(s); last error: {last_error}", .attempted.len())]
    ChatResolution {
        channel: String,
        attempted: Vec<String>,
        last_error: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
