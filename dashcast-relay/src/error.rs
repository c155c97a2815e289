use thiserror::Error;

/// Envelope errors. Relay operations themselves never fail towards the sender.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("signaling payload has no \"type\" field")]
    MissingType,

    #[error("unknown signaling payload type: {0}")]
    UnknownType(String),

    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}
