use crate::ids::KettleId;

/// A drinker frame that could not be decoded into a command.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("`Method` must be a string")]
    InvalidMethod,
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

/// Failures talking to a kettle through its handle.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KettleError {
    /// The kettle's command loop has terminated; its queue no longer accepts commands.
    #[error("kettle {0} is closed")]
    Closed(KettleId),
    #[error("kettle {0} not found")]
    NotFound(KettleId),
}

impl KettleError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Closed(_) => "closed",
            Self::NotFound(_) => "not_found",
        }
    }
}
