use thiserror::Error;

/// Failures reported by a detection service call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("request to '{url}' failed: {message}")]
    Request { url: String, message: String },
    #[error("request to '{url}' returned status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },
    #[error("detection service rejected the command: {0}")]
    Rejected(String),
    #[error("request aborted")]
    Aborted,
    #[error("invalid response from '{url}': {message}")]
    Decode { url: String, message: String },
}

/// Error string the service (and the local client) use for superseded requests.
pub(crate) const ABORTED_MESSAGE: &str = "aborted";

impl ServiceError {
    /// Maps an error string carried in a response body.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message == ABORTED_MESSAGE {
            Self::Aborted
        } else {
            Self::Rejected(message)
        }
    }

    /// True when the call was superseded rather than failed.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_message_maps_to_benign_variant() {
        assert!(ServiceError::from_message("aborted").is_aborted());
        assert_eq!(
            ServiceError::from_message("No active video stream"),
            ServiceError::Rejected("No active video stream".into())
        );
    }
}
