use thiserror::Error;
use traffic_review_client::ServiceError;

use crate::settings::ConfigError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to set up the detection service: {0}")]
    Service(#[from] ServiceError),
    #[error("invalid log filter '{filter}': {message}")]
    LogFilter { filter: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
