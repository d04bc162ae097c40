use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::{DetectionService, HttpDetectionService, MockDetectionService, MockStream, ServiceError};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Http,
    Mock,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Http => "http",
            Backend::Mock => "mock",
        }
    }

    pub fn available() -> [Backend; 2] {
        [Backend::Http, Backend::Mock]
    }
}

impl FromStr for Backend {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Backend::Http),
            "mock" => Ok(Backend::Mock),
            other => Err(ServiceError::Rejected(format!("unknown backend '{other}'"))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub backend: Backend,
    pub base_url: String,
    pub mock_stream: MockStream,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            backend: Backend::Http,
            base_url: DEFAULT_BASE_URL.to_string(),
            mock_stream: MockStream::default(),
        }
    }
}

impl Configuration {
    pub fn create_service(&self) -> Result<Arc<dyn DetectionService>, ServiceError> {
        match self.backend {
            Backend::Http => Ok(Arc::new(HttpDetectionService::new(self.base_url.clone())?)),
            Backend::Mock => Ok(Arc::new(MockDetectionService::new(self.mock_stream))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for backend in Backend::available() {
            assert_eq!(backend.as_str().parse::<Backend>(), Ok(backend));
        }
        assert_eq!(" MOCK ".parse::<Backend>(), Ok(Backend::Mock));
        assert!("grpc".parse::<Backend>().is_err());
    }
}
