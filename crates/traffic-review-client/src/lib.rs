mod config;
mod error;
mod http;
mod mock;
mod service;
mod types;

pub use config::{Backend, Configuration, DEFAULT_BASE_URL};
pub use error::ServiceError;
pub use http::HttpDetectionService;
pub use mock::{MockCall, MockDetectionService, MockOp, MockStream};
pub use service::{DetectionService, ServiceFuture};
pub use types::{
    CommandAck, CountingLine, DetectionStats, FrameImage, FrameSnapshot, Health, SeekAck, SeekMode,
    SeekRequest, SpeedStats, StreamMetadata, StreamSource, VehicleCounts,
};
