use futures_util::future::BoxFuture;

use crate::{
    CommandAck, CountingLine, DetectionStats, FrameSnapshot, Health, SeekAck, SeekRequest, ServiceError,
    StreamMetadata, StreamSource,
};

pub type ServiceFuture<'a, T> = BoxFuture<'a, Result<T, ServiceError>>;

/// Remote process that owns authoritative playback state.
///
/// Dropping a returned future abandons the request; the remote side may
/// still process it.
pub trait DetectionService: Send + Sync {
    fn health(&self) -> ServiceFuture<'_, Health>;

    fn start(&self, source: StreamSource) -> ServiceFuture<'_, ()>;

    fn stop(&self) -> ServiceFuture<'_, ()>;

    fn pause(&self) -> ServiceFuture<'_, CommandAck>;

    fn resume(&self) -> ServiceFuture<'_, CommandAck>;

    fn seek(&self, request: SeekRequest) -> ServiceFuture<'_, SeekAck>;

    /// Current annotated frame plus whatever stream metadata is available.
    fn frame(&self) -> ServiceFuture<'_, FrameSnapshot>;

    fn position(&self) -> ServiceFuture<'_, StreamMetadata>;

    fn stats(&self) -> ServiceFuture<'_, DetectionStats>;

    /// `None` when the service has no line configured.
    fn counting_line(&self) -> ServiceFuture<'_, Option<CountingLine>>;

    /// Replacing the line also zeroes the crossing count.
    fn set_counting_line(&self, line: CountingLine) -> ServiceFuture<'_, ()>;

    fn reset_count(&self) -> ServiceFuture<'_, ()>;
}
