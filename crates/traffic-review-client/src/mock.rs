//! In-process stand-in for the detection service.
//!
//! Simulates a file-backed stream: the position advances with (tokio) time
//! while the stream is running, seeks clamp to the stream bounds, and every
//! frame encodes the position it was taken at. Knobs let tests slow calls
//! down or make the service misbehave in the ways the real one does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::service::{DetectionService, ServiceFuture};
use crate::{
    CommandAck, CountingLine, DetectionStats, FrameImage, FrameSnapshot, Health, SeekAck, SeekMode,
    SeekRequest, ServiceError, StreamMetadata, StreamSource,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MockStream {
    pub total_frames: u64,
    pub fps: f64,
    /// Advance the position with elapsed time while playing.
    pub advance_while_playing: bool,
}

impl Default for MockStream {
    fn default() -> Self {
        Self {
            total_frames: 1800,
            fps: 30.0,
            advance_while_playing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Health,
    Start(StreamSource),
    Stop,
    Pause,
    Resume,
    Seek(SeekRequest),
    Frame,
    Position,
    Stats,
    CountingLine,
    SetCountingLine(CountingLine),
    ResetCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Health,
    Start,
    Stop,
    Pause,
    Resume,
    Seek,
    Frame,
    Position,
    Stats,
    CountingLine,
    SetCountingLine,
    ResetCount,
}

impl MockCall {
    pub fn op(&self) -> MockOp {
        match self {
            MockCall::Health => MockOp::Health,
            MockCall::Start(_) => MockOp::Start,
            MockCall::Stop => MockOp::Stop,
            MockCall::Pause => MockOp::Pause,
            MockCall::Resume => MockOp::Resume,
            MockCall::Seek(_) => MockOp::Seek,
            MockCall::Frame => MockOp::Frame,
            MockCall::Position => MockOp::Position,
            MockCall::Stats => MockOp::Stats,
            MockCall::CountingLine => MockOp::CountingLine,
            MockCall::SetCountingLine(_) => MockOp::SetCountingLine,
            MockCall::ResetCount => MockOp::ResetCount,
        }
    }
}

struct MockState {
    stream: MockStream,
    detecting: bool,
    paused: bool,
    anchor_position: u64,
    anchor_at: Instant,
    calls: Vec<MockCall>,
    latency: HashMap<MockOp, Duration>,
    seek_error: Option<String>,
    stall_seeks: bool,
    sticky_pause: bool,
    ignore_pause: bool,
    frame_available: bool,
    counting_line: Option<CountingLine>,
    /// Vehicles seen before the last count reset.
    counted_before_reset: u64,
}

impl MockState {
    fn position_at(&self, now: Instant) -> u64 {
        let mut position = self.anchor_position;
        if self.detecting && !self.paused && self.stream.advance_while_playing {
            let elapsed = now.saturating_duration_since(self.anchor_at).as_secs_f64();
            position = position.saturating_add((elapsed * self.stream.fps).floor() as u64);
        }
        self.clamp(position)
    }

    fn clamp(&self, position: u64) -> u64 {
        if self.stream.total_frames > 0 {
            position.min(self.stream.total_frames - 1)
        } else {
            position
        }
    }

    fn rebase(&mut self, now: Instant) {
        self.anchor_position = self.position_at(now);
        self.anchor_at = now;
    }

    fn metadata(&self, position: u64) -> StreamMetadata {
        let fps = self.stream.fps;
        StreamMetadata {
            position: Some(position),
            total_frames: Some(self.stream.total_frames),
            fps: Some(fps),
            duration_seconds: (fps > 0.0).then(|| self.stream.total_frames as f64 / fps),
        }
    }

    /// One vehicle every two seconds of footage.
    fn vehicles_seen(&self, position: u64) -> u64 {
        if self.stream.fps > 0.0 {
            (position as f64 / self.stream.fps / 2.0).floor() as u64
        } else {
            0
        }
    }

    fn reset_count(&mut self) {
        let position = self.position_at(Instant::now());
        self.counted_before_reset = self.vehicles_seen(position);
    }

    fn require_stream(&self) -> Result<(), ServiceError> {
        if self.detecting {
            Ok(())
        } else {
            Err(ServiceError::Rejected("No active video stream".into()))
        }
    }
}

/// Simulated detection service.
#[derive(Clone)]
pub struct MockDetectionService {
    state: Arc<Mutex<MockState>>,
}

impl MockDetectionService {
    pub fn new(stream: MockStream) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                stream,
                detecting: false,
                paused: false,
                anchor_position: 0,
                anchor_at: Instant::now(),
                calls: Vec::new(),
                latency: HashMap::new(),
                seek_error: None,
                stall_seeks: false,
                sticky_pause: false,
                ignore_pause: false,
                frame_available: true,
                counting_line: Some(CountingLine::new([100, 300], [500, 300])),
                counted_before_reset: 0,
            })),
        }
    }

    /// A service that already has a playing stream session.
    pub fn running(stream: MockStream) -> Self {
        let service = Self::new(stream);
        {
            let mut state = service.state.lock();
            state.detecting = true;
            state.anchor_at = Instant::now();
        }
        service
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: MockOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    pub fn seeks(&self) -> Vec<SeekRequest> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Seek(request) => Some(*request),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn set_latency(&self, op: MockOp, latency: Duration) {
        self.state.lock().latency.insert(op, latency);
    }

    /// Make seeks fail with the given error string.
    pub fn set_seek_error(&self, error: Option<&str>) {
        self.state.lock().seek_error = error.map(str::to_owned);
    }

    /// Acknowledge seeks without moving the stream.
    pub fn set_stall_seeks(&self, stall: bool) {
        self.state.lock().stall_seeks = stall;
    }

    /// Acknowledge resumes while health keeps reporting paused.
    pub fn set_sticky_pause(&self, sticky: bool) {
        self.state.lock().sticky_pause = sticky;
    }

    /// Acknowledge pauses without ever pausing.
    pub fn set_ignore_pause(&self, ignore: bool) {
        self.state.lock().ignore_pause = ignore;
    }

    pub fn set_frame_available(&self, available: bool) {
        self.state.lock().frame_available = available;
    }

    pub fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.rebase(now);
        state.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_detecting(&self) -> bool {
        self.state.lock().detecting
    }

    pub fn position(&self) -> u64 {
        self.state.lock().position_at(Instant::now())
    }

    /// Render the frame payload the service serves at `position`.
    pub fn frame_for(position: u64) -> FrameImage {
        FrameImage::new(format!("data:image/x-mock;frame={position}"))
    }

    async fn enter(&self, call: MockCall) {
        let latency = {
            let mut state = self.state.lock();
            let latency = state.latency.get(&call.op()).copied();
            state.calls.push(call);
            latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl DetectionService for MockDetectionService {
    fn health(&self) -> ServiceFuture<'_, Health> {
        async move {
            self.enter(MockCall::Health).await;
            let state = self.state.lock();
            Ok(Health {
                detecting: state.detecting,
                paused: state.paused,
                model_loaded: true,
            })
        }
        .boxed()
    }

    fn start(&self, source: StreamSource) -> ServiceFuture<'_, ()> {
        async move {
            self.enter(MockCall::Start(source)).await;
            let mut state = self.state.lock();
            if state.detecting {
                return Err(ServiceError::Rejected("Detection already running".into()));
            }
            state.detecting = true;
            state.paused = false;
            state.anchor_position = 0;
            state.anchor_at = Instant::now();
            Ok(())
        }
        .boxed()
    }

    fn stop(&self) -> ServiceFuture<'_, ()> {
        async move {
            self.enter(MockCall::Stop).await;
            let mut state = self.state.lock();
            state.detecting = false;
            state.paused = false;
            state.anchor_position = 0;
            Ok(())
        }
        .boxed()
    }

    fn pause(&self) -> ServiceFuture<'_, CommandAck> {
        async move {
            self.enter(MockCall::Pause).await;
            let mut state = self.state.lock();
            if !state.ignore_pause {
                let now = Instant::now();
                state.rebase(now);
                state.paused = true;
            }
            Ok(CommandAck { paused: Some(true) })
        }
        .boxed()
    }

    fn resume(&self) -> ServiceFuture<'_, CommandAck> {
        async move {
            self.enter(MockCall::Resume).await;
            let mut state = self.state.lock();
            if !state.sticky_pause {
                state.anchor_at = Instant::now();
                state.paused = false;
            }
            Ok(CommandAck {
                paused: Some(false),
            })
        }
        .boxed()
    }

    fn seek(&self, request: SeekRequest) -> ServiceFuture<'_, SeekAck> {
        async move {
            self.enter(MockCall::Seek(request)).await;
            let mut state = self.state.lock();
            state.require_stream()?;
            if let Some(error) = state.seek_error.clone() {
                return Err(ServiceError::from_message(error));
            }
            let now = Instant::now();
            let current = state.position_at(now) as i64;
            let target = match request.mode {
                SeekMode::Absolute => request.value,
                SeekMode::Relative => current.saturating_add(request.value),
            };
            let target = state.clamp(target.max(0) as u64);
            if !state.stall_seeks {
                state.anchor_position = target;
                state.anchor_at = now;
            }
            Ok(SeekAck {
                position: Some(target),
            })
        }
        .boxed()
    }

    fn frame(&self) -> ServiceFuture<'_, FrameSnapshot> {
        async move {
            self.enter(MockCall::Frame).await;
            let state = self.state.lock();
            state.require_stream()?;
            if !state.frame_available {
                return Err(ServiceError::HttpStatus {
                    url: "mock://api/detect/frame".into(),
                    status: 503,
                    message: "Frame not available yet".into(),
                });
            }
            let position = state.position_at(Instant::now());
            Ok(FrameSnapshot {
                frame: Some(Self::frame_for(position)),
                metadata: state.metadata(position),
            })
        }
        .boxed()
    }

    fn position(&self) -> ServiceFuture<'_, StreamMetadata> {
        async move {
            self.enter(MockCall::Position).await;
            let state = self.state.lock();
            state.require_stream()?;
            let position = state.position_at(Instant::now());
            Ok(state.metadata(position))
        }
        .boxed()
    }

    fn stats(&self) -> ServiceFuture<'_, DetectionStats> {
        async move {
            self.enter(MockCall::Stats).await;
            let state = self.state.lock();
            let position = state.position_at(Instant::now());
            let total = state.vehicles_seen(position);
            let trucks = total / 5;
            let buses = total / 10;
            let bikes = total / 8;
            let cars = total - trucks - buses - bikes;
            Ok(DetectionStats {
                cars,
                trucks,
                buses,
                bikes,
                total,
                confidence: if total > 0 { 0.87 } else { 0.0 },
                vehicle_count: total.saturating_sub(state.counted_before_reset),
                counts_by_type: None,
                speed_stats: None,
            })
        }
        .boxed()
    }

    fn counting_line(&self) -> ServiceFuture<'_, Option<CountingLine>> {
        async move {
            self.enter(MockCall::CountingLine).await;
            Ok(self.state.lock().counting_line)
        }
        .boxed()
    }

    fn set_counting_line(&self, line: CountingLine) -> ServiceFuture<'_, ()> {
        async move {
            self.enter(MockCall::SetCountingLine(line)).await;
            let mut state = self.state.lock();
            state.counting_line = Some(line);
            state.reset_count();
            Ok(())
        }
        .boxed()
    }

    fn reset_count(&self) -> ServiceFuture<'_, ()> {
        async move {
            self.enter(MockCall::ResetCount).await;
            self.state.lock().reset_count();
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn still_stream() -> MockStream {
        MockStream {
            advance_while_playing: false,
            ..MockStream::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn relative_seek_clamps_to_stream_bounds() {
        let service = MockDetectionService::running(still_stream());
        let ack = service.seek(SeekRequest::relative(-30)).await.unwrap();
        assert_eq!(ack.position, Some(0));
        let ack = service.seek(SeekRequest::absolute(5000)).await.unwrap();
        assert_eq!(ack.position, Some(1799));
        assert_eq!(service.position(), 1799);
    }

    #[tokio::test(start_paused = true)]
    async fn position_advances_only_while_playing() {
        let service = MockDetectionService::running(MockStream::default());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(service.position(), 60);

        service.pause().await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(service.position(), 60);

        service.resume().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(service.position(), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_encode_their_position() {
        let service = MockDetectionService::running(still_stream());
        service.seek(SeekRequest::absolute(42)).await.unwrap();
        let snapshot = service.frame().await.unwrap();
        assert_eq!(snapshot.frame, Some(MockDetectionService::frame_for(42)));
        assert_eq!(snapshot.metadata.position, Some(42));
        assert_eq!(snapshot.metadata.duration_seconds, Some(60.0));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_service_rejects_frame_requests() {
        let service = MockDetectionService::new(still_stream());
        let err = service.frame().await.unwrap_err();
        assert_eq!(err, ServiceError::Rejected("No active video stream".into()));
        assert_eq!(service.count(MockOp::Frame), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn count_reset_keeps_class_totals() {
        let service = MockDetectionService::running(still_stream());
        service.seek(SeekRequest::absolute(600)).await.unwrap();
        let before = service.stats().await.unwrap();
        assert_eq!(before.total, 10);
        assert_eq!(before.vehicle_count, 10);

        service.reset_count().await.unwrap();
        let after = service.stats().await.unwrap();
        assert_eq!(after.total, 10);
        assert_eq!(after.vehicle_count, 0);

        service.seek(SeekRequest::absolute(1200)).await.unwrap();
        assert_eq!(service.stats().await.unwrap().vehicle_count, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_the_line_zeroes_the_count() {
        let service = MockDetectionService::running(still_stream());
        service.seek(SeekRequest::absolute(600)).await.unwrap();
        let line = CountingLine::new([0, 240], [640, 240]);
        service.set_counting_line(line).await.unwrap();
        assert_eq!(service.counting_line().await.unwrap(), Some(line));
        assert_eq!(service.stats().await.unwrap().vehicle_count, 0);
        assert_eq!(service.count(MockOp::SetCountingLine), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sticky_pause_keeps_health_paused() {
        let service = MockDetectionService::running(still_stream());
        service.set_sticky_pause(true);
        service.pause().await.unwrap();
        let ack = service.resume().await.unwrap();
        assert_eq!(ack.paused, Some(false));
        assert!(service.health().await.unwrap().paused);
    }
}
