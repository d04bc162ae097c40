//! Keeps the local view of a remote detection stream in sync while the user
//! scrubs, steps, pauses and resumes it.

mod analytics;
mod format;
mod notice;
mod polling;
mod registry;
mod seek;
mod state;

use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::UnboundedReceiver;
use parking_lot::Mutex;
use tokio::sync::watch;
use traffic_review_client::{
    CountingLine, DetectionService, DetectionStats, Health, SeekRequest, StreamSource,
};

pub use analytics::Analytics;
pub use format::{format_time_from_frames, format_time_from_seconds};
pub use notice::{Notice, NoticeKind};
pub use registry::{Guarded, RequestClass, RequestRegistry, RequestToken};
pub use seek::{SeekDisposition, SeekOutcome, SeekStatus};
pub use state::{DEFAULT_FPS, PlaybackState};

use analytics::AnalyticsHandle;
use notice::NoticeHub;
use polling::Pollers;
use seek::SeekSlots;
use state::PlaybackStateHandle;

const CONFIRM_ATTEMPTS: usize = 6;
const CONFIRM_INTERVAL: Duration = Duration::from_millis(150);

pub const DEFAULT_STEP_FRAMES: u64 = 30;
pub const DEFAULT_FRAME_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_POSITION_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_STATS_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOptions {
    pub step_frames: u64,
    pub frame_poll_interval: Duration,
    pub position_poll_interval: Duration,
    pub stats_poll_interval: Duration,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            step_frames: DEFAULT_STEP_FRAMES,
            frame_poll_interval: DEFAULT_FRAME_POLL_INTERVAL,
            position_poll_interval: DEFAULT_POSITION_POLL_INTERVAL,
            stats_poll_interval: DEFAULT_STATS_POLL_INTERVAL,
        }
    }
}

pub(crate) struct ControllerInner {
    service: Arc<dyn DetectionService>,
    options: PlaybackOptions,
    state: PlaybackStateHandle,
    analytics: AnalyticsHandle,
    registry: RequestRegistry,
    seek: Mutex<SeekSlots>,
    pollers: Mutex<Option<Pollers>>,
    notices: NoticeHub,
}

/// Cheap to clone; all clones drive the same stream.
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<ControllerInner>,
}

impl PlaybackController {
    pub fn new(service: Arc<dyn DetectionService>, options: PlaybackOptions) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                service,
                options,
                state: PlaybackStateHandle::new(),
                analytics: AnalyticsHandle::new(),
                registry: RequestRegistry::new(),
                seek: Mutex::new(SeekSlots::default()),
                pollers: Mutex::new(None),
                notices: NoticeHub::default(),
            }),
        }
    }

    pub fn options(&self) -> PlaybackOptions {
        self.inner.options
    }

    pub fn snapshot(&self) -> PlaybackState {
        self.inner.state.snapshot()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state.subscribe()
    }

    pub fn analytics(&self) -> Analytics {
        self.inner.analytics.snapshot()
    }

    /// Stats refreshed by the stats poller plus the counting line.
    pub fn subscribe_analytics(&self) -> watch::Receiver<Analytics> {
        self.inner.analytics.subscribe()
    }

    pub fn subscribe_notices(&self) -> UnboundedReceiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Initial health check. Adopts a stream the service is already running.
    pub async fn connect(&self) -> Option<Health> {
        self.inner.connect().await
    }

    pub async fn start_detection(&self, source: StreamSource) -> bool {
        self.inner.start_detection(source).await
    }

    pub async fn stop_detection(&self) -> bool {
        self.inner.stop_detection().await
    }

    pub fn start_polling(&self) {
        self.inner.start_polling();
    }

    pub fn stop_polling(&self) {
        self.inner.stop_polling();
    }

    pub fn is_polling(&self) -> bool {
        self.inner.pollers.lock().is_some()
    }

    /// Start a seek session, or queue `request` behind the running one.
    /// Only the latest queued request survives.
    pub fn request_seek(&self, request: SeekRequest) -> SeekDisposition {
        self.inner.request_seek(request)
    }

    pub fn step_forward(&self) -> SeekDisposition {
        self.request_seek(SeekRequest::relative(self.step_offset()))
    }

    pub fn step_backward(&self) -> SeekDisposition {
        self.request_seek(SeekRequest::relative(-self.step_offset()))
    }

    pub async fn request_pause(&self) -> bool {
        self.inner.pause().await
    }

    pub async fn request_resume(&self) -> bool {
        self.inner.resume().await
    }

    pub async fn fetch_stats(&self) -> Option<DetectionStats> {
        self.inner.fetch_stats().await
    }

    pub async fn refresh_counting_line(&self) -> Option<CountingLine> {
        self.inner.refresh_counting_line().await
    }

    pub async fn set_counting_line(&self, line: CountingLine) -> bool {
        self.inner.set_counting_line(line).await
    }

    pub async fn reset_count(&self) -> bool {
        self.inner.reset_count().await
    }

    pub fn seek_status(&self) -> SeekStatus {
        self.inner.seek.lock().status()
    }

    /// Resolves once no seek session is running or queued.
    pub async fn seek_settled(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| !state.is_seeking).await;
    }

    fn step_offset(&self) -> i64 {
        i64::try_from(self.inner.options.step_frames).unwrap_or(i64::MAX)
    }
}

enum Confirmation {
    Confirmed,
    Unconfirmed,
    /// Detection was stopped while waiting.
    Abandoned,
}

impl ControllerInner {
    async fn connect(self: &Arc<Self>) -> Option<Health> {
        match self.service.health().await {
            Ok(health) => {
                self.state.update(|state| {
                    state.model_loaded = health.model_loaded;
                    if health.detecting {
                        state.is_detecting = true;
                        state.is_paused = health.paused;
                    }
                });
                tracing::info!(
                    model_loaded = health.model_loaded,
                    detecting = health.detecting,
                    paused = health.paused,
                    "connected to detection service"
                );
                if health.detecting {
                    self.start_polling();
                    self.refresh_counting_line().await;
                }
                Some(health)
            }
            Err(err) => {
                self.notices
                    .emit(Notice::warning(format!("Detection service unavailable: {err}")));
                None
            }
        }
    }

    async fn start_detection(self: &Arc<Self>, source: StreamSource) -> bool {
        self.state.update(|state| state.is_paused = false);
        match self.service.start(source.clone()).await {
            Ok(()) => {
                self.state.update(|state| {
                    state.is_detecting = true;
                    state.is_paused = false;
                    state.reset_stream();
                });
                self.start_polling();
                self.notices
                    .emit(Notice::info(format!("Detection started on {source}")));
                self.refresh_counting_line().await;
                true
            }
            Err(err) => {
                self.notices
                    .emit(Notice::warning(format!("Failed to start detection: {err}")));
                false
            }
        }
    }

    async fn stop_detection(&self) -> bool {
        match self.service.stop().await {
            Ok(()) => {
                self.abandon_seeks();
                self.stop_polling();
                self.registry.cancel_all();
                self.analytics.update(|analytics| *analytics = Analytics::default());
                self.state.update(|state| {
                    state.is_detecting = false;
                    state.is_paused = false;
                    state.reset_stream();
                });
                self.notices.emit(Notice::info("Detection stopped"));
                true
            }
            Err(err) => {
                self.notices
                    .emit(Notice::warning(format!("Failed to stop detection: {err}")));
                false
            }
        }
    }

    async fn pause(&self) -> bool {
        match self.service.pause().await {
            Ok(_) => {
                // A session running now must not undo the user's pause.
                {
                    let mut slots = self.seek.lock();
                    if slots.active.is_some() {
                        slots.keep_paused = true;
                    }
                }
                self.state.update(|state| state.is_paused = true);
                self.notices.emit(Notice::info("Video paused"));
                true
            }
            Err(err) => {
                self.notices
                    .emit(Notice::warning(format!("Failed to pause: {err}")));
                false
            }
        }
    }

    async fn resume(&self) -> bool {
        self.seek.lock().keep_paused = false;
        self.resume_confirmed().await
    }

    /// Resume, then wait for health to report the stream running.
    async fn resume_confirmed(&self) -> bool {
        let epoch = self.seek.lock().stop_epoch;
        let ack = match self.service.resume().await {
            Ok(ack) => ack,
            Err(err) => {
                self.notices
                    .emit(Notice::warning(format!("Failed to resume: {err}")));
                return false;
            }
        };
        match self.confirm_paused(false, epoch).await {
            Confirmation::Confirmed => {
                self.state.update(|state| state.is_paused = false);
                self.notices.emit(Notice::info("Video resumed"));
                return true;
            }
            Confirmation::Abandoned => return false,
            Confirmation::Unconfirmed => {}
        }
        if let Some(paused) = ack.paused {
            self.state.update(|state| state.is_paused = paused);
        }
        self.notices.emit(Notice::warning(
            "Resume was requested but the stream still reports paused",
        ));
        false
    }

    /// Poll health until its paused flag equals `paused`, within a fixed
    /// budget. Gives up early once a stop moves past `epoch`.
    async fn confirm_paused(&self, paused: bool, epoch: u64) -> Confirmation {
        for attempt in 1..=CONFIRM_ATTEMPTS {
            let health = self.service.health().await;
            if self.seek.lock().stop_epoch != epoch {
                tracing::debug!(paused, attempt, "detection stopped while confirming");
                return Confirmation::Abandoned;
            }
            match health {
                Ok(health) if health.paused == paused => return Confirmation::Confirmed,
                Ok(_) => {}
                Err(err) => tracing::debug!(%err, attempt, "health check failed while confirming"),
            }
            if attempt < CONFIRM_ATTEMPTS {
                tokio::time::sleep(CONFIRM_INTERVAL).await;
            }
        }
        tracing::debug!(paused, "pause state not confirmed");
        Confirmation::Unconfirmed
    }

    async fn fetch_stats(&self) -> Option<DetectionStats> {
        match self.service.stats().await {
            Ok(stats) => {
                let published = stats.clone();
                self.analytics
                    .update(|analytics| analytics.stats = Some(published));
                Some(stats)
            }
            Err(err) => {
                self.notices
                    .emit(Notice::warning(format!("Failed to fetch stats: {err}")));
                None
            }
        }
    }

    /// Failures are only logged; the panel simply shows no line.
    async fn refresh_counting_line(&self) -> Option<CountingLine> {
        match self.service.counting_line().await {
            Ok(line) => {
                self.analytics
                    .update(|analytics| analytics.counting_line = line);
                line
            }
            Err(err) => {
                tracing::debug!(%err, "failed to fetch counting line");
                None
            }
        }
    }

    async fn set_counting_line(&self, line: CountingLine) -> bool {
        match self.service.set_counting_line(line).await {
            Ok(()) => {
                self.analytics.update(|analytics| {
                    analytics.counting_line = Some(line);
                    analytics.clear_crossings();
                });
                self.notices
                    .emit(Notice::info(format!("Counting line set to {line}")));
                true
            }
            Err(err) => {
                self.notices
                    .emit(Notice::warning(format!("Failed to set counting line: {err}")));
                false
            }
        }
    }

    async fn reset_count(&self) -> bool {
        match self.service.reset_count().await {
            Ok(()) => {
                self.analytics.update(Analytics::clear_crossings);
                self.notices.emit(Notice::info("Vehicle count reset"));
                true
            }
            Err(err) => {
                self.notices
                    .emit(Notice::warning(format!("Failed to reset count: {err}")));
                false
            }
        }
    }
}
