use tokio::sync::watch;
use traffic_review_client::{FrameImage, FrameSnapshot, StreamMetadata};

use super::format::{format_time_from_frames, format_time_from_seconds};

pub const DEFAULT_FPS: f64 = 30.0;

/// UI-facing snapshot of the remote stream as the controller believes it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub position: u64,
    pub total_frames: u64,
    pub fps: f64,
    pub duration_seconds: f64,
    pub current_frame: Option<FrameImage>,
    pub model_loaded: bool,
    pub is_detecting: bool,
    pub is_paused: bool,
    /// Set while a seek session runs or one is queued; gates the pollers.
    pub is_seeking: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            position: 0,
            total_frames: 0,
            fps: DEFAULT_FPS,
            duration_seconds: 0.0,
            current_frame: None,
            model_loaded: false,
            is_detecting: false,
            is_paused: false,
            is_seeking: false,
        }
    }
}

impl PlaybackState {
    /// Zero the stream fields. Connection and seek flags survive; the seek
    /// flag is owned by the seek coordinator.
    pub fn reset_stream(&mut self) {
        *self = Self {
            model_loaded: self.model_loaded,
            is_detecting: self.is_detecting,
            is_paused: self.is_paused,
            is_seeking: self.is_seeking,
            ..Self::default()
        };
    }

    pub fn apply_metadata(&mut self, metadata: &StreamMetadata) {
        if let Some(position) = metadata.position {
            self.position = position;
        }
        if let Some(total) = metadata.total_frames {
            self.total_frames = total;
        }
        if let Some(fps) = metadata.fps.filter(|fps| fps.is_finite() && *fps > 0.0) {
            self.fps = fps;
        }
        if let Some(duration) = metadata
            .duration_seconds
            .filter(|duration| duration.is_finite() && *duration >= 0.0)
        {
            self.duration_seconds = duration;
        }
    }

    /// A snapshot without an image carries nothing worth showing and is skipped.
    pub fn apply_frame(&mut self, snapshot: &FrameSnapshot) {
        let Some(frame) = snapshot.frame.as_ref() else {
            return;
        };
        self.current_frame = Some(frame.clone());
        self.apply_metadata(&snapshot.metadata);
    }

    /// Last addressable frame index, the upper bound of the timeline.
    pub fn last_frame(&self) -> u64 {
        self.total_frames.saturating_sub(1)
    }

    pub fn elapsed_label(&self) -> String {
        format_time_from_frames(self.position, self.fps)
    }

    pub fn duration_label(&self) -> String {
        if self.duration_seconds > 0.0 {
            format_time_from_seconds(self.duration_seconds)
        } else {
            format_time_from_frames(self.total_frames, self.fps)
        }
    }
}

#[derive(Clone)]
pub(crate) struct PlaybackStateHandle {
    tx: watch::Sender<PlaybackState>,
}

impl PlaybackStateHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(PlaybackState::default());
        Self { tx }
    }

    pub(crate) fn snapshot(&self) -> PlaybackState {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.tx.subscribe()
    }

    /// Apply `update`, waking subscribers only when something changed.
    pub(crate) fn update(&self, update: impl FnOnce(&mut PlaybackState)) -> bool {
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            update(state);
            *state != before
        })
    }
}
