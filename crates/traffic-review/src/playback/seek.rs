//! Seek sessions: at most one runs at a time, later requests collapse into a
//! single pending slot that is drained when the running session settles.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use traffic_review_client::{FrameImage, FrameSnapshot, SeekRequest, ServiceError};

use super::notice::Notice;
use super::registry::{Guarded, RequestClass, RequestToken};
use super::{Confirmation, ControllerInner};

const QUIESCE_GRACE: Duration = Duration::from_millis(80);
const REFRESH_RETRIES: usize = 5;
const REFRESH_INTERVAL: Duration = Duration::from_millis(250);
const DRAIN_YIELD: Duration = Duration::from_millis(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDisposition {
    /// A new session was started for the request.
    Started,
    /// A session is running; the request waits in the pending slot,
    /// replacing whatever was queued before.
    Queued { replaced: Option<SeekRequest> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekOutcome {
    /// A frame or position different from the pre-seek one arrived.
    Fresh { position: u64 },
    /// The service landed on the frame it was already showing.
    Unchanged { position: u64 },
    /// Nothing new arrived within the retry budget.
    Slow { position: u64 },
    Failed(ServiceError),
    /// A newer request took over before this one settled.
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeekStatus {
    pub active: Option<SeekRequest>,
    pub pending: Option<SeekRequest>,
    pub sessions_started: u64,
    pub last_outcome: Option<SeekOutcome>,
}

#[derive(Default)]
pub(crate) struct SeekSlots {
    pub(crate) active: Option<SeekRequest>,
    pub(crate) pending: Option<SeekRequest>,
    /// The user paused while a session ran; skip the auto-resume.
    pub(crate) keep_paused: bool,
    /// Bumped by every successful stop; sessions begun under an older
    /// value unwind without touching the service again.
    pub(crate) stop_epoch: u64,
    session_epoch: u64,
    sessions_started: u64,
    last_outcome: Option<SeekOutcome>,
}

impl SeekSlots {
    fn begin(&mut self, request: SeekRequest) {
        self.active = Some(request);
        self.session_epoch = self.stop_epoch;
        self.sessions_started += 1;
    }

    fn is_busy(&self) -> bool {
        self.active.is_some() || self.pending.is_some()
    }

    pub(crate) fn status(&self) -> SeekStatus {
        SeekStatus {
            active: self.active,
            pending: self.pending,
            sessions_started: self.sessions_started,
            last_outcome: self.last_outcome.clone(),
        }
    }
}

struct SeekSession {
    request: SeekRequest,
    auto_paused: bool,
    epoch: u64,
    started_at: Instant,
    previous_frame: Option<FrameImage>,
    previous_position: u64,
}

impl SeekSession {
    fn new(request: SeekRequest, auto_paused: bool, epoch: u64) -> Self {
        Self {
            request,
            auto_paused,
            epoch,
            started_at: Instant::now(),
            previous_frame: None,
            previous_position: 0,
        }
    }

    fn is_fresh(&self, snapshot: &FrameSnapshot) -> bool {
        let Some(frame) = snapshot.frame.as_ref() else {
            return false;
        };
        self.previous_frame.as_ref() != Some(frame)
            || snapshot
                .metadata
                .position
                .is_some_and(|position| position != self.previous_position)
    }
}

enum Refresh {
    Fresh,
    Stale,
    Superseded,
}

impl ControllerInner {
    /// Hand out a poll token unless a session runs or is queued. The check
    /// and the issue share the seek lock, so a session that starts later
    /// always cancels whatever was issued here.
    pub(crate) fn issue_unless_seeking(&self, class: RequestClass) -> Option<RequestToken> {
        let slots = self.seek.lock();
        if slots.is_busy() {
            return None;
        }
        Some(self.registry.issue(class))
    }

    /// Drop the queued request and mark the running session as abandoned.
    pub(crate) fn abandon_seeks(&self) {
        let mut slots = self.seek.lock();
        slots.stop_epoch = slots.stop_epoch.wrapping_add(1);
        if let Some(request) = slots.pending.take() {
            tracing::debug!(%request, "dropped queued seek on stop");
        }
    }

    fn is_abandoned(&self, session: &SeekSession) -> bool {
        self.seek.lock().stop_epoch != session.epoch
    }

    pub(crate) fn request_seek(self: &Arc<Self>, request: SeekRequest) -> SeekDisposition {
        {
            let mut slots = self.seek.lock();
            // Flag and slots change together so pollers never see a gap.
            self.state.update(|state| state.is_seeking = true);
            if slots.active.is_some() {
                let replaced = slots.pending.replace(request);
                tracing::debug!(%request, ?replaced, "seek queued behind running session");
                return SeekDisposition::Queued { replaced };
            }
            slots.keep_paused = false;
            slots.begin(request);
        }
        tracing::debug!(%request, "seek session started");
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.drive_sessions(request).await });
        SeekDisposition::Started
    }

    /// Run `first`, then every request drained from the pending slot, until
    /// nothing is left. The active slot stays occupied throughout.
    async fn drive_sessions(self: Arc<Self>, first: SeekRequest) {
        let mut request = first;
        let mut inherited_pause = false;
        loop {
            let session = self.run_session(request, inherited_pause).await;

            if self.seek.lock().pending.is_some() {
                tokio::time::sleep(DRAIN_YIELD).await;
            }
            if let Some(next) = self.take_pending() {
                // The follow-up session owes the resume this one skipped.
                request = next;
                inherited_pause = session.auto_paused;
                continue;
            }

            if session.auto_paused && self.should_auto_resume() {
                self.resume_confirmed().await;
            }

            match self.finish_or_take_pending() {
                Some(next) => {
                    request = next;
                    inherited_pause = false;
                }
                None => break,
            }
        }
    }

    fn take_pending(&self) -> Option<SeekRequest> {
        let mut slots = self.seek.lock();
        let next = slots.pending.take()?;
        slots.begin(next);
        tracing::debug!(request = %next, "draining queued seek");
        Some(next)
    }

    fn finish_or_take_pending(&self) -> Option<SeekRequest> {
        let mut slots = self.seek.lock();
        if let Some(next) = slots.pending.take() {
            slots.begin(next);
            tracing::debug!(request = %next, "draining seek queued during resume");
            return Some(next);
        }
        slots.active = None;
        slots.keep_paused = false;
        self.state.update(|state| state.is_seeking = false);
        None
    }

    fn should_auto_resume(&self) -> bool {
        let keep_paused = self.seek.lock().keep_paused;
        !keep_paused && self.state.snapshot().is_detecting
    }

    async fn run_session(&self, request: SeekRequest, inherited_pause: bool) -> SeekSession {
        let epoch = self.seek.lock().session_epoch;
        let mut session = SeekSession::new(request, inherited_pause, epoch);
        let outcome = self.prepare_and_seek(&mut session).await;
        tracing::debug!(
            request = %session.request,
            ?outcome,
            elapsed_ms = session.started_at.elapsed().as_millis() as u64,
            "seek session settled"
        );
        self.seek.lock().last_outcome = Some(outcome);
        session
    }

    async fn prepare_and_seek(&self, session: &mut SeekSession) -> SeekOutcome {
        if !session.auto_paused && !self.state.snapshot().is_paused {
            session.auto_paused = self.auto_pause(session.epoch).await;
        }
        if self.is_abandoned(session) {
            return SeekOutcome::Superseded;
        }

        self.registry.cancel(RequestClass::Frame);
        self.registry.cancel(RequestClass::Position);
        tokio::time::sleep(QUIESCE_GRACE).await;
        if self.is_abandoned(session) {
            return SeekOutcome::Superseded;
        }

        let snapshot = self.state.snapshot();
        session.previous_frame = snapshot.current_frame;
        session.previous_position = snapshot.position;

        self.issue_seek(session).await
    }

    async fn auto_pause(&self, epoch: u64) -> bool {
        if let Err(err) = self.service.pause().await {
            tracing::debug!(%err, "auto-pause failed; seeking anyway");
            return false;
        }
        match self.confirm_paused(true, epoch).await {
            Confirmation::Confirmed => {
                self.state.update(|state| state.is_paused = true);
                true
            }
            Confirmation::Unconfirmed => {
                tracing::debug!("auto-pause not confirmed; seeking anyway");
                false
            }
            Confirmation::Abandoned => false,
        }
    }

    async fn issue_seek(&self, session: &SeekSession) -> SeekOutcome {
        let token = self.registry.issue(RequestClass::Seek);
        let ack = match token.race(self.service.seek(session.request)).await {
            Guarded::Superseded => return SeekOutcome::Superseded,
            Guarded::Completed(Err(err)) => {
                self.registry.release(&token);
                if err.is_aborted() {
                    tracing::debug!(request = %session.request, "seek aborted by the service");
                    return SeekOutcome::Superseded;
                }
                self.notices
                    .emit(Notice::warning(format!("Seek failed: {err}")));
                return SeekOutcome::Failed(err);
            }
            Guarded::Completed(Ok(ack)) => ack,
        };
        let applied = self.registry.settle(&token, || {
            if let Some(position) = ack.position {
                self.state.update(|state| state.position = position);
            }
        });
        if applied.is_none() {
            return SeekOutcome::Superseded;
        }
        let same_target = ack.position == Some(session.previous_position);

        let mut fresh = match self.refresh_frame(session).await {
            Refresh::Fresh => true,
            Refresh::Stale => false,
            Refresh::Superseded => return SeekOutcome::Superseded,
        };

        if !fresh && !same_target {
            for attempt in 1..=REFRESH_RETRIES {
                if self.is_abandoned(session) {
                    return SeekOutcome::Superseded;
                }
                if self.seek.lock().pending.is_some() {
                    tracing::debug!(attempt, "newer seek queued; abandoning refresh");
                    // Keep the timeline honest for the session that follows.
                    self.refresh_position().await;
                    return SeekOutcome::Superseded;
                }
                tokio::time::sleep(REFRESH_INTERVAL).await;
                match self.refresh_frame(session).await {
                    Refresh::Fresh => {
                        fresh = true;
                        break;
                    }
                    Refresh::Stale => {}
                    Refresh::Superseded => return SeekOutcome::Superseded,
                }
            }
        }

        if fresh {
            let position = self.state.snapshot().position;
            self.notices
                .emit(Notice::info(format!("Seeked to frame {position}")));
            return SeekOutcome::Fresh { position };
        }
        if same_target {
            let position = session.previous_position;
            self.notices
                .emit(Notice::info(format!("Already at frame {position}")));
            return SeekOutcome::Unchanged { position };
        }

        self.refresh_position().await;
        let position = self.state.snapshot().position;
        let waited = session.started_at.elapsed();
        self.notices.emit(Notice::warning(format!(
            "Seek may be slow (took ~{}s).",
            waited.as_secs_f64().round() as u64
        )));
        SeekOutcome::Slow { position }
    }

    async fn refresh_frame(&self, session: &SeekSession) -> Refresh {
        let token = self.registry.issue(RequestClass::Frame);
        match token.race(self.service.frame()).await {
            Guarded::Superseded => Refresh::Superseded,
            Guarded::Completed(Err(err)) => {
                self.registry.release(&token);
                if err.is_aborted() {
                    return Refresh::Superseded;
                }
                tracing::debug!(%err, "frame refresh failed");
                Refresh::Stale
            }
            Guarded::Completed(Ok(snapshot)) => {
                let applied = self
                    .registry
                    .settle(&token, || self.state.update(|state| state.apply_frame(&snapshot)));
                match applied {
                    None => Refresh::Superseded,
                    Some(_) if session.is_fresh(&snapshot) => Refresh::Fresh,
                    Some(_) => Refresh::Stale,
                }
            }
        }
    }

    async fn refresh_position(&self) {
        let token = self.registry.issue(RequestClass::Position);
        match token.race(self.service.position()).await {
            Guarded::Superseded => {}
            Guarded::Completed(Ok(metadata)) => {
                self.registry
                    .settle(&token, || self.state.update(|state| state.apply_metadata(&metadata)));
            }
            Guarded::Completed(Err(err)) => {
                self.registry.release(&token);
                tracing::debug!(%err, "position refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(frame: Option<&str>, position: Option<u64>) -> FrameSnapshot {
        FrameSnapshot {
            frame: frame.map(FrameImage::new),
            metadata: traffic_review_client::StreamMetadata {
                position,
                ..Default::default()
            },
        }
    }

    fn session_at(frame: Option<&str>, position: u64) -> SeekSession {
        let mut session = SeekSession::new(SeekRequest::relative(30), false, 0);
        session.previous_frame = frame.map(FrameImage::new);
        session.previous_position = position;
        session
    }

    #[test]
    fn freshness_needs_an_image() {
        let session = session_at(Some("a"), 10);
        assert!(!session.is_fresh(&snapshot(None, Some(40))));
    }

    #[test]
    fn new_image_or_new_position_is_fresh() {
        let session = session_at(Some("a"), 10);
        assert!(session.is_fresh(&snapshot(Some("b"), Some(10))));
        assert!(session.is_fresh(&snapshot(Some("a"), Some(40))));
        assert!(!session.is_fresh(&snapshot(Some("a"), Some(10))));
        assert!(!session.is_fresh(&snapshot(Some("a"), None)));
    }

    #[test]
    fn first_frame_after_empty_state_is_fresh() {
        let session = session_at(None, 0);
        assert!(session.is_fresh(&snapshot(Some("a"), Some(0))));
    }

    #[test]
    fn pending_slot_keeps_only_latest() {
        let mut slots = SeekSlots::default();
        slots.begin(SeekRequest::relative(30));
        assert_eq!(slots.pending.replace(SeekRequest::relative(60)), None);
        assert_eq!(
            slots.pending.replace(SeekRequest::absolute(900)),
            Some(SeekRequest::relative(60))
        );
        let status = slots.status();
        assert_eq!(status.active, Some(SeekRequest::relative(30)));
        assert_eq!(status.pending, Some(SeekRequest::absolute(900)));
        assert_eq!(status.sessions_started, 1);
    }

    #[test]
    fn sessions_record_the_stop_epoch_they_began_under() {
        let mut slots = SeekSlots::default();
        slots.stop_epoch = 3;
        slots.begin(SeekRequest::absolute(10));
        assert_eq!(slots.session_epoch, 3);
        slots.stop_epoch += 1;
        assert_ne!(slots.session_epoch, slots.stop_epoch);
    }
}
