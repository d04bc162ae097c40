use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};

use super::registry::{Guarded, RequestClass, RequestToken};
use super::ControllerInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollKind {
    /// Frame image plus whatever metadata rides along.
    Frame,
    /// Position and metadata only.
    Position,
    /// Detection figures for the stats panel.
    Stats,
}

impl PollKind {
    fn class(self) -> RequestClass {
        match self {
            PollKind::Frame => RequestClass::Frame,
            PollKind::Position => RequestClass::Position,
            PollKind::Stats => RequestClass::Stats,
        }
    }
}

pub(crate) struct Pollers {
    cancel: Vec<oneshot::Sender<()>>,
}

impl ControllerInner {
    pub(crate) fn start_polling(self: &Arc<Self>) {
        let mut pollers = self.pollers.lock();
        if pollers.is_some() {
            return;
        }
        let cancel = [
            (PollKind::Frame, self.options.frame_poll_interval),
            (PollKind::Position, self.options.position_poll_interval),
            (PollKind::Stats, self.options.stats_poll_interval),
        ]
        .into_iter()
        .map(|(kind, period)| {
            let (cancel_tx, cancel_rx) = oneshot::channel();
            tokio::spawn(run_poll_loop(Arc::downgrade(self), kind, period, cancel_rx));
            cancel_tx
        })
        .collect();
        *pollers = Some(Pollers { cancel });
        tracing::debug!("polling started");
    }

    pub(crate) fn stop_polling(&self) {
        let Some(pollers) = self.pollers.lock().take() else {
            return;
        };
        for cancel in pollers.cancel {
            let _ = cancel.send(());
        }
        self.registry.cancel(RequestClass::Frame);
        self.registry.cancel(RequestClass::Position);
        self.registry.cancel(RequestClass::Stats);
        tracing::debug!("polling stopped");
    }

    async fn poll_once(&self, kind: PollKind, token: RequestToken) {
        match kind {
            PollKind::Frame => match token.race(self.service.frame()).await {
                Guarded::Completed(Ok(snapshot)) => {
                    self.registry
                        .settle(&token, || self.state.update(|state| state.apply_frame(&snapshot)));
                }
                Guarded::Completed(Err(err)) => {
                    self.registry.release(&token);
                    if !err.is_aborted() {
                        tracing::debug!(%err, "frame poll failed");
                    }
                }
                Guarded::Superseded => trace_superseded(&token),
            },
            PollKind::Position => match token.race(self.service.position()).await {
                Guarded::Completed(Ok(metadata)) => {
                    self.registry.settle(&token, || {
                        self.state.update(|state| state.apply_metadata(&metadata))
                    });
                }
                Guarded::Completed(Err(err)) => {
                    self.registry.release(&token);
                    if !err.is_aborted() {
                        tracing::debug!(%err, "position poll failed");
                    }
                }
                Guarded::Superseded => trace_superseded(&token),
            },
            PollKind::Stats => match token.race(self.service.stats()).await {
                Guarded::Completed(Ok(stats)) => {
                    self.registry.settle(&token, || {
                        self.analytics.update(|analytics| analytics.stats = Some(stats))
                    });
                }
                Guarded::Completed(Err(err)) => {
                    self.registry.release(&token);
                    if !err.is_aborted() {
                        tracing::debug!(%err, "stats poll failed");
                    }
                }
                Guarded::Superseded => trace_superseded(&token),
            },
        }
    }
}

fn trace_superseded(token: &RequestToken) {
    tracing::trace!(
        class = token.class().as_str(),
        generation = token.generation(),
        "poll superseded"
    );
}

/// Holds only a weak handle so a dropped controller ends its loops.
async fn run_poll_loop(
    inner: Weak<ControllerInner>,
    kind: PollKind,
    period: Duration,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                // Issuing aborts the previous tick's request if it is still out.
                let Some(token) = inner.issue_unless_seeking(kind.class()) else {
                    continue;
                };
                tokio::spawn(async move { inner.poll_once(kind, token).await });
            }
        }
    }
    tracing::trace!(?kind, "poll loop exited");
}
