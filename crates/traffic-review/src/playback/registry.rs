//! Per-class cancellation tokens for requests sent to the detection service.
//!
//! Issuing a token for a class invalidates the previous one of that class.
//! The abort signal only stops waiting on the network; whether a response
//! may touch playback state is decided by [`RequestRegistry::settle`].

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    Frame,
    Position,
    Seek,
    Stats,
}

impl RequestClass {
    pub const ALL: [RequestClass; 4] = [
        RequestClass::Frame,
        RequestClass::Position,
        RequestClass::Seek,
        RequestClass::Stats,
    ];

    fn index(self) -> usize {
        match self {
            RequestClass::Frame => 0,
            RequestClass::Position => 1,
            RequestClass::Seek => 2,
            RequestClass::Stats => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestClass::Frame => "frame",
            RequestClass::Position => "position",
            RequestClass::Seek => "seek",
            RequestClass::Stats => "stats",
        }
    }
}

/// Outcome of racing a request against its token's abort signal.
#[derive(Debug)]
pub enum Guarded<T> {
    Completed(T),
    Superseded,
}

#[derive(Debug, Clone)]
pub struct RequestToken {
    class: RequestClass,
    generation: u64,
    aborted: watch::Receiver<bool>,
}

impl RequestToken {
    pub fn class(&self) -> RequestClass {
        self.class
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_aborted(&self) -> bool {
        *self.aborted.borrow()
    }

    /// Resolves once the token has been invalidated.
    pub async fn aborted(&self) {
        let mut aborted = self.aborted.clone();
        // A dropped sender means the registry is gone; treat it as aborted too.
        let _ = aborted.wait_for(|aborted| *aborted).await;
    }

    /// Drive `request` until it completes or this token is invalidated.
    /// Abandoning the future is the network-level abort.
    pub async fn race<F: Future>(&self, request: F) -> Guarded<F::Output> {
        tokio::select! {
            biased;
            _ = self.aborted() => Guarded::Superseded,
            output = request => Guarded::Completed(output),
        }
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    live: Option<watch::Sender<bool>>,
}

impl Slot {
    fn invalidate(&mut self) {
        if let Some(live) = self.live.take() {
            let _ = live.send(true);
        }
        self.generation = self.generation.wrapping_add(1);
    }
}

#[derive(Default)]
pub struct RequestRegistry {
    slots: Mutex<[Slot; 4]>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate the outstanding token of `class` and hand out a fresh one.
    pub fn issue(&self, class: RequestClass) -> RequestToken {
        let mut slots = self.slots.lock();
        let slot = &mut slots[class.index()];
        slot.invalidate();
        let (live, aborted) = watch::channel(false);
        slot.live = Some(live);
        RequestToken {
            class,
            generation: slot.generation,
            aborted,
        }
    }

    /// Invalidate the outstanding token of `class` without issuing a new one.
    pub fn cancel(&self, class: RequestClass) {
        let mut slots = self.slots.lock();
        let slot = &mut slots[class.index()];
        if slot.live.is_some() {
            slot.invalidate();
        }
    }

    pub fn cancel_all(&self) {
        for class in RequestClass::ALL {
            self.cancel(class);
        }
    }

    pub fn is_current(&self, token: &RequestToken) -> bool {
        let slots = self.slots.lock();
        let slot = &slots[token.class.index()];
        slot.live.is_some() && slot.generation == token.generation
    }

    /// Run `apply` only if `token` is still the current one of its class,
    /// then retire it. The check and `apply` happen under one lock so a
    /// newer issue cannot slip in between.
    pub fn settle<R>(&self, token: &RequestToken, apply: impl FnOnce() -> R) -> Option<R> {
        let mut slots = self.slots.lock();
        let slot = &mut slots[token.class.index()];
        if slot.live.is_none() || slot.generation != token.generation {
            return None;
        }
        slot.live = None;
        Some(apply())
    }

    /// Retire `token` without applying anything.
    pub fn release(&self, token: &RequestToken) {
        let _ = self.settle(token, || ());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn issuing_invalidates_previous_token_of_same_class() {
        let registry = RequestRegistry::new();
        let first = registry.issue(RequestClass::Frame);
        let position = registry.issue(RequestClass::Position);
        let second = registry.issue(RequestClass::Frame);

        assert!(first.is_aborted());
        assert!(!registry.is_current(&first));
        assert!(registry.is_current(&second));
        assert!(registry.is_current(&position));
        assert!(!position.is_aborted());
    }

    #[test]
    fn stale_response_is_not_applied() {
        let registry = RequestRegistry::new();
        let a = registry.issue(RequestClass::Frame);
        let b = registry.issue(RequestClass::Frame);

        // B resolves first, then the slower A.
        assert_eq!(registry.settle(&b, || "b"), Some("b"));
        assert_eq!(registry.settle(&a, || "a"), None);
    }

    #[test]
    fn settled_token_is_retired() {
        let registry = RequestRegistry::new();
        let token = registry.issue(RequestClass::Seek);
        assert_eq!(registry.settle(&token, || 1), Some(1));
        assert_eq!(registry.settle(&token, || 2), None);
        assert!(!token.is_aborted());
    }

    #[test]
    fn cancel_retires_without_issuing() {
        let registry = RequestRegistry::new();
        let token = registry.issue(RequestClass::Position);
        registry.cancel(RequestClass::Position);
        assert!(token.is_aborted());
        assert!(registry.settle(&token, || ()).is_none());

        // Cancelling an idle class is a no-op.
        registry.cancel(RequestClass::Position);
        let next = registry.issue(RequestClass::Position);
        assert!(registry.is_current(&next));
    }

    #[tokio::test(start_paused = true)]
    async fn race_yields_superseded_when_reissued() {
        let registry = std::sync::Arc::new(RequestRegistry::new());
        let token = registry.issue(RequestClass::Frame);

        let reissue = {
            let registry = std::sync::Arc::clone(&registry);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                registry.issue(RequestClass::Frame)
            })
        };

        let outcome = token
            .race(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            })
            .await;
        assert!(matches!(outcome, Guarded::Superseded));

        let newer = reissue.await.unwrap();
        let outcome = newer.race(async { "fresh" }).await;
        assert!(matches!(outcome, Guarded::Completed("fresh")));
    }
}
