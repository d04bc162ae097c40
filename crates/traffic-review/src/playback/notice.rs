use std::fmt;

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Warning,
}

/// Non-blocking message for the user; never alters control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Warning,
            message: message.into(),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.kind == NoticeKind::Warning
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NoticeKind::Info => write!(f, "{}", self.message),
            NoticeKind::Warning => write!(f, "warning: {}", self.message),
        }
    }
}

#[derive(Default)]
pub(crate) struct NoticeHub {
    subscribers: Mutex<Vec<UnboundedSender<Notice>>>,
}

impl NoticeHub {
    pub(crate) fn subscribe(&self) -> UnboundedReceiver<Notice> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn emit(&self, notice: Notice) {
        match notice.kind {
            NoticeKind::Info => tracing::info!(message = %notice.message, "notice"),
            NoticeKind::Warning => tracing::warn!(message = %notice.message, "notice"),
        }
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.unbounded_send(notice.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_subscribers_are_dropped() {
        let hub = NoticeHub::default();
        let mut kept = hub.subscribe();
        drop(hub.subscribe());

        hub.emit(Notice::info("Video paused"));
        assert_eq!(hub.subscribers.lock().len(), 1);
        assert_eq!(
            kept.try_next().unwrap(),
            Some(Notice::info("Video paused"))
        );
    }
}
