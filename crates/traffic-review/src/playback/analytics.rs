use tokio::sync::watch;
use traffic_review_client::{CountingLine, DetectionStats};

/// Latest detection figures and the counting line of the running stream.
/// Both are cleared when detection stops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analytics {
    pub stats: Option<DetectionStats>,
    pub counting_line: Option<CountingLine>,
}

impl Analytics {
    /// Zero the crossing count locally after the service reset it.
    pub fn clear_crossings(&mut self) {
        if let Some(stats) = self.stats.as_mut() {
            stats.vehicle_count = 0;
            if let Some(counts) = stats.counts_by_type.as_mut() {
                *counts = Default::default();
            }
        }
    }
}

#[derive(Clone)]
pub(crate) struct AnalyticsHandle {
    tx: watch::Sender<Analytics>,
}

impl AnalyticsHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(Analytics::default());
        Self { tx }
    }

    pub(crate) fn snapshot(&self) -> Analytics {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Analytics> {
        self.tx.subscribe()
    }

    pub(crate) fn update(&self, update: impl FnOnce(&mut Analytics)) -> bool {
        self.tx.send_if_modified(|analytics| {
            let before = analytics.clone();
            update(analytics);
            *analytics != before
        })
    }
}

#[cfg(test)]
mod tests {
    use traffic_review_client::VehicleCounts;

    use super::*;

    #[test]
    fn clearing_crossings_keeps_class_totals() {
        let mut analytics = Analytics {
            stats: Some(DetectionStats {
                cars: 7,
                total: 9,
                vehicle_count: 4,
                counts_by_type: Some(VehicleCounts {
                    cars: 3,
                    trucks: 1,
                    ..VehicleCounts::default()
                }),
                ..DetectionStats::default()
            }),
            counting_line: None,
        };
        analytics.clear_crossings();
        let stats = analytics.stats.expect("stats kept");
        assert_eq!(stats.total, 9);
        assert_eq!(stats.cars, 7);
        assert_eq!(stats.vehicle_count, 0);
        assert_eq!(stats.counts_by_type, Some(VehicleCounts::default()));
    }

    #[test]
    fn unchanged_update_does_not_wake_subscribers() {
        let handle = AnalyticsHandle::new();
        let rx = handle.subscribe();
        assert!(!handle.update(|analytics| analytics.stats = None));
        assert!(!rx.has_changed().unwrap_or(true));

        let line = CountingLine::new([0, 0], [10, 0]);
        assert!(handle.update(|analytics| analytics.counting_line = Some(line)));
        assert_eq!(handle.snapshot().counting_line, Some(line));
    }
}
