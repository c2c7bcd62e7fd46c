// Near-bottom tracking for the message pane.

use crate::state::{ScrollAction, ScrollMetrics};

#[derive(Debug, Clone)]
pub(crate) struct ScrollGuard {
    threshold_px: f64,
    should_auto_scroll: bool,
    last_metrics: Option<ScrollMetrics>,
}

impl ScrollGuard {
    pub fn new(threshold_px: f64) -> Self {
        Self {
            threshold_px,
            should_auto_scroll: true,
            last_metrics: None,
        }
    }

    pub fn should_auto_scroll(&self) -> bool {
        self.should_auto_scroll
    }

    /// Called for every scroll event reported by the UI.
    pub fn observe(&mut self, metrics: ScrollMetrics) {
        self.last_metrics = Some(metrics);
        self.should_auto_scroll = self.is_near_bottom(&metrics);
    }

    /// Re-evaluate from the last reported position, right before new content
    /// is merged in. Without any report yet the pane is treated as pinned.
    pub fn snapshot(&mut self) -> bool {
        if let Some(metrics) = self.last_metrics {
            self.should_auto_scroll = self.is_near_bottom(&metrics);
        }
        self.should_auto_scroll
    }

    /// A new conversation always starts at the bottom.
    pub fn reset(&mut self) {
        self.should_auto_scroll = true;
        self.last_metrics = None;
    }

    pub fn action_for(near_bottom: bool) -> ScrollAction {
        if near_bottom {
            ScrollAction::ToBottom { smooth: true }
        } else {
            ScrollAction::StayPut
        }
    }

    fn is_near_bottom(&self, metrics: &ScrollMetrics) -> bool {
        metrics.distance_from_bottom() < self.threshold_px
    }
}
