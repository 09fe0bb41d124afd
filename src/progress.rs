//! Progress accounting across concurrently running table pipelines.
//!
//! Each table task reports completed pages over a channel; the tracker is
//! owned by a single emitter task on the orchestrator side, so the counters
//! are never shared mutably.

use tokio::sync::mpsc;

/// Notification that one page completed (flushed on export, committed on
/// import).
#[derive(Debug, Clone, Copy)]
pub struct PageDone;

pub type PageSender = mpsc::UnboundedSender<PageDone>;
pub type PageReceiver = mpsc::UnboundedReceiver<PageDone>;

pub fn page_channel() -> (PageSender, PageReceiver) {
    mpsc::unbounded_channel()
}

/// Page counters for one run.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTracker {
    total_pages: u64,
    pages_written: u64,
}

impl ProgressTracker {
    pub fn new(total_pages: u64) -> Self {
        Self {
            total_pages,
            pages_written: 0,
        }
    }

    pub fn page_done(&mut self) {
        self.pages_written += 1;
    }

    /// Completed fraction; 0.0 for a run with no pages.
    pub fn ratio(&self) -> f64 {
        if self.total_pages == 0 {
            0.0
        } else {
            self.pages_written as f64 / self.total_pages as f64
        }
    }

    pub fn pages_written(&self) -> u64 {
        self.pages_written
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_progression() {
        let mut tracker = ProgressTracker::new(4);
        assert_eq!(tracker.ratio(), 0.0);
        tracker.page_done();
        assert_eq!(tracker.ratio(), 0.25);
        tracker.page_done();
        tracker.page_done();
        tracker.page_done();
        assert_eq!(tracker.ratio(), 1.0);
    }

    #[test]
    fn test_zero_pages_is_zero_not_nan() {
        let tracker = ProgressTracker::new(0);
        assert_eq!(tracker.ratio(), 0.0);
    }
}
