//! Change batching for the live-reload hub.
//!
//! Coalesces bursts of change notifications into one [`ChangedFileSet`],
//! so a rebuild that touches many files reaches the browser as one push.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ChangedFileSet;

#[derive(Default)]
struct Pending {
    paths: Vec<String>,
    seen: HashSet<String>,
    deadline: Option<Instant>,
}

/// Thread-safe change batcher.
///
/// Each recorded path pushes the batch deadline out by the window, so a
/// batch is released once notifications have been quiet for that long.
pub(crate) struct ChangeBatcher {
    pending: Mutex<Pending>,
    window: Duration,
}

impl ChangeBatcher {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            window,
        }
    }

    /// Record changed paths. Duplicates keep their first position.
    pub(crate) fn record(&self, changed: ChangedFileSet) {
        let mut pending = self.pending.lock().unwrap();
        for path in Vec::from(changed) {
            if pending.seen.insert(path.clone()) {
                pending.paths.push(path);
            }
        }
        if !pending.paths.is_empty() {
            pending.deadline = Some(Instant::now() + self.window);
        }
    }

    /// Take the batch if its deadline has passed.
    pub(crate) fn drain_ready(&self) -> Option<ChangedFileSet> {
        let mut pending = self.pending.lock().unwrap();
        let deadline = pending.deadline?;
        if deadline > Instant::now() {
            return None;
        }

        let batch = std::mem::take(&mut *pending);
        Some(ChangedFileSet::new(batch.paths))
    }

    /// Deadline of the pending batch, for timer scheduling.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.lock().unwrap().deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_batch_released_after_window() {
        let batcher = ChangeBatcher::new(Duration::from_millis(10));
        batcher.record(ChangedFileSet::new(["/a.css"]));

        assert!(batcher.drain_ready().is_none());

        thread::sleep(Duration::from_millis(15));

        let batch = batcher.drain_ready().unwrap();
        assert_eq!(batch.paths(), ["/a.css"]);
        assert!(batcher.drain_ready().is_none());
    }

    #[test]
    fn test_burst_coalesces_in_order_without_duplicates() {
        let batcher = ChangeBatcher::new(Duration::from_millis(10));
        batcher.record(ChangedFileSet::new(["/index.html", "/a.css"]));
        batcher.record(ChangedFileSet::new(["/a.css", "/img/logo.png"]));
        batcher.record(ChangedFileSet::new(["/index.html"]));

        thread::sleep(Duration::from_millis(15));

        let batch = batcher.drain_ready().unwrap();
        assert_eq!(batch.paths(), ["/index.html", "/a.css", "/img/logo.png"]);
    }

    #[test]
    fn test_new_record_extends_deadline() {
        let batcher = ChangeBatcher::new(Duration::from_millis(100));
        batcher.record(ChangedFileSet::new(["/a.css"]));
        let first = batcher.next_deadline().unwrap();

        thread::sleep(Duration::from_millis(5));
        batcher.record(ChangedFileSet::new(["/b.css"]));

        assert!(batcher.next_deadline().unwrap() > first);
    }

    #[test]
    fn test_empty_record_does_not_arm() {
        let batcher = ChangeBatcher::new(Duration::from_millis(10));
        batcher.record(ChangedFileSet::default());
        assert!(batcher.next_deadline().is_none());
    }
}
