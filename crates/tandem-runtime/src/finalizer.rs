//! Finalization queue
//!
//! Managed objects in this runtime are reclaimed the moment their last owner
//! drops them, and nothing is notified when that happens. Work that must run
//! "after X is gone" is therefore registered as a [`Finalizer`] and polled by
//! finalization passes. A finalizer that finds its object still alive asks to
//! be re-armed and is polled again on the next pass.
//!
//! Passes run when the embedder calls
//! [`InteropRuntime::run_finalizers`](crate::InteropRuntime::run_finalizers),
//! or automatically once enough finalizers have been registered since the
//! previous pass.

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// What a finalizer wants after being polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The tracked object is still alive; poll again on a later pass
    Rearm,
    /// Finished; drop the finalizer
    Done,
}

/// Deferred cleanup run by a finalization pass
pub trait Finalizer: Send {
    /// Poll the finalizer
    fn finalize(&mut self) -> FinalizeOutcome;
}

/// Result of one finalization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Finalizers that completed
    pub finalized: usize,
    /// Finalizers that asked to be polled again
    pub rearmed: usize,
}

/// Cumulative finalization statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizerStats {
    /// Total passes run
    pub passes: usize,
    /// Total finalizers completed
    pub finalized: usize,
    /// Total re-arms
    pub rearmed: usize,
    /// Finalizers still waiting
    pub pending: usize,
}

impl FinalizerStats {
    fn update(&mut self, report: PassReport, pending: usize) {
        self.passes += 1;
        self.finalized += report.finalized;
        self.rearmed += report.rearmed;
        self.pending = pending;
    }
}

/// Queue of pending finalizers
pub struct FinalizationQueue {
    queue: SegQueue<Box<dyn Finalizer>>,
    /// Registrations since the last pass started
    since_pass: AtomicUsize,
    /// Serializes passes and holds their statistics
    stats: Mutex<FinalizerStats>,
}

impl FinalizationQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            since_pass: AtomicUsize::new(0),
            stats: Mutex::new(FinalizerStats::default()),
        }
    }

    /// Register a finalizer
    ///
    /// Returns the number of registrations since the last pass started.
    pub fn register(&self, finalizer: Box<dyn Finalizer>) -> usize {
        self.queue.push(finalizer);
        self.since_pass.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of registrations since the last pass started
    pub fn registrations_since_pass(&self) -> usize {
        self.since_pass.load(Ordering::Acquire)
    }

    /// Number of finalizers waiting
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Poll every finalizer that was queued when the pass began
    ///
    /// Re-armed finalizers go to the back of the queue and are not polled
    /// again in the same pass. Finalizers registered while the pass runs wait
    /// for the next one. Only one pass runs at a time.
    pub fn run_pass(&self) -> PassReport {
        let mut stats = self.stats.lock();
        self.since_pass.store(0, Ordering::Release);

        let mut report = PassReport::default();
        let batch = self.queue.len();
        for _ in 0..batch {
            let Some(mut finalizer) = self.queue.pop() else {
                break;
            };
            match finalizer.finalize() {
                FinalizeOutcome::Done => report.finalized += 1,
                FinalizeOutcome::Rearm => {
                    report.rearmed += 1;
                    self.queue.push(finalizer);
                }
            }
        }

        stats.update(report, self.queue.len());
        tracing::debug!(
            finalized = report.finalized,
            rearmed = report.rearmed,
            pending = stats.pending,
            "finalization pass complete"
        );
        report
    }

    /// Cumulative statistics
    pub fn stats(&self) -> FinalizerStats {
        let mut stats = *self.stats.lock();
        stats.pending = self.queue.len();
        stats
    }
}

impl Default for FinalizationQueue {
    fn default() -> Self {
        Self::new()
    }
}
