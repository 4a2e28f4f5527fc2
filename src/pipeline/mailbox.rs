//! Single-slot "latest wins" mailbox for frame handoff between threads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender};

/// Holds at most one value. Posting over an unread value drops the old one.
///
/// The value and everything about it travel together in one `Arc`, so a
/// reader never sees a half-updated pair.
pub struct Mailbox<T> {
    slot: ArcSwapOption<T>,

    /// Rung on every post; capacity 1, so repeated posts coalesce
    doorbell_tx: Sender<()>,
    doorbell_rx: Receiver<()>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    posted: AtomicUsize,
    taken: AtomicUsize,
    dropped: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub posted: usize,
    pub taken: usize,
    pub dropped: usize,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (doorbell_tx, doorbell_rx) = flume::bounded(1);
        Self {
            slot: ArcSwapOption::empty(),
            doorbell_tx,
            doorbell_rx,
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: replace whatever is pending. Returns `true` if an unread
    /// value was dropped.
    pub fn post(&self, value: T) -> bool {
        let previous = self.slot.swap(Some(Arc::new(value)));
        self.stats.posted.fetch_add(1, Ordering::Relaxed);
        let dropped = previous.is_some();
        if dropped {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
        // Full means a wake-up is already pending
        let _ = self.doorbell_tx.try_send(());
        dropped
    }

    /// Consumer: remove the pending value.
    pub fn take(&self) -> Option<Arc<T>> {
        let value = self.slot.swap(None)?;
        self.stats.taken.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Look at the pending value without consuming it.
    pub fn latest(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }

    /// Block until a value is posted or `timeout` passes, then take it.
    pub fn wait(&self, timeout: Duration) -> Option<Arc<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.take() {
                return Some(value);
            }
            match self.doorbell_rx.recv_deadline(deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return self.take();
                }
            }
        }
    }

    /// Drop any pending value without counting it as taken.
    pub fn clear(&self) {
        self.slot.store(None);
    }

    /// Fires after every post; for consumers that select over several sources.
    pub(crate) fn doorbell(&self) -> &Receiver<()> {
        &self.doorbell_rx
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            posted: self.stats.posted.load(Ordering::Relaxed),
            taken: self.stats.taken.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}
