//! Change-notification debouncer.
//!
//! Keeps one pending timer per subject. Each signal aborts the subject's
//! pending timer and starts a new one; when a timer survives the quiet
//! period its subject is delivered on the channel returned by
//! [`Debouncer::new`]. A burst therefore yields exactly one delivery, one
//! quiet period after the last signal.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Per-subject trailing-edge debouncer.
#[derive(Debug)]
pub struct Debouncer<K> {
    quiet: Duration,
    pending: HashMap<K, JoinHandle<()>>,
    fired_tx: mpsc::UnboundedSender<K>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
{
    /// Creates a debouncer and the receiver its fired subjects arrive on.
    pub fn new(quiet: Duration) -> (Self, mpsc::UnboundedReceiver<K>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            quiet,
            pending: HashMap::new(),
            fired_tx,
        };
        (debouncer, fired_rx)
    }

    /// Records a change signal for `subject`, restarting its quiet period.
    pub fn signal(&mut self, subject: K) {
        if let Some(previous) = self.pending.remove(&subject) {
            previous.abort();
        }

        let quiet = self.quiet;
        let fired_tx = self.fired_tx.clone();
        let fired = subject.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            log::trace!("[Sync] Debounce fired for {:?}", fired);
            let _ = fired_tx.send(fired);
        });
        self.pending.insert(subject, timer);
    }

    /// Number of subjects with a timer still counting down.
    pub fn pending(&self) -> usize {
        self.pending.values().filter(|timer| !timer.is_finished()).count()
    }

    /// Aborts every pending timer.
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.pending.drain() {
            timer.abort();
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for timer in self.pending.values() {
            timer.abort();
        }
    }
}
