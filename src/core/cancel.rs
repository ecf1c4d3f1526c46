use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Cooperative cancellation shared by the console loops.
///
/// Loops check [`CancellationToken::is_cancelled`] before each blocking step
/// and park in [`CancellationToken::wait`] instead of sleeping, so cancelling
/// wakes them immediately. The wake-up works by dropping the only sender of
/// an otherwise silent channel: every receiver then observes a disconnect.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = flume::bounded(1);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                wake_tx: Mutex::new(Some(wake_tx)),
                wake_rx,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.wake_tx.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Park for `timeout` or until cancelled. Returns `true` when cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.inner.wake_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Ok(()) | Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
        }
    }

    /// Receiver that disconnects on cancellation, for use in a
    /// [`flume::Selector`] next to another channel.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.wake_rx
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
