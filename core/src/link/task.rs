// Replaceable background task slot with generation-based cancellation

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Token handed to a spawned task so it can tell whether it was superseded
#[derive(Debug, Clone)]
pub struct Generation {
    value: u64,
    current: Arc<AtomicU64>,
}

impl Generation {
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Whether no newer task has replaced this one and it was not cancelled
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.value
    }
}

/// Holds at most one live task of a kind.
///
/// Replacing or cancelling aborts the previous task and bumps the
/// generation before anything new is spawned, so a result from an older
/// task can never be mistaken for the current one.
#[derive(Debug)]
pub struct TaskSlot {
    name: &'static str,
    generation: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Cancel the current task, if any, and spawn a new one
    pub fn replace<F, Fut>(&mut self, make: F) -> u64
    where
        F: FnOnce(Generation) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let value = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = Generation {
            value,
            current: self.generation.clone(),
        };
        self.handle = Some(tokio::spawn(make(token)));
        debug!("Started {} task #{}", self.name, value);
        value
    }

    /// Abort the current task. Returns whether one was live.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                let stale = self.generation.fetch_add(1, Ordering::SeqCst);
                debug!("Cancelled {} task #{}", self.name, stale);
                true
            }
            None => false,
        }
    }

    /// Accept a result posted by generation `value`. Returns false for
    /// results of cancelled or replaced tasks.
    pub fn complete(&mut self, value: u64) -> bool {
        if self.handle.is_some() && self.generation.load(Ordering::SeqCst) == value {
            self.handle = None;
            true
        } else {
            debug!("Dropping stale {} result #{}", self.name, value);
            false
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
