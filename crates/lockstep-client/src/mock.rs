//! Mock collaborators for testing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use lockstep_types::{Action, Change};
use tokio::sync::mpsc;

use crate::error::{ApplyError, RecorderError};
use crate::{ChangeApplier, ChangeRecorder};

// ---------------------------------------------------------------------------
// MockRecorder
// ---------------------------------------------------------------------------

/// Mock recorder backend.
///
/// Returns a `mpsc::Sender<Change>` that tests use to inject recorded
/// changes. When `start()` is called, it spawns a task that forwards them to
/// the leader. Dropping the feed ends the recording.
pub struct MockRecorder {
    feed_rx: Option<mpsc::Receiver<Change>>,
    starts: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

impl MockRecorder {
    /// Create a new mock recorder and a sender for injecting changes.
    pub fn new() -> (Self, mpsc::Sender<Change>) {
        let (feed_tx, feed_rx) = mpsc::channel(1024);
        let recorder = Self {
            feed_rx: Some(feed_rx),
            starts: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
        };
        (recorder, feed_tx)
    }

    /// Clonable observer for start/stop calls.
    pub fn handle(&self) -> MockRecorderHandle {
        MockRecorderHandle {
            starts: Arc::clone(&self.starts),
            stopped: Arc::clone(&self.stopped),
        }
    }
}

/// Observer handle for [`MockRecorder`].
#[derive(Clone)]
pub struct MockRecorderHandle {
    starts: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

impl MockRecorderHandle {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Check if `stop()` was called.
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeRecorder for MockRecorder {
    async fn start(&mut self, tx: mpsc::Sender<Change>) -> Result<(), RecorderError> {
        let mut feed_rx = self.feed_rx.take().ok_or(RecorderError::AlreadyStarted)?;
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(false, Ordering::SeqCst);
        let stopped = self.stopped.clone();
        tokio::spawn(async move {
            while let Some(change) = feed_rx.recv().await {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                if tx.send(change).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RecorderError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockApplier
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockApplierState {
    applied: Vec<Change>,
    failing_selectors: HashSet<String>,
}

/// Mock applier that records every change it is given.
///
/// Changes whose action targets a selector registered with
/// [`MockApplierHandle::fail_on`] fail with [`ApplyError::ElementNotFound`].
pub struct MockApplier {
    state: Arc<Mutex<MockApplierState>>,
    notify: Option<mpsc::UnboundedSender<Change>>,
}

impl Default for MockApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApplier {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockApplierState::default())),
            notify: None,
        }
    }

    /// Also forward every successfully applied change into a channel.
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<Change>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut applier = Self::new();
        applier.notify = Some(tx);
        (applier, rx)
    }

    /// Get a clonable handle for observing the applier from tests.
    pub fn handle(&self) -> MockApplierHandle {
        MockApplierHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Clonable observer handle for [`MockApplier`].
#[derive(Clone)]
pub struct MockApplierHandle {
    state: Arc<Mutex<MockApplierState>>,
}

impl MockApplierHandle {
    /// Snapshot of all successfully applied changes, in order.
    pub fn applied(&self) -> Vec<Change> {
        lock(&self.state).applied.clone()
    }

    /// Make changes targeting `selector` fail.
    pub fn fail_on(&self, selector: impl Into<String>) {
        lock(&self.state).failing_selectors.insert(selector.into());
    }
}

#[async_trait]
impl ChangeApplier for MockApplier {
    async fn apply(&mut self, change: &Change) -> Result<(), ApplyError> {
        {
            let mut state = lock(&self.state);
            if let Some(selector) = selector_of(&change.action) {
                if state.failing_selectors.contains(selector) {
                    return Err(ApplyError::ElementNotFound(selector.to_string()));
                }
            }
            state.applied.push(change.clone());
        }
        if let Some(tx) = &self.notify {
            let _ = tx.send(change.clone());
        }
        Ok(())
    }
}

fn selector_of(action: &Action) -> Option<&str> {
    match action {
        Action::Fill { selector, .. }
        | Action::Click { selector, .. }
        | Action::Press { selector, .. }
        | Action::Check { selector, .. }
        | Action::Uncheck { selector, .. }
        | Action::Select { selector, .. }
        | Action::SetInputFiles { selector, .. } => Some(selector),
        Action::Navigate { .. } | Action::OpenPage { .. } | Action::ClosePage { .. } => None,
    }
}

fn lock(state: &Mutex<MockApplierState>) -> MutexGuard<'_, MockApplierState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
