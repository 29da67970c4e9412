//! Lifecycle event bus.
//!
//! A side channel for host observers: the session emits a fixed vocabulary
//! of events here and never reads them back. Delivery is synchronous, in
//! subscription order, on the thread that emits.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use lockstep_types::{PartyId, RawChange, Role};
use serde::Serialize;
use tokio::sync::mpsc;

/// Why a started session was compromised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompromiseCause {
    /// A registered party's connection closed.
    PartyLeft(Role),
    /// A follower registered while the session was active.
    LateJoiner,
}

/// What happened, with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionEventKind {
    SessionStarted {
        leader: PartyId,
        followers: Vec<PartyId>,
    },
    SessionCompromised {
        leader: Option<PartyId>,
        followers: Vec<PartyId>,
        cause: CompromiseCause,
        /// Whether the session is being restarted (strict mode).
        restarting: bool,
    },
    LeaderConnected {
        party: PartyId,
    },
    FollowerConnected {
        party: PartyId,
    },
    FollowerDisconnected {
        party: PartyId,
    },
    LeaderDisconnected {
        party: PartyId,
    },
    LeaderAction {
        leader: PartyId,
        change: RawChange,
    },
}

impl SessionEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "SessionStarted",
            Self::SessionCompromised { .. } => "SessionCompromised",
            Self::LeaderConnected { .. } => "LeaderConnected",
            Self::FollowerConnected { .. } => "FollowerConnected",
            Self::FollowerDisconnected { .. } => "FollowerDisconnected",
            Self::LeaderDisconnected { .. } => "LeaderDisconnected",
            Self::LeaderAction { .. } => "LeaderAction",
        }
    }
}

/// One emission on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    /// Strictly increasing per bus, starting at 1.
    pub sequence_id: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

/// Token returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    last_sequence: u64,
    last_subscription: u64,
    subscribers: Vec<(SubscriptionId, Callback)>,
}

/// Cloneable handle to a shared set of subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked for every subsequent event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.last_subscription += 1;
        let id = SubscriptionId(inner.last_subscription);
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Forward every subsequent event into an unbounded channel.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub, _)| *sub != id);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Stamp and deliver an event, returning it.
    ///
    /// Callbacks run after the bus lock is released, so they may subscribe
    /// or unsubscribe; such changes apply from the next emission.
    pub fn emit(&self, kind: SessionEventKind) -> SessionEvent {
        let (event, subscribers) = {
            let mut inner = self.lock();
            inner.last_sequence += 1;
            let event = SessionEvent {
                sequence_id: inner.last_sequence,
                timestamp_ms: now_ms(),
                kind,
            };
            let subscribers: Vec<Callback> =
                inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            (event, subscribers)
        };
        for callback in subscribers {
            callback(&event);
        }
        event
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("EventBus")
            .field("last_sequence", &inner.last_sequence)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
