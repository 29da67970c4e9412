//! Leader-side change dispatcher.
//!
//! Every change the recorder produces passes through
//! [`ChangeDispatcher::send_change`], which decides whether it goes on the
//! wire. Intermediate states of the same interaction are sent once; a fill
//! that carries a navigation signal also schedules a standalone navigate so
//! followers finish typing before the page changes under them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lockstep_protocol::PeerHandle;
use lockstep_types::{Action, Change, ClientMessage};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Whether `a` and `b` are the same logical interaction.
///
/// Fills match on selector and text, clicks on selector, navigations on URL.
/// Any other pairing is never the same.
pub fn same_change(a: &Change, b: &Change) -> bool {
    match (&a.action, &b.action) {
        (
            Action::Fill {
                selector: sa,
                text: ta,
                ..
            },
            Action::Fill {
                selector: sb,
                text: tb,
                ..
            },
        ) => sa == sb && ta == tb,
        (Action::Click { selector: sa, .. }, Action::Click { selector: sb, .. }) => sa == sb,
        (Action::Navigate { url: ua, .. }, Action::Navigate { url: ub, .. }) => ua == ub,
        _ => false,
    }
}

#[derive(Debug, Default)]
struct DispatchState {
    channel: Option<PeerHandle>,
    last_sent: Option<Change>,
    sent_uncommitted: bool,
    timers: Vec<JoinHandle<()>>,
}

/// Duplicate suppression and deferred navigation for one leader.
///
/// Cloning shares the same state. The suppression state outlives
/// attach/detach cycles; pending navigation timers do not.
#[derive(Debug, Clone)]
pub struct ChangeDispatcher {
    state: Arc<Mutex<DispatchState>>,
    navigation_delay: Duration,
}

impl ChangeDispatcher {
    pub fn new(navigation_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(DispatchState::default())),
            navigation_delay,
        }
    }

    /// Route subsequent changes to `channel`.
    pub fn attach(&self, channel: PeerHandle) {
        let mut state = self.lock();
        abort_timers(&mut state);
        state.channel = Some(channel);
    }

    /// Stop sending and cancel any scheduled navigation.
    pub fn detach(&self) {
        let mut state = self.lock();
        abort_timers(&mut state);
        state.channel = None;
    }

    pub fn is_attached(&self) -> bool {
        self.lock()
            .channel
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// The last change that was actually transmitted.
    pub fn last_sent(&self) -> Option<Change> {
        self.lock().last_sent.clone()
    }

    /// Whether the last transmitted change was uncommitted.
    pub fn sent_uncommitted(&self) -> bool {
        self.lock().sent_uncommitted
    }

    /// Navigation timers scheduled and not yet fired.
    pub fn pending_navigations(&self) -> usize {
        let mut state = self.lock();
        state.timers.retain(|t| !t.is_finished());
        state.timers.len()
    }

    /// Offer a recorded change for transmission.
    ///
    /// Returns `true` if the change was written to the channel. A change is
    /// held back only when it repeats the last transmitted change and that
    /// one was still uncommitted.
    ///
    /// Deferred navigations run on the current Tokio runtime. Called outside
    /// one, the change itself is still sent but no navigation is scheduled.
    pub fn send_change(&self, change: Change) -> bool {
        let mut state = self.lock();
        let Some(channel) = state.channel.clone().filter(|c| !c.is_closed()) else {
            trace!(action = change.action.name(), "no channel, dropping change");
            return false;
        };

        if state.last_sent.is_some() {
            if let Some(url) = change.embedded_navigation() {
                let navigate = Change::navigate(change.frame.clone(), url);
                self.schedule(&mut state, navigate);
            }
        }

        let duplicate = state.sent_uncommitted
            && state
                .last_sent
                .as_ref()
                .is_some_and(|last| same_change(&change, last));
        if change.committed {
            state.sent_uncommitted = false;
        }
        if duplicate {
            debug!(
                action = change.action.name(),
                committed = change.committed,
                "suppressing repeat of in-progress change"
            );
            return false;
        }

        if let Err(e) = channel.send(&ClientMessage::Change(change.clone())) {
            warn!(action = change.action.name(), error = %e, "failed to send change");
            return false;
        }
        debug!(
            action = change.action.name(),
            committed = change.committed,
            "sent change"
        );
        state.sent_uncommitted = !change.committed;
        state.last_sent = Some(change);
        true
    }

    fn schedule(&self, state: &mut DispatchState, navigate: Change) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime, embedded navigation not scheduled");
            return;
        };
        state.timers.retain(|t| !t.is_finished());
        let dispatcher = self.clone();
        let delay = self.navigation_delay;
        debug!(?delay, "scheduling embedded navigation");
        state.timers.push(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher.send_change(navigate);
        }));
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn abort_timers(state: &mut DispatchState) {
    for timer in state.timers.drain(..) {
        timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_protocol::{wire, ConnectionId, Outbound};
    use lockstep_types::{FrameRef, Signal};
    use tokio::sync::mpsc;

    const DELAY: Duration = Duration::from_millis(500);

    fn fill(selector: &str, text: &str, committed: bool) -> Change {
        Change {
            frame: FrameRef::main("page"),
            action: Action::Fill {
                selector: selector.to_string(),
                text: text.to_string(),
                signals: vec![],
            },
            committed,
        }
    }

    fn fill_navigating(text: &str, url: &str) -> Change {
        Change {
            frame: FrameRef {
                page_alias: "page".to_string(),
                frame_path: vec!["iframe#login".to_string()],
            },
            action: Action::Fill {
                selector: "#q".to_string(),
                text: text.to_string(),
                signals: vec![Signal::Navigation {
                    url: Some(url.to_string()),
                }],
            },
            committed: true,
        }
    }

    fn click(selector: &str) -> Change {
        Change {
            frame: FrameRef::main("page"),
            action: Action::Click {
                selector: selector.to_string(),
                button: lockstep_types::MouseButton::Left,
                modifiers: 0,
                click_count: 1,
                signals: vec![],
            },
            committed: true,
        }
    }

    fn attached() -> (ChangeDispatcher, mpsc::Receiver<Outbound>) {
        let dispatcher = ChangeDispatcher::new(DELAY);
        let (handle, rx) = PeerHandle::detached(ConnectionId(1));
        dispatcher.attach(handle);
        (dispatcher, rx)
    }

    fn sent(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Change> {
        let mut out = Vec::new();
        while let Ok(Outbound::Text(text)) = rx.try_recv() {
            match wire::decode::<ClientMessage>(&text).unwrap() {
                ClientMessage::Change(change) => out.push(change),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        out
    }

    #[test]
    fn same_change_per_variant() {
        assert!(same_change(&fill("#a", "x", false), &fill("#a", "x", true)));
        assert!(!same_change(&fill("#a", "x", false), &fill("#a", "xy", false)));
        assert!(!same_change(&fill("#a", "x", false), &fill("#b", "x", false)));
        assert!(same_change(&click("#go"), &click("#go")));
        assert!(!same_change(&click("#go"), &click("#stop")));

        let frame = FrameRef::main("page");
        let nav = Change::navigate(frame.clone(), "https://a.test");
        assert!(same_change(&nav, &Change::navigate(frame.clone(), "https://a.test")));
        assert!(!same_change(&nav, &Change::navigate(frame, "https://b.test")));
    }

    #[test]
    fn mismatched_kinds_are_never_same() {
        let press = Change {
            frame: FrameRef::main("page"),
            action: Action::Press {
                selector: "#a".to_string(),
                key: "Enter".to_string(),
                modifiers: 0,
                signals: vec![],
            },
            committed: true,
        };
        assert!(!same_change(&fill("#a", "x", true), &click("#a")));
        assert!(!same_change(&press, &press.clone()));
    }

    #[test]
    fn navigating_fill_outside_runtime_is_sent_without_timer() {
        let (dispatcher, mut rx) = attached();
        assert!(dispatcher.send_change(click("#q")));
        let fill = fill_navigating("rust", "https://search.test/?q=rust");
        assert!(dispatcher.send_change(fill.clone()));
        assert_eq!(dispatcher.pending_navigations(), 0);
        assert_eq!(sent(&mut rx), vec![click("#q"), fill]);
    }

    #[tokio::test]
    async fn no_channel_is_a_no_op() {
        let dispatcher = ChangeDispatcher::new(DELAY);
        assert!(!dispatcher.is_attached());
        assert!(!dispatcher.send_change(fill("#a", "x", true)));
        assert!(dispatcher.last_sent().is_none());
    }

    #[tokio::test]
    async fn closed_channel_is_a_no_op() {
        let (dispatcher, rx) = attached();
        drop(rx);
        assert!(!dispatcher.is_attached());
        assert!(!dispatcher.send_change(fill("#a", "x", true)));
        assert!(dispatcher.last_sent().is_none());
    }

    #[tokio::test]
    async fn repeated_uncommitted_change_is_sent_once() {
        let (dispatcher, mut rx) = attached();
        assert!(dispatcher.send_change(fill("#name", "a", false)));
        assert!(!dispatcher.send_change(fill("#name", "a", false)));
        assert_eq!(sent(&mut rx), vec![fill("#name", "a", false)]);
        assert!(dispatcher.sent_uncommitted());
    }

    #[tokio::test]
    async fn typing_then_commit() {
        let (dispatcher, mut rx) = attached();
        dispatcher.send_change(fill("#name", "a", false));
        dispatcher.send_change(fill("#name", "ab", false));
        dispatcher.send_change(fill("#name", "abc", true));
        assert_eq!(
            sent(&mut rx),
            vec![
                fill("#name", "a", false),
                fill("#name", "ab", false),
                fill("#name", "abc", true),
            ]
        );
        assert!(!dispatcher.sent_uncommitted());
    }

    #[tokio::test]
    async fn commit_matching_in_progress_change_is_held_back() {
        let (dispatcher, mut rx) = attached();
        dispatcher.send_change(fill("#name", "ab", false));
        assert!(!dispatcher.send_change(fill("#name", "ab", true)));
        // The commit still closes the interaction.
        assert!(!dispatcher.sent_uncommitted());
        assert!(dispatcher.send_change(fill("#name", "ab", true)));
        assert_eq!(
            sent(&mut rx),
            vec![fill("#name", "ab", false), fill("#name", "ab", true)]
        );
    }

    #[tokio::test]
    async fn committed_repeats_are_sent() {
        let (dispatcher, mut rx) = attached();
        assert!(dispatcher.send_change(click("#next")));
        assert!(dispatcher.send_change(click("#next")));
        assert_eq!(sent(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn embedded_navigation_is_sent_after_delay() {
        let (dispatcher, mut rx) = attached();
        dispatcher.send_change(click("#login"));
        let change = fill_navigating("secret", "https://app.test/home");
        dispatcher.send_change(change.clone());
        assert_eq!(sent(&mut rx), vec![click("#login"), change.clone()]);
        assert_eq!(dispatcher.pending_navigations(), 1);

        tokio::time::sleep(DELAY - Duration::from_millis(1)).await;
        assert!(sent(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let navigations = sent(&mut rx);
        assert_eq!(
            navigations,
            vec![Change::navigate(change.frame.clone(), "https://app.test/home")]
        );
        match &navigations[0].action {
            Action::Navigate { signals, .. } => assert!(signals.is_empty()),
            other => panic!("expected navigate, got {other:?}"),
        }
        assert_eq!(dispatcher.pending_navigations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_change_does_not_schedule_navigation() {
        let (dispatcher, mut rx) = attached();
        dispatcher.send_change(fill_navigating("x", "https://app.test"));
        assert_eq!(dispatcher.pending_navigations(), 0);
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(sent(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_is_scheduled_even_when_fill_is_suppressed() {
        let (dispatcher, mut rx) = attached();
        let mut change = fill_navigating("x", "https://app.test");
        change.committed = false;
        dispatcher.send_change(change.clone());
        assert!(!dispatcher.send_change(change));
        assert_eq!(dispatcher.pending_navigations(), 1);
        tokio::time::sleep(DELAY * 2).await;
        let frames = sent(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1].action, Action::Navigate { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn detach_cancels_pending_navigation() {
        let (dispatcher, mut rx) = attached();
        dispatcher.send_change(click("#a"));
        dispatcher.send_change(fill_navigating("x", "https://app.test"));
        dispatcher.detach();
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(sent(&mut rx).len(), 2);
        assert_eq!(dispatcher.pending_navigations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_after_channel_closed_is_a_no_op() {
        let (dispatcher, rx) = attached();
        dispatcher.send_change(click("#a"));
        dispatcher.send_change(fill_navigating("x", "https://app.test"));
        drop(rx);
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(dispatcher.pending_navigations(), 0);
        assert!(matches!(
            dispatcher.last_sent().map(|c| c.action),
            Some(Action::Fill { .. })
        ));
    }
}
