//! Leader and follower clients against a real server on loopback.

use std::time::Duration;

use lockstep_client::follower::{Follower, FollowerSummary};
use lockstep_client::leader::{Leader, LeaderSummary};
use lockstep_client::mock::{MockApplier, MockApplierHandle, MockRecorder};
use lockstep_client::{bootstrap, ClientConfig, ClientError};
use lockstep_protocol::WsTransport;
use lockstep_server::config::{Config, SessionConfig};
use lockstep_server::{Server, ServerEvent, ServerStatus};
use lockstep_types::{Action, Change, FrameRef, MouseButton, Role, RoleConflict, Signal};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    url: String,
    status: watch::Receiver<ServerStatus>,
    control: mpsc::Sender<ServerEvent>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn shutdown(self) {
        let _ = self.control.send(ServerEvent::Shutdown).await;
        let _ = tokio::time::timeout(WAIT, self.handle).await;
    }

    async fn wait_for(&mut self, pred: impl Fn(&ServerStatus) -> bool) {
        tokio::time::timeout(WAIT, async {
            loop {
                if pred(&self.status.borrow_and_update()) {
                    return;
                }
                if self.status.changed().await.is_err() {
                    panic!("server stopped");
                }
            }
        })
        .await
        .expect("server status condition");
    }

    fn client(&self) -> ClientConfig {
        ClientConfig {
            url: self.url.clone(),
            connect_timeout_ms: 5_000,
            poll_interval_ms: 10,
            navigation_delay_ms: 50,
        }
    }
}

async fn start_server(expected_followers: usize) -> TestServer {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let transport = WsTransport::bind("127.0.0.1", 0).await.unwrap();
    let config = Config {
        session: SessionConfig {
            expected_followers,
            ..SessionConfig::default()
        },
        ..Config::default()
    };
    let mut server = Server::new(config, transport);
    let url = format!("ws://{}", server.local_addr());
    let status = server.status_receiver();
    let control = server.event_sender();
    let handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            eprintln!("server error: {e}");
        }
    });
    TestServer {
        url,
        status,
        control,
        handle,
    }
}

struct Running<T> {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<T, ClientError>>,
}

impl<T> Running<T> {
    async fn stop(self) -> Result<T, ClientError> {
        let Self { stop, task } = self;
        let _ = stop.send(());
        Self::join_task(task).await
    }

    async fn join(self) -> Result<T, ClientError> {
        Self::join_task(self.task).await
    }

    async fn join_task(task: JoinHandle<Result<T, ClientError>>) -> Result<T, ClientError> {
        tokio::time::timeout(WAIT, task)
            .await
            .expect("client should stop")
            .expect("client task panicked")
    }
}

fn spawn_follower(
    config: ClientConfig,
) -> (
    Running<FollowerSummary>,
    MockApplierHandle,
    mpsc::UnboundedReceiver<Change>,
) {
    let (applier, applied) = MockApplier::with_channel();
    let observer = applier.handle();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut follower = Follower::new(config, Box::new(applier));
        follower
            .run(async move {
                let _ = stopped.await;
            })
            .await
    });
    (Running { stop, task }, observer, applied)
}

fn spawn_leader(config: ClientConfig) -> (Running<LeaderSummary>, mpsc::Sender<Change>) {
    let (recorder, feed) = MockRecorder::new();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut leader = Leader::new(config, Box::new(recorder));
        leader
            .run(async move {
                let _ = stopped.await;
            })
            .await
    });
    (Running { stop, task }, feed)
}

async fn next_applied(rx: &mut mpsc::UnboundedReceiver<Change>) -> Change {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an applied change")
        .expect("applier dropped")
}

fn fill(text: &str, committed: bool) -> Change {
    Change {
        frame: FrameRef::main("page"),
        action: Action::Fill {
            selector: "#name".to_string(),
            text: text.to_string(),
            signals: vec![],
        },
        committed,
    }
}

fn click(selector: &str) -> Change {
    Change {
        frame: FrameRef::main("page"),
        action: Action::Click {
            selector: selector.to_string(),
            button: MouseButton::Left,
            modifiers: 0,
            click_count: 1,
            signals: vec![],
        },
        committed: true,
    }
}

#[tokio::test]
async fn leader_changes_are_applied_by_follower() {
    let mut server = start_server(1).await;

    let (follower, _observer, mut applied) = spawn_follower(server.client());
    server.wait_for(|s| s.follower_count == 1).await;

    let (leader, feed) = spawn_leader(server.client());
    for change in [
        fill("a", false),
        fill("a", false),
        fill("ab", true),
        click("#submit"),
    ] {
        feed.send(change).await.unwrap();
    }

    assert_eq!(next_applied(&mut applied).await, fill("a", false));
    assert_eq!(next_applied(&mut applied).await, fill("ab", true));
    assert_eq!(next_applied(&mut applied).await, click("#submit"));

    let summary = leader.stop().await.unwrap();
    assert_eq!(summary, LeaderSummary { recorded: 4, sent: 3 });

    // The leader leaving compromises the session; the follower must notice.
    let err = follower.join().await.unwrap_err();
    assert!(matches!(err, ClientError::SignalingServerDisconnected(_)));

    server.shutdown().await;
}

#[tokio::test]
async fn embedded_navigation_reaches_follower_after_fill() {
    let mut server = start_server(1).await;
    let (follower, _observer, mut applied) = spawn_follower(server.client());
    server.wait_for(|s| s.follower_count == 1).await;

    let (leader, feed) = spawn_leader(server.client());
    let navigating_fill = Change {
        frame: FrameRef::main("page"),
        action: Action::Fill {
            selector: "#q".to_string(),
            text: "rust".to_string(),
            signals: vec![Signal::Navigation {
                url: Some("https://search.test/?q=rust".to_string()),
            }],
        },
        committed: true,
    };
    feed.send(click("#q")).await.unwrap();
    feed.send(navigating_fill.clone()).await.unwrap();

    assert_eq!(next_applied(&mut applied).await, click("#q"));
    assert_eq!(next_applied(&mut applied).await, navigating_fill);
    assert_eq!(
        next_applied(&mut applied).await,
        Change::navigate(FrameRef::main("page"), "https://search.test/?q=rust")
    );

    follower.stop().await.unwrap();
    let _ = leader.stop().await;
    server.shutdown().await;
}

#[tokio::test]
async fn follower_skips_changes_it_cannot_apply() {
    let mut server = start_server(1).await;
    let (follower, observer, mut applied) = spawn_follower(server.client());
    observer.fail_on("#broken");
    server.wait_for(|s| s.follower_count == 1).await;

    let (leader, feed) = spawn_leader(server.client());
    feed.send(click("#broken")).await.unwrap();
    feed.send(click("#ok")).await.unwrap();

    assert_eq!(next_applied(&mut applied).await, click("#ok"));
    let summary = follower.stop().await.unwrap();
    assert_eq!(summary, FollowerSummary { applied: 1, failed: 1 });
    assert_eq!(observer.applied(), vec![click("#ok")]);

    let _ = leader.stop().await;
    server.shutdown().await;
}

#[tokio::test]
async fn leader_bootstrap_times_out_without_followers() {
    let server = start_server(1).await;
    let config = ClientConfig {
        connect_timeout_ms: 300,
        ..server.client()
    };
    let result = bootstrap(&config, Role::Leader).await;
    match result {
        Err(ClientError::SignalingServerDisconnected(reason)) => {
            assert!(reason.contains("CONNECTION_SUCCESS"), "{reason}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("bootstrap should time out"),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn second_leader_bootstrap_is_rejected() {
    let mut server = start_server(1).await;
    let (first, _feed) = spawn_leader(server.client());
    server.wait_for(|s| s.leader.is_some()).await;

    let result = bootstrap(&server.client(), Role::Leader).await;
    assert!(matches!(
        result,
        Err(ClientError::Rejected(RoleConflict::LeaderAlreadyConnected))
    ));

    let _ = first.stop().await;
    server.shutdown().await;
}

#[tokio::test]
async fn late_follower_compromises_strict_session() {
    let mut server = start_server(1).await;
    let (first, _observer, _applied) = spawn_follower(server.client());
    server.wait_for(|s| s.follower_count == 1).await;
    let (leader, _feed) = spawn_leader(server.client());
    server
        .wait_for(|s| s.state == lockstep_server::SessionState::Active)
        .await;

    let (late, _late_observer, _late_applied) = spawn_follower(server.client());

    for result in [leader.join().await.map(|_| ()), first.join().await.map(|_| ())] {
        assert!(matches!(
            result,
            Err(ClientError::SignalingServerDisconnected(_))
        ));
    }

    // The newcomer is the only party left, waiting for a new leader.
    server
        .wait_for(|s| s.follower_count == 1 && s.leader.is_none())
        .await;
    late.stop().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn server_shutdown_disconnects_follower() {
    let mut server = start_server(1).await;
    let (follower, _observer, _applied) = spawn_follower(server.client());
    server.wait_for(|s| s.follower_count == 1).await;

    server.shutdown().await;
    match follower.join().await {
        Err(ClientError::SignalingServerDisconnected(reason)) => {
            assert_eq!(reason, "server closed the session");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
