mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::{eventually, test_fleet_config, MockGateway, Script};
use tokenfleet::fleet::FleetSupervisor;
use tokenfleet::gateway::session::SessionState;
use tokenfleet::notify::LifecycleEvent;
use tokenfleet::token::Credential;

fn credentials(n: usize) -> Vec<Credential> {
    (1..=n)
        .map(|i| Credential::new(format!("fleet.test.token{i}")))
        .collect()
}

#[tokio::test]
async fn fleet_of_three_reports_all_healthy() {
    let gateway = MockGateway::spawn(Script::Normal, 100).await;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let supervisor = FleetSupervisor::new(credentials(3), test_fleet_config(&gateway.url), events_tx);

    let runner = tokio::spawn(supervisor.clone().start());

    assert!(
        eventually(Duration::from_secs(5), || {
            let sup = supervisor.clone();
            async move {
                let status = sup.status().await;
                status.total == 3 && status.connected == 3 && status.healthy == 3
            }
        })
        .await,
        "fleet never became fully healthy"
    );

    let status = supervisor.status().await;
    for snapshot in &status.sessions {
        assert!(snapshot.connected);
        assert!(snapshot.healthy);
        assert_eq!(snapshot.identity.as_ref().unwrap().username, "keeper");
    }
    // Index-aligned with the credential list.
    let indices: Vec<usize> = status.sessions.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);

    supervisor.stop_all().await;
    let status = supervisor.status().await;
    assert_eq!(status.connected, 0, "stop_all must leave no session Ready");
    assert_eq!(status.healthy, 0);

    assert!(
        eventually(Duration::from_secs(2), || {
            let r = &runner;
            async move { r.is_finished() }
        })
        .await,
        "start() did not return after stop_all"
    );

    let mut saw_started = false;
    let mut saw_stopped = false;
    while let Ok(event) = events_rx.try_recv() {
        match event {
            LifecycleEvent::FleetStarted { count } => {
                saw_started = true;
                assert_eq!(count, 3);
            }
            LifecycleEvent::FleetStopped => saw_stopped = true,
            _ => {}
        }
    }
    assert!(saw_started && saw_stopped);
}

#[tokio::test]
async fn stop_all_on_empty_fleet_is_a_no_op() {
    let gateway = MockGateway::spawn(Script::Normal, 100).await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let supervisor = FleetSupervisor::new(Vec::new(), test_fleet_config(&gateway.url), events_tx);

    let runner = tokio::spawn(supervisor.clone().start());
    supervisor.stop_all().await;
    supervisor.stop_all().await; // idempotent

    let status = supervisor.status().await;
    assert_eq!(status.total, 0);
    assert_eq!(status.connected, 0);

    assert!(
        eventually(Duration::from_secs(2), || {
            let r = &runner;
            async move { r.is_finished() }
        })
        .await
    );
}

#[tokio::test]
async fn staggered_start_spaces_out_handshakes() {
    let gateway = MockGateway::spawn(Script::Normal, 100).await;
    let mut config = test_fleet_config(&gateway.url);
    config.stagger = Duration::from_millis(100);
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let supervisor = FleetSupervisor::new(credentials(3), config, events_tx);

    tokio::spawn(supervisor.clone().start());

    assert!(
        eventually(Duration::from_secs(5), || {
            let count = gateway.connect_count();
            async move { count >= 3 }
        })
        .await,
        "fleet never opened all connections"
    );

    let times = gateway.connect_times();
    for pair in times.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        // Launches are 100ms apart; allow a little scheduling slack on the
        // connect side.
        assert!(
            gap >= Duration::from_millis(80),
            "handshakes spaced {gap:?} apart, expected at least the stagger interval"
        );
    }

    supervisor.stop_all().await;
}

#[tokio::test]
async fn restart_replaces_one_session_leaving_others_alone() {
    let gateway = MockGateway::spawn(Script::Normal, 100).await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let supervisor = FleetSupervisor::new(credentials(3), test_fleet_config(&gateway.url), events_tx);

    tokio::spawn(supervisor.clone().start());

    assert!(
        eventually(Duration::from_secs(5), || {
            let sup = supervisor.clone();
            async move { sup.status().await.connected == 3 }
        })
        .await
    );

    let old_two = supervisor.session(2).await.unwrap();
    let old_one = supervisor.session(1).await.unwrap();
    let old_three = supervisor.session(3).await.unwrap();

    supervisor.restart(2).await;

    let new_two = supervisor.session(2).await.unwrap();
    assert!(
        !Arc::ptr_eq(&old_two, &new_two),
        "restart must construct a fresh session record"
    );
    assert_eq!(new_two.index, 2);
    assert!(old_two.stop_requested());
    assert_eq!(new_two.reconnect_attempts(), 0, "fresh session, fresh counter");

    // Same credential, back online.
    assert!(
        eventually(Duration::from_secs(5), || {
            let s = new_two.clone();
            async move { s.state() == SessionState::Ready }
        })
        .await,
        "replacement session never came back online"
    );

    // Sessions 1 and 3 were untouched.
    assert!(Arc::ptr_eq(&old_one, &supervisor.session(1).await.unwrap()));
    assert!(Arc::ptr_eq(&old_three, &supervisor.session(3).await.unwrap()));
    assert_eq!(old_one.state(), SessionState::Ready);
    assert_eq!(old_three.state(), SessionState::Ready);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn shutdown_racing_a_restart_leaves_no_session_alive() {
    let gateway = MockGateway::spawn(Script::Normal, 100).await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let supervisor = FleetSupervisor::new(credentials(1), test_fleet_config(&gateway.url), events_tx);

    tokio::spawn(supervisor.clone().start());

    assert!(
        eventually(Duration::from_secs(5), || {
            let sup = supervisor.clone();
            async move { sup.status().await.connected == 1 }
        })
        .await
    );

    // The restart's grace sleep overlaps the shutdown, so stop_all drains
    // the fleet while a replacement is still in flight. Whichever side wins
    // the slot lock, no replacement may survive the shutdown.
    tokio::join!(supervisor.restart(1), supervisor.stop_all());

    let status = supervisor.status().await;
    assert_eq!(status.connected, 0, "a replacement session survived stop_all");
    assert_eq!(status.healthy, 0);

    let connects = gateway.connect_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        gateway.connect_count(),
        connects,
        "a session kept reconnecting after stop_all returned"
    );
    assert_ne!(
        supervisor.session(1).await.unwrap().state(),
        SessionState::Ready
    );
}

#[tokio::test]
async fn fleet_status_serializes_for_the_health_log() {
    let gateway = MockGateway::spawn(Script::Normal, 100).await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let supervisor = FleetSupervisor::new(credentials(2), test_fleet_config(&gateway.url), events_tx);

    tokio::spawn(supervisor.clone().start());
    assert!(
        eventually(Duration::from_secs(5), || {
            let sup = supervisor.clone();
            async move { sup.status().await.healthy == 2 }
        })
        .await
    );

    let status = supervisor.status().await;
    let json: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&status).unwrap()).unwrap();
    assert_eq!(json["total"], 2);
    assert_eq!(json["healthy"], 2);
    assert_eq!(json["sessions"][0]["index"], 1);
    assert_eq!(json["sessions"][0]["connected"], true);
    assert_eq!(json["sessions"][1]["identity"]["username"], "keeper");

    supervisor.stop_all().await;
}

#[tokio::test]
async fn monitor_restarts_a_dead_session() {
    // The single session's first connection is refused and its budget is one
    // attempt, so its driver task dies; the monitor must relaunch it and the
    // second connection then succeeds.
    let gateway = MockGateway::spawn(Script::RefuseFirst(2), 100).await;
    let mut config = test_fleet_config(&gateway.url);
    config.gateway.max_reconnect_attempts = 1;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let supervisor = FleetSupervisor::new(credentials(1), config, events_tx);

    tokio::spawn(supervisor.clone().start());

    assert!(
        eventually(Duration::from_secs(10), || {
            let sup = supervisor.clone();
            async move {
                let status = sup.status().await;
                status.connected == 1 && status.healthy == 1
            }
        })
        .await,
        "monitor never brought the dead session back"
    );

    let session = supervisor.session(1).await.unwrap();
    assert!(!session.stop_requested());

    let mut gave_up = 0;
    while let Ok(event) = events_rx.try_recv() {
        if matches!(event, LifecycleEvent::SessionGaveUp { .. }) {
            gave_up += 1;
        }
    }
    assert!(gave_up >= 1, "the first incarnation must have given up");

    supervisor.stop_all().await;
}
