mod common;

use avatar_sync::networking::protocol::{decode_request, Request, TargetName};
use avatar_sync::networking::{ConnectionState, SyncClient};
use avatar_sync::world::{ChannelNotifier, InMemoryScene, SceneHost, SyncEventKind};
use common::{wait_until, Handshake, LoopbackRelay, Reply};
use crossbeam_channel::unbounded;
use glam::{Quat, Vec3};
use std::collections::BTreeSet;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

fn scene() -> InMemoryScene {
    let mut scene = InMemoryScene::new();
    for id in ["Alice", "Bob", "Carol", "Dave"] {
        scene.add_full_rig(id);
    }
    scene.wear("Alice", "shoe1");
    scene.wear("Alice", "shoe2");
    scene
}

/// Relay that drops pose requests of two parts or fewer without replying
fn strict_relay(frame: &str) -> Reply {
    if frame == "S" || frame.split(';').count() > 2 {
        Reply::Respond("none".to_string())
    } else {
        Reply::Ignore
    }
}

/// Tick for `duration` and return every request the relay saw
fn run_for(
    client: &mut SyncClient<InMemoryScene, ChannelNotifier>,
    relay: &LoopbackRelay,
    duration: Duration,
) -> Vec<String> {
    wait_until(duration, || {
        client.tick();
        false
    });
    std::thread::sleep(Duration::from_millis(100));
    relay.drain_requests()
}

#[test]
fn test_identical_wardrobe_sent_once() {
    let relay = LoopbackRelay::answering_none();
    let (notifier, _events) = ChannelNotifier::new();
    let mut client = SyncClient::new(relay.settings(Some("Alice")), scene(), notifier).unwrap();
    client.connect().unwrap();

    client.tick();
    let first = relay.next_request(WAIT).unwrap();
    client.tick();
    let second = relay.next_request(WAIT).unwrap();

    let payloads = [first, second];
    let clothes_groups: usize = payloads.iter().map(|p| p.matches(";CLOTHES").count()).sum();
    assert_eq!(clothes_groups, 1);
    assert!(payloads[0].ends_with(";CLOTHES,shoe1,shoe2"));

    // the second request still carries the pose
    match decode_request(&payloads[1]).unwrap() {
        Request::Pose(update) => {
            assert_eq!(update.avatar_id, "Alice");
            assert!(!update.targets.is_empty());
            assert!(update.wardrobe.is_none());
        }
        Request::Spectator => panic!("expected a pose update"),
    }

    client.disconnect().unwrap();
}

#[test]
fn test_changed_wardrobe_is_sent_again() {
    let relay = LoopbackRelay::answering_none();
    let (notifier, _events) = ChannelNotifier::new();
    let mut client = SyncClient::new(relay.settings(Some("Alice")), scene(), notifier).unwrap();
    client.connect().unwrap();

    client.tick();
    relay.next_request(WAIT).unwrap();
    client.host_mut().take_off("Alice", "shoe2");
    client.tick();
    let second = relay.next_request(WAIT).unwrap();
    assert!(second.ends_with(";CLOTHES,shoe1"));

    client.disconnect().unwrap();
}

#[test]
fn test_spectator_receives_without_publishing() {
    let relay = LoopbackRelay::start(Handshake::Accept, |_| {
        Reply::Respond("Bob,hc,1,2,3,1,0,0,0".to_string())
    });
    let (notifier, _events) = ChannelNotifier::new();
    let mut settings = relay.settings(None);
    settings.spectator_mode = true;
    let mut client = SyncClient::new(settings, scene(), notifier).unwrap();
    client.connect().unwrap();

    client.tick();
    assert_eq!(relay.next_request(WAIT).as_deref(), Some("S"));
    assert!(wait_until(WAIT, || {
        client.tick();
        client.host().live_transform("Bob", "headControl").map(|t| t.0) == Some(Vec3::new(1.0, 2.0, 3.0))
    }));

    client.disconnect().unwrap();
}

#[test]
fn test_remote_pose_is_applied() {
    let relay = LoopbackRelay::start(Handshake::Accept, |_| {
        Reply::Respond("Bob,hc,1.5,2,3,0,0,1,0;Bob,zz,1,1,1,1,0,0,0;Bob,lh,4,5".to_string())
    });
    let (notifier, _events) = ChannelNotifier::new();
    let mut client = SyncClient::new(relay.settings(Some("Alice")), scene(), notifier).unwrap();
    client.connect().unwrap();

    let expected = (Vec3::new(1.5, 2.0, 3.0), Quat::from_xyzw(0.0, 1.0, 0.0, 0.0));
    assert!(wait_until(WAIT, || {
        client.tick();
        client.host().live_transform("Bob", "headControl") == Some(expected)
    }));

    // malformed groups left the rest of Bob alone
    assert_eq!(
        client.host().live_transform("Bob", "lHandControl"),
        Some((Vec3::ZERO, Quat::IDENTITY))
    );
    let bob = client.avatars().iter().find(|a| a.id == "Bob").unwrap();
    assert_eq!(bob.target(TargetName::Head).unwrap().position, expected.0);

    client.disconnect().unwrap();
}

#[test]
fn test_roster_reports_leave_then_join() {
    let (script_tx, script_rx) = unbounded::<String>();
    let relay = LoopbackRelay::start(Handshake::Accept, move |_| {
        match script_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(frame) => Reply::Respond(frame),
            Err(_) => Reply::Ignore,
        }
    });
    let (notifier, events) = ChannelNotifier::new();
    let mut client = SyncClient::new(relay.settings(Some("Alice")), scene(), notifier).unwrap();
    client.connect().unwrap();

    let frames = [
        ("Bob,hc,0,0,0,1,0,0,0;Carol,hc,0,0,0,1,0,0,0", vec!["Bob", "Carol"]),
        ("Bob,hc,0,0,0,1,0,0,0", vec!["Bob"]),
        ("Bob,hc,0,0,0,1,0,0,0;Dave,CLOTHES,hat", vec!["Bob", "Dave"]),
    ];
    for (frame, online) in frames {
        script_tx.send(frame.to_string()).unwrap();
        let expected: BTreeSet<&str> = online.into_iter().collect();
        assert!(wait_until(WAIT, || {
            client.tick();
            client.online().collect::<BTreeSet<&str>>() == expected
        }));
    }

    let roster_events: Vec<SyncEventKind> = events
        .try_iter()
        .map(|e| e.kind)
        .filter(|k| {
            matches!(
                k,
                SyncEventKind::PlayerJoined { .. } | SyncEventKind::PlayerLeft { .. }
            )
        })
        .collect();
    assert_eq!(
        roster_events,
        vec![
            SyncEventKind::PlayerLeft { avatar_id: "Carol".to_string() },
            SyncEventKind::PlayerJoined { avatar_id: "Dave".to_string() },
        ]
    );

    client.disconnect().unwrap();
    // unblock the relay's pending responses
    drop(script_tx);
}

#[test]
fn test_remote_wardrobe_is_reconciled() {
    let relay = LoopbackRelay::start(Handshake::Accept, |_| {
        Reply::Respond("Bob,hc,0,0,0,1,0,0,0;Bob,CLOTHES,hat,boots".to_string())
    });
    let (notifier, _events) = ChannelNotifier::new();
    let mut settings = relay.settings(Some("Alice"));
    settings.network.wardrobe_reconcile_interval_ticks = 2;
    let mut scene = scene();
    scene.wear("Bob", "scarf");
    let mut client = SyncClient::new(settings, scene, notifier).unwrap();
    client.connect().unwrap();

    let expected: BTreeSet<String> = ["boots", "hat"].iter().map(|s| s.to_string()).collect();
    assert!(wait_until(WAIT, || {
        client.tick();
        client.host().worn_items("Bob") == expected
    }));
    let bob = client.avatars().iter().find(|a| a.id == "Bob").unwrap();
    assert_eq!(bob.wardrobe.worn, expected);
    // our own wardrobe is never rewritten from the relay
    assert_eq!(client.host().worn_items("Alice").len(), 2);

    client.disconnect().unwrap();
}

#[test]
fn test_in_flight_requests_are_capped() {
    let relay = LoopbackRelay::start(Handshake::Accept, |_| Reply::Ignore);
    let (notifier, _events) = ChannelNotifier::new();
    let mut settings = relay.settings(Some("Alice"));
    settings.network.max_in_flight = 3;
    settings.network.response_timeout_ms = 10_000;
    let mut client = SyncClient::new(settings, scene(), notifier).unwrap();
    client.connect().unwrap();

    wait_until(Duration::from_millis(500), || {
        client.tick();
        false
    });

    let mut received = 0;
    while relay.next_request(Duration::from_millis(200)).is_some() {
        received += 1;
    }
    assert_eq!(received, 3);
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect().unwrap();
}

#[test]
fn test_single_target_requests_keep_their_wardrobe() {
    let relay = LoopbackRelay::start(Handshake::Accept, strict_relay);
    let (notifier, _events) = ChannelNotifier::new();
    let mut settings = relay.settings(Some("Alice"));
    settings.network.max_in_flight = 3;
    settings.targets.set_all(false);
    settings.targets.set(TargetName::Head, true);
    let mut client = SyncClient::new(settings, scene(), notifier).unwrap();
    client.connect().unwrap();

    let requests = run_for(&mut client, &relay, Duration::from_secs(1));
    assert!(requests.len() > 3, "only {} requests reached the relay", requests.len());
    for request in &requests {
        assert_eq!(request.split(';').count(), 3, "unanswerable request {:?}", request);
        assert!(request.ends_with(";CLOTHES,shoe1,shoe2"));
    }
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.telemetry().map_or(0, |t| t.expired_requests), 0);

    client.disconnect().unwrap();
}

#[test]
fn test_idle_avatar_keeps_being_answered() {
    let relay = LoopbackRelay::start(Handshake::Accept, strict_relay);
    let (notifier, _events) = ChannelNotifier::new();
    let mut settings = relay.settings(Some("Alice"));
    settings.network.max_in_flight = 3;
    settings.send_only_changed = true;
    let mut client = SyncClient::new(settings, scene(), notifier).unwrap();
    client.connect().unwrap();

    let requests = run_for(&mut client, &relay, Duration::from_secs(1));
    assert!(requests.len() > 3, "only {} requests reached the relay", requests.len());
    // after the first request nothing moves, so one target is repeated
    for request in &requests[1..] {
        assert_eq!(request.split(';').count(), 3, "unanswerable request {:?}", request);
    }
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect().unwrap();
}

#[test]
fn test_unanswered_requests_expire() {
    let relay = LoopbackRelay::start(Handshake::Accept, |_| Reply::Ignore);
    let (notifier, _events) = ChannelNotifier::new();
    let mut settings = relay.settings(Some("Alice"));
    settings.network.max_in_flight = 3;
    settings.network.response_timeout_ms = 100;
    let mut client = SyncClient::new(settings, scene(), notifier).unwrap();
    client.connect().unwrap();

    let requests = run_for(&mut client, &relay, Duration::from_secs(1));
    assert!(requests.len() > 3, "only {} requests reached the relay", requests.len());
    assert!(wait_until(WAIT, || {
        client.tick();
        client.telemetry().map_or(false, |t| t.expired_requests > 0)
    }));
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect().unwrap();
}

#[test]
fn test_telemetry_is_published() {
    let relay = LoopbackRelay::answering_none();
    let (notifier, events) = ChannelNotifier::new();
    let mut client = SyncClient::new(relay.settings(Some("Alice")), scene(), notifier).unwrap();
    client.connect().unwrap();

    assert!(wait_until(WAIT, || {
        client.tick();
        client.telemetry().map_or(false, |t| t.responses > 0)
    }));
    let snapshot = client.telemetry().unwrap();
    assert!(snapshot.avg_in_flight >= 1.0);
    assert!(events
        .try_iter()
        .any(|e| matches!(e.kind, SyncEventKind::Telemetry(_))));

    client.disconnect().unwrap();
}
