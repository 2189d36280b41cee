use std::time::Duration;

use watchparty_config::NegotiationConfig;

use crate::capture::{LocalStream, StreamHandle};
use crate::directory::MemoryDirectory;
use crate::protocol::{SessionDescription, SignalKind};
use crate::testing::{candidate, manager_for, pump, FakeTransportFactory};
use crate::transport::{IceConnectionState, PeerConnectionState, SignalingState};

use super::*;

const ROOM: &str = "room-1";

fn policy() -> NegotiationConfig {
    NegotiationConfig::default()
}

fn statuses(updates: &[PeerUpdate]) -> Vec<ConnectionState> {
    updates
        .iter()
        .filter_map(|u| match u {
            PeerUpdate::Status { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn replacing_keeps_one_connection_per_remote() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, _rx) = manager_for(&dir, ROOM, "guest", &factory, policy());

    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();
    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();

    assert_eq!(mgr.len().await, 1);
    let created = factory.for_remote("host");
    assert_eq!(created.len(), 2);
    assert!(created[0].is_closed());
    assert!(!created[1].is_closed());
}

#[tokio::test]
async fn close_and_close_all_are_idempotent() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, _rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    mgr.create_or_replace("b", Role::Host, LocalMedia::None).await.unwrap();

    mgr.close("a").await;
    mgr.close("a").await;
    mgr.close_all().await;
    mgr.close_all().await;

    assert!(mgr.is_empty().await);
    for t in factory.created() {
        assert!(t.is_closed());
        assert_eq!(t.close_count(), 1);
    }
}

#[tokio::test]
async fn closing_an_old_generation_spares_the_new_one() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, _rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    let old = mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    let new = mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    mgr.close_generation("a", old).await;
    assert_eq!(mgr.len().await, 1);
    assert!(!factory.latest("a").is_closed());

    mgr.close_generation("a", new).await;
    assert!(mgr.is_empty().await);
    assert!(factory.latest("a").is_closed());
}

#[tokio::test]
async fn offer_then_answer_completes_negotiation() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, _rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    mgr.send_offer("a", false).await.unwrap();
    assert!(mgr.awaiting_answer("a").await);
    assert_eq!(mgr.state("a").await, Some(ConnectionState::OfferSent));

    let sent = dir.sent_signals(ROOM).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, SignalKind::Offer);
    assert_eq!(sent[0].to, "a");
    assert_eq!(sent[0].from, "host");

    let applied = mgr
        .apply_answer("a", SessionDescription::answer("answer-a"))
        .await
        .unwrap();
    assert!(applied);
    assert_eq!(mgr.state("a").await, Some(ConnectionState::Negotiating));
    assert_eq!(factory.latest("a").signaling(), SignalingState::Stable);
}

#[tokio::test]
async fn duplicate_answer_is_a_no_op() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, _rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    mgr.send_offer("a", false).await.unwrap();
    mgr.apply_answer("a", SessionDescription::answer("x")).await.unwrap();

    let again = mgr
        .apply_answer("a", SessionDescription::answer("x"))
        .await
        .unwrap();
    assert!(!again);
    assert_eq!(mgr.state("a").await, Some(ConnectionState::Negotiating));
}

#[tokio::test]
async fn answer_without_offer_is_ignored() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, _rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    let applied = mgr
        .apply_answer("a", SessionDescription::answer("x"))
        .await
        .unwrap();
    assert!(!applied);
    assert_eq!(mgr.state("a").await, Some(ConnectionState::New));
    assert!(!mgr
        .apply_answer("nobody", SessionDescription::answer("x"))
        .await
        .unwrap());
}

#[tokio::test]
async fn early_candidates_are_buffered_until_remote_description() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, _rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    assert_eq!(
        mgr.add_ice_candidate("a", candidate(1)).await,
        CandidateOutcome::NoConnection
    );

    mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    mgr.send_offer("a", false).await.unwrap();
    assert_eq!(
        mgr.add_ice_candidate("a", candidate(1)).await,
        CandidateOutcome::Buffered
    );
    assert!(factory.latest("a").applied_candidates().is_empty());

    mgr.apply_answer("a", SessionDescription::answer("x")).await.unwrap();
    assert_eq!(factory.latest("a").applied_candidates(), vec![candidate(1)]);
    assert_eq!(
        mgr.add_ice_candidate("a", candidate(2)).await,
        CandidateOutcome::Applied
    );
}

#[tokio::test]
async fn guest_answers_offer_through_relay() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, _rx) = manager_for(&dir, ROOM, "guest", &factory, policy());

    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();
    assert_eq!(
        mgr.add_ice_candidate("host", candidate(7)).await,
        CandidateOutcome::Buffered
    );
    mgr.accept_offer("host", SessionDescription::offer("offer-1"))
        .await
        .unwrap();

    assert_eq!(mgr.state("host").await, Some(ConnectionState::Negotiating));
    assert_eq!(factory.latest("host").applied_candidates(), vec![candidate(7)]);

    let sent = dir.sent_signals(ROOM).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, SignalKind::Answer);
    assert_eq!(sent[0].to, "host");
    assert_eq!(
        sent[0].description().unwrap(),
        SessionDescription::answer("answer-host")
    );
}

#[tokio::test]
async fn local_candidates_are_relayed_to_remote() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, mut rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    factory.latest("a").discover_candidate(candidate(3));
    pump(&mgr, &mut rx).await;

    let sent = dir.sent_signals(ROOM).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, SignalKind::IceCandidate);
    assert_eq!(sent[0].candidate().unwrap(), candidate(3));
}

#[tokio::test]
async fn ice_failure_restarts_exactly_once_before_failing() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, mut rx) = manager_for(&dir, ROOM, "guest", &factory, policy());

    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();
    mgr.accept_offer("host", SessionDescription::offer("o"))
        .await
        .unwrap();
    pump(&mgr, &mut rx).await;

    let transport = factory.latest("host");
    transport.ice(IceConnectionState::New);
    transport.ice(IceConnectionState::Checking);
    transport.ice(IceConnectionState::Failed);
    let updates = pump(&mgr, &mut rx).await;

    assert_eq!(transport.restart_count(), 1);
    assert_eq!(statuses(&updates), vec![ConnectionState::Restarting]);
    assert!(!updates
        .iter()
        .any(|u| matches!(u, PeerUpdate::Renegotiate { .. })));

    transport.ice(IceConnectionState::Checking);
    transport.ice(IceConnectionState::Failed);
    let updates = pump(&mgr, &mut rx).await;

    assert_eq!(transport.restart_count(), 1);
    assert_eq!(statuses(&updates), vec![ConnectionState::Failed]);
    assert_eq!(mgr.state("host").await, Some(ConnectionState::Failed));
    assert!(transport.is_closed());
}

#[tokio::test]
async fn restart_recovers_when_ice_reconnects() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, mut rx) = manager_for(&dir, ROOM, "guest", &factory, policy());

    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();
    let transport = factory.latest("host");
    transport.ice(IceConnectionState::Failed);
    transport.ice(IceConnectionState::Connected);
    let updates = pump(&mgr, &mut rx).await;

    assert_eq!(
        statuses(&updates),
        vec![
            ConnectionState::New,
            ConnectionState::Restarting,
            ConnectionState::Connected
        ]
    );
}

#[tokio::test]
async fn restart_that_times_out_is_terminal() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let quick = NegotiationConfig {
        max_ice_restarts: 1,
        restart_timeout_ms: 10,
    };
    let (mgr, mut rx) = manager_for(&dir, ROOM, "guest", &factory, quick);

    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();
    factory.latest("host").ice(IceConnectionState::Failed);
    pump(&mgr, &mut rx).await;
    assert_eq!(mgr.state("host").await, Some(ConnectionState::Restarting));

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let updates = mgr.handle_event(event).await;
    assert_eq!(statuses(&updates), vec![ConnectionState::Failed]);
}

#[tokio::test]
async fn host_restart_requests_renegotiation() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, mut rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    mgr.send_offer("a", false).await.unwrap();
    mgr.apply_answer("a", SessionDescription::answer("x")).await.unwrap();
    pump(&mgr, &mut rx).await;

    factory.latest("a").ice(IceConnectionState::Failed);
    let updates = pump(&mgr, &mut rx).await;
    assert!(updates.contains(&PeerUpdate::Renegotiate { remote: "a".into() }));

    mgr.send_offer("a", true).await.unwrap();
    assert_eq!(mgr.state("a").await, Some(ConnectionState::Restarting));
    assert!(mgr.awaiting_answer("a").await);
    let offers: Vec<_> = dir
        .sent_signals(ROOM)
        .await
        .into_iter()
        .filter(|s| s.kind == SignalKind::Offer)
        .collect();
    assert_eq!(offers.len(), 2);
    assert!(offers[1].description().unwrap().sdp.ends_with("-restart"));
}

#[tokio::test]
async fn events_from_replaced_connection_are_dropped() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, mut rx) = manager_for(&dir, ROOM, "guest", &factory, policy());

    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();
    let old = factory.latest("host");
    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();
    pump(&mgr, &mut rx).await;

    old.ice(IceConnectionState::Connected);
    old.remote_track();
    old.discover_candidate(candidate(1));
    let updates = pump(&mgr, &mut rx).await;

    assert!(updates.is_empty());
    assert_eq!(mgr.state("host").await, Some(ConnectionState::New));
    assert!(dir.sent_signals(ROOM).await.is_empty());
}

#[tokio::test]
async fn remote_track_is_reported() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, mut rx) = manager_for(&dir, ROOM, "guest", &factory, policy());

    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();
    factory.latest("host").remote_track();
    let updates = pump(&mgr, &mut rx).await;
    assert!(updates
        .iter()
        .any(|u| matches!(u, PeerUpdate::Track { remote, .. } if remote == "host")));
}

#[tokio::test]
async fn connection_failure_without_restarts_left_is_terminal() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let none = NegotiationConfig {
        max_ice_restarts: 0,
        ..NegotiationConfig::default()
    };
    let (mgr, mut rx) = manager_for(&dir, ROOM, "guest", &factory, none);

    mgr.create_or_replace("host", Role::Guest, LocalMedia::None)
        .await
        .unwrap();
    factory.latest("host").connection(PeerConnectionState::Failed);
    pump(&mgr, &mut rx).await;
    assert_eq!(mgr.state("host").await, Some(ConnectionState::Failed));
    assert_eq!(factory.latest("host").restart_count(), 0);
}

#[tokio::test]
async fn owned_media_stops_on_close_shared_does_not() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, _rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    let shared = StreamHandle::new("shared", Vec::new());
    let owned = StreamHandle::new("owned", Vec::new());
    let shared_dyn: std::sync::Arc<dyn LocalStream> = shared.clone();
    let owned_dyn: std::sync::Arc<dyn LocalStream> = owned.clone();

    mgr.create_or_replace("a", Role::Host, LocalMedia::Shared(shared_dyn))
        .await
        .unwrap();
    mgr.create_or_replace("b", Role::Host, LocalMedia::Owned(owned_dyn))
        .await
        .unwrap();
    assert!(factory.latest("a").has_local_stream());

    mgr.close_all().await;
    assert!(!shared.is_stopped());
    assert!(owned.is_stopped());
}

#[tokio::test]
async fn closed_status_is_published() {
    let dir = MemoryDirectory::new();
    let factory = FakeTransportFactory::new();
    let (mgr, mut rx) = manager_for(&dir, ROOM, "host", &factory, policy());

    mgr.create_or_replace("a", Role::Host, LocalMedia::None).await.unwrap();
    mgr.close("a").await;
    let updates = pump(&mgr, &mut rx).await;
    assert_eq!(
        statuses(&updates),
        vec![ConnectionState::New, ConnectionState::Closed]
    );
}
