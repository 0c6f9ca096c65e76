use std::sync::Arc;
use std::time::Duration;

use multipoint_transport::connections::DummyFaults;
use multipoint_transport::connections::DummyMediaEngine;
use multipoint_transport::connections::DUMMY_LOCAL_CANDIDATES;
use multipoint_transport::core::media::IceCandidate;
use multipoint_transport::core::media::MediaConnectionState;
use multipoint_transport::core::media::MediaConstraint;
use multipoint_transport::core::media::TrackKind;

use super::prepare_node;
use super::prepare_node_with;
use super::prepare_pair;
use super::LoopbackServer;
use super::Node;
use crate::comm::callback::CommEvent;
use crate::comm::record::CallState;
use crate::comm::record::CallTarget;
use crate::config::CommConfig;
use crate::error::Error;
use crate::field::Leg;
use crate::identity::Device;
use crate::identity::Identity;
use crate::identity::StaticIdentityService;
use crate::message::FieldDescriptor;
use crate::message::Signaling;
use crate::message::SignalingAction;

async fn connect(alice: &mut Node, bob: &mut Node, constraint: MediaConstraint) {
    alice
        .comm
        .make_call(CallTarget::Identity(bob.identity.clone()), constraint)
        .await
        .unwrap();
    bob.wait_for(|e| matches!(e, CommEvent::NewCall(_))).await;
    bob.comm.answer_call(constraint).await.unwrap();
    alice
        .wait_for(|e| matches!(e, CommEvent::Connected(_)))
        .await;
}

#[tokio::test]
async fn test_private_call_happy_path() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);
    let constraint = MediaConstraint::audio_only();

    let record = alice
        .comm
        .make_call(CallTarget::Identity(bob.identity.clone()), constraint)
        .await
        .unwrap();
    assert!(record.outgoing);
    assert!(record.state.is_pending());
    assert_eq!(record.peer.as_ref().map(|p| p.id.as_str()), Some("10002"));
    assert_eq!(server.count(SignalingAction::ApplyCall), 1);
    assert_eq!(server.count(SignalingAction::Offer), 1);

    let CommEvent::NewCall(incoming) = bob.wait_for(|e| matches!(e, CommEvent::NewCall(_))).await
    else {
        unreachable!()
    };
    assert!(!incoming.outgoing);
    assert!(incoming.has_pending_offer());
    assert_eq!(incoming.caller_constraint, Some(constraint));
    assert_eq!(incoming.field_id(), Some("10001"));

    let answered = bob.comm.answer_call(constraint).await.unwrap();
    assert_eq!(answered.state, CallState::Connected);
    assert!(answered.answer_time.is_some());
    assert_eq!(server.count_from("10002", SignalingAction::Answer), 1);

    alice.wait_for(|e| matches!(e, CommEvent::Ringing(_))).await;
    let CommEvent::Connected(connected) = alice
        .wait_for(|e| matches!(e, CommEvent::Connected(_)))
        .await
    else {
        unreachable!()
    };
    assert_eq!(connected.callee_constraint, Some(constraint));
    assert!(connected.is_active());

    alice
        .wait_for(|e| matches!(e, CommEvent::MediaConnected { .. }))
        .await;
    bob.wait_for(|e| matches!(e, CommEvent::MediaConnected { .. }))
        .await;

    assert_eq!(alice.active_field().num_devices(), 1);
    assert_eq!(bob.active_field().num_devices(), 1);
    assert_eq!(alice.engine.open_sessions(), 1);
    assert_eq!(bob.engine.open_sessions(), 1);

    alice.comm.hangup_call().await.unwrap();
    let CommEvent::Bye(ended) = bob.wait_for(|e| matches!(e, CommEvent::Bye(_))).await else {
        unreachable!()
    };
    assert_eq!(ended.state, CallState::Ended);
    assert!(ended.end_time.is_some());
    assert!(!ended.is_active());

    assert!(alice.comm.call_record().is_none());
    assert!(bob.comm.call_record().is_none());
    assert_eq!(alice.comm.num_fields(), 0);
    assert_eq!(bob.comm.num_fields(), 0);
    assert_eq!(alice.engine.open_sessions(), 0);
    assert_eq!(bob.engine.open_sessions(), 0);
    assert_eq!(alice.engine.live_streams(), 0);
}

#[tokio::test]
async fn test_busy_rejection() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);
    let mut carol = prepare_node(&server, "10003", "Carol");
    carol.know(&alice);
    alice.know(&carol);

    connect(&mut alice, &mut bob, MediaConstraint::audio_only()).await;
    let busy_seq = alice.comm.call_record().unwrap().seq;

    carol
        .comm
        .make_call(
            CallTarget::Identity(alice.identity.clone()),
            MediaConstraint::audio_only(),
        )
        .await
        .unwrap();
    let CommEvent::Busy(rejected) = carol.wait_for(|e| matches!(e, CommEvent::Busy(_))).await
    else {
        unreachable!()
    };
    assert_eq!(rejected.state, CallState::Busy);
    assert_eq!(rejected.last_error, Some(Error::CalleeBusy));
    assert!(carol
        .seen()
        .iter()
        .all(|e| !matches!(e, CommEvent::Connected(_))));
    assert!(carol.comm.call_record().is_none());
    assert_eq!(carol.engine.open_sessions(), 0);

    assert_eq!(server.count_from("10001", SignalingAction::Busy), 1);
    let record = alice.comm.call_record().unwrap();
    assert_eq!(record.seq, busy_seq);
    assert_eq!(record.state, CallState::Connected);
    assert_eq!(alice.comm.num_fields(), 1);
    assert_eq!(alice.engine.open_sessions(), 1);
}

#[tokio::test]
async fn test_second_call_fails_fast() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);
    let carol = prepare_node(&server, "10003", "Carol");
    alice.know(&carol);

    connect(&mut alice, &mut bob, MediaConstraint::audio_only()).await;
    let requests = server.requests();

    let err = alice
        .comm
        .make_call(
            CallTarget::Identity(carol.identity.clone()),
            MediaConstraint::audio_only(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, Error::CallerBusy);
    assert_eq!(server.requests(), requests);
    assert_eq!(alice.comm.call_record().unwrap().state, CallState::Connected);
}

#[tokio::test]
async fn test_candidates_before_answer_are_replayed() {
    let server = LoopbackServer::new();
    let (alice, mut bob) = prepare_pair(&server);
    let constraint = MediaConstraint::audio_only();

    alice
        .comm
        .make_call(CallTarget::Identity(bob.identity.clone()), constraint)
        .await
        .unwrap();
    bob.wait_for(|e| matches!(e, CommEvent::NewCall(_))).await;
    // let alice's listener forward her gathered candidates
    tokio::time::sleep(Duration::from_millis(200)).await;

    let field = bob.active_field();
    assert_eq!(field.num_devices(), 0);
    assert_eq!(field.early_candidates(&Leg::Outbound), DUMMY_LOCAL_CANDIDATES);

    bob.comm.answer_call(constraint).await.unwrap();
    assert_eq!(field.early_candidates(&Leg::Outbound), 0);

    let handle = field
        .outbound_device()
        .unwrap()
        .handle()
        .await
        .unwrap();
    let applied = bob.engine.applied_candidates(handle);
    assert_eq!(applied.len(), DUMMY_LOCAL_CANDIDATES);
    assert!(applied[0].candidate.starts_with("candidate:0 "));
    assert!(applied[1].candidate.starts_with("candidate:1 "));
}

#[tokio::test(start_paused = true)]
async fn test_late_candidates_do_not_reach_the_next_call() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);
    let constraint = MediaConstraint::audio_only();

    connect(&mut alice, &mut bob, constraint).await;
    let descriptor = alice.active_field().descriptor();
    bob.comm.hangup_call().await.unwrap();
    alice.wait_for(|e| matches!(e, CommEvent::Bye(_))).await;
    assert_eq!(bob.comm.num_fields(), 0);

    let late = Signaling::new(
        SignalingAction::Candidate,
        descriptor,
        alice.identity.clone(),
        Device::new("Alice-laptop", "linux"),
    )
    .with_candidate(IceCandidate::new("candidate:99 1 udp 1 6.6.6.6 9 typ host"));
    bob.comm.handle_signaling(&late).await.unwrap();
    assert_eq!(bob.comm.num_fields(), 0);

    // candidates ahead of an offer that never comes
    let carol = Identity::new("10003", "Carol", "example.org");
    let orphan = Signaling::new(
        SignalingAction::Candidate,
        FieldDescriptor {
            id: "10003".to_string(),
            founder_id: "10003".to_string(),
            is_private: true,
            media_constraint: constraint,
            endpoints: vec![],
            caller: Some(carol.clone()),
            callee: Some(bob.identity.clone()),
            group_id: None,
        },
        carol,
        Device::new("Carol-phone", "ios"),
    )
    .with_candidate(IceCandidate::new("candidate:98 1 udp 1 6.6.6.7 9 typ host"));
    bob.comm.handle_signaling(&orphan).await.unwrap();
    assert_eq!(bob.comm.num_fields(), 1);

    tokio::time::sleep(CommConfig::default().callee_timeout() + Duration::from_secs(1)).await;
    assert_eq!(bob.comm.num_fields(), 0);

    connect(&mut alice, &mut bob, constraint).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let handle = bob
        .active_field()
        .outbound_device()
        .unwrap()
        .handle()
        .await
        .unwrap();
    let applied = bob.engine.applied_candidates(handle);
    assert_eq!(applied.len(), DUMMY_LOCAL_CANDIDATES);
    assert!(applied.iter().all(|c| !c.candidate.starts_with("candidate:9")));
}

#[tokio::test]
async fn test_permission_denied_terminates_without_offer() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);
    alice.engine.set_faults(DummyFaults {
        deny_media: true,
        ..Default::default()
    });

    let err = alice
        .comm
        .make_call(
            CallTarget::Identity(bob.identity.clone()),
            MediaConstraint::audio_only(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MediaPermissionDenied(_)));

    let CommEvent::Failed { record, error } = alice
        .wait_for(|e| matches!(e, CommEvent::Failed { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(record.state, CallState::Failed);
    assert_eq!(record.last_error, Some(error.clone()));
    assert!(matches!(error, Error::MediaPermissionDenied(_)));

    assert_eq!(server.count(SignalingAction::Offer), 0);
    assert_eq!(server.count(SignalingAction::Bye), 0);
    assert_eq!(server.count_from("10001", SignalingAction::ApplyTerminate), 1);
    assert!(alice.comm.call_record().is_none());
    assert_eq!(alice.comm.num_fields(), 0);
    assert_eq!(alice.engine.open_sessions(), 0);
    assert_eq!(alice.engine.live_streams(), 0);

    bob.comm.hangup_call().await.unwrap();
    assert!(bob.comm.call_record().is_none());
    assert!(bob
        .seen()
        .iter()
        .all(|e| !matches!(e, CommEvent::NewCall(_))));
}

#[tokio::test(start_paused = true)]
async fn test_caller_timeout() {
    let server = LoopbackServer::new();
    let mut alice = prepare_node(&server, "10001", "Alice");
    let ghost = Identity::new("10009", "Ghost", "example.org");
    alice.contacts.add_contact(ghost.clone());

    alice
        .comm
        .make_call(CallTarget::Identity(ghost), MediaConstraint::audio_only())
        .await
        .unwrap();
    assert_eq!(
        alice.comm.call_record().unwrap().state,
        CallState::AwaitingAnswer
    );

    let CommEvent::Timeout(record) = alice
        .wait_for(|e| matches!(e, CommEvent::Timeout(_)))
        .await
    else {
        unreachable!()
    };
    assert_eq!(record.state, CallState::Ended);
    assert!(!record.is_active());
    assert_eq!(record.field.as_ref().map(|f| f.num_devices()), Some(0));
    assert!(alice.comm.call_record().is_none());
    assert_eq!(alice.engine.open_sessions(), 0);
    assert_eq!(server.count_from("10001", SignalingAction::Bye), 1);
}

#[tokio::test(start_paused = true)]
async fn test_callee_timeout_is_shorter() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);

    alice
        .comm
        .make_call(
            CallTarget::Identity(bob.identity.clone()),
            MediaConstraint::audio_only(),
        )
        .await
        .unwrap();
    let CommEvent::NewCall(incoming) = bob.wait_for(|e| matches!(e, CommEvent::NewCall(_))).await
    else {
        unreachable!()
    };
    let started = tokio::time::Instant::now();

    let CommEvent::Timeout(record) = bob.wait_for(|e| matches!(e, CommEvent::Timeout(_))).await
    else {
        unreachable!()
    };
    assert_eq!(record.seq, incoming.seq);
    assert_eq!(record.state, CallState::Ended);
    assert!(!record.outgoing);
    assert!(started.elapsed() < CommConfig::default().call_timeout());
    assert!(bob.comm.call_record().is_none());
    assert_eq!(bob.engine.open_sessions(), 0);

    // the caller learns from the callee's bye before its own timer fires
    alice.wait_for(|e| matches!(e, CommEvent::Bye(_))).await;
    assert!(alice
        .seen()
        .iter()
        .all(|e| !matches!(e, CommEvent::Timeout(_))));
    assert_eq!(alice.engine.open_sessions(), 0);
}

#[tokio::test]
async fn test_answer_after_remote_hangup() {
    let server = LoopbackServer::new();
    let (alice, mut bob) = prepare_pair(&server);

    alice
        .comm
        .make_call(
            CallTarget::Identity(bob.identity.clone()),
            MediaConstraint::audio_only(),
        )
        .await
        .unwrap();
    bob.wait_for(|e| matches!(e, CommEvent::NewCall(_))).await;
    alice.comm.hangup_call().await.unwrap();
    bob.wait_for(|e| matches!(e, CommEvent::Bye(_))).await;

    let err = bob
        .comm
        .answer_call(MediaConstraint::audio_only())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoCommField(_)));
    assert_eq!(bob.engine.open_sessions(), 0);

    // hanging up twice is not an error
    alice.comm.hangup_call().await.unwrap();
    bob.comm.hangup_call().await.unwrap();
}

#[tokio::test]
async fn test_media_loss_hangs_up_private_call() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);
    connect(&mut alice, &mut bob, MediaConstraint::audio_only()).await;
    alice
        .wait_for(|e| matches!(e, CommEvent::MediaConnected { .. }))
        .await;

    let handle = alice
        .active_field()
        .outbound_device()
        .unwrap()
        .handle()
        .await
        .unwrap();
    alice
        .engine
        .set_connection_state(handle, MediaConnectionState::Disconnected)
        .await;

    alice
        .wait_for(|e| matches!(e, CommEvent::MediaDisconnected { .. }))
        .await;
    alice.wait_for(|e| matches!(e, CommEvent::Bye(_))).await;
    bob.wait_for(|e| matches!(e, CommEvent::Bye(_))).await;
    assert_eq!(alice.engine.open_sessions(), 0);
    assert_eq!(bob.engine.open_sessions(), 0);
}

#[tokio::test]
async fn test_mute_reaches_live_track() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);
    connect(&mut alice, &mut bob, MediaConstraint::audio_only()).await;
    alice
        .wait_for(|e| matches!(e, CommEvent::MediaConnected { .. }))
        .await;

    alice.comm.mute_audio().await.unwrap();
    let field = alice.active_field();
    let device = field.outbound_device().unwrap();
    assert_eq!(device.outbound_enabled().await, (true, false));
    assert!(!field.local_endpoint().audio_stream_enabled);

    let stream = device.outbound_stream().await.unwrap();
    assert_eq!(
        alice.engine.track_enabled(&stream.id, TrackKind::Audio),
        Some(false)
    );

    alice.comm.unmute_audio().await.unwrap();
    assert_eq!(
        alice.engine.track_enabled(&stream.id, TrackKind::Audio),
        Some(true)
    );

    bob.comm
        .enable_inbound_audio(None, false)
        .await
        .unwrap();
    let bob_device = bob.active_field().outbound_device().unwrap();
    assert_eq!(bob_device.inbound_enabled().await, (true, false));
}

#[tokio::test]
async fn test_video_call_needs_sinks() {
    let server = LoopbackServer::new();
    let (alice, mut bob) = prepare_pair(&server);
    let video = MediaConstraint::audio_video();

    let err = alice
        .comm
        .make_call(CallTarget::Identity(bob.identity.clone()), video)
        .await
        .unwrap_err();
    assert_eq!(err, Error::VideoElementNotSetting);
    assert_eq!(server.requests(), 0);
    assert!(alice.comm.call_record().is_none());

    alice.comm.set_local_video_sink(Some("local-video".into()));
    alice
        .comm
        .make_call(CallTarget::Identity(bob.identity.clone()), video)
        .await
        .unwrap();
    bob.wait_for(|e| matches!(e, CommEvent::NewCall(_))).await;

    let err = bob.comm.answer_call(video).await.unwrap_err();
    assert_eq!(err, Error::VideoElementNotSetting);
    assert!(bob.comm.call_record().unwrap().has_pending_offer());

    bob.comm.set_remote_video_sink(Some("remote-video".into()));
    let record = bob.comm.answer_call(video).await.unwrap();
    assert_eq!(record.state, CallState::Connected);
}

#[tokio::test]
async fn test_calls_need_identity() {
    let server = LoopbackServer::new();
    let anonymous = prepare_node_with(
        &server,
        Identity::new("10004", "Anonymous", "example.org"),
        DummyMediaEngine::new(),
        CommConfig::default(),
    );
    // replace the signed in identity with none
    let comm = crate::comm::MultipointCommBuilder::new(
        anonymous.engine.clone(),
        Arc::new(super::LoopbackTransport {
            server: server.clone(),
            identity_id: "nobody".to_string(),
        }),
        Arc::new(StaticIdentityService::new(None, Device::default())),
    )
    .build()
    .unwrap();

    let err = comm
        .make_call(
            CallTarget::Identity(anonymous.identity.clone()),
            MediaConstraint::audio_only(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, Error::Uninitialized);
    assert_eq!(server.requests(), 0);

    let err = anonymous
        .comm
        .make_call(
            CallTarget::Identity(Identity::new("20000", "Stranger", "example.org")),
            MediaConstraint::audio_only(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoContact(_)));
    assert!(anonymous.comm.call_record().is_none());
}

#[tokio::test]
async fn test_revoke_rejected_on_private_call() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);
    connect(&mut alice, &mut bob, MediaConstraint::audio_only()).await;

    let peer = alice
        .active_field()
        .endpoints()
        .into_iter()
        .find(|e| e.identity.id == "10002")
        .unwrap();
    let err = alice.comm.revoke_endpoint(&peer.id).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedSignaling(_)));
    assert_eq!(alice.active_field().num_devices(), 1);
    assert_eq!(server.count(SignalingAction::Revoke), 0);
}
