use multipoint_transport::core::media::MediaConstraint;
use multipoint_transport::core::media::SessionDescription;

use super::prepare_node;
use super::prepare_pair;
use super::LoopbackServer;
use super::Node;
use crate::comm::callback::CommEvent;
use crate::comm::record::CallState;
use crate::comm::record::CallTarget;
use crate::error::Error;
use crate::field::endpoint::CommFieldEndpoint;
use crate::identity::Group;
use crate::message::SignalingAction;

fn team(nodes: &[&Node]) -> Group {
    Group {
        id: "g-team".to_string(),
        name: "Team".to_string(),
        members: nodes.iter().map(|n| n.identity.clone()).collect(),
    }
}

fn endpoint_of(node: &Node, identity_id: &str) -> CommFieldEndpoint {
    node.active_field()
        .endpoints()
        .into_iter()
        .find(|e| e.identity.id == identity_id)
        .expect("endpoint not in roster")
}

async fn join(node: &mut Node, group: &Group) {
    node.comm
        .make_call(CallTarget::Group(group.clone()), MediaConstraint::audio_only())
        .await
        .unwrap();
    node.wait_for(|e| matches!(e, CommEvent::Connected(_)))
        .await;
}

#[tokio::test]
async fn test_join_group_and_follow() {
    let server = LoopbackServer::new();
    let (mut alice, mut bob) = prepare_pair(&server);
    let group = team(&[&alice, &bob]);

    join(&mut alice, &group).await;
    assert_eq!(server.count(SignalingAction::GetField), 1);
    assert_eq!(server.count(SignalingAction::CreateField), 1);
    let field = alice.active_field();
    assert!(!field.is_private());
    assert_eq!(field.group_id(), Some("g-team"));
    assert_eq!(field.num_devices(), 1);

    join(&mut bob, &group).await;
    assert_eq!(server.count(SignalingAction::CreateField), 1);
    assert_eq!(bob.active_field().id(), field.id());

    let CommEvent::Followed { endpoint, .. } = alice
        .wait_for(|e| matches!(e, CommEvent::Followed { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(endpoint.identity.id, "10002");
    let CommEvent::Followed { endpoint, .. } = bob
        .wait_for(|e| matches!(e, CommEvent::Followed { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(endpoint.identity.id, "10001");
    assert!(alice
        .seen()
        .iter()
        .any(|e| matches!(e, CommEvent::Arrived { endpoint, .. } if endpoint.identity.id == "10002")));

    assert_eq!(alice.active_field().num_devices(), 2);
    assert_eq!(bob.active_field().num_devices(), 2);
    assert_eq!(alice.engine.open_sessions(), 2);

    let bob_endpoint = endpoint_of(&alice, "10002");
    alice.comm.revoke_endpoint(&bob_endpoint.id).await.unwrap();
    alice
        .wait_for(|e| matches!(e, CommEvent::Revoked { .. }))
        .await;
    assert_eq!(server.count(SignalingAction::Revoke), 1);
    assert_eq!(alice.active_field().num_devices(), 1);
    assert!(alice.active_field().endpoint(&bob_endpoint.id).is_some());
    assert_eq!(alice.engine.open_sessions(), 1);

    bob.comm.hangup_call().await.unwrap();
    assert_eq!(server.count_from("10002", SignalingAction::ApplyTerminate), 1);
    assert_eq!(server.count_from("10002", SignalingAction::Bye), 0);
    let CommEvent::Left { endpoint, .. } = alice
        .wait_for(|e| matches!(e, CommEvent::Left { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(endpoint.id, bob_endpoint.id);
    assert!(alice.active_field().endpoint(&bob_endpoint.id).is_none());
    assert_eq!(alice.comm.call_record().unwrap().state, CallState::Connected);
    assert_eq!(bob.comm.num_fields(), 0);
    assert_eq!(bob.engine.open_sessions(), 0);
}

#[tokio::test]
async fn test_conference_answer_needs_target() {
    let server = LoopbackServer::new();
    let (mut alice, bob) = prepare_pair(&server);
    let group = team(&[&alice, &bob]);
    join(&mut alice, &group).await;

    let field = alice.active_field();
    let answer = field
        .signaling(SignalingAction::Answer)
        .with_description(SessionDescription::answer("v=0\r\n"));
    let err = alice.comm.handle_signaling(&answer).await.unwrap_err();
    assert!(matches!(err, Error::SignalingError(_)));

    assert_eq!(field.num_devices(), 1);
    assert_eq!(alice.comm.call_record().unwrap().state, CallState::Connected);
}

#[tokio::test]
async fn test_invite_into_conference() {
    let server = LoopbackServer::new();
    let (mut alice, bob) = prepare_pair(&server);
    let mut carol = prepare_node(&server, "10003", "Carol");
    let group = team(&[&alice, &bob]);
    join(&mut alice, &group).await;

    alice
        .comm
        .invite_call(vec![carol.identity.clone()])
        .await
        .unwrap();
    let CommEvent::Invited { field, inviter } = carol
        .wait_for(|e| matches!(e, CommEvent::Invited { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(inviter.id, "10001");
    assert_eq!(field.id, alice.active_field().id());
    assert!(carol.comm.call_record().is_none());

    carol
        .comm
        .make_call(CallTarget::Field(field), MediaConstraint::audio_only())
        .await
        .unwrap();
    carol
        .wait_for(|e| matches!(e, CommEvent::Connected(_)))
        .await;
    let CommEvent::Followed { endpoint, .. } = alice
        .wait_for(|e| matches!(e, CommEvent::Followed { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(endpoint.identity.id, "10003");
    assert_eq!(alice.active_field().num_endpoints(), 2);
}

#[tokio::test]
async fn test_invite_on_private_call_is_rejected() {
    let server = LoopbackServer::new();
    let (alice, mut bob) = prepare_pair(&server);
    let carol = prepare_node(&server, "10003", "Carol");

    alice
        .comm
        .make_call(
            CallTarget::Identity(bob.identity.clone()),
            MediaConstraint::audio_only(),
        )
        .await
        .unwrap();
    bob.wait_for(|e| matches!(e, CommEvent::NewCall(_))).await;

    let err = alice
        .comm
        .invite_call(vec![carol.identity.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedSignaling(_)));
    assert_eq!(server.count(SignalingAction::Invite), 0);
}
