use super::harness::Session;
use crate::config::ReplicationConfig;
use crate::descriptor::{ReplicationDescriptor, SharedDescriptor};
use crate::replication::{
    MessageStreamReplicator, NetworkedField, ReplicatorHandle, TransformBroadcastPacker,
    TransformPieces,
};
use crate::types::{PeerId, Quat, Transform, TransportMode, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Horn {
    volume: u8,
}

fn register_fields(
    session: &mut Session,
    descriptor: &SharedDescriptor,
) -> Vec<ReplicatorHandle<NetworkedField<i32>>> {
    let peers = session.peers.clone();
    session
        .groups
        .iter_mut()
        .zip(peers)
        .map(|(group, local)| {
            let descriptor: Arc<dyn ReplicationDescriptor> = Arc::new(descriptor.clone());
            group.register(NetworkedField::new("laps", descriptor, local))
        })
        .collect()
}

fn field_value(session: &Session, index: usize, handle: ReplicatorHandle<NetworkedField<i32>>) -> Option<i32> {
    session.groups[index]
        .get(handle)
        .and_then(|field| field.value().copied())
}

#[test]
fn test_field_converges_to_last_write() {
    let mut session = Session::new(3);
    let owner = session.peers[0];
    let descriptor = SharedDescriptor::owned_by(owner, session.peers.clone(), TransportMode::RELIABLE_ORDERED);
    let handles = register_fields(&mut session, &descriptor);

    for laps in 1..=3 {
        session.groups[0]
            .get_mut(handles[0])
            .unwrap()
            .set_value(Some(laps))
            .unwrap();
    }
    session.tick_n(2);

    assert_eq!(field_value(&session, 1, handles[1]), Some(3));
    assert_eq!(field_value(&session, 2, handles[2]), Some(3));

    // Clean peers get nothing further
    let reports = session.tick();
    assert_eq!(reports[0].packets_sent, 0);
}

#[test]
fn test_field_late_receiver() {
    let mut session = Session::new(3);
    let (a, b, c) = (session.peers[0], session.peers[1], session.peers[2]);
    let descriptor = SharedDescriptor::owned_by(a, [b], TransportMode::RELIABLE_ORDERED);
    let handles = register_fields(&mut session, &descriptor);

    session.groups[0]
        .get_mut(handles[0])
        .unwrap()
        .set_value(Some(10))
        .unwrap();
    session.tick_n(2);
    assert_eq!(field_value(&session, 1, handles[1]), Some(10));
    assert_eq!(field_value(&session, 2, handles[2]), None);

    descriptor.add_receiver(c);
    let reports = session.tick();
    assert_eq!(reports[0].packets_sent, 1);
    session.tick();
    assert_eq!(field_value(&session, 2, handles[2]), Some(10));
}

#[test]
fn test_default_field_sends_nothing() {
    let mut session = Session::new(2);
    let descriptor = SharedDescriptor::owned_by(
        session.peers[0],
        session.peers.clone(),
        TransportMode::RELIABLE_ORDERED,
    );
    register_fields(&mut session, &descriptor);

    let reports = session.tick();
    assert!(reports.iter().all(|report| report.packets_sent == 0));
}

#[test]
fn test_stream_delivers_in_order_after_grace_period() {
    let mut session = Session::new(3);
    let (a, b, c) = (session.peers[0], session.peers[1], session.peers[2]);
    let descriptor = SharedDescriptor::owned_by(a, [b], TransportMode::RELIABLE_ORDERED);
    let config = ReplicationConfig::default();

    let received: Arc<Mutex<Vec<(PeerId, u8)>>> = Arc::new(Mutex::new(Vec::new()));
    let peers = session.peers.clone();
    let handles: Vec<ReplicatorHandle<MessageStreamReplicator<Horn>>> = session
        .groups
        .iter_mut()
        .zip(peers)
        .map(|(group, local)| {
            let mut stream = MessageStreamReplicator::new("horn", Arc::new(descriptor.clone()), local, &config);
            let sink = received.clone();
            stream.on_message_received(move |horn: &Horn, _| sink.lock().unwrap().push((local, horn.volume)));
            group.register(stream)
        })
        .collect();

    {
        let stream = session.groups[0].get_mut(handles[0]).unwrap();
        for volume in [1, 2, 3] {
            stream.send_message(Horn { volume }, &[a, b, c]);
        }
    }
    // Self delivery is immediate
    assert_eq!(received.lock().unwrap().len(), 3);

    session.tick_n(10);
    descriptor.add_receiver(c);
    session.tick_n(2);

    let received = received.lock().unwrap();
    let for_peer = |peer: PeerId| -> Vec<u8> {
        received
            .iter()
            .filter(|(local, _)| *local == peer)
            .map(|(_, volume)| *volume)
            .collect()
    };
    assert_eq!(for_peer(a), vec![1, 2, 3]);
    assert_eq!(for_peer(b), vec![1, 2, 3]);
    assert_eq!(for_peer(c), vec![1, 2, 3]);
}

#[test]
fn test_stream_gives_up_on_never_valid_receiver() {
    let config = ReplicationConfig {
        frames_to_drop_messages: 5,
        ..Default::default()
    };
    let mut session = Session::with_config(2, config.clone());
    let (a, b) = (session.peers[0], session.peers[1]);
    let descriptor = SharedDescriptor::owned_by(a, Vec::new(), TransportMode::RELIABLE_ORDERED);

    let handle = session.groups[0].register(MessageStreamReplicator::<Horn>::new(
        "horn",
        Arc::new(descriptor.clone()),
        a,
        &config,
    ));
    session.groups[1].register(MessageStreamReplicator::<Horn>::new(
        "horn",
        Arc::new(descriptor.clone()),
        b,
        &config,
    ));

    session.groups[0]
        .get_mut(handle)
        .unwrap()
        .send_message(Horn { volume: 1 }, &[b]);

    session.tick_n(4);
    assert_eq!(session.groups[0].get(handle).unwrap().pending_for(b), 1);
    session.tick();
    assert_eq!(session.groups[0].get(handle).unwrap().pending_for(b), 0);

    // Becoming a receiver later does not resurrect dropped messages
    descriptor.add_receiver(b);
    let reports = session.tick();
    assert_eq!(reports[0].packets_sent, 0);
}

#[test]
fn test_transform_propagates_only_tracked_pieces() {
    let mut session = Session::new(2);
    let (a, b) = (session.peers[0], session.peers[1]);
    let descriptor = SharedDescriptor::owned_by(a, [b], TransportMode::UNRELIABLE_UNORDERED);

    let owner = session.groups[0].register(TransformBroadcastPacker::new(
        "car",
        Arc::new(descriptor.clone()),
        a,
        TransformPieces::all(),
        Transform::default(),
    ));
    let observer = session.groups[1].register(TransformBroadcastPacker::new(
        "car",
        Arc::new(descriptor.clone()),
        b,
        TransformPieces::POSITION,
        Transform::default(),
    ));
    session.tick_n(2);

    {
        let packer = session.groups[0].get_mut(owner).unwrap();
        packer.set_position(Vec3::new(4.0, 0.0, -2.0));
        packer.set_rotation(Quat::from_rotation_y(1.5));
    }
    let reports = session.tick();
    assert_eq!(reports[0].packets_sent, 1);
    session.tick();

    let seen = session.groups[1].get(observer).unwrap().transform();
    assert_eq!(seen.position, Vec3::new(4.0, 0.0, -2.0));
    assert_eq!(seen.rotation, Quat::identity());

    // Nothing changed since the last broadcast
    let reports = session.tick();
    assert_eq!(reports[0].packets_sent, 0);
}

#[test]
fn test_rejoining_peer_gets_fresh_state() {
    let mut session = Session::new(2);
    let (a, b) = (session.peers[0], session.peers[1]);
    let descriptor = SharedDescriptor::owned_by(a, [b], TransportMode::UNRELIABLE_UNORDERED);

    let owner = session.groups[0].register(TransformBroadcastPacker::new(
        "car",
        Arc::new(descriptor.clone()),
        a,
        TransformPieces::POSITION,
        Transform::from_position(Vec3::new(1.0, 2.0, 3.0)),
    ));
    let observer = session.groups[1].register(TransformBroadcastPacker::new(
        "car",
        Arc::new(descriptor.clone()),
        b,
        TransformPieces::POSITION,
        Transform::default(),
    ));
    session.tick_n(2);
    assert!(session.groups[0].get(owner).unwrap().has_sent_to(b));

    session.groups[0].peer_removed(b);
    assert!(!session.groups[0].get(owner).unwrap().has_sent_to(b));
    assert_eq!(session.tick()[0].packets_sent, 0);

    session.groups[0].peer_added(b);
    assert_eq!(session.tick()[0].packets_sent, 1);
    assert_eq!(
        session.groups[1].get(observer).unwrap().transform().position,
        Vec3::new(1.0, 2.0, 3.0)
    );
}

#[test]
fn test_packets_for_removed_replicator_are_dropped() {
    let mut session = Session::new(2);
    let descriptor = SharedDescriptor::owned_by(
        session.peers[0],
        session.peers.clone(),
        TransportMode::RELIABLE_ORDERED,
    );
    let handles = register_fields(&mut session, &descriptor);

    assert!(session.groups[1].remove(handles[1].id()));
    assert!(session.groups[1].get(handles[1]).is_none());

    session.groups[0]
        .get_mut(handles[0])
        .unwrap()
        .set_value(Some(1))
        .unwrap();
    let reports = session.tick();
    assert_eq!(reports[0].packets_sent, 1);
    assert_eq!(reports[1].inbound_dropped, 1);
    assert_eq!(reports[1].inbound_applied, 0);
}

#[test]
fn test_disconnected_peer_does_not_stall_others() {
    let mut session = Session::new(3);
    let (a, b, c) = (session.peers[0], session.peers[1], session.peers[2]);
    let descriptor = SharedDescriptor::owned_by(a, [b, c], TransportMode::RELIABLE_ORDERED);
    let handles = register_fields(&mut session, &descriptor);

    session.network.disconnect(b);
    session.groups[0]
        .get_mut(handles[0])
        .unwrap()
        .set_value(Some(5))
        .unwrap();

    let reports = session.tick();
    assert_eq!(reports[0].errors, 1);
    assert_eq!(reports[0].packets_sent, 1);
    assert_eq!(field_value(&session, 2, handles[2]), Some(5));
}

#[test]
fn test_transform_observer_that_leaves_and_returns_catches_up() {
    let mut session = Session::new(3);
    let (a, b, c) = (session.peers[0], session.peers[1], session.peers[2]);
    let descriptor = SharedDescriptor::owned_by(a, [b, c], TransportMode::UNRELIABLE_UNORDERED);

    let handles: Vec<ReplicatorHandle<TransformBroadcastPacker>> = session
        .peers
        .clone()
        .into_iter()
        .zip(session.groups.iter_mut())
        .map(|(local, group)| {
            group.register(TransformBroadcastPacker::new(
                "car",
                Arc::new(descriptor.clone()),
                local,
                TransformPieces::POSITION,
                Transform::default(),
            ))
        })
        .collect();
    session.tick_n(2);

    descriptor.remove_receiver(c);
    session.groups[0]
        .get_mut(handles[0])
        .unwrap()
        .set_position(Vec3::new(9.0, 0.0, 0.0));
    session.tick_n(2);
    assert_eq!(session.groups[2].get(handles[2]).unwrap().transform().position, Vec3::zero());

    // The owner stops moving; the returning observer still converges
    descriptor.add_receiver(c);
    session.tick_n(2);
    assert_eq!(
        session.groups[2].get(handles[2]).unwrap().transform().position,
        Vec3::new(9.0, 0.0, 0.0)
    );
    assert_eq!(
        session.groups[1].get(handles[1]).unwrap().transform().position,
        Vec3::new(9.0, 0.0, 0.0)
    );
}
