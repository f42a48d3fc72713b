//! End-to-end transcript behaviour of the session manager over mock transports

use std::sync::Arc;

use confab_core::{
    MockNetwork, MockTransport, MockTransportBuilder, PeerIdentity, ResourceHandle,
    SessionState, TransferId, TransferOutcome, Transport, TransportEvent,
};
use confab_session::{
    Direction, FsResourceStore, MemoryResourceStore, NotFoundError, SendError, SessionManager,
    TranscriptEntry, TranscriptPayload, TranscriptUpdate, TransferEvent, TransferStatus,
};
use tokio::sync::broadcast;

/// Feed every queued transport event to the manager
async fn pump(manager: &mut SessionManager, transport: &MockTransport) {
    while let Some(event) = transport.try_recv().await.unwrap() {
        let _ = manager.handle_event(event).await;
    }
}

fn drain_updates(rx: &mut broadcast::Receiver<TranscriptUpdate>) -> Vec<TranscriptUpdate> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn transfer_status(entry: &TranscriptEntry) -> Option<&TransferStatus> {
    entry.as_transfer().map(|t| &t.status)
}

#[tokio::test]
async fn test_alice_scenario() {
    confab_logging::init_testing();

    let me = PeerIdentity::new("Me").unwrap();
    let alice = PeerIdentity::new("Alice").unwrap();
    let (local, remote) = MockTransportBuilder::new().create_linked_pair(me.clone(), alice.clone());
    let local = Arc::new(local);

    let storage = tempfile::tempdir().unwrap();
    let store = FsResourceStore::new(storage.path().join("resources"))
        .await
        .unwrap();
    let mut manager = SessionManager::new(local.clone(), Arc::new(store));
    let mut updates = manager.subscribe();

    // Alice connects
    local.connect(&alice).await.unwrap();
    while local.try_recv().await.unwrap().is_some() {}
    assert_eq!(
        manager.on_peer_state_changed(alice.clone(), SessionState::Connected),
        0
    );
    assert_eq!(
        manager.transcript().entry_at(0).unwrap().as_text(),
        Some("Alice is Connected")
    );

    // We say hi
    let sent = manager.send_text("hi").await.unwrap();
    assert_eq!(sent.direction, Direction::Sent);
    assert_eq!(sent.peer, me);
    assert_eq!(manager.transcript().entry_at(1), Some(&sent));
    while remote.try_recv().await.unwrap().is_some() {}

    // Alice says hello
    manager
        .handle_event(TransportEvent::message(alice.clone(), b"hello".to_vec()))
        .await
        .unwrap();
    let hello = manager.transcript().entry_at(2).unwrap();
    assert_eq!(hello.direction, Direction::Received);
    assert_eq!(hello.as_text(), Some("hello"));

    // Alice sends a photo
    let photo = storage.path().join("photo.jpg");
    tokio::fs::write(&photo, vec![7u8; 1000]).await.unwrap();
    let t1 = remote
        .send_resource(&me.id(), &ResourceHandle::new(&photo, 1000))
        .await
        .unwrap();
    pump(&mut manager, &local).await;

    assert_eq!(manager.transcript().count(), 4);
    assert_eq!(manager.transcript().index_of(t1), Ok(3));
    let transfer = manager.transcript().entry_at(3).unwrap().as_transfer().unwrap();
    assert_eq!(transfer.name, "photo.jpg");
    assert_eq!(transfer.total_bytes, 1000);
    let mut watch = manager.watch_transfer(t1).unwrap();

    // Halfway
    remote.advance_transfer(t1, 500).await.unwrap();
    pump(&mut manager, &local).await;
    assert_eq!(manager.transcript().count(), 4);
    let transfer = manager.transcript().entry_at(3).unwrap().as_transfer().unwrap();
    assert_eq!(transfer.completed_bytes, 500);
    assert_eq!(transfer.status, TransferStatus::Active);

    // Done
    remote
        .finish_transfer(t1, TransferOutcome::Success(Default::default()))
        .await
        .unwrap();
    pump(&mut manager, &local).await;

    let log = manager.transcript();
    assert_eq!(log.count(), 4);
    assert_eq!(log.index_of(t1), Ok(3));
    let result = log.entry_at(3).unwrap().as_resource().unwrap();
    assert_eq!(result.name, "photo.jpg");
    assert!(result.location.starts_with(storage.path().join("resources")));
    assert_eq!(tokio::fs::read(&result.location).await.unwrap().len(), 1000);

    let mut copy = log.clone();
    assert!(
        copy.replace(TransferId::generate(), TranscriptEntry::notice(me.clone(), "x"))
            .is_err()
    );
    assert_eq!(copy.snapshot(), log.snapshot());

    // Tracker saw progress then exactly one completion
    let events: Vec<_> = std::iter::from_fn(|| watch.try_recv()).collect();
    assert!(matches!(
        events[0],
        TransferEvent::Changed { completed_units: 500, .. }
    ));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Completed { .. }))
            .count(),
        1
    );
    assert!(watch.is_released());

    // UI saw four inserts, an in-place update and the swap, all at stable indices
    let updates = drain_updates(&mut updates);
    let inserted: Vec<_> = updates
        .iter()
        .filter(|u| matches!(u, TranscriptUpdate::Inserted { .. }))
        .map(TranscriptUpdate::index)
        .collect();
    assert_eq!(inserted, vec![0, 1, 2, 3]);
    assert!(matches!(
        updates.last(),
        Some(TranscriptUpdate::Replaced { index: 3, .. })
    ));
}

#[tokio::test]
async fn test_replace_unknown_transfer() {
    let manager = SessionManager::new(
        Arc::new(MockTransport::new(PeerIdentity::new("Me").unwrap())),
        Arc::new(MemoryResourceStore::default()),
    );
    let mut log = manager.transcript().clone();
    log.append(TranscriptEntry::notice(
        manager.local_identity().clone(),
        "hello",
    ));

    let unknown = TransferId::generate();
    assert_eq!(
        log.replace(
            unknown,
            TranscriptEntry::notice(manager.local_identity().clone(), "bogus")
        ),
        Err(NotFoundError(unknown))
    );
    assert_eq!(log.count(), 1);
    assert_eq!(log.entry_at(0).unwrap().as_text(), Some("hello"));
}

#[tokio::test]
async fn test_no_peers_produces_no_entry() {
    let mut manager = SessionManager::new(
        Arc::new(MockTransport::new(PeerIdentity::new("Me").unwrap())),
        Arc::new(MemoryResourceStore::default()),
    );
    let mut updates = manager.subscribe();

    assert_eq!(manager.send_text("anyone?").await, Err(SendError::NoPeers));
    assert_eq!(manager.transcript().count(), 0);
    assert!(drain_updates(&mut updates).is_empty());
}

struct Room {
    network: MockNetwork,
    me: PeerIdentity,
    bob: PeerIdentity,
    carol: PeerIdentity,
}

impl Room {
    fn new() -> Self {
        let me = PeerIdentity::new("Me").unwrap();
        let bob = PeerIdentity::new("Bob").unwrap();
        let carol = PeerIdentity::new("Carol").unwrap();
        let network = MockNetwork::full_mesh(vec![me.clone(), bob.clone(), carol.clone()]);
        Self {
            network,
            me,
            bob,
            carol,
        }
    }

    fn local(&self) -> Arc<MockTransport> {
        self.network.get(&self.me.id()).unwrap()
    }

    async fn connected_manager(&self) -> SessionManager {
        let local = self.local();
        let mut manager = SessionManager::new(local.clone(), Arc::new(MemoryResourceStore::default()));
        manager.connect(self.bob.clone()).await.unwrap();
        manager.connect(self.carol.clone()).await.unwrap();
        pump(&mut manager, &local).await;
        assert_eq!(manager.connected_peers(), vec![self.bob.clone(), self.carol.clone()]);
        manager
    }
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let room = Room::new();
    let mut manager = room.connected_manager().await;
    let before = manager.transcript().count();

    // Connecting + Connected for each peer
    assert_eq!(before, 4);

    manager.connect(room.bob.clone()).await.unwrap();
    pump(&mut manager, &room.local()).await;
    assert_eq!(manager.transcript().count(), before);
}

#[tokio::test]
async fn test_partial_send_failure() {
    let room = Room::new();
    let mut manager = room.connected_manager().await;
    let start = manager.transcript().count();

    room.local().fail_sends_to(room.carol.id(), "radio off");
    let err = manager.send_text("hi all").await.unwrap_err();

    match err {
        SendError::TransportFailure { delivered, failed } => {
            assert_eq!(delivered, vec![room.bob.id()]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, room.carol.id());
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The delivered message stands, followed by a failure notice
    let log = manager.transcript();
    assert_eq!(log.count(), start + 2);
    let sent = log.entry_at(start).unwrap();
    assert_eq!(sent.direction, Direction::Sent);
    assert_eq!(sent.as_text(), Some("hi all"));
    let notice = log.entry_at(start + 1).unwrap();
    assert_eq!(notice.direction, Direction::Local);
    assert_eq!(notice.as_text(), Some("Failed to send message to Carol"));

    // Bob got it
    let bob = room.network.get(&room.bob.id()).unwrap();
    let mut got_message = false;
    while let Some(event) = bob.try_recv().await.unwrap() {
        if event == TransportEvent::message(room.me.clone(), b"hi all".to_vec()) {
            got_message = true;
        }
    }
    assert!(got_message);
}

#[tokio::test]
async fn test_send_text_fails_everywhere() {
    let room = Room::new();
    let mut manager = room.connected_manager().await;
    let start = manager.transcript().count();

    room.local().fail_sends_to(room.bob.id(), "radio off");
    room.local().fail_sends_to(room.carol.id(), "radio off");
    let err = manager.send_text("hello?").await.unwrap_err();

    match err {
        SendError::TransportFailure { delivered, failed } => {
            assert!(delivered.is_empty());
            assert_eq!(failed.len(), 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Only the notice, no Sent entry
    let log = manager.transcript();
    assert_eq!(log.count(), start + 1);
    let notice = log.entry_at(start).unwrap();
    assert_eq!(notice.direction, Direction::Local);
    assert_eq!(notice.as_text(), Some("Failed to send message to Bob, Carol"));
    assert!(log.iter().all(|e| e.direction != Direction::Sent));
}

#[tokio::test]
async fn test_partial_resource_send_stays_live() {
    let room = Room::new();
    let local = room.local();
    let mut manager = room.connected_manager().await;
    let start = manager.transcript().count();

    local.fail_sends_to(room.carol.id(), "radio off");
    let entry = manager
        .send_resource(ResourceHandle::new("/pictures/cat.gif", 300))
        .await
        .unwrap();
    let aggregate = entry.transfer_id().unwrap();

    // Progress entry, then a notice for the peer that was skipped
    let log = manager.transcript();
    assert_eq!(log.count(), start + 2);
    assert_eq!(log.index_of(aggregate), Ok(start));
    assert_eq!(
        log.entry_at(start + 1).unwrap().as_text(),
        Some("Failed to send cat.gif to Carol")
    );

    // The transfer can still be watched and cancelled
    let mut watch = manager.watch_transfer(aggregate).unwrap();
    assert_eq!(local.pending_transfers().len(), 1);
    manager.cancel_transfer(aggregate).await.unwrap();
    assert_eq!(
        watch.recv().await,
        Some(TransferEvent::Cancelled { transfer_id: aggregate })
    );
    assert!(local.pending_transfers().is_empty());
}

#[tokio::test]
async fn test_outbound_resource_aggregates_legs() {
    let room = Room::new();
    let local = room.local();
    let mut manager = room.connected_manager().await;

    let entry = manager
        .send_resource(ResourceHandle::new("/pictures/beach.png", 1000))
        .await
        .unwrap();
    let aggregate = entry.transfer_id().unwrap();
    let index = manager.transcript().index_of(aggregate).unwrap();
    assert_eq!(entry.direction, Direction::Sent);

    let legs = local.pending_transfers();
    assert_eq!(legs.len(), 2);
    let bob_leg = *legs.iter().find(|(_, t)| t.peer == room.bob.id()).unwrap().0;
    let carol_leg = *legs.iter().find(|(_, t)| t.peer == room.carol.id()).unwrap().0;

    local.advance_transfer(bob_leg, 1000).await.unwrap();
    local.advance_transfer(carol_leg, 400).await.unwrap();
    pump(&mut manager, &local).await;

    // Slowest live leg wins
    let transfer = manager.transcript().entry_at(index).unwrap().as_transfer().unwrap();
    assert_eq!(transfer.completed_bytes, 400);

    // Carol fails; progress follows the remaining leg
    local
        .finish_transfer(carol_leg, TransferOutcome::Failure("out of range".into()))
        .await
        .unwrap();
    pump(&mut manager, &local).await;
    let transfer = manager.transcript().entry_at(index).unwrap().as_transfer().unwrap();
    assert_eq!(transfer.completed_bytes, 1000);
    assert!(transfer.is_complete());

    // Bob finishes; the entry becomes the sent resource
    local
        .finish_transfer(bob_leg, TransferOutcome::Success(Default::default()))
        .await
        .unwrap();
    pump(&mut manager, &local).await;

    let entry = manager.transcript().entry_at(index).unwrap();
    match &entry.payload {
        TranscriptPayload::Resource(result) => {
            assert_eq!(result.name, "beach.png");
            assert_eq!(result.location, std::path::PathBuf::from("/pictures/beach.png"));
        }
        other => panic!("expected a resource entry, got {other:?}"),
    }
    assert_eq!(manager.transcript().index_of(aggregate), Ok(index));
    assert!(manager.tracker().is_empty());
}

#[tokio::test]
async fn test_outbound_all_legs_fail() {
    let room = Room::new();
    let local = room.local();
    let mut manager = room.connected_manager().await;

    let entry = manager
        .send_resource(ResourceHandle::new("/tmp/a.bin", 10))
        .await
        .unwrap();
    let aggregate = entry.transfer_id().unwrap();

    for leg in local.pending_transfers().into_keys() {
        local
            .finish_transfer(leg, TransferOutcome::Failure("reset".into()))
            .await
            .unwrap();
    }
    pump(&mut manager, &local).await;

    let index = manager.transcript().index_of(aggregate).unwrap();
    let entry = manager.transcript().entry_at(index).unwrap();
    assert_eq!(
        transfer_status(entry),
        Some(&TransferStatus::Failed("reset".into()))
    );
    assert!(manager.tracker().is_empty());
}

#[tokio::test]
async fn test_cancel_suppresses_completion() {
    let room = Room::new();
    let local = room.local();
    let mut manager = room.connected_manager().await;

    let entry = manager
        .send_resource(ResourceHandle::new("/tmp/video.mov", 5000))
        .await
        .unwrap();
    let aggregate = entry.transfer_id().unwrap();
    let mut watch = manager.watch_transfer(aggregate).unwrap();
    let legs: Vec<_> = local.pending_transfers().into_keys().collect();

    manager.cancel_transfer(aggregate).await.unwrap();
    assert!(local.pending_transfers().is_empty());

    // Late transport reports for the cancelled legs change nothing
    for leg in legs {
        let _ = manager
            .on_resource_transfer_finished(leg, TransferOutcome::Success("/tmp/video.mov".into()))
            .await;
    }
    pump(&mut manager, &local).await;

    assert_eq!(watch.recv().await, Some(TransferEvent::Cancelled { transfer_id: aggregate }));
    assert_eq!(watch.recv().await, None);

    let index = manager.transcript().index_of(aggregate).unwrap();
    assert_eq!(
        transfer_status(manager.transcript().entry_at(index).unwrap()),
        Some(&TransferStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_inbound_cancelled_by_sender() {
    let room = Room::new();
    let local = room.local();
    let mut manager = room.connected_manager().await;

    let bob = room.network.get(&room.bob.id()).unwrap();
    let id = bob
        .send_resource(&room.me.id(), &ResourceHandle::new("/tmp/notes.txt", 64))
        .await
        .unwrap();
    pump(&mut manager, &local).await;
    let index = manager.transcript().index_of(id).unwrap();

    bob.cancel_resource(&id).await.unwrap();
    pump(&mut manager, &local).await;

    assert_eq!(
        transfer_status(manager.transcript().entry_at(index).unwrap()),
        Some(&TransferStatus::Cancelled)
    );
    assert!(!manager.tracker().is_tracking(id));
}

#[tokio::test]
async fn test_disconnect_notices() {
    let room = Room::new();
    let local = room.local();
    let mut manager = room.connected_manager().await;

    manager.disconnect(&room.bob.id()).await.unwrap();
    pump(&mut manager, &local).await;

    assert_eq!(manager.peer_state(&room.bob.id()), SessionState::NotConnected);
    assert_eq!(manager.connected_peers(), vec![room.carol.clone()]);
    let last = manager
        .transcript()
        .entry_at(manager.transcript().count() - 1)
        .unwrap();
    assert_eq!(last.as_text(), Some("Bob is Not Connected"));
}
