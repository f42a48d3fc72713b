//! Stress tests for confab-logging peer context
//!
//! Many local sessions can log from many threads at once; each thread must
//! only ever see its own peer context.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use confab_core::PeerIdentity;
use confab_logging::{LogConfig, PeerContextGuard};
use uuid::Uuid;

fn peer(i: usize) -> PeerIdentity {
    PeerIdentity::new(format!("peer-{}", i)).unwrap()
}

/// Concurrent guard creation and dropping across threads
#[test]
fn test_concurrent_peer_contexts() {
    const NUM_THREADS: usize = 32;
    const ITERATIONS: usize = 200;

    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let start = Instant::now();

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let identity = peer(i);
                barrier.wait();

                for _ in 0..ITERATIONS {
                    let _guard = PeerContextGuard::new(&identity);
                    let ctx = PeerContextGuard::current().unwrap();
                    assert_eq!(ctx.peer_id, identity.id().short_id());
                    assert_eq!(ctx.display_name, identity.display_name());
                }

                assert!(PeerContextGuard::current().is_none());
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked");
    }

    println!(
        "{} threads x {} guards in {:?}",
        NUM_THREADS,
        ITERATIONS,
        start.elapsed()
    );
}

/// Deep nesting restores every level in order
#[test]
fn test_deep_nesting_restores() {
    const DEPTH: usize = 256;

    let identities: Vec<_> = (0..DEPTH).map(peer).collect();
    let mut guards = Vec::with_capacity(DEPTH);

    for identity in &identities {
        guards.push(PeerContextGuard::new(identity));
        assert_eq!(
            PeerContextGuard::current_peer_id(),
            Some(identity.id().short_id())
        );
    }

    // Unwind innermost first
    for i in (0..DEPTH).rev() {
        assert_eq!(
            PeerContextGuard::current_peer_id(),
            Some(identities[i].id().short_id())
        );
        guards.pop();
    }

    assert!(PeerContextGuard::current().is_none());
}

/// Rapidly switching between two sessions on one thread
#[test]
fn test_rapid_context_switching() {
    let alice = PeerIdentity::new("Alice").unwrap();
    let bob = PeerIdentity::new("Bob").unwrap();
    let alice_session = Uuid::new_v4();
    let bob_session = Uuid::new_v4();

    for i in 0..10_000 {
        let (identity, session) = if i % 2 == 0 {
            (&alice, alice_session)
        } else {
            (&bob, bob_session)
        };
        let _guard = PeerContextGuard::with_session_id(identity, session);
        assert_eq!(PeerContextGuard::current_session_id(), Some(session));
    }

    assert!(PeerContextGuard::current().is_none());
}

/// Configs survive a serialization round trip unchanged
#[test]
fn test_config_serialization() {
    for config in [
        LogConfig::default(),
        LogConfig::development(),
        LogConfig::testing(),
        LogConfig::production("/var/log/confab".into()),
    ] {
        let json = serde_json::to_string(&config).unwrap();
        let back: LogConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_level, config.default_level);
        assert_eq!(back.console.pretty, config.console.pretty);
        assert_eq!(back.file.is_some(), config.file.is_some());
        assert_eq!(back.filter_directives(), config.filter_directives());
    }
}
