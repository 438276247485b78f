/// Registry semantics under concurrent use
use notify_relay::websocket::{ConnectionRegistry, SessionHandle};

#[tokio::test]
async fn test_online_reflects_register_and_unregister() {
    let registry = ConnectionRegistry::new();
    let (session, _queue) = SessionHandle::channel(4);

    registry.register(7, &session).await;
    assert!(registry.online_identities().await.contains(&7));

    registry.unregister(&session).await;
    assert!(!registry.online_identities().await.contains(&7));
}

#[tokio::test]
async fn test_uid_stays_online_while_any_session_remains() {
    let registry = ConnectionRegistry::new();
    let (phone, _phone_queue) = SessionHandle::channel(4);
    let (laptop, _laptop_queue) = SessionHandle::channel(4);

    registry.register(7, &phone).await;
    registry.register(7, &laptop).await;
    registry.unregister(&phone).await;

    assert_eq!(registry.online_identities().await, vec![7]);
    assert_eq!(registry.lookup(7).await, vec![laptop.clone()]);

    registry.unregister(&laptop).await;
    assert!(registry.online_identities().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_register_and_unregister() {
    let registry = ConnectionRegistry::new();
    let mut tasks = Vec::new();

    for uid in 0..32i64 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let mut kept = Vec::new();
            for n in 0..8 {
                let (session, queue) = SessionHandle::channel(1);
                registry.register(uid, &session).await;
                // Register again to exercise idempotence under contention
                registry.register(uid, &session).await;
                if n % 2 == 0 {
                    registry.unregister(&session).await;
                } else {
                    kept.push((session, queue));
                }
            }
            kept
        }));
    }

    let mut kept = Vec::new();
    for task in tasks {
        kept.extend(task.await.unwrap());
    }

    assert_eq!(registry.total_connections().await, 32 * 4);
    assert_eq!(
        registry.online_identities().await,
        (0..32i64).collect::<Vec<_>>()
    );
    for uid in 0..32i64 {
        assert_eq!(registry.connection_count(uid).await, 4);
    }

    for (session, _queue) in &kept {
        registry.unregister(session).await;
    }
    assert_eq!(registry.total_connections().await, 0);
    assert!(registry.online_identities().await.is_empty());
}

#[tokio::test]
async fn test_lookup_snapshot_survives_unregister() {
    let registry = ConnectionRegistry::new();
    let (session, mut queue) = SessionHandle::channel(4);
    registry.register(7, &session).await;

    let snapshot = registry.lookup(7).await;
    registry.unregister(&session).await;

    // A stale snapshot can still enqueue; the session decides whether to write it
    assert_eq!(snapshot.len(), 1);
    snapshot[0].send(bytes::Bytes::from_static(b"late")).unwrap();
    assert!(queue.try_recv().is_some());
}
