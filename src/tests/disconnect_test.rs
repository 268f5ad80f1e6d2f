use std::time::Duration;

use crate::{
    Direction, N2nError, N2nEvent,
    tests::{Net, drain, settle},
};

#[tokio::test(start_paused = true)]
async fn last_disconnect_closes_the_link() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    for _ in 0..3 {
        a.connect_node(&b).await.unwrap();
    }
    settle().await;

    a.disconnect(Some(b.id())).await.unwrap();
    settle().await;
    assert_eq!(a.link(Direction::Outview, b.id()).unwrap().occurrences, 2);
    assert_eq!(b.link(Direction::Inview, a.id()).unwrap().occurrences, 2);

    a.disconnect(Some(b.id())).await.unwrap();
    settle().await;
    let link = a.link(Direction::Outview, b.id()).unwrap();
    assert_eq!(link.occurrences, 1);
    assert_eq!(link.status, crate::transport::LinkStatus::Connected);

    a.disconnect(Some(b.id())).await.unwrap();
    settle().await;
    assert!(!a.has(Direction::Outview, b.id()));
    assert!(!a.exists(Direction::Outview, b.id()));
    assert!(!b.has(Direction::Inview, a.id()));
    assert!(!b.exists(Direction::Inview, a.id()));

    assert!(matches!(
        a.disconnect(Some(b.id())).await,
        Err(N2nError::PeerNotFound { view: Direction::Outview, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn remote_sees_one_disconnect_per_occurrence() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    a.connect_node(&b).await.unwrap();
    settle().await;
    let mut ev_b = b.subscribe();

    a.disconnect(Some(b.id())).await.unwrap();
    a.disconnect(Some(b.id())).await.unwrap();
    settle().await;

    let gone = N2nEvent::Disconnected {
        peer: a.id().clone(),
        direction: Direction::Inview,
    };
    assert_eq!(drain(&mut ev_b), vec![gone.clone(), gone]);
}

#[tokio::test(start_paused = true)]
async fn locked_occurrence_cannot_be_disconnected() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    settle().await;
    let mut ev_a = a.subscribe();

    assert_eq!(a.lock(b.id()).unwrap(), 1);
    let err = a.disconnect(Some(b.id())).await.unwrap_err();
    assert_eq!(
        err,
        N2nError::LockViolation {
            peer: b.id().clone(),
            occurrences: 1,
            lock: 1
        }
    );
    // nothing moved
    assert_eq!(a.link(Direction::Outview, b.id()).unwrap().occurrences, 1);
    assert!(matches!(a.lock(b.id()), Err(N2nError::LockViolation { .. })));

    assert_eq!(a.unlock(b.id()).unwrap(), 0);
    a.disconnect(Some(b.id())).await.unwrap();
    assert!(!a.exists(Direction::Outview, b.id()));

    let events = drain(&mut ev_a);
    assert_eq!(events[0], N2nEvent::Locked { peer: b.id().clone() });
    assert_eq!(events[1], N2nEvent::Unlocked { peer: b.id().clone() });
}

#[tokio::test(start_paused = true)]
async fn lock_keeps_the_reserved_occurrence() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    a.connect_node(&b).await.unwrap();
    settle().await;

    a.lock(b.id()).unwrap();
    a.disconnect(Some(b.id())).await.unwrap();
    assert!(matches!(
        a.disconnect(Some(b.id())).await,
        Err(N2nError::LockViolation { occurrences: 1, lock: 1, .. })
    ));
    assert!(!a.has(Direction::Outview, b.id()));
    assert!(a.exists(Direction::Outview, b.id()));
}

#[tokio::test(start_paused = true)]
async fn disconnect_all_drains_every_available_occurrence() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    let c = net.node("c");
    a.connect_node(&b).await.unwrap();
    a.connect_node(&b).await.unwrap();
    a.connect_node(&c).await.unwrap();
    settle().await;

    a.disconnect(None).await.unwrap();
    settle().await;

    assert_eq!(a.view_len(Direction::Outview), 0);
    assert_eq!(b.view_len(Direction::Inview), 0);
    assert_eq!(c.view_len(Direction::Inview), 0);
}

#[tokio::test(start_paused = true)]
async fn unlock_without_lock_is_rejected() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    assert!(matches!(
        a.unlock(b.id()),
        Err(N2nError::PeerNotFound { .. })
    ));
    a.connect_node(&b).await.unwrap();
    assert!(matches!(
        a.unlock(b.id()),
        Err(N2nError::LockViolation { lock: 0, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn reconnect_right_after_disconnect_counts_once() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    settle().await;
    let mut ev_b = b.subscribe();

    a.disconnect(Some(b.id())).await.unwrap();
    a.connect_node(&b).await.unwrap();
    settle().await;

    assert_eq!(a.link(Direction::Outview, b.id()).unwrap().occurrences, 1);
    assert_eq!(b.link(Direction::Inview, a.id()).unwrap().occurrences, 1);
    assert_eq!(
        drain(&mut ev_b),
        vec![
            N2nEvent::Disconnected {
                peer: a.id().clone(),
                direction: Direction::Inview,
            },
            N2nEvent::Connected {
                peer: a.id().clone(),
                direction: Direction::Inview,
            },
        ]
    );
    assert_eq!(net.factory.created(), 4);
}

/// Polls `cond` for up to a second of wall time.
async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconnect_with_parallel_readers_keeps_inview_count() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    for round in 0..50 {
        a.connect_node(&b).await.unwrap();
        a.disconnect(Some(b.id())).await.unwrap();
        a.connect_node(&b).await.unwrap();

        let counted = eventually(|| {
            b.link(Direction::Inview, a.id()).map(|l| l.occurrences) == Some(1)
        })
        .await;
        assert!(
            counted,
            "round {round}: a.out={:?} b.in={:?}",
            a.link(Direction::Outview, b.id()),
            b.link(Direction::Inview, a.id())
        );
        assert_eq!(a.link(Direction::Outview, b.id()).unwrap().occurrences, 1);

        a.disconnect(Some(b.id())).await.unwrap();
        assert!(eventually(|| !b.exists(Direction::Inview, a.id())).await);
    }
}
