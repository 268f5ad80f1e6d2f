use crate::{
    Direction, N2nEvent,
    tests::{Net, drain, settle},
};

#[tokio::test(start_paused = true)]
async fn crash_reports_occurrences_on_both_sides() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    for _ in 0..3 {
        a.connect_node(&b).await.unwrap();
    }
    settle().await;
    let mut ev_a = a.subscribe();
    let mut ev_b = b.subscribe();

    b.crash().await;
    // the crashing side is empty right away
    assert_eq!(b.view_len(Direction::Inview), 0);
    assert_eq!(b.view_len(Direction::Outview), 0);
    settle().await;

    let mut expected_b = vec![N2nEvent::Crashed {
        peer: a.id().clone(),
        occurrences: 3,
    }];
    expected_b.extend((0..3).map(|_| N2nEvent::Disconnected {
        peer: a.id().clone(),
        direction: Direction::Inview,
    }));
    assert_eq!(drain(&mut ev_b), expected_b);

    let mut expected_a = vec![N2nEvent::Crashed {
        peer: b.id().clone(),
        occurrences: 3,
    }];
    expected_a.extend((0..3).map(|_| N2nEvent::Disconnected {
        peer: b.id().clone(),
        direction: Direction::Outview,
    }));
    assert_eq!(drain(&mut ev_a), expected_a);
    assert!(!a.exists(Direction::Outview, b.id()));
}

#[tokio::test(start_paused = true)]
async fn crash_covers_both_views() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    let c = net.node("c");
    a.connect_node(&b).await.unwrap();
    b.connect_node(&c).await.unwrap();
    b.connect_node(&c).await.unwrap();
    settle().await;
    let mut ev_b = b.subscribe();

    b.crash().await;
    settle().await;

    let crashed: Vec<(String, u32)> = drain(&mut ev_b)
        .into_iter()
        .filter_map(|e| match e {
            N2nEvent::Crashed { peer, occurrences } => Some((peer.into_string(), occurrences)),
            _ => None,
        })
        .collect();
    assert_eq!(crashed, vec![("c".to_string(), 2), ("a".to_string(), 1)]);
    assert!(a.neighbours().is_empty());
    assert!(c.neighbours().is_empty());
}

#[tokio::test(start_paused = true)]
async fn crash_sums_both_sides_toward_one_peer() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    b.connect_node(&a).await.unwrap();
    b.connect_node(&a).await.unwrap();
    settle().await;
    let mut ev_b = b.subscribe();

    b.crash().await;
    settle().await;

    let mut expected = vec![N2nEvent::Crashed {
        peer: a.id().clone(),
        occurrences: 3,
    }];
    expected.extend((0..2).map(|_| N2nEvent::Disconnected {
        peer: a.id().clone(),
        direction: Direction::Outview,
    }));
    expected.push(N2nEvent::Disconnected {
        peer: a.id().clone(),
        direction: Direction::Inview,
    });
    assert_eq!(drain(&mut ev_b), expected);
    assert!(b.neighbours().is_empty());
    assert!(a.neighbours().is_empty());
}

#[tokio::test(start_paused = true)]
async fn graceful_disconnect_is_not_a_crash() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    settle().await;
    let mut ev_b = b.subscribe();

    a.disconnect(Some(b.id())).await.unwrap();
    settle().await;

    let events = drain(&mut ev_b);
    assert!(events.iter().all(|e| !matches!(e, N2nEvent::Crashed { .. })));
    assert_eq!(events.len(), 1);
}
