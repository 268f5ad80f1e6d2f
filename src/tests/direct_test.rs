use std::time::Duration;

use tokio::time::Instant;

use crate::{
    Direction, N2nError,
    tests::{Net, settle},
};

#[tokio::test(start_paused = true)]
async fn connect_to_us_dials_a_new_link_back() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    settle().await;

    a.connect_to_us(b.id(), None).await.unwrap();
    settle().await;

    assert_eq!(b.link(Direction::Outview, a.id()).unwrap().occurrences, 1);
    assert_eq!(a.link(Direction::Inview, b.id()).unwrap().occurrences, 1);
    // the first edge is untouched
    assert_eq!(a.link(Direction::Outview, b.id()).unwrap().occurrences, 1);
    assert_eq!(b.link(Direction::Inview, a.id()).unwrap().occurrences, 1);
    assert_eq!(net.factory.created(), 4);
}

#[tokio::test(start_paused = true)]
async fn connect_to_us_reuses_a_link_both_ways() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    a.connect_to_us(b.id(), None).await.unwrap();
    settle().await;
    let created = net.factory.created();

    a.connect_to_us(b.id(), None).await.unwrap();
    settle().await;

    assert_eq!(b.link(Direction::Outview, a.id()).unwrap().occurrences, 2);
    assert_eq!(a.link(Direction::Inview, b.id()).unwrap().occurrences, 2);
    assert_eq!(net.factory.created(), created);
}

#[tokio::test(start_paused = true)]
async fn connect_to_us_needs_an_outview_peer() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    assert!(matches!(
        a.connect_to_us(b.id(), None).await,
        Err(N2nError::PeerNotFound { view: Direction::Outview, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn connect_to_us_without_relationship_is_refused() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    settle().await;

    // b asks over its inview; a holds b only in its outview
    let err = b
        .connect_to_us_via(a.id(), Direction::Inview, None)
        .await
        .unwrap_err();
    assert!(matches!(err, N2nError::Rejected { .. }));
    assert!(!a.exists(Direction::Inview, b.id()));
}

#[tokio::test(start_paused = true)]
async fn connect_to_us_reports_a_failed_dial_back() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    settle().await;
    net.factory.set_silent(a.id(), true);

    let err = a.connect_to_us(b.id(), None).await.unwrap_err();
    match err {
        N2nError::Rejected { reason } => assert!(reason.contains("timeout"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
    settle().await;
    assert_eq!(b.pending_len(Direction::Outview), 0);
    assert!(!b.exists(Direction::Outview, a.id()));
}

#[tokio::test(start_paused = true)]
async fn connect_to_us_honours_a_per_call_deadline() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    settle().await;
    net.factory.set_silent(a.id(), true);

    let started = Instant::now();
    let short = Duration::from_secs(1);
    let err = a.connect_to_us(b.id(), Some(short)).await.unwrap_err();
    assert!(matches!(err, N2nError::Timeout { job: Some(_), after } if after == short));
    // well before the 4s link timeout would have answered
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn connect4u_routes_by_endpoints() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    let c = net.node("c");
    b.connect_node(&c).await.unwrap();

    b.connect4u(None, Some(c.id())).await.unwrap();
    assert_eq!(b.link(Direction::Outview, c.id()).unwrap().occurrences, 2);

    assert!(matches!(
        b.connect4u(None, Some(a.id())).await,
        Err(N2nError::PeerNotFound { .. })
    ));
    assert!(matches!(
        b.connect4u(None, None).await,
        Err(N2nError::NotImplemented(_))
    ));

    b.connect4u(Some(c.id()), None).await.unwrap();
    settle().await;
    assert_eq!(c.link(Direction::Outview, b.id()).unwrap().occurrences, 1);
}
