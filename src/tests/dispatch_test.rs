use std::sync::Arc;

use serde_json::json;

use crate::{
    Direction, N2nEvent,
    tests::{Net, drain, settle},
    transport::Transport,
};

#[tokio::test(start_paused = true)]
async fn bad_input_on_a_living_link_is_dropped() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    settle().await;
    let to_b: Arc<dyn Transport> = a.views().outview.get(b.id()).unwrap().transport.clone();
    let mut ev_b = b.subscribe();

    for raw in [
        b"definitely not json".to_vec(),
        br#"{"type":"n2n:NOPE"}"#.to_vec(),
        br#"{"type":"n2n:RESPONSE","response":true}"#.to_vec(),
        br#"{"jobId":"j","response":true}"#.to_vec(),
    ] {
        to_b.send(raw).await.unwrap();
    }
    settle().await;

    assert!(drain(&mut ev_b).is_empty());
    assert!(a.available(Direction::Outview, b.id()));
    assert_eq!(b.link(Direction::Inview, a.id()).unwrap().occurrences, 1);

    a.send(b.id(), Direction::Outview, json!({"still": "alive"}))
        .await
        .unwrap();
    a.connect_node(&b).await.unwrap();
    settle().await;
    assert_eq!(
        drain(&mut ev_b),
        vec![
            N2nEvent::Received {
                peer: a.id().clone(),
                payload: json!({"still": "alive"}),
            },
            N2nEvent::Connected {
                peer: a.id().clone(),
                direction: Direction::Inview,
            },
        ]
    );
    assert_eq!(b.link(Direction::Inview, a.id()).unwrap().occurrences, 2);
}

#[tokio::test(start_paused = true)]
async fn occurrence_updates_on_the_wrong_side_are_dropped() {
    let net = Net::new();
    let a = net.node("a");
    let b = net.node("b");
    a.connect_node(&b).await.unwrap();
    settle().await;
    // b talks back over the link a initiated; a holds no inview for b
    let to_a: Arc<dyn Transport> = b.views().inview.get(a.id()).unwrap().transport.clone();
    let mut ev_a = a.subscribe();

    to_a.send(br#"{"type":"n2n:INC_IN"}"#.to_vec()).await.unwrap();
    to_a.send(br#"{"type":"n2n:DEC_IN"}"#.to_vec()).await.unwrap();
    settle().await;

    assert!(drain(&mut ev_a).is_empty());
    assert!(!a.exists(Direction::Inview, b.id()));
    assert_eq!(a.link(Direction::Outview, b.id()).unwrap().occurrences, 1);
}
