mod crash_test;
mod direct_test;
mod dispatch_test;
mod disconnect_test;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::broadcast;

use crate::{
    N2n, N2nConfig, N2nEvent, signaling::Signaling, transport::inmem::InMemTransportFactory,
};

// Unique namespace per test for in-mem transport isolation
static NEXT_NS: AtomicU64 = AtomicU64::new(1_000_000);
fn ns() -> u64 {
    NEXT_NS.fetch_add(1, Ordering::Relaxed)
}

/// Nodes sharing one in-memory network.
pub(crate) struct Net {
    pub factory: Arc<InMemTransportFactory>,
}

impl Net {
    pub fn new() -> Self {
        Self {
            factory: Arc::new(InMemTransportFactory::with_namespace(ns())),
        }
    }

    pub fn node(&self, id: &str) -> Arc<N2n> {
        self.node_with(id, None)
    }

    pub fn node_with(&self, id: &str, sig: Option<Arc<dyn Signaling>>) -> Arc<N2n> {
        N2n::new(N2nConfig::default().with_id(id), self.factory.clone(), sig).unwrap()
    }
}

/// Lets spawned readers and handlers run to completion (time is paused, so the
/// clock only moves once everything is idle).
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub(crate) fn drain(rx: &mut broadcast::Receiver<N2nEvent>) -> Vec<N2nEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}
