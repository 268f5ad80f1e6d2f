use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    error::N2nError,
    messages::{BridgeKind, BridgeRequest, BridgeStep, ControlMessage, SignalOffer},
    n2n::{
        N2n,
        links::{LinkCtx, OfferRoute},
    },
    peer_id::PeerId,
};

impl N2n {
    /// `from` in our inview, `dest` in our outview: `from` gains `dest` in its outview.
    pub async fn bridge_io(
        self: &Arc<Self>,
        from: &PeerId,
        dest: &PeerId,
        timeout: Option<Duration>,
    ) -> Result<(), N2nError> {
        self.bridge(BridgeKind::Io, from, dest, timeout).await
    }

    /// `from` in our outview, `dest` in our inview.
    pub async fn bridge_oi(
        self: &Arc<Self>,
        from: &PeerId,
        dest: &PeerId,
        timeout: Option<Duration>,
    ) -> Result<(), N2nError> {
        self.bridge(BridgeKind::Oi, from, dest, timeout).await
    }

    /// Both in our outview.
    pub async fn bridge_oo(
        self: &Arc<Self>,
        from: &PeerId,
        dest: &PeerId,
        timeout: Option<Duration>,
    ) -> Result<(), N2nError> {
        self.bridge(BridgeKind::Oo, from, dest, timeout).await
    }

    /// Relay side: asks `from` to link to `dest`, forwarding offers through us.
    /// `timeout` defaults to the configured job timeout.
    async fn bridge(
        self: &Arc<Self>,
        kind: BridgeKind,
        from: &PeerId,
        dest: &PeerId,
        timeout: Option<Duration>,
    ) -> Result<(), N2nError> {
        {
            let st = self.views();
            for (peer, view) in [(from, kind.from_view()), (dest, kind.dest_view())] {
                if !st.living(view).exists(peer) {
                    return Err(N2nError::PeerNotFound {
                        peer: peer.clone(),
                        view,
                    });
                }
            }
        }
        let job = self.jobs.register();
        let req = BridgeRequest {
            job_id: job.id.clone(),
            from: from.clone(),
            dest: dest.clone(),
            forward: self.id.clone(),
        };
        if let Err(e) = self
            .send_any(from, kind.from_view(), &ControlMessage::bridge(kind, req))
            .await
        {
            self.jobs.cancel(&job.id);
            return Err(e);
        }
        debug!(bridge = kind.name(), %from, %dest, job = %job.id, "n2n:bridge request sent");
        self.jobs.wait(job, timeout.unwrap_or(self.cfg.timeout)).await
    }

    pub(crate) fn spawn_bridge(self: &Arc<Self>, kind: BridgeKind, req: BridgeRequest) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.execute_bridge(kind, req).await });
    }

    /// Executor side, run on `from`. Exactly one `RESPONSE` goes back to the relay.
    async fn execute_bridge(self: Arc<Self>, kind: BridgeKind, req: BridgeRequest) {
        let (response, reason) = match self.link_to_dest(kind, &req).await {
            Ok(()) => {
                info!(bridge = kind.name(), dest = %req.dest, "n2n:bridge established");
                (true, None)
            }
            Err(e) => {
                info!(bridge = kind.name(), dest = %req.dest, %e, "n2n:bridge failed");
                (false, Some(e.reason()))
            }
        };
        let reply = ControlMessage::response(req.job_id.clone(), response, reason);
        if let Err(e) = self
            .send_any(&req.forward, kind.from_view().opposite(), &reply)
            .await
        {
            warn!(relay = %req.forward, %e, "n2n:bridge could not answer relay");
        }
    }

    async fn link_to_dest(self: &Arc<Self>, kind: BridgeKind, req: &BridgeRequest) -> Result<(), N2nError> {
        if req.dest == self.id {
            return Err(N2nError::Rejected {
                reason: "cannot bridge to ourselves".into(),
            });
        }
        let (living, pending) = {
            let st = self.views();
            (st.outview.exists(&req.dest), st.pending_outview.has(&req.dest))
        };
        if living {
            return self.increase_occurrence(&req.dest).await;
        }
        if pending {
            return Err(N2nError::Rejected {
                reason: "pending connection".into(),
            });
        }
        let route = OfferRoute::Bridge {
            kind,
            forward: req.forward.clone(),
            job: req.job_id.clone(),
        };
        let rx = self.open_outview(&req.dest, route).await?;
        self.wait_link(rx).await?;
        self.increase_occurrence(&req.dest).await
    }

    /// Offer legs. The relay passes offers along; the final recipient feeds them
    /// to its transport and keeps answering through the same relay.
    pub(crate) async fn on_bridge_offer(
        self: &Arc<Self>,
        ctx: &LinkCtx,
        kind: BridgeKind,
        step: BridgeStep,
        offer: SignalOffer,
    ) {
        match step {
            BridgeStep::Forward => {
                let dest = offer.destination.clone();
                let msg = ControlMessage::bridge_offer(kind, BridgeStep::ForwardResponse, offer);
                if let Err(e) = self.send_any(&dest, kind.dest_view(), &msg).await {
                    warn!(bridge = kind.name(), %dest, %e, "n2n:bridge could not relay offer");
                }
            }
            BridgeStep::ForwardBack => {
                let initiator = offer.initiator.clone();
                let msg = ControlMessage::bridge_offer(kind, BridgeStep::ForwardResponse, offer);
                if let Err(e) = self.send_any(&initiator, kind.from_view(), &msg).await {
                    warn!(bridge = kind.name(), %initiator, %e, "n2n:bridge could not relay answer");
                }
            }
            BridgeStep::ForwardResponse => {
                let route = OfferRoute::Bridge {
                    kind,
                    forward: offer.forward.clone().unwrap_or_else(|| ctx.peer.clone()),
                    job: offer.job_id.clone(),
                };
                self.handle_offer(offer, route).await
            }
        }
    }
}
