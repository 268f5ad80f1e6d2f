use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::N2nError,
    events::N2nEvent,
    messages::{self, BridgeKind, BridgeStep, ControlMessage, OfferType, SignalOffer},
    n2n::N2n,
    peer_id::{JobId, PeerId},
    signaling::Signaling,
    transport::{LinkStatus, Transport, TransportError, TransportEvent, TransportOffer},
    view::{ConnectWaiter, Direction, LinkRecord, PendingLink},
};

/*──────────────────────── offer routes ──────────────────*/

/// How offers emitted by a link's transport reach the other end.
#[derive(Clone)]
pub(crate) enum OfferRoute {
    /// Out-of-band signaling service (no link to the peer yet).
    Signaling { sig: Arc<dyn Signaling>, job: JobId },
    /// `DIRECT_TO` / `DIRECT_BACK` over an existing link to the same peer.
    Direct { job: JobId },
    /// Relayed through `forward` with the bridge family's messages.
    Bridge {
        kind: BridgeKind,
        forward: PeerId,
        job: JobId,
    },
}

impl OfferRoute {
    pub(crate) fn direct() -> Self {
        OfferRoute::Direct { job: JobId::new() }
    }

    pub(crate) fn job(&self) -> &JobId {
        match self {
            OfferRoute::Signaling { job, .. }
            | OfferRoute::Direct { job }
            | OfferRoute::Bridge { job, .. } => job,
        }
    }
}

/// Identity of one physical link as seen by its reader task.
#[derive(Clone, Debug)]
pub(crate) struct LinkCtx {
    pub peer: PeerId,
    pub direction: Direction,
    pub link_id: String,
}

/*──────────────────────── link lifecycle ────────────────*/

impl N2n {
    /// Creates (or joins) a pending outview link toward `peer`. The receiver fires
    /// once the transport connects, with the record promoted at zero occurrences.
    pub(crate) async fn open_outview(
        self: &Arc<Self>,
        peer: &PeerId,
        route: OfferRoute,
    ) -> Result<oneshot::Receiver<Result<(), N2nError>>, N2nError> {
        if peer == &self.id {
            return Err(N2nError::Rejected {
                reason: "cannot connect to ourselves".into(),
            });
        }
        let (tx, rx) = oneshot::channel();
        let transport = {
            let mut st = self.views();
            if let Some(p) = st.pending_outview.get_mut(peer) {
                p.waiters.push(tx);
                return Ok(rx);
            }
            let transport = self.factory.create(&self.id, peer, true);
            st.pending_outview.insert(
                peer.clone(),
                PendingLink {
                    record: LinkRecord::new(transport.clone(), route),
                    waiters: vec![tx],
                },
            );
            transport
        };
        debug!(%peer, link = %transport.link_id(), "n2n: opening outview link");
        let ctx = self.spawn_link(peer.clone(), Direction::Outview, transport.clone());
        if let Err(e) = transport.connect().await {
            self.fail_pending(&ctx, N2nError::Transport(e)).await;
        }
        Ok(rx)
    }

    /// Creates the acceptor side for an initiator we have no link with yet.
    pub(crate) fn accept_inview(self: &Arc<Self>, peer: &PeerId, route: OfferRoute) -> Arc<dyn Transport> {
        let transport = self.factory.create(&self.id, peer, false);
        {
            let mut st = self.views();
            st.pending_inview.insert(
                peer.clone(),
                PendingLink {
                    record: LinkRecord::new(transport.clone(), route),
                    waiters: Vec::new(),
                },
            );
        }
        debug!(%peer, link = %transport.link_id(), "n2n: accepting inview link");
        self.spawn_link(peer.clone(), Direction::Inview, transport.clone());
        transport
    }

    /// Spawns the reader task and the connection timer of a fresh pending link.
    fn spawn_link(
        self: &Arc<Self>,
        peer: PeerId,
        direction: Direction,
        transport: Arc<dyn Transport>,
    ) -> LinkCtx {
        let ctx = LinkCtx {
            peer,
            direction,
            link_id: transport.link_id().to_string(),
        };
        let rx = transport.events();
        let this = Arc::clone(self);
        let reader_ctx = ctx.clone();
        tokio::spawn(async move {
            this.link_loop(reader_ctx, rx).await;
        });

        let this = Arc::clone(self);
        let timer_ctx = ctx.clone();
        let after = self.cfg.pending_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            this.fail_pending(&timer_ctx, N2nError::Timeout { job: None, after })
                .await;
        });
        ctx
    }

    #[instrument(skip_all, fields(peer = %ctx.peer, direction = %ctx.direction))]
    async fn link_loop(self: Arc<Self>, ctx: LinkCtx, mut rx: mpsc::Receiver<TransportEvent>) {
        while let Some(ev) = rx.recv().await {
            match ev {
                TransportEvent::Offer { offer, renegotiate } => {
                    self.on_transport_offer(&ctx, offer, renegotiate).await
                }
                TransportEvent::Connect => self.promote(&ctx),
                TransportEvent::Data(bytes) => self.receive(&ctx, &bytes).await,
                TransportEvent::Close => {
                    self.on_close(&ctx);
                    break;
                }
                TransportEvent::Error(e) => self.on_transport_error(&ctx, e).await,
            }
        }
        debug!("n2n: link reader finished");
    }

    /// Pending → living. The record starts at zero occurrences; the operation that
    /// opened the link adds the first one.
    fn promote(&self, ctx: &LinkCtx) {
        let (waiters, replaced) = {
            let mut st = self.views();
            let matches = st
                .pending(ctx.direction)
                .get(&ctx.peer)
                .is_some_and(|p| p.record.transport.link_id() == ctx.link_id);
            if !matches {
                debug!(link = %ctx.link_id, "n2n: connect for a link no longer pending");
                return;
            }
            let Some(PendingLink { record, waiters }) =
                st.pending_mut(ctx.direction).remove(&ctx.peer)
            else {
                return;
            };
            let replaced = st.living_mut(ctx.direction).insert(ctx.peer.clone(), record);
            (waiters, replaced)
        };
        info!(peer = %ctx.peer, direction = %ctx.direction, "n2n: link established");
        if let Some(old) = replaced {
            warn!(
                peer = %ctx.peer,
                occurrences = old.occurrences,
                "n2n: replaced a living link, closing the old transport"
            );
            for _ in 0..old.occurrences {
                self.emit(N2nEvent::Disconnected {
                    peer: ctx.peer.clone(),
                    direction: ctx.direction,
                });
            }
            tokio::spawn(async move { old.transport.disconnect().await });
        }
        for w in waiters {
            let _ = w.send(Ok(()));
        }
    }

    fn on_close(&self, ctx: &LinkCtx) {
        let occurrences = {
            let mut st = self.views();
            let pending_match = st
                .pending(ctx.direction)
                .get(&ctx.peer)
                .is_some_and(|p| p.record.transport.link_id() == ctx.link_id);
            if pending_match {
                if let Some(p) = st.pending_mut(ctx.direction).remove(&ctx.peer) {
                    fail_waiters(p.waiters, N2nError::Transport(TransportError::ConnectionClosed));
                }
                return;
            }
            let living_match = st
                .living(ctx.direction)
                .get(&ctx.peer)
                .is_some_and(|r| r.transport.link_id() == ctx.link_id);
            if !living_match {
                return;
            }
            st.living_mut(ctx.direction)
                .remove(&ctx.peer)
                .map(|r| r.occurrences)
                .unwrap_or(0)
        };
        if occurrences > 0 {
            warn!(peer = %ctx.peer, direction = %ctx.direction, occurrences, "n2n: link crashed");
            self.emit_crash(&ctx.peer, &[(ctx.direction, occurrences)]);
        }
    }

    /// One `Crashed` carrying the total, then one `Disconnected` per occurrence.
    pub(crate) fn emit_crash(&self, peer: &PeerId, sides: &[(Direction, u32)]) {
        let occurrences = sides.iter().map(|(_, n)| n).sum();
        self.emit(N2nEvent::Crashed {
            peer: peer.clone(),
            occurrences,
        });
        for &(direction, n) in sides {
            for _ in 0..n {
                self.emit(N2nEvent::Disconnected {
                    peer: peer.clone(),
                    direction,
                });
            }
        }
    }

    async fn on_transport_error(&self, ctx: &LinkCtx, e: TransportError) {
        warn!(peer = %ctx.peer, ?e, "n2n: transport error");
        let living = {
            let st = self.views();
            st.living(ctx.direction)
                .get(&ctx.peer)
                .filter(|r| r.transport.link_id() == ctx.link_id)
                .map(|r| r.transport.clone())
        };
        match living {
            // surfaces as a crash through the Close that follows
            Some(t) => t.disconnect().await,
            None => self.fail_pending(ctx, N2nError::Transport(e)).await,
        }
    }

    /// Drops a pending link if it is still the one in `ctx`, failing its waiters.
    pub(crate) async fn fail_pending(&self, ctx: &LinkCtx, err: N2nError) {
        let removed = {
            let mut st = self.views();
            let matches = st
                .pending(ctx.direction)
                .get(&ctx.peer)
                .is_some_and(|p| p.record.transport.link_id() == ctx.link_id);
            if matches {
                st.pending_mut(ctx.direction).remove(&ctx.peer)
            } else {
                None
            }
        };
        if let Some(PendingLink { record, waiters }) = removed {
            info!(peer = %ctx.peer, direction = %ctx.direction, %err, "n2n: pending link dropped");
            fail_waiters(waiters, err);
            record.transport.disconnect().await;
        }
    }

    /// Waits for a pending link to connect, bounded by the job timeout.
    pub(crate) async fn wait_link(
        &self,
        rx: oneshot::Receiver<Result<(), N2nError>>,
    ) -> Result<(), N2nError> {
        let after = self.cfg.timeout;
        match tokio::time::timeout(after, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(N2nError::Transport(TransportError::ConnectionClosed)),
            Err(_) => Err(N2nError::Timeout { job: None, after }),
        }
    }

    /*──────── occurrences ────────*/

    /// Adds one outview occurrence and tells the remote to bump its inview.
    /// The notification is best effort: the edge counts once we hold it.
    pub(crate) async fn increase_occurrence(&self, peer: &PeerId) -> Result<(), N2nError> {
        let transport = {
            let mut st = self.views();
            let r = st
                .outview
                .get_mut(peer)
                .ok_or_else(|| N2nError::PeerNotFound {
                    peer: peer.clone(),
                    view: Direction::Outview,
                })?;
            r.occurrences += 1;
            r.transport.clone()
        };
        self.emit(N2nEvent::Connected {
            peer: peer.clone(),
            direction: Direction::Outview,
        });
        if let Err(e) = self.send_on(&transport, &ControlMessage::IncIn).await {
            warn!(%peer, %e, "n2n: INC_IN not delivered");
        }
        Ok(())
    }

    /*──────── sending ────────*/

    pub(crate) async fn send_on(
        &self,
        transport: &Arc<dyn Transport>,
        msg: &ControlMessage,
    ) -> Result<(), N2nError> {
        let bytes = messages::encode(msg)?;
        if bytes.len() > self.cfg.max_message_bytes {
            return Err(N2nError::Encode(format!(
                "{} message is {} bytes, limit is {}",
                msg.kind(),
                bytes.len(),
                self.cfg.max_message_bytes
            )));
        }
        transport.send(bytes).await.map_err(N2nError::from)
    }

    /// Sends over the connected link to `peer` on the `preferred` side, falling
    /// back to the other side.
    pub(crate) async fn send_any(
        &self,
        peer: &PeerId,
        preferred: Direction,
        msg: &ControlMessage,
    ) -> Result<(), N2nError> {
        let transport = {
            let st = self.views();
            [preferred, preferred.opposite()]
                .into_iter()
                .filter_map(|d| st.living(d).get(peer))
                .map(|r| r.transport.clone())
                .find(|t| t.status() == LinkStatus::Connected)
        };
        match transport {
            Some(t) => self.send_on(&t, msg).await,
            None => Err(N2nError::PeerNotFound {
                peer: peer.clone(),
                view: preferred,
            }),
        }
    }

    /*──────── offers ────────*/

    async fn on_transport_offer(&self, ctx: &LinkCtx, offer: TransportOffer, renegotiate: bool) {
        let route = {
            let st = self.views();
            st.pending(ctx.direction)
                .get(&ctx.peer)
                .map(|p| &p.record)
                .or_else(|| st.living(ctx.direction).get(&ctx.peer))
                .filter(|r| r.transport.link_id() == ctx.link_id)
                .map(|r| r.route.clone())
        };
        let Some(route) = route else {
            debug!(peer = %ctx.peer, "n2n: offer from an unknown link dropped");
            return;
        };
        let route = if renegotiate {
            OfferRoute::Direct {
                job: route.job().clone(),
            }
        } else {
            route
        };
        let signal = SignalOffer::from_link(
            ctx.direction,
            &self.id,
            &ctx.peer,
            route.job().clone(),
            offer,
        );
        if let Err(e) = self.route_offer(&route, signal).await {
            warn!(peer = %ctx.peer, %e, "n2n: could not route offer");
        }
    }

    async fn route_offer(&self, route: &OfferRoute, mut offer: SignalOffer) -> Result<(), N2nError> {
        match route {
            OfferRoute::Signaling { sig, .. } => sig.send_offer(offer).await,
            OfferRoute::Direct { .. } => {
                let recipient = offer.recipient().clone();
                let (msg, preferred) = match offer.offer_type {
                    OfferType::New => (ControlMessage::DirectTo(offer), Direction::Inview),
                    OfferType::Back => (ControlMessage::DirectBack(offer), Direction::Outview),
                };
                self.send_any(&recipient, preferred, &msg).await
            }
            OfferRoute::Bridge { kind, forward, .. } => {
                offer.forward = Some(forward.clone());
                let (step, preferred) = match offer.offer_type {
                    OfferType::New => (BridgeStep::Forward, kind.from_view().opposite()),
                    OfferType::Back => (BridgeStep::ForwardBack, kind.dest_view().opposite()),
                };
                let msg = ControlMessage::bridge_offer(*kind, step, offer);
                self.send_any(forward, preferred, &msg).await
            }
        }
    }

    /// Feeds an offer addressed to us into the matching transport, creating the
    /// acceptor side when an unknown initiator dials in.
    pub(crate) async fn handle_offer(self: &Arc<Self>, offer: SignalOffer, route: OfferRoute) {
        if offer.recipient() != &self.id {
            warn!(to = %offer.recipient(), "n2n: offer for another peer dropped");
            return;
        }
        let peer = offer.sender().clone();
        let transport = match offer.offer_type {
            OfferType::New => {
                let existing = {
                    let st = self.views();
                    st.pending_inview
                        .get(&peer)
                        .map(|p| p.record.transport.clone())
                        .or_else(|| {
                            // a closed link is being replaced, not renegotiated
                            st.inview
                                .get(&peer)
                                .filter(|r| r.transport.status() == LinkStatus::Connected)
                                .map(|r| r.transport.clone())
                        })
                };
                existing.unwrap_or_else(|| self.accept_inview(&peer, route))
            }
            OfferType::Back => {
                let existing = {
                    let st = self.views();
                    st.pending_outview
                        .get(&peer)
                        .map(|p| p.record.transport.clone())
                        .or_else(|| st.outview.get(&peer).map(|r| r.transport.clone()))
                };
                match existing {
                    Some(t) => t,
                    None => {
                        debug!(%peer, job = %offer.job_id, "n2n: answer for no link dropped");
                        return;
                    }
                }
            }
        };
        if let Err(e) = transport.accept_offer(offer.offer).await {
            warn!(%peer, ?e, "n2n: transport refused offer");
        }
    }

    /// Consumes the offer stream of `sig`. A signaling already attached hands out
    /// a closed stream, so attaching twice is harmless.
    pub fn listen_signaling(self: &Arc<Self>, sig: Arc<dyn Signaling>) {
        let mut rx = sig.offers();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(offer) = rx.recv().await {
                let route = OfferRoute::Signaling {
                    sig: sig.clone(),
                    job: offer.job_id.clone(),
                };
                this.handle_offer(offer, route).await;
            }
            debug!(id = %this.id, "signaling: offer stream closed");
        });
    }
}

fn fail_waiters(waiters: Vec<ConnectWaiter>, err: N2nError) {
    for w in waiters {
        let _ = w.send(Err(err.clone()));
    }
}
