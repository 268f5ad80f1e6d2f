use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::N2nError,
    events::N2nEvent,
    messages::{self, BridgeKind, ControlMessage},
    n2n::{
        N2n, Views,
        links::{LinkCtx, OfferRoute},
    },
    view::{Direction, LinkRecord},
};

impl N2n {
    /// Decodes one inbound message and routes it by type. Bad input is logged and
    /// dropped; it never tears the link down.
    pub(crate) async fn receive(self: &Arc<Self>, ctx: &LinkCtx, bytes: &[u8]) {
        if bytes.len() > self.cfg.max_message_bytes {
            let err = N2nError::ProtocolViolation(format!("{} byte message", bytes.len()));
            return dropped(ctx, err);
        }
        let msg = match messages::decode(bytes) {
            Ok(m) => m,
            Err(e) => return dropped(ctx, N2nError::ProtocolViolation(e.to_string())),
        };
        debug!(peer = %ctx.peer, kind = msg.kind(), "n2n: received");

        match msg {
            ControlMessage::Disconnect => self.on_remote_disconnect(ctx).await,
            ControlMessage::IncIn => {
                if let Err(e) = self.on_inc_in(ctx) {
                    dropped(ctx, e)
                }
            }
            ControlMessage::DecIn => {
                if let Err(e) = self.on_dec_in(ctx) {
                    dropped(ctx, e)
                }
            }
            ControlMessage::ConnectToUs {
                job_id,
                id,
                outview,
            } => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.serve_connect_to_us(id, job_id, outview).await });
            }
            ControlMessage::Response {
                job_id,
                response,
                reason,
            } => {
                self.jobs.resolve(&job_id, response, reason);
            }
            ControlMessage::Application { payload } => self.emit(N2nEvent::Received {
                peer: ctx.peer.clone(),
                payload,
            }),
            ControlMessage::DirectTo(offer) | ControlMessage::DirectBack(offer) => {
                let route = OfferRoute::Direct {
                    job: offer.job_id.clone(),
                };
                self.handle_offer(offer, route).await
            }
            ControlMessage::BridgeIo(req) => self.spawn_bridge(BridgeKind::Io, req),
            ControlMessage::BridgeOi(req) => self.spawn_bridge(BridgeKind::Oi, req),
            ControlMessage::BridgeOo(req) => self.spawn_bridge(BridgeKind::Oo, req),
            other => match other.into_bridge_offer() {
                Ok((kind, step, offer)) => self.on_bridge_offer(ctx, kind, step, offer).await,
                Err(m) => dropped(
                    ctx,
                    N2nError::ProtocolViolation(format!("no handler for {}", m.kind())),
                ),
            },
        }
    }

    /// Remote closed its last occurrence on this link.
    async fn on_remote_disconnect(&self, ctx: &LinkCtx) {
        let removed = {
            let mut st = self.views();
            let matches = st
                .living(ctx.direction)
                .get(&ctx.peer)
                .is_some_and(|r| r.transport.link_id() == ctx.link_id);
            if matches {
                st.living_mut(ctx.direction).remove(&ctx.peer)
            } else {
                None
            }
        };
        let Some(record) = removed else {
            debug!(peer = %ctx.peer, "n2n: DISCONNECT for an unknown link");
            return;
        };
        for _ in 0..record.occurrences {
            self.emit(N2nEvent::Disconnected {
                peer: ctx.peer.clone(),
                direction: ctx.direction,
            });
        }
        record.transport.disconnect().await;
    }

    /// Inview counts follow the remote without local checks. Only the record of
    /// the link the message arrived on is touched; an acceptor still pending
    /// keeps the count through its promotion.
    fn on_inc_in(&self, ctx: &LinkCtx) -> Result<(), N2nError> {
        {
            let mut st = self.views();
            let record = inview_record(&mut st, ctx).ok_or_else(|| {
                N2nError::ProtocolViolation(format!("INC_IN on unknown link {}", ctx.link_id))
            })?;
            record.occurrences += 1;
        }
        self.emit(N2nEvent::Connected {
            peer: ctx.peer.clone(),
            direction: Direction::Inview,
        });
        Ok(())
    }

    fn on_dec_in(&self, ctx: &LinkCtx) -> Result<(), N2nError> {
        {
            let mut st = self.views();
            match inview_record(&mut st, ctx) {
                Some(r) if r.occurrences > 0 => r.occurrences -= 1,
                Some(_) => return Err(N2nError::ProtocolViolation("DEC_IN below zero".into())),
                None => {
                    return Err(N2nError::ProtocolViolation(format!(
                        "DEC_IN on unknown link {}",
                        ctx.link_id
                    )));
                }
            }
        }
        self.emit(N2nEvent::Disconnected {
            peer: ctx.peer.clone(),
            direction: Direction::Inview,
        });
        Ok(())
    }
}

/// Inview record owned by the link `ctx` reads from, living or still pending.
fn inview_record<'a>(st: &'a mut Views, ctx: &LinkCtx) -> Option<&'a mut LinkRecord> {
    let owns = |r: &LinkRecord| r.transport.link_id() == ctx.link_id;
    if st.inview.get(&ctx.peer).is_some_and(owns) {
        return st.inview.get_mut(&ctx.peer);
    }
    st.pending_inview
        .get_mut(&ctx.peer)
        .map(|p| &mut p.record)
        .filter(|r| owns(&**r))
}

fn dropped(ctx: &LinkCtx, err: N2nError) {
    warn!(peer = %ctx.peer, link = %ctx.link_id, %err, "n2n: message dropped");
}
