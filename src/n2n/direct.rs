use std::{sync::Arc, time::Duration};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    error::N2nError,
    messages::ControlMessage,
    n2n::{N2n, links::OfferRoute},
    peer_id::{JobId, PeerId},
    view::Direction,
};

/// What the server side of `CONNECT_TO_US` has to do for the requester.
enum DialBack {
    /// Already linked both ways.
    Increase,
    /// Our outview link is still negotiating.
    Await(oneshot::Receiver<Result<(), N2nError>>),
    /// Requester is only in our inview; dial a fresh outview link.
    Open,
}

impl N2n {
    /// Asks `peer` to open (or reuse) an outview link toward us. `peer` must be in
    /// our outview. `timeout` defaults to the configured job timeout.
    pub async fn connect_to_us(
        self: &Arc<Self>,
        peer: &PeerId,
        timeout: Option<Duration>,
    ) -> Result<(), N2nError> {
        self.connect_to_us_via(peer, Direction::Outview, timeout).await
    }

    /// Same as [`N2n::connect_to_us`], sending the request over `direction`.
    pub async fn connect_to_us_via(
        self: &Arc<Self>,
        peer: &PeerId,
        direction: Direction,
        timeout: Option<Duration>,
    ) -> Result<(), N2nError> {
        if !self.views().living(direction).exists(peer) {
            return Err(N2nError::PeerNotFound {
                peer: peer.clone(),
                view: direction,
            });
        }
        let job = self.jobs.register();
        let msg = ControlMessage::ConnectToUs {
            job_id: job.id.clone(),
            id: self.id.clone(),
            outview: direction.is_outview(),
        };
        if let Err(e) = self.send_any(peer, direction, &msg).await {
            self.jobs.cancel(&job.id);
            return Err(e);
        }
        debug!(%peer, job = %job.id, "n2n:direct connect-to-us sent");
        self.jobs.wait(job, timeout.unwrap_or(self.cfg.timeout)).await
    }

    /// Server side of `CONNECT_TO_US`. The answer travels on the same physical
    /// link as the request, i.e. our side opposite to the requester's.
    pub(crate) async fn serve_connect_to_us(self: Arc<Self>, peer: PeerId, job: JobId, outview: bool) {
        let reply_on = Direction::from_outview(outview).opposite();
        let (response, reason) = match self.dial_back(&peer).await {
            Ok(()) => (true, None),
            Err(e) => {
                info!(%peer, %e, "n2n:direct connect-to-us refused");
                (false, Some(e.reason()))
            }
        };
        let reply = ControlMessage::response(job, response, reason);
        if let Err(e) = self.send_any(&peer, reply_on, &reply).await {
            warn!(%peer, %e, "n2n:direct could not answer connect-to-us");
        }
    }

    async fn dial_back(self: &Arc<Self>, peer: &PeerId) -> Result<(), N2nError> {
        let plan = {
            let mut st = self.views();
            if st.outview.exists(peer) && st.inview.exists(peer) {
                Some(DialBack::Increase)
            } else if let Some(p) = st.pending_outview.get_mut(peer) {
                let (tx, rx) = oneshot::channel();
                p.waiters.push(tx);
                Some(DialBack::Await(rx))
            } else if st.inview.exists(peer) {
                Some(DialBack::Open)
            } else {
                None
            }
        };
        match plan {
            Some(DialBack::Increase) => self.increase_occurrence(peer).await,
            Some(DialBack::Await(rx)) => {
                self.wait_link(rx).await?;
                self.increase_occurrence(peer).await
            }
            Some(DialBack::Open) => {
                let rx = self.open_outview(peer, OfferRoute::direct()).await?;
                self.wait_link(rx).await?;
                self.increase_occurrence(peer).await
            }
            None => Err(N2nError::Rejected {
                reason: format!("{peer} is neither in our inview nor our outview"),
            }),
        }
    }
}
