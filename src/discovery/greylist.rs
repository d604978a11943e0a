use super::GetPeers;
use crate::peer::Peer;
use crate::{Error, Result};

use tracing::debug;

use actix::{Actor, Context, Handler, Recipient, ResponseFuture};

use tokio::time::{Duration, Instant};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Records a failure against a peer; the peer is excluded from `GetPeers`
/// results until the greylist TTL elapses.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Greylist {
    pub target: SocketAddr,
}

impl Greylist {
    pub fn new(target: SocketAddr) -> Self {
        Greylist { target }
    }

    /// Maps an error to the peer it is attributable to, when the error
    /// carries one.
    pub fn from_error(err: &Error) -> Option<Greylist> {
        err.failed_target().map(Greylist::new)
    }
}

/// Decorates a discovery service with a greylist: peers that recently
/// produced errors are left out of the peer list until their entry expires,
/// so the caller's retry loop picks a different target while the peer
/// recovers. Entries expire lazily on the next lookup.
pub struct GreylistFilter {
    inner: Recipient<GetPeers>,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<SocketAddr, Instant>>>,
}

impl GreylistFilter {
    pub fn new(inner: Recipient<GetPeers>, ttl: Duration) -> Self {
        GreylistFilter { inner, ttl, entries: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl Actor for GreylistFilter {
    type Context = Context<Self>;
}

impl Handler<Greylist> for GreylistFilter {
    type Result = ();

    fn handle(&mut self, msg: Greylist, _ctx: &mut Context<Self>) -> Self::Result {
        debug!("greylisting {:?} for {:?}", msg.target, self.ttl);
        let mut entries = self.entries.lock().unwrap();
        entries.insert(msg.target, Instant::now() + self.ttl);
    }
}

impl Handler<GetPeers> for GreylistFilter {
    type Result = ResponseFuture<Result<Vec<Peer>>>;

    fn handle(&mut self, _msg: GetPeers, _ctx: &mut Context<Self>) -> Self::Result {
        let inner = self.inner.clone();
        let entries = self.entries.clone();
        Box::pin(async move {
            let peers = inner.send(GetPeers).await??;
            let now = Instant::now();
            let mut entries = entries.lock().unwrap();
            entries.retain(|_, expiry| *expiry > now);
            let filtered: Vec<Peer> =
                peers.into_iter().filter(|peer| !entries.contains_key(&peer.url())).collect();
            if filtered.is_empty() {
                return Err(Error::NoPeersFound);
            }
            Ok(filtered)
        })
    }
}
