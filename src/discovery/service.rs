use super::{ClientContext, Close, GetPeers, Initialize};
use crate::client;
use crate::connector::CachingConnector;
use crate::msp_id::MspId;
use crate::peer::{Peer, PeerFactory};
use crate::protocol::{Request, Response};
use crate::settings::EndpointConfig;
use crate::{Error, Result};

use tracing::{debug, warn};

use actix::{
    Actor, ActorContext, ActorFutureExt, AsyncContext, Context, Handler, ResponseFuture,
    WrapFuture,
};

use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Scope {
    /// Peers of the client's own organisation.
    LocalMsp(MspId),
    /// Peers of one channel, restricted to the channel's membership set.
    Channel { channel_id: String, membership: HashSet<MspId> },
}

impl Scope {
    fn admits(&self, msp_id: &MspId) -> bool {
        match self {
            Scope::LocalMsp(local) => local == msp_id,
            Scope::Channel { membership, .. } => membership.contains(msp_id),
        }
    }

    fn request(&self) -> Request {
        match self {
            Scope::LocalMsp(msp_id) => Request::DiscoverLocalPeers { msp_id: msp_id.clone() },
            Scope::Channel { channel_id, .. } => {
                Request::DiscoverChannelPeers { channel_id: channel_id.clone() }
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Scope::LocalMsp(msp_id) => format!("local peers of {}", msp_id),
            Scope::Channel { channel_id, .. } => format!("peers of channel {}", channel_id),
        }
    }
}

struct CachedPeers {
    peers: Vec<Peer>,
    fetched_at: Instant,
}

/// A discovery service instance. Holds the freshest known peer list for its
/// scope and refreshes it on access once the TTL has elapsed. At most one
/// refresh query is in flight at a time; callers arriving during a refresh
/// wait for its outcome rather than issuing their own query.
pub struct Discovery {
    scope: Scope,
    targets: Vec<SocketAddr>,
    connector: Arc<CachingConnector>,
    factory: Arc<dyn PeerFactory>,
    ttl: Duration,
    request_timeout: Duration,
    context: Option<ClientContext>,
    cached: Option<CachedPeers>,
    waiters: Vec<oneshot::Sender<Result<Vec<Peer>>>>,
    refreshing: bool,
}

impl Discovery {
    /// Discovery of the client organisation's own peers, queried through the
    /// configured bootstrap peers.
    pub fn local(
        config: &dyn EndpointConfig,
        connector: Arc<CachingConnector>,
        factory: Arc<dyn PeerFactory>,
    ) -> Discovery {
        Discovery {
            scope: Scope::LocalMsp(config.local_msp_id().clone()),
            targets: config.bootstrap_peers(),
            connector,
            factory,
            ttl: config.discovery_ttl(),
            request_timeout: config.request_timeout(),
            context: None,
            cached: None,
            waiters: vec![],
            refreshing: false,
        }
    }

    /// Discovery of one channel's peers, queried through the channel's
    /// anchor peers and filtered to the channel's membership set.
    pub fn channel(
        config: &dyn EndpointConfig,
        connector: Arc<CachingConnector>,
        factory: Arc<dyn PeerFactory>,
        channel_id: &str,
    ) -> Result<Discovery> {
        let settings = config
            .channel(channel_id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown channel {}", channel_id)))?;
        let membership: HashSet<MspId> = settings.msps.iter().cloned().collect();
        Ok(Discovery {
            scope: Scope::Channel { channel_id: channel_id.to_string(), membership },
            targets: settings.anchor_peers.clone(),
            connector,
            factory,
            ttl: config.discovery_ttl(),
            request_timeout: config.request_timeout(),
            context: None,
            cached: None,
            waiters: vec![],
            refreshing: false,
        })
    }
}

/// Queries every target, unions the usable endpoint descriptors and maps
/// them to peers. Per-target failures are logged; the query as a whole fails
/// only when no target produced a usable response.
async fn query_peers(
    connector: Arc<CachingConnector>,
    targets: Vec<SocketAddr>,
    request: Request,
    deadline: Duration,
    factory: Arc<dyn PeerFactory>,
    scope: Scope,
) -> Result<Vec<Peer>> {
    if targets.is_empty() {
        return Err(Error::DiscoveryQueryFailed("no discovery targets configured".to_string()));
    }
    let target_count = targets.len();
    let responses = client::fanout(&connector, targets, request, deadline).await;

    let mut any_ok = false;
    let mut seen: HashSet<SocketAddr> = HashSet::new();
    let mut peers = vec![];
    for (target, result) in responses {
        match result {
            Ok(Response::Peers(endpoints)) => {
                any_ok = true;
                for endpoint in endpoints {
                    if seen.contains(&endpoint.url) {
                        continue;
                    }
                    if !scope.admits(&endpoint.msp_id) {
                        debug!(
                            "dropping out-of-scope peer {:?} of {}",
                            endpoint.url, endpoint.msp_id
                        );
                        continue;
                    }
                    match factory.create_peer(endpoint.clone()) {
                        Ok(peer) => {
                            seen.insert(peer.url());
                            peers.push(peer);
                        }
                        Err(err) => {
                            warn!("skipping unusable endpoint {:?}: {}", endpoint.url, err)
                        }
                    }
                }
            }
            Ok(_) => warn!("unexpected discovery response from {:?}", target),
            Err(err) => warn!("discovery query to {:?} failed: {}", target, err),
        }
    }
    if !any_ok {
        return Err(Error::DiscoveryQueryFailed(format!(
            "no usable responses from {} discovery targets",
            target_count
        )));
    }
    if peers.is_empty() {
        return Err(Error::NoPeersFound);
    }
    Ok(peers)
}

impl Actor for Discovery {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("started discovery of {}", self.scope.describe());
    }
}

impl Handler<Initialize> for Discovery {
    type Result = Result<()>;

    fn handle(&mut self, msg: Initialize, _ctx: &mut Context<Self>) -> Self::Result {
        if self.context.is_some() {
            debug!("discovery already initialized");
            return Ok(());
        }
        self.context = Some(msg.context);
        Ok(())
    }
}

impl Handler<GetPeers> for Discovery {
    type Result = ResponseFuture<Result<Vec<Peer>>>;

    fn handle(&mut self, _msg: GetPeers, ctx: &mut Context<Self>) -> Self::Result {
        if self.context.is_none() {
            return Box::pin(async { Err(Error::NotInitialized) });
        }
        if let Some(cached) = &self.cached {
            if cached.fetched_at.elapsed() < self.ttl {
                let peers = cached.peers.clone();
                return Box::pin(async move { Ok(peers) });
            }
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        if !self.refreshing {
            self.refreshing = true;
            debug!("refreshing {}", self.scope.describe());
            let fut = query_peers(
                self.connector.clone(),
                self.targets.clone(),
                self.scope.request(),
                self.request_timeout,
                self.factory.clone(),
                self.scope.clone(),
            );
            ctx.spawn(fut.into_actor(self).map(|result, act, _ctx| {
                act.refreshing = false;
                match result {
                    Ok(peers) => {
                        act.cached = Some(CachedPeers {
                            peers: peers.clone(),
                            fetched_at: Instant::now(),
                        });
                        for waiter in act.waiters.drain(..) {
                            let _ = waiter.send(Ok(peers.clone()));
                        }
                    }
                    Err(err) => {
                        // A failed refresh surfaces to the waiting callers
                        // and leaves any previous cached value untouched.
                        for waiter in act.waiters.drain(..) {
                            let _ = waiter.send(Err(err.clone()));
                        }
                    }
                }
            }));
        }
        Box::pin(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::Closed),
            }
        })
    }
}

impl Handler<Close> for Discovery {
    type Result = ();

    fn handle(&mut self, _msg: Close, ctx: &mut Context<Self>) -> Self::Result {
        debug!("closing discovery of {}", self.scope.describe());
        ctx.stop();
    }
}
