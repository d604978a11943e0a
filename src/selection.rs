//! Endorser selection: given the live peers of a channel and a set of
//! chaincodes, proposes a minimal peer group whose approvals would jointly
//! satisfy every chaincode's endorsement policy.
use crate::msp_id::MspId;
use crate::peer::Peer;
use crate::policy::{
    compile_all, LoadBalancePolicy, LoadBalancer, PeerGroup, PeerSorter, PolicyProvider,
    SignaturePolicy,
};
use crate::{Error, Result};

use tracing::debug;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Cache key for a resolver: the channel plus the involved chaincodes,
/// order-independent, so `["cc1", "cc2"]` and `["cc2", "cc1"]` share one
/// resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolverKey {
    channel_id: String,
    chaincode_ids: Vec<String>,
}

impl ResolverKey {
    pub fn new(channel_id: &str, chaincode_ids: &[String]) -> Self {
        let mut ids = chaincode_ids.to_vec();
        ids.sort();
        ids.dedup();
        ResolverKey { channel_id: channel_id.to_string(), chaincode_ids: ids }
    }

    pub fn chaincode_ids(&self) -> &[String] {
        &self.chaincode_ids
    }
}

pub type PeerFilter = dyn Fn(&Peer) -> bool + Send + Sync;

/// Per-call knobs: an optional predicate narrowing the candidate peers and
/// an optional sorter overriding load-balanced peer choice within each
/// organisation.
#[derive(Clone, Default)]
pub struct SelectionOpts {
    pub filter: Option<Arc<PeerFilter>>,
    pub sorter: Option<PeerSorter>,
}

impl SelectionOpts {
    pub fn with_filter(mut self, filter: Arc<PeerFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sorter(mut self, sorter: PeerSorter) -> Self {
        self.sorter = Some(sorter);
        self
    }
}

/// A cached resolver for one chaincode combination. The policies are fetched
/// once; peers and groups are rebuilt per resolution from the caller's
/// current peer list, so discovery churn is picked up automatically.
pub struct Resolver {
    policies: Vec<SignaturePolicy>,
    balancer: LoadBalancer,
}

impl Resolver {
    fn new(policies: Vec<SignaturePolicy>, load_balance: LoadBalancePolicy) -> Self {
        Resolver { policies, balancer: LoadBalancer::new(load_balance) }
    }

    pub fn resolve(&self, channel_peers: &[Peer], opts: &SelectionOpts) -> Result<PeerGroup> {
        let mut peers_by_msp: HashMap<MspId, Vec<Peer>> = HashMap::new();
        for peer in channel_peers {
            if let Some(filter) = &opts.filter {
                if !filter(peer) {
                    continue;
                }
            }
            peers_by_msp.entry(peer.msp_id().clone()).or_insert_with(Vec::new).push(peer.clone());
        }
        let group = compile_all(&self.policies, &peers_by_msp)?;
        group.resolve(&self.balancer, opts.sorter.as_ref())
    }
}

/// Chooses endorsing peers for chaincode invocations on one channel.
/// Resolvers are cached per chaincode combination; the policies behind them
/// come from [`PolicyProvider`] and survive until `close`.
pub struct SelectionService {
    channel_id: String,
    provider: Arc<PolicyProvider>,
    load_balance: LoadBalancePolicy,
    resolvers: RwLock<HashMap<ResolverKey, Arc<Resolver>>>,
    build_lock: tokio::sync::Mutex<()>,
}

impl SelectionService {
    pub fn new(
        channel_id: &str,
        provider: Arc<PolicyProvider>,
        load_balance: LoadBalancePolicy,
    ) -> Self {
        SelectionService {
            channel_id: channel_id.to_string(),
            provider,
            load_balance,
            resolvers: RwLock::new(HashMap::new()),
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Proposes a peer group endorsing an invocation which spans the given
    /// chaincodes. Every chaincode's policy must be satisfied by the one
    /// group.
    pub async fn get_endorsers_for_chaincode(
        &self,
        channel_peers: &[Peer],
        chaincode_ids: &[String],
    ) -> Result<Vec<Peer>> {
        self.get_endorsers_with_opts(channel_peers, chaincode_ids, &SelectionOpts::default())
            .await
    }

    pub async fn get_endorsers_with_opts(
        &self,
        channel_peers: &[Peer],
        chaincode_ids: &[String],
        opts: &SelectionOpts,
    ) -> Result<Vec<Peer>> {
        if chaincode_ids.is_empty() {
            return Err(Error::InvalidInput("no chaincodes given".to_string()));
        }
        if chaincode_ids.iter().any(|id| id.is_empty()) {
            return Err(Error::InvalidInput("empty chaincode id".to_string()));
        }
        if channel_peers.is_empty() {
            return Err(Error::NoPeersFound);
        }
        let key = ResolverKey::new(&self.channel_id, chaincode_ids);
        let resolver = self.resolver_for(&key).await?;
        let group = resolver.resolve(channel_peers, opts)?;
        debug!("selected {} endorsers for {:?}", group.peers().len(), chaincode_ids);
        Ok(group.into_peers())
    }

    /// Fetches or builds the resolver for a chaincode combination. Builds
    /// run serialized so concurrent first requests query the policies once.
    async fn resolver_for(&self, key: &ResolverKey) -> Result<Arc<Resolver>> {
        {
            let resolvers = self.resolvers.read().unwrap();
            if let Some(resolver) = resolvers.get(key) {
                return Ok(resolver.clone());
            }
        }
        let _guard = self.build_lock.lock().await;
        {
            let resolvers = self.resolvers.read().unwrap();
            if let Some(resolver) = resolvers.get(key) {
                return Ok(resolver.clone());
            }
        }
        let mut policies = vec![];
        for chaincode_id in key.chaincode_ids() {
            policies.push(self.provider.chaincode_policy(chaincode_id).await?);
        }
        let resolver = Arc::new(Resolver::new(policies, self.load_balance));
        let mut resolvers = self.resolvers.write().unwrap();
        resolvers.insert(key.clone(), resolver.clone());
        Ok(resolver)
    }

    /// Drops all cached resolvers. Call after a chaincode upgrade, together
    /// with [`PolicyProvider::clear_cache`].
    pub fn close(&self) {
        let mut resolvers = self.resolvers.write().unwrap();
        resolvers.clear();
    }
}
