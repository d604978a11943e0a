use crate::msp_id::MspId;
use crate::peer::Peer;
use crate::{Error, Result};

use rand::seq::SliceRandom;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A signature policy: a boolean expression over organisations specifying
/// which combination of them must approve a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignaturePolicy {
    /// Any identity of the named organisation suffices.
    SignedBy(MspId),
    /// At least `n` of the sub-policies must be satisfied.
    NOutOf(usize, Vec<SignaturePolicy>),
}

impl SignaturePolicy {
    /// All of the given policies must be satisfied.
    pub fn and(policies: Vec<SignaturePolicy>) -> Self {
        let n = policies.len();
        SignaturePolicy::NOutOf(n, policies)
    }

    /// Any one of the given policies suffices.
    pub fn or(policies: Vec<SignaturePolicy>) -> Self {
        SignaturePolicy::NOutOf(1, policies)
    }
}

/// Chaincode metadata as returned by `lscc getccdata`: the deployed name and
/// version together with the chaincode's endorsement policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeData {
    pub name: String,
    pub version: String,
    pub policy: SignaturePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancePolicy {
    Random,
    RoundRobin,
}

/// Picks one peer out of an organisation's candidates, either uniformly at
/// random or round-robin across calls.
pub struct LoadBalancer {
    policy: LoadBalancePolicy,
    next: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(policy: LoadBalancePolicy) -> Self {
        LoadBalancer { policy, next: AtomicUsize::new(0) }
    }

    pub fn choose<'a>(&self, peers: &'a [Peer]) -> Option<&'a Peer> {
        match self.policy {
            LoadBalancePolicy::Random => peers.choose(&mut rand::thread_rng()),
            LoadBalancePolicy::RoundRobin => {
                if peers.is_empty() {
                    None
                } else {
                    let i = self.next.fetch_add(1, Ordering::Relaxed);
                    peers.get(i % peers.len())
                }
            }
        }
    }
}

/// Orders an organisation's candidate peers before one is picked; when a
/// sorter is in use the first peer after sorting wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSorter {
    /// Highest known ledger height first; peers of unknown height last.
    LedgerHeight,
}

impl PeerSorter {
    pub fn sort(&self, peers: &mut Vec<Peer>) {
        match self {
            PeerSorter::LedgerHeight => {
                peers.sort_by(|a, b| match (a.ledger_height(), b.ledger_height()) {
                    (Some(x), Some(y)) => y.cmp(&x),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                });
            }
        }
    }
}

/// A compiled policy node over concrete peers. `Leaf` covers one
/// organisation's available peers, of which any one suffices; `NOutOf`
/// requires `threshold` of its subgroups to resolve.
#[derive(Debug, Clone)]
pub enum Group {
    Leaf { msp_id: MspId, peers: Vec<Peer> },
    NOutOf { threshold: usize, groups: Vec<Group> },
}

/// A concrete peer set proposed to jointly satisfy an endorsement policy.
/// Peers are deduplicated by URL, in resolution order.
#[derive(Debug, Clone, Default)]
pub struct PeerGroup {
    peers: Vec<Peer>,
}

impl PeerGroup {
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn into_peers(self) -> Vec<Peer> {
        self.peers
    }

    fn push(&mut self, peer: Peer) {
        if !self.peers.iter().any(|p| p.url() == peer.url()) {
            self.peers.push(peer);
        }
    }

    fn merge(&mut self, other: PeerGroup) {
        for peer in other.peers {
            self.push(peer);
        }
    }
}

/// Compiles a signature policy over the channel's peers, grouped by
/// organisation. An organisation without available peers compiles to an
/// empty `Leaf`, which fails at resolution unless an alternative branch
/// covers it.
pub fn compile(
    policy: &SignaturePolicy,
    peers_by_msp: &HashMap<MspId, Vec<Peer>>,
) -> Result<Group> {
    match policy {
        SignaturePolicy::SignedBy(msp_id) => Ok(Group::Leaf {
            msp_id: msp_id.clone(),
            peers: peers_by_msp.get(msp_id).cloned().unwrap_or_default(),
        }),
        SignaturePolicy::NOutOf(n, children) => {
            if *n == 0 || children.is_empty() || *n > children.len() {
                return Err(Error::InvalidInput(format!(
                    "malformed policy: {} out of {}",
                    n,
                    children.len()
                )));
            }
            let groups =
                children.iter().map(|c| compile(c, peers_by_msp)).collect::<Result<Vec<_>>>()?;
            Ok(Group::NOutOf { threshold: *n, groups })
        }
    }
}

/// Compiles several chaincodes' policies into one group which requires all
/// of them to be satisfied.
pub fn compile_all(
    policies: &[SignaturePolicy],
    peers_by_msp: &HashMap<MspId, Vec<Peer>>,
) -> Result<Group> {
    match policies {
        [] => Err(Error::InvalidInput("no policies to compile".to_string())),
        [policy] => compile(policy, peers_by_msp),
        _ => {
            let groups =
                policies.iter().map(|p| compile(p, peers_by_msp)).collect::<Result<Vec<_>>>()?;
            Ok(Group::NOutOf { threshold: groups.len(), groups })
        }
    }
}

impl Group {
    /// Resolves the group to one concrete peer set. `NOutOf` children are
    /// tried in policy order, left to right, and the first `threshold`
    /// resolvable children win; this makes combination choice deterministic
    /// while the load balancer varies which peer represents each leaf.
    pub fn resolve(
        &self,
        balancer: &LoadBalancer,
        sorter: Option<&PeerSorter>,
    ) -> Result<PeerGroup> {
        match self {
            Group::Leaf { msp_id, peers } => {
                if peers.is_empty() {
                    return Err(Error::PolicyUnsatisfiable(format!(
                        "no available peers for organisation {}",
                        msp_id
                    )));
                }
                let chosen = if let Some(sorter) = sorter {
                    let mut candidates = peers.clone();
                    sorter.sort(&mut candidates);
                    candidates.swap_remove(0)
                } else {
                    balancer
                        .choose(peers)
                        .cloned()
                        .ok_or_else(|| {
                            Error::PolicyUnsatisfiable(format!(
                                "no available peers for organisation {}",
                                msp_id
                            ))
                        })?
                };
                let mut group = PeerGroup::default();
                group.push(chosen);
                Ok(group)
            }
            Group::NOutOf { threshold, groups } => {
                let mut satisfied = 0;
                let mut result = PeerGroup::default();
                for group in groups {
                    if satisfied == *threshold {
                        break;
                    }
                    match group.resolve(balancer, sorter) {
                        Ok(resolved) => {
                            satisfied += 1;
                            result.merge(resolved);
                        }
                        Err(_) => continue,
                    }
                }
                if satisfied < *threshold {
                    return Err(Error::PolicyUnsatisfiable(
                        "insufficient peers to satisfy chaincode endorsement policy".to_string(),
                    ));
                }
                Ok(result)
            }
        }
    }
}
