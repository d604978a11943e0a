//! Test doubles: an in-process peer answering discovery and `lscc` queries
//! over the real wire protocol, backed by a scripted topology.
use crate::channel::Channel;
use crate::peer::PeerEndpoint;
use crate::policy::ChaincodeData;
use crate::protocol::{Request, Response};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The world as one mock peer reports it: which peers exist locally and per
/// channel, and which chaincodes are deployed where.
#[derive(Debug, Clone, Default)]
struct Topology {
    local_peers: Vec<PeerEndpoint>,
    channel_peers: HashMap<String, Vec<PeerEndpoint>>,
    chaincodes: HashMap<(String, String), ChaincodeData>,
}

fn route(topology: &Topology, request: Request) -> Response {
    match request {
        Request::DiscoverLocalPeers { .. } => Response::Peers(topology.local_peers.clone()),
        Request::DiscoverChannelPeers { channel_id } => Response::Peers(
            topology.channel_peers.get(&channel_id).cloned().unwrap_or_default(),
        ),
        Request::Endorse(proposal) => {
            if proposal.chaincode_id == "lscc"
                && proposal.func == "getccdata"
                && proposal.args.len() == 2
            {
                let key = (proposal.args[0].clone(), proposal.args[1].clone());
                match topology.chaincodes.get(&key) {
                    Some(data) => Response::Endorsement {
                        payload: bincode::serialize(data).unwrap(),
                    },
                    None => Response::Unknown,
                }
            } else {
                Response::Unknown
            }
        }
    }
}

pub struct MockPeerBuilder {
    topology: Topology,
}

impl MockPeerBuilder {
    pub fn local_peer(mut self, endpoint: PeerEndpoint) -> Self {
        self.topology.local_peers.push(endpoint);
        self
    }

    pub fn channel_peer(mut self, channel_id: &str, endpoint: PeerEndpoint) -> Self {
        self.topology
            .channel_peers
            .entry(channel_id.to_string())
            .or_insert_with(Vec::new)
            .push(endpoint);
        self
    }

    pub fn chaincode(mut self, channel_id: &str, chaincode_id: &str, data: ChaincodeData) -> Self {
        self.topology
            .chaincodes
            .insert((channel_id.to_string(), chaincode_id.to_string()), data);
        self
    }

    /// Binds an ephemeral port and starts serving. Each accepted connection
    /// is served on its own task until the remote end hangs up.
    pub async fn spawn(self) -> MockPeer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let topology = Arc::new(self.topology);

        let counter = requests.clone();
        let handle = tokio::spawn(async move {
            loop {
                let channel: Channel<Response, Request> = match Channel::accept(&listener).await {
                    Ok(channel) => channel,
                    Err(_) => break,
                };
                let (mut sender, mut receiver) = channel.split();
                let topology = topology.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    while let Ok(Some(request)) = receiver.recv().await {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let response = route(&topology, request);
                        if sender.send(response).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        MockPeer { addr, requests, handle }
    }
}

pub struct MockPeer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockPeer {
    pub fn builder() -> MockPeerBuilder {
        MockPeerBuilder { topology: Topology::default() }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Total requests served, over all connections and channels.
    pub fn requests_served(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
