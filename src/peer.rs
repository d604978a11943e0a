use crate::msp_id::MspId;
use crate::{Error, Result};

use std::net::SocketAddr;

/// A peer node of the network as seen by the client: its network address, the
/// organisation it belongs to and, when discovery reported it, its ledger
/// height. Immutable once constructed.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Peer {
    url: SocketAddr,
    msp_id: MspId,
    ledger_height: Option<u64>,
}

impl Peer {
    pub fn new(url: SocketAddr, msp_id: MspId) -> Self {
        Peer { url, msp_id, ledger_height: None }
    }

    pub fn with_ledger_height(url: SocketAddr, msp_id: MspId, height: u64) -> Self {
        Peer { url, msp_id, ledger_height: Some(height) }
    }

    /// Parse a peer description from the format `MSP@IP`, e.g.
    /// `Org1MSP@127.0.0.1:9000`.
    pub fn from_msp_and_addr(s: &str) -> Result<Peer> {
        let parts: Vec<&str> = s.split('@').collect();
        if parts.len() == 2 {
            let msp_id: MspId = parts[0].parse()?;
            let url: SocketAddr = parts[1].parse().map_err(|_| Error::PeerParseError)?;
            Ok(Peer::new(url, msp_id))
        } else {
            Err(Error::PeerParseError)
        }
    }

    pub fn url(&self) -> SocketAddr {
        self.url
    }

    pub fn msp_id(&self) -> &MspId {
        &self.msp_id
    }

    pub fn ledger_height(&self) -> Option<u64> {
        self.ledger_height
    }
}

/// A peer descriptor as returned by the discovery protocol, before the client
/// has vetted it.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub url: SocketAddr,
    pub msp_id: MspId,
    pub ledger_height: Option<u64>,
}

impl PeerEndpoint {
    pub fn new(url: SocketAddr, msp_id: MspId, ledger_height: Option<u64>) -> Self {
        PeerEndpoint { url, msp_id, ledger_height }
    }
}

/// Constructs concrete [`Peer`]s from discovery endpoints. Hosts can install
/// their own factory to attach TLS material or reject endpoints.
pub trait PeerFactory: Send + Sync {
    fn create_peer(&self, endpoint: PeerEndpoint) -> Result<Peer>;
}

pub struct DefaultPeerFactory;

impl PeerFactory for DefaultPeerFactory {
    fn create_peer(&self, endpoint: PeerEndpoint) -> Result<Peer> {
        if endpoint.msp_id.as_str().is_empty() {
            return Err(Error::PeerParseError);
        }
        Ok(Peer {
            url: endpoint.url,
            msp_id: endpoint.msp_id,
            ledger_height: endpoint.ledger_height,
        })
    }
}
