use crate::msp_id::MspId;
use crate::peer::PeerEndpoint;

/// Chaincode invocation sent to a peer for endorsement. The system chaincode
/// `lscc` is queried through the same envelope as user chaincodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub channel_id: String,
    pub chaincode_id: String,
    pub func: String,
    pub args: Vec<String>,
}

impl Proposal {
    /// The `lscc getccdata` query returning a chaincode's metadata, including
    /// its serialized endorsement policy.
    pub fn get_ccdata(channel_id: &str, chaincode_id: &str) -> Self {
        Proposal {
            channel_id: channel_id.to_string(),
            chaincode_id: "lscc".to_string(),
            func: "getccdata".to_string(),
            args: vec![channel_id.to_string(), chaincode_id.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    // Discovery
    DiscoverLocalPeers { msp_id: MspId },
    DiscoverChannelPeers { channel_id: String },
    // Endorsement
    Endorse(Proposal),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    // Discovery
    Peers(Vec<PeerEndpoint>),
    // Endorsement
    Endorsement { payload: Vec<u8> },
    // Error
    Unknown,
}
