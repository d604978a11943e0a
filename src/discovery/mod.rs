//! Discovery services: TTL-cached, MSP-filtered views of the currently
//! reachable peers, either of the client's own organisation (local scope) or
//! of one channel. A greylist decorator hides peers that recently failed.
pub mod greylist;
pub mod service;

pub use greylist::{Greylist, GreylistFilter};
pub use service::Discovery;

use crate::msp_id::MspId;
use crate::peer::Peer;
use crate::Result;

/// Fetches the current peer list. Served from the cache while it is fresh;
/// the first access past the TTL triggers a refresh which concurrent callers
/// share.
#[derive(Debug, Clone, Message)]
#[rtype(result = "Result<Vec<Peer>>")]
pub struct GetPeers;

/// The identity on whose behalf discovery queries are signed and sent.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub msp_id: MspId,
}

impl ClientContext {
    pub fn new(msp_id: MspId) -> Self {
        ClientContext { msp_id }
    }
}

/// Installs the client context. Idempotent: a second `Initialize` is a no-op
/// success.
#[derive(Debug, Clone, Message)]
#[rtype(result = "Result<()>")]
pub struct Initialize {
    pub context: ClientContext,
}

/// Stops the service; queued callers receive [`crate::Error::Closed`].
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Close;
