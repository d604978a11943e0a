use super::group::{ChaincodeData, SignaturePolicy};
use crate::client;
use crate::connector::CachingConnector;
use crate::protocol::{Proposal, Request, Response};
use crate::settings::EndpointConfig;
use crate::{Error, Result};

use tracing::{debug, warn};

use tokio::time::Duration;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// Fetches chaincode endorsement policies from the channel's `lscc` system
/// chaincode and caches them per chaincode name. Targets are tried in
/// configuration order and the first usable response wins; per-target
/// failures only surface when every target has been exhausted.
pub struct PolicyProvider {
    channel_id: String,
    targets: Vec<SocketAddr>,
    connector: Arc<CachingConnector>,
    request_timeout: Duration,
    cache: RwLock<HashMap<String, ChaincodeData>>,
}

impl PolicyProvider {
    pub fn new(
        config: &dyn EndpointConfig,
        connector: Arc<CachingConnector>,
        channel_id: &str,
    ) -> Result<Self> {
        let settings = config
            .channel(channel_id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown channel {:?}", channel_id)))?;
        let targets = settings.policy_targets().to_vec();
        if targets.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no policy query targets for channel {:?}",
                channel_id
            )));
        }
        Ok(PolicyProvider {
            channel_id: channel_id.to_string(),
            targets,
            connector,
            request_timeout: config.request_timeout(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the chaincode's deployment data, querying the network on the
    /// first request and the cache afterwards.
    pub async fn chaincode_data(&self, chaincode_id: &str) -> Result<ChaincodeData> {
        {
            let cache = self.cache.read().unwrap();
            if let Some(data) = cache.get(chaincode_id) {
                return Ok(data.clone());
            }
        }
        // The query runs without the lock held; a concurrent query for the
        // same chaincode is harmless, the first write wins.
        let data = self.query_ccdata(chaincode_id).await?;
        let mut cache = self.cache.write().unwrap();
        Ok(cache.entry(chaincode_id.to_string()).or_insert(data).clone())
    }

    pub async fn chaincode_policy(&self, chaincode_id: &str) -> Result<SignaturePolicy> {
        let data = self.chaincode_data(chaincode_id).await?;
        Ok(data.policy)
    }

    /// Drops all cached chaincode data, forcing the next request to query
    /// the network again. Call after a chaincode upgrade.
    pub fn clear_cache(&self) {
        let mut cache = self.cache.write().unwrap();
        cache.clear();
    }

    async fn query_ccdata(&self, chaincode_id: &str) -> Result<ChaincodeData> {
        let proposal = Proposal::get_ccdata(&self.channel_id, chaincode_id);
        for target in self.targets.iter().cloned() {
            let request = Request::Endorse(proposal.clone());
            match client::oneshot(&self.connector, target, request, self.request_timeout).await {
                Ok(Response::Endorsement { payload }) => match bincode::deserialize(&payload) {
                    Ok(data) => {
                        debug!("fetched ccdata for {:?} from {:?}", chaincode_id, target);
                        return Ok(data);
                    }
                    Err(err) => {
                        warn!("undecodable ccdata from {:?}: {}", target, err);
                        continue;
                    }
                },
                Ok(response) => {
                    warn!("unexpected response from {:?}: {:?}", target, response);
                    continue;
                }
                Err(err) => {
                    warn!("ccdata query to {:?} failed: {}", target, err);
                    continue;
                }
            }
        }
        Err(Error::PolicyQueryFailed {
            channel_id: self.channel_id.clone(),
            chaincode_id: chaincode_id.to_string(),
        })
    }
}
