//! End-to-end flow over real sockets: discovery finds the channel's peers
//! through a mock anchor, the policy provider fetches the chaincode policy,
//! the selection service proposes endorsers and the greylist reroutes around
//! a peer reported as failed.
use crate::connector::{CachingConnector, TcpDialer};
use crate::discovery::{ClientContext, Discovery, GetPeers, Greylist, GreylistFilter, Initialize};
use crate::msp_id::MspId;
use crate::peer::{DefaultPeerFactory, Peer, PeerEndpoint};
use crate::policy::{ChaincodeData, LoadBalancePolicy, PolicyProvider, SignaturePolicy};
use crate::selection::SelectionService;
use crate::settings::{ChannelSettings, ClientConfig, EndpointConfig};
use crate::testkit::MockPeer;
use crate::{Error, Result};

use actix::Actor;
use tokio::time::Duration;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

const CHANNEL: &str = "mychannel";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn endpoint(addr: &str, msp: &str, height: u64) -> PeerEndpoint {
    PeerEndpoint::new(addr.parse().unwrap(), MspId::new(msp), Some(height))
}

fn endorsement_policy() -> SignaturePolicy {
    SignaturePolicy::and(vec![
        SignaturePolicy::SignedBy(MspId::new("Org1MSP")),
        SignaturePolicy::SignedBy(MspId::new("Org2MSP")),
    ])
}

/// One anchor peer which reports two Org1 peers and one Org2 peer on the
/// channel and serves the chaincode's endorsement policy.
async fn spawn_anchor() -> MockPeer {
    MockPeer::builder()
        .channel_peer(CHANNEL, endpoint("127.0.0.1:9100", "Org1MSP", 10))
        .channel_peer(CHANNEL, endpoint("127.0.0.1:9101", "Org1MSP", 12))
        .channel_peer(CHANNEL, endpoint("127.0.0.1:9200", "Org2MSP", 11))
        .chaincode(
            CHANNEL,
            "mycc",
            ChaincodeData {
                name: "mycc".to_string(),
                version: "1.0".to_string(),
                policy: endorsement_policy(),
            },
        )
        .spawn()
        .await
}

fn client_config(anchor: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::new("Org1MSP".into());
    config.bootstrap_peers = vec![anchor];
    config.dial_timeout_ms = 1000;
    config.request_timeout_ms = 1000;
    config.greylist_ttl_ms = 300;
    config.channels.insert(
        CHANNEL.to_string(),
        ChannelSettings {
            anchor_peers: vec![anchor],
            msps: vec![MspId::new("Org1MSP"), MspId::new("Org2MSP")],
            policy_targets: vec![],
        },
    );
    config
}

struct Client {
    connector: Arc<CachingConnector>,
    discovery: actix::Addr<GreylistFilter>,
    selection: SelectionService,
}

async fn start_client(config: &ClientConfig) -> Client {
    let connector = CachingConnector::new(TcpDialer::new(), config);
    let discovery = Discovery::channel(
        config,
        connector.clone(),
        Arc::new(DefaultPeerFactory),
        CHANNEL,
    )
    .unwrap()
    .start();
    discovery
        .send(Initialize { context: ClientContext::new(config.msp_id.clone()) })
        .await
        .unwrap()
        .unwrap();
    let filtered = GreylistFilter::new(discovery.recipient(), config.greylist_ttl()).start();
    let provider =
        Arc::new(PolicyProvider::new(config, connector.clone(), CHANNEL).unwrap());
    let selection = SelectionService::new(CHANNEL, provider, LoadBalancePolicy::RoundRobin);
    Client { connector, discovery: filtered, selection }
}

async fn endorsers_for(client: &Client, chaincode: &str) -> Result<Vec<Peer>> {
    let peers = client.discovery.send(GetPeers).await??;
    client.selection.get_endorsers_for_chaincode(&peers, &[chaincode.to_string()]).await
}

#[actix_rt::test]
async fn discovery_selection_and_greylist_work_together() {
    init_tracing();
    let anchor = spawn_anchor().await;
    let config = client_config(anchor.addr());
    let client = start_client(&config).await;

    // First pass: one Org1 peer and the Org2 peer are proposed.
    let endorsers = endorsers_for(&client, "mycc").await.unwrap();
    assert_eq!(endorsers.len(), 2);
    let orgs: HashSet<&str> = endorsers.iter().map(|p| p.msp_id().as_str()).collect();
    assert_eq!(orgs, ["Org1MSP", "Org2MSP"].iter().cloned().collect());

    // The Org1 endorser turns out to be down; its failure greylists it.
    let failed = endorsers
        .iter()
        .find(|p| p.msp_id() == &MspId::new("Org1MSP"))
        .unwrap()
        .url();
    let err = Error::ConnectionFailed { target: failed, reason: "refused".to_string() };
    client.discovery.send(Greylist::from_error(&err).unwrap()).await.unwrap();

    // The next selection avoids the greylisted peer.
    let endorsers = endorsers_for(&client, "mycc").await.unwrap();
    assert!(endorsers.iter().all(|p| p.url() != failed));
    let orgs: HashSet<&str> = endorsers.iter().map(|p| p.msp_id().as_str()).collect();
    assert_eq!(orgs, ["Org1MSP", "Org2MSP"].iter().cloned().collect());

    // After the greylist TTL the peer becomes eligible again.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let peers = client.discovery.send(GetPeers).await.unwrap().unwrap();
    assert!(peers.iter().any(|p| p.url() == failed));

    client.connector.close().await;
}

#[actix_rt::test]
async fn greylisting_a_required_org_makes_the_policy_unsatisfiable() {
    init_tracing();
    let anchor = spawn_anchor().await;
    let config = client_config(anchor.addr());
    let client = start_client(&config).await;

    // The only Org2 peer goes down.
    let org2: SocketAddr = "127.0.0.1:9200".parse().unwrap();
    client.discovery.send(Greylist::new(org2)).await.unwrap();

    match endorsers_for(&client, "mycc").await {
        Err(Error::PolicyUnsatisfiable(_)) => (),
        other => panic!("expected PolicyUnsatisfiable, got {:?}", other),
    }

    client.connector.close().await;
}

#[actix_rt::test]
async fn repeated_selections_reuse_the_anchor_connection() {
    init_tracing();
    let anchor = spawn_anchor().await;
    let config = client_config(anchor.addr());
    let client = start_client(&config).await;

    let _ = endorsers_for(&client, "mycc").await.unwrap();
    let served = anchor.requests_served();
    // Discovery and policy caches are both warm, so nothing reaches the
    // anchor on the second pass.
    let _ = endorsers_for(&client, "mycc").await.unwrap();
    assert_eq!(anchor.requests_served(), served);

    client.connector.close().await;
}

#[actix_rt::test]
async fn closed_connector_fails_policy_refreshes_but_not_cached_selections() {
    init_tracing();
    let anchor = spawn_anchor().await;
    let config = client_config(anchor.addr());
    let client = start_client(&config).await;

    let _ = endorsers_for(&client, "mycc").await.unwrap();
    client.connector.close().await;

    // The cached policy keeps selections over already-known peers working.
    let peers = client.discovery.send(GetPeers).await.unwrap().unwrap();
    assert!(client
        .selection
        .get_endorsers_for_chaincode(&peers, &["mycc".to_string()])
        .await
        .is_ok());

    // A chaincode the client has never seen needs the network and fails.
    match client
        .selection
        .get_endorsers_for_chaincode(&peers, &["othercc".to_string()])
        .await
    {
        Err(Error::PolicyQueryFailed { .. }) => (),
        other => panic!("expected PolicyQueryFailed, got {:?}", other),
    }
}
