use crate::connector::CachingConnector;
use crate::protocol::{Request, Response};
use crate::Result;
use tracing::debug;

use futures::FutureExt;
use tokio::time::Duration;

use std::net::SocketAddr;
use std::sync::Arc;

/// Sends a single request to `target` through the connection cache and waits
/// for the response. The connection is handed back to the cache afterwards,
/// whatever the outcome.
pub async fn oneshot(
    connector: &Arc<CachingConnector>,
    target: SocketAddr,
    request: Request,
    deadline: Duration,
) -> Result<Response> {
    let conn = connector.dial(target).await?;
    let result = conn.request(request, deadline).await;
    connector.release(&conn).await;
    result
}

/// A gentle fanout function which sends a request to several peers and
/// collects the responses. Per-peer failures are logged and reported next to
/// the successful responses so the caller can decide what to do with them.
pub async fn fanout(
    connector: &Arc<CachingConnector>,
    targets: Vec<SocketAddr>,
    request: Request,
    deadline: Duration,
) -> Vec<(SocketAddr, Result<Response>)> {
    let mut client_futs = vec![];
    for target in targets.iter().cloned() {
        let connector = connector.clone();
        let request = request.clone();
        let client_fut = tokio::spawn(async move {
            let result = oneshot(&connector, target, request, deadline).await;
            if let Err(err) = &result {
                debug!("request to {:?} failed: {}", target, err);
            }
            (target, result)
        });
        client_futs.push(client_fut);
    }
    futures::future::join_all(client_futs)
        .map(|results| {
            let mut responses = vec![];
            for result in results {
                match result {
                    Ok(pair) => responses.push(pair),
                    Err(err) => debug!("error joining client future: {:?}", err),
                }
            }
            responses
        })
        .await
}
