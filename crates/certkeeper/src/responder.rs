//! Ephemeral HTTP endpoint answering HTTP-01 validation requests.
//!
//! Bound for the duration of one acquisition attempt and released as soon as
//! the exchange settles. `stop` awaits the server task, so a caller holding
//! the returned handle knows the port is free once `stop` returns.

use std::net::SocketAddr;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::{header, StatusCode, Uri};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::challenge::ChallengeMap;
use crate::error::ResponderError;

/// HTTP-01 challenge responder.
///
/// Serves the proof value for every request whose leading-slash-stripped
/// path is present in the challenge map, and a not-found status for
/// everything else.
pub struct ChallengeResponder;

impl ChallengeResponder {
    /// Bind the validation listener and start serving the map.
    ///
    /// Port 0 binds an ephemeral port; the effective address is available
    /// through [`ResponderHandle::local_addr`].
    pub async fn start(
        addr: SocketAddr,
        map: ChallengeMap,
    ) -> Result<ResponderHandle, ResponderError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ResponderError::Bind)?;
        let local_addr = listener.local_addr().map_err(ResponderError::Bind)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = Router::new().fallback(serve_proof).with_state(map);

        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "challenge responder exited with error");
            }
        });

        info!(addr = %local_addr, "challenge responder listening");

        Ok(ResponderHandle {
            addr: local_addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

/// Handle to a running responder; consumed by [`stop`](ResponderHandle::stop)
pub struct ResponderHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ResponderHandle {
    /// Address the responder is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Release the port. Returns once the server task has finished, so a
    /// subsequent bind on the same address cannot race the teardown.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            error!(error = %e, "challenge responder task panicked");
        }
        debug!(addr = %self.addr, "challenge responder stopped");
    }
}

async fn serve_proof(State(map): State<ChallengeMap>, uri: Uri) -> Response {
    let path = uri.path().strip_prefix('/').unwrap_or(uri.path());
    debug!(path = %path, "validation request");

    match map.response_for(path) {
        Some(proof) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            proof,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeHooks;

    async fn start_local(map: ChallengeMap) -> ResponderHandle {
        ChallengeResponder::start(SocketAddr::from(([127, 0, 0, 1], 0)), map)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_serves_proof_for_mapped_path() {
        let map = ChallengeMap::new();
        map.offer("tok-1", "proof-value");

        let handle = start_local(map).await;
        let url = format!(
            "http://{}/.well-known/acme-challenge/tok-1",
            handle.local_addr()
        );

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE.as_str()],
            "application/octet-stream"
        );
        assert_eq!(response.text().await.unwrap(), "proof-value");

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_not_found_for_unmapped_paths() {
        let map = ChallengeMap::new();
        map.offer("tok-1", "proof-value");

        let handle = start_local(map).await;
        let base = format!("http://{}", handle.local_addr());

        // Token with trailing content
        let response = reqwest::get(format!("{base}/.well-known/acme-challenge/tok-1x"))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        // Unrelated path
        let response = reqwest::get(format!("{base}/other")).await.unwrap();
        assert_eq!(response.status(), 404);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_withdrawn_proof_stops_serving() {
        let map = ChallengeMap::new();
        map.offer("tok-1", "proof-value");

        let handle = start_local(map.clone()).await;
        let url = format!(
            "http://{}/.well-known/acme-challenge/tok-1",
            handle.local_addr()
        );

        assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);

        map.withdraw("tok-1");
        assert_eq!(reqwest::get(&url).await.unwrap().status(), 404);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let map = ChallengeMap::new();

        let handle = start_local(map.clone()).await;
        let addr = handle.local_addr();
        handle.stop().await;

        // Rebinding the exact address succeeds once stop has returned
        let handle = ChallengeResponder::start(addr, map).await.unwrap();
        assert_eq!(handle.local_addr(), addr);
        handle.stop().await;
    }
}
