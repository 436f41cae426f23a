//! HTTP server implementation.

use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;

/// HTTP server for the admission-controlled application.
pub struct HttpServer {
    /// Bound listener
    listener: TcpListener,
    /// Application router
    router: Router,
}

impl HttpServer {
    /// Bind `addr` and prepare to serve `router` on it.
    pub async fn bind(addr: SocketAddr, router: Router) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    /// The address actually bound, which differs from the requested one for port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `signal` resolves, then finish in-flight requests and return.
    ///
    /// Each connection's peer address is attached to its requests so the
    /// admission middleware can identify callers.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            addr = %self.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            self.listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{router, AdmissionLayer, GREETING};
    use crate::ratelimit::{
        IdentityKey, LimiterFactory, LimiterParams, LimiterRegistry, TokenBucketParams,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn admission(capacity: u64) -> AdmissionLayer {
        let params = LimiterParams::TokenBucket(TokenBucketParams::new(0.001, capacity).unwrap());
        let factory = LimiterFactory::new(params);
        AdmissionLayer::new(Arc::new(LimiterRegistry::new(
            move |identity: &IdentityKey| factory.create(identity),
        )))
    }

    #[tokio::test]
    async fn test_server_bind_reports_ephemeral_port() {
        let server = HttpServer::bind("127.0.0.1:0".parse().unwrap(), Router::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_rejects_over_quota() {
        let app = router(Duration::ZERO, admission(2));
        let server = HttpServer::bind("127.0.0.1:0".parse().unwrap(), app)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async move {
            let _ = shutdown_rx.await;
        }));

        let client = reqwest::Client::new();
        let url = format!("http://{}/anything", addr);
        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = client.get(&url).send().await.unwrap();
            statuses.push(response.status().as_u16());
            if response.status().is_success() {
                assert_eq!(response.text().await.unwrap(), GREETING);
            }
        }

        assert_eq!(statuses, vec![200, 200, 429]);

        drop(client);
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
