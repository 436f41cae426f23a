//! Admission middleware that gates a service on per-identity limiters.

use axum::http::{Request, Response, StatusCode};
use futures::future::{self, Either, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, trace, warn};

use crate::ratelimit::{extract_identity, IdentityKey, LimiterRegistry};

/// A layer that admits or rejects requests using a [`LimiterRegistry`].
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    registry: Arc<LimiterRegistry>,
    enabled: bool,
}

impl AdmissionLayer {
    /// Create an enabled admission layer backed by `registry`.
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        Self {
            registry,
            enabled: true,
        }
    }

    /// Turn enforcement on or off. A disabled layer forwards every request.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The registry consulted by services built from this layer.
    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            registry: self.registry.clone(),
            enabled: self.enabled,
        }
    }
}

/// Middleware service that charges each request to its caller's limiter.
///
/// Rejected requests get `429 Too Many Requests` with an empty body and never
/// reach the inner service.
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    registry: Arc<LimiterRegistry>,
    enabled: bool,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AdmissionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Default,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Either<S::Future, Ready<Result<Self::Response, Self::Error>>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        if !self.enabled {
            return Either::Left(self.inner.call(request));
        }

        let identity = extract_identity(&request).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to get client identity, using shared bucket");
            IdentityKey::unknown()
        });

        if !self.registry.resolve(&identity).allow() {
            debug!(identity = %identity, "Rate limit exceeded");
            return Either::Right(future::ready(Ok(too_many_requests())));
        }

        trace!(identity = %identity, "Request admitted");
        Either::Left(self.inner.call(request))
    }
}

fn too_many_requests<B: Default>() -> Response<B> {
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{LimiterFactory, LimiterParams, ManualClock, TokenBucketParams};
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn registry(capacity: u64) -> Arc<LimiterRegistry> {
        let params = LimiterParams::TokenBucket(TokenBucketParams::new(1.0, capacity).unwrap());
        let factory = LimiterFactory::new(params).with_clock(Arc::new(ManualClock::default()));
        Arc::new(LimiterRegistry::new(move |identity: &IdentityKey| {
            factory.create(identity)
        }))
    }

    fn counting_service(
        calls: Arc<AtomicUsize>,
    ) -> impl Service<Request<Body>, Response = Response<Body>, Error = Infallible> + Clone {
        tower::service_fn(move |_request: Request<Body>| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(Response::new(Body::from("hi there\n")))
            }
        })
    }

    fn request_from(peer: &str) -> Request<Body> {
        let addr: SocketAddr = peer.parse().unwrap();
        let mut request = Request::new(Body::empty());
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[tokio::test]
    async fn test_admits_until_quota_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = AdmissionLayer::new(registry(2)).layer(counting_service(calls.clone()));

        for _ in 0..2 {
            let response = service.clone().oneshot(request_from("10.0.0.1:1000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = service.clone().oneshot(request_from("10.0.0.1:1000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());

        // The rejected request never reached the handler.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_port_does_not_split_identity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = AdmissionLayer::new(registry(1)).layer(counting_service(calls.clone()));

        let first = service.clone().oneshot(request_from("10.0.0.1:1000")).await.unwrap();
        let second = service.clone().oneshot(request_from("10.0.0.1:2000")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_identities_are_throttled_independently() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = AdmissionLayer::new(registry(1));
        let service = layer.layer(counting_service(calls.clone()));

        let a = service.clone().oneshot(request_from("10.0.0.1:1000")).await.unwrap();
        let a_again = service.clone().oneshot(request_from("10.0.0.1:1000")).await.unwrap();
        let b = service.clone().oneshot(request_from("10.0.0.2:1000")).await.unwrap();

        assert_eq!(a.status(), StatusCode::OK);
        assert_eq!(a_again.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(b.status(), StatusCode::OK);
        assert_eq!(layer.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_forwards_everything() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = AdmissionLayer::new(registry(1)).enabled(false);
        let service = layer.layer(counting_service(calls.clone()));

        for _ in 0..5 {
            let response = service.clone().oneshot(request_from("10.0.0.1:1000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(layer.registry().is_empty());
    }

    #[tokio::test]
    async fn test_missing_peer_address_uses_shared_bucket() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = AdmissionLayer::new(registry(1));
        let service = layer.layer(counting_service(calls.clone()));

        let first = service.clone().oneshot(Request::new(Body::empty())).await.unwrap();
        let second = service.clone().oneshot(Request::new(Body::empty())).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(layer.registry().contains(&IdentityKey::unknown()));
    }
}
