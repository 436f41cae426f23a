//! HTTP surface: admission middleware, demonstration handler and server.

mod handler;
mod middleware;
mod server;

pub use handler::{greet, DemoState, GREETING};
pub use middleware::{AdmissionLayer, AdmissionService};
pub use server::HttpServer;

use axum::routing::any;
use axum::Router;
use std::time::Duration;

/// Build the application router: every path reaches the demonstration
/// handler, gated by `admission`.
pub fn router(handler_delay: Duration, admission: AdmissionLayer) -> Router {
    Router::new()
        .route("/", any(greet))
        .route("/*path", any(greet))
        .with_state(DemoState {
            delay: handler_delay,
        })
        .layer(admission)
}
