//! Demonstration handler placed behind the admission middleware.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use std::time::Duration;

/// Fixed body returned to every admitted request.
pub const GREETING: &str = "hi there\n";

/// State shared by the demonstration handler.
#[derive(Debug, Clone, Copy)]
pub struct DemoState {
    /// Artificial latency applied before responding
    pub delay: Duration,
}

/// Reply with a greeting after simulating a slow downstream resource.
pub async fn greet(State(state): State<DemoState>) -> impl IntoResponse {
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    ([(header::CONTENT_TYPE, "application/json")], GREETING)
}
