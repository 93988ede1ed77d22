//! Local-only status HTTP surface (spec §6 ADDED): a `GET /status` snapshot
//! and a `GET /logs/stream` Server-Sent-Events tail, built the same way the
//! reference daemon builds its status/SSE routes (`axum` + a broadcast
//! channel drained through `tokio_stream::wrappers::BroadcastStream`).
//! This is observability only, not the injector/target IPC channel.
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    response::{
        Json,
        sse::{Event, Sse},
    },
    routing::get,
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream, errors::BroadcastStreamRecvError};

use crate::Metrics;
use crate::diagnostics::{Diagnostics, Record};

/// Shared state every route handler reads from. Cheap to clone (every
/// field is already an `Arc` or copy-cheap reference-counted type).
#[derive(Clone)]
pub struct ApiState {
    pub metrics: Arc<Metrics>,
    pub diagnostics: Arc<Diagnostics>,
    pub arena_free_bytes: Arc<dyn Fn() -> u64 + Send + Sync>,
}

#[derive(Serialize)]
struct StatusResponse {
    uptime_seconds: u64,
    arena_free_bytes: u64,
    hooks_installed: usize,
    hook_chain_max_depth: usize,
    log_dropped_total: u64,
    recent_events: Vec<Record>,
}

async fn status_handler(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        uptime_seconds: state.metrics.uptime_seconds(),
        arena_free_bytes: (state.arena_free_bytes)(),
        hooks_installed: state.metrics.hooks_installed(),
        hook_chain_max_depth: state.metrics.hook_chain_max_depth(),
        log_dropped_total: state.metrics.log_dropped_total(),
        recent_events: state.diagnostics.history(),
    })
}

async fn logs_stream_handler(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.diagnostics.subscribe();

    let event_stream = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(record) => {
                let json = serde_json::to_string(&record).ok()?;
                Some(Ok(Event::default().data(json)))
            }
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                log::warn!("dropped {n} diagnostic events (SSE subscriber lag)");
                None
            }
        }
    });

    let keepalive = IntervalStream::new(tokio::time::interval(Duration::from_secs(15)))
        .map(|_| Ok(Event::default().comment("keep-alive")));

    let merged = futures_util::stream::select(event_stream, keepalive);
    Sse::new(merged).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/logs/stream", get(logs_stream_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticEvent;

    #[tokio::test]
    async fn status_reports_metrics_and_recent_history() {
        let metrics = Arc::new(Metrics::new());
        metrics.set_hooks_installed(3);
        let diagnostics = Arc::new(Diagnostics::new());
        diagnostics.record(DiagnosticEvent::HookInstalled { id: 1, priority: 0 });

        let state = ApiState {
            metrics,
            diagnostics,
            arena_free_bytes: Arc::new(|| 4096),
        };

        let Json(response) = status_handler(State(state)).await;
        assert_eq!(response.hooks_installed, 3);
        assert_eq!(response.arena_free_bytes, 4096);
        assert_eq!(response.recent_events.len(), 1);
    }
}
