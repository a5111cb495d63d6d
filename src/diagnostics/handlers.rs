use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::DiagnosticsState;
use crate::observability::metrics;
use crate::server::ServerStatus;

#[derive(Serialize)]
pub struct ProcessStatus {
    pub version: &'static str,
    pub pid: u32,
    pub uptime_secs: u64,
    pub num_workers: usize,
    pub num_alive_tasks: usize,
    pub servers: usize,
}

pub async fn get_status(State(state): State<DiagnosticsState>) -> Json<ProcessStatus> {
    let runtime = tokio::runtime::Handle::current().metrics();
    Json(ProcessStatus {
        version: env!("CARGO_PKG_VERSION"),
        pid: std::process::id(),
        uptime_secs: state.started.elapsed().as_secs(),
        num_workers: runtime.num_workers(),
        num_alive_tasks: runtime.num_alive_tasks(),
        servers: state.servers.len(),
    })
}

pub async fn get_servers(State(state): State<DiagnosticsState>) -> Json<Vec<ServerStatus>> {
    let mut statuses: Vec<ServerStatus> = state
        .servers
        .iter()
        .map(|entry| entry.value().status())
        .collect();
    statuses.sort_by(|a, b| a.id.cmp(&b.id));
    Json(statuses)
}

pub async fn get_metrics() -> Response {
    match metrics::render() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
