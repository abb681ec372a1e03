use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ServerEntry {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub sort_order: usize,
}

/// Configured LysKOM servers, keyed by id.
pub async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    let servers: BTreeMap<String, ServerEntry> = state
        .config
        .kom_servers
        .iter()
        .enumerate()
        .map(|(i, s)| {
            (
                s.id.clone(),
                ServerEntry {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    host: s.host.clone(),
                    port: s.port,
                    sort_order: i,
                },
            )
        })
        .collect();
    Json(servers)
}

pub async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats.snapshot(state.backend.active_sessions()))
}
