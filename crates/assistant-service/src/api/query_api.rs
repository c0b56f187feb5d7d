//! GET /query: upgrade to a WebSocket and run one session on it.

use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    response::Response,
};
use tracing::{debug, info};

use crate::metrics;
use crate::session::{QueryParams, Session, SessionParams};
use crate::shared_state::AppState;
use crate::transport::WebSocketTransport;

pub async fn query(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let params = SessionParams::from_query(query);
    metrics::inc_request("/query", "101");
    debug!(
        actions = ?params.actions,
        widgets = ?params.widgets,
        resuming = params.thread_id.is_some(),
        "Upgrading query connection"
    );
    ws.on_upgrade(move |socket| run_session(state, params, socket))
}

async fn run_session(state: AppState, params: SessionParams, socket: WebSocket) {
    let transport = WebSocketTransport::new(socket);
    let session = Session::new(state.services.clone(), params);
    let session_id = session.thread_id().to_string();
    info!(session_id = %session_id, "Session started");
    // Failures are logged and reported to the client by the session itself.
    if let Ok(thread_id) = session.run(&transport).await {
        info!(thread_id = %thread_id, "Session complete");
    }
}
