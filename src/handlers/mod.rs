pub mod agent;
pub mod auth;
pub mod files;
pub mod git;
pub mod workspaces;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::events::ClientId;
use crate::protocol::*;
use crate::state::DaemonState;

/// Dispatch a request to the appropriate handler
pub async fn dispatch(request: &Request, state: Arc<DaemonState>, client_id: ClientId) -> String {
    let start = Instant::now();
    let method = request.method.as_str();
    let id = request.id;

    debug!("[dispatch] → id={} method={} client={}", id, method, client_id);

    let response = match method {
        METHOD_AUTH => auth::handle(request, &state).await,
        METHOD_WORKSPACE_LIST => workspaces::handle_list(request, &state).await,
        METHOD_WORKSPACE_INFO => workspaces::handle_info(request, &state).await,
        METHOD_AGENT_START => agent::handle_start(request, &state).await,
        METHOD_AGENT_SEND => agent::handle_send(request, &state).await,
        METHOD_AGENT_STOP => agent::handle_stop(request, &state).await,
        METHOD_AGENT_INPUT => agent::handle_input(request, &state).await,
        METHOD_AGENT_RESPOND => agent::handle_respond(request, &state, client_id).await,
        METHOD_AGENT_WATCH => agent::handle_watch(request, &state, client_id).await,
        METHOD_AGENT_UNWATCH => agent::handle_unwatch(request, &state, client_id).await,
        METHOD_AGENT_LIST => agent::handle_list(request, &state).await,
        METHOD_HISTORY_LIST => agent::handle_history_list(request, &state).await,
        METHOD_GIT_STATUS => git::handle_status(request, &state).await,
        METHOD_GIT_DIFF => git::handle_diff(request, &state).await,
        METHOD_GIT_LOG => git::handle_log(request, &state).await,
        METHOD_FILE_LIST => files::handle_list(request, &state).await,
        _ => {
            warn!("[dispatch] Unknown method: {}", method);
            let resp = ErrorResponse::new(
                request.id,
                INVALID_PARAMS,
                format!("Unknown method: {}", request.method),
            );
            serde_json::to_string(&resp).unwrap()
        }
    };

    let elapsed = start.elapsed();
    let is_error = response.contains("\"error\"");

    if is_error {
        info!("[dispatch] ← id={} method={} error elapsed={:?}", id, method, elapsed);
    } else {
        debug!("[dispatch] ← id={} method={} ok elapsed={:?}", id, method, elapsed);
    }

    response
}

/// Render a classified core error as a wire response.
pub(crate) fn core_error_response(id: u64, method: &str, err: CoreError) -> String {
    let resp = match err.data(method) {
        Some(data) => ErrorResponse::with_data(id, err.code(), err.to_string(), data),
        None => ErrorResponse::new(id, err.code(), err.to_string()),
    };
    serde_json::to_string(&resp).unwrap()
}

/// Render a workspace-not-found error.
pub(crate) fn workspace_not_found(id: u64, workspace_id: &str) -> String {
    let resp = ErrorResponse::new(
        id,
        WORKSPACE_NOT_FOUND,
        format!("Workspace not found: {workspace_id}"),
    );
    serde_json::to_string(&resp).unwrap()
}
