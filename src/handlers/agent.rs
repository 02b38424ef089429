use crate::events::ClientId;
use crate::protocol::*;
use crate::state::DaemonState;

use super::{core_error_response, workspace_not_found};

pub async fn handle_start(request: &Request, state: &DaemonState) -> String {
    let params: AgentStartParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    let Some(path) = state.workspace_path(&params.workspace_id).await else {
        return workspace_not_found(request.id, &params.workspace_id);
    };

    match state
        .registry
        .start(&params.workspace_id, &path, params.backend, params.session_id)
        .await
    {
        Ok(result) => {
            let resp = SuccessResponse::new(request.id, result);
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => core_error_response(request.id, METHOD_AGENT_START, e),
    }
}

pub async fn handle_send(request: &Request, state: &DaemonState) -> String {
    let params: AgentSendParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    let Some(path) = state.workspace_path(&params.workspace_id).await else {
        return workspace_not_found(request.id, &params.workspace_id);
    };

    match state
        .registry
        .send(
            &params.workspace_id,
            &path,
            params.session_id,
            &params.prompt,
            params.mode,
            params.backend,
        )
        .await
    {
        Ok((session_id, created)) => {
            let resp = SuccessResponse::new(request.id, AgentSendResult { session_id, created });
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => core_error_response(request.id, METHOD_AGENT_SEND, e),
    }
}

pub async fn handle_stop(request: &Request, state: &DaemonState) -> String {
    let params: AgentStopParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    match state.registry.stop(&params.session_id).await {
        Ok(()) => {
            let resp = SuccessResponse::new(request.id, serde_json::json!({}));
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => core_error_response(request.id, METHOD_AGENT_STOP, e),
    }
}

pub async fn handle_input(request: &Request, state: &DaemonState) -> String {
    let params: AgentInputParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    match state
        .registry
        .input(&params.session_id, params.text, params.key)
        .await
    {
        Ok(()) => {
            let resp = SuccessResponse::new(request.id, serde_json::json!({}));
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => core_error_response(request.id, METHOD_AGENT_INPUT, e),
    }
}

pub async fn handle_respond(
    request: &Request,
    state: &DaemonState,
    client_id: ClientId,
) -> String {
    let params: AgentRespondParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    match state
        .registry
        .respond(&params.session_id, &params.kind, &params.response, client_id)
        .await
    {
        Ok(()) => {
            let resp = SuccessResponse::new(request.id, serde_json::json!({}));
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => core_error_response(request.id, METHOD_AGENT_RESPOND, e),
    }
}

pub async fn handle_watch(request: &Request, state: &DaemonState, client_id: ClientId) -> String {
    let params: AgentWatchParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    if state.get_workspace(&params.workspace_id).await.is_none() {
        return workspace_not_found(request.id, &params.workspace_id);
    }

    match state
        .registry
        .watch(client_id, &params.workspace_id, &params.session_id)
        .await
    {
        Ok(session_id) => {
            let resp = SuccessResponse::new(request.id, AgentWatchResult { session_id });
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => core_error_response(request.id, METHOD_AGENT_WATCH, e),
    }
}

pub async fn handle_unwatch(
    request: &Request,
    state: &DaemonState,
    client_id: ClientId,
) -> String {
    let params: AgentUnwatchParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    state
        .registry
        .unwatch(client_id, params.session_id.as_deref())
        .await;
    let resp = SuccessResponse::new(request.id, serde_json::json!({}));
    serde_json::to_string(&resp).unwrap()
}

pub async fn handle_list(request: &Request, state: &DaemonState) -> String {
    let sessions = state.registry.list().await;
    let resp = SuccessResponse::new(request.id, sessions);
    serde_json::to_string(&resp).unwrap()
}

pub async fn handle_history_list(request: &Request, state: &DaemonState) -> String {
    let params: WorkspaceIdParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    let Some(path) = state.workspace_path(&params.workspace_id).await else {
        return workspace_not_found(request.id, &params.workspace_id);
    };

    let entries = state.history.list_entries(&path);
    let resp = SuccessResponse::new(request.id, serde_json::json!({ "sessions": entries }));
    serde_json::to_string(&resp).unwrap()
}
