use crate::git;
use crate::protocol::*;
use crate::state::DaemonState;

pub async fn handle_status(request: &Request, state: &DaemonState) -> String {
    let params: WorkspaceIdParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    let Some(path) = state.workspace_path(&params.workspace_id).await else {
        return super::workspace_not_found(request.id, &params.workspace_id);
    };

    match git::get_status(&path) {
        Ok(result) => {
            let resp = SuccessResponse::new(request.id, result);
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => {
            let resp = ErrorResponse::new(request.id, GIT_ERROR, e);
            serde_json::to_string(&resp).unwrap()
        }
    }
}

pub async fn handle_diff(request: &Request, state: &DaemonState) -> String {
    let params: WorkspaceIdParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    let Some(path) = state.workspace_path(&params.workspace_id).await else {
        return super::workspace_not_found(request.id, &params.workspace_id);
    };

    match git::get_diff(&path) {
        Ok(result) => {
            let resp = SuccessResponse::new(request.id, result);
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => {
            let resp = ErrorResponse::new(request.id, GIT_ERROR, e);
            serde_json::to_string(&resp).unwrap()
        }
    }
}

pub async fn handle_log(request: &Request, state: &DaemonState) -> String {
    let params: GitLogParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    let Some(path) = state.workspace_path(&params.workspace_id).await else {
        return super::workspace_not_found(request.id, &params.workspace_id);
    };

    match git::get_log(&path, params.limit.unwrap_or(50)) {
        Ok(result) => {
            let resp = SuccessResponse::new(request.id, result);
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => {
            let resp = ErrorResponse::new(request.id, GIT_ERROR, e);
            serde_json::to_string(&resp).unwrap()
        }
    }
}
