use std::path::Path;

use crate::git;
use crate::protocol::*;
use crate::state::DaemonState;

pub async fn handle_list(request: &Request, state: &DaemonState) -> String {
    let workspaces = state.list_workspaces().await;
    let resp = SuccessResponse::new(request.id, workspaces);
    serde_json::to_string(&resp).unwrap()
}

pub async fn handle_info(request: &Request, state: &DaemonState) -> String {
    let params: WorkspaceIdParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            let resp =
                ErrorResponse::new(request.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            return serde_json::to_string(&resp).unwrap();
        }
    };

    match state.get_workspace(&params.workspace_id).await {
        Some(workspace) => {
            let path = Path::new(&workspace.path);
            let has_git = git::is_git_repo(path);

            let result = WorkspaceInfoResult {
                path: workspace.path,
                name: workspace.name,
                has_git,
            };
            let resp = SuccessResponse::new(request.id, result);
            serde_json::to_string(&resp).unwrap()
        }
        None => super::workspace_not_found(request.id, &params.workspace_id),
    }
}
