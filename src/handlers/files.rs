use crate::files;
use crate::protocol::*;
use crate::state::DaemonState;

pub async fn handle_list(request: &Request, state: &DaemonState) -> String {
    let params: FileListParams = match serde_json::from_value(request.params.clone()) {
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

    match files::list_dir(&path, params.path.as_deref()) {
        Ok(entries) => {
            let resp = SuccessResponse::new(request.id, FileListResult { entries });
            serde_json::to_string(&resp).unwrap()
        }
        Err(e) => {
            let resp = ErrorResponse::new(request.id, INVALID_PARAMS, e);
            serde_json::to_string(&resp).unwrap()
        }
    }
}
