use super::required_str;
use crate::backup;
use crate::ipc::error::{err, no_workspace, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;
use serde_json::json;
use std::path::PathBuf;

fn handle_workspace_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return no_workspace(&req.id);
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "outPath": out_path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "dbSha256": summary.db_sha256,
            }),
        ),
        Err(e) => err(&req.id, "export_failed", e.to_string(), None),
    }
}

/// Restores a bundle into the current workspace. The open store handle is
/// dropped before the database file is swapped, then reopened.
fn handle_workspace_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return no_workspace(&req.id);
    };
    let in_path = match required_str(req, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    state.session = None;
    state.viewer = None;
    state.store = None;

    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(v) => v,
        Err(e) => {
            // Try to get back to a usable workspace either way.
            state.store = Store::open(&workspace).ok();
            return err(&req.id, "import_failed", e.to_string(), None);
        }
    };

    match Store::open(&workspace) {
        Ok(store) => {
            state.store = Some(store);
            ok(
                &req.id,
                json!({
                    "bundleFormat": summary.bundle_format_detected,
                    "dbSha256": summary.db_sha256,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workspace.export" => Some(handle_workspace_export(state, req)),
        "workspace.import" => Some(handle_workspace_import(state, req)),
        _ => None,
    }
}
