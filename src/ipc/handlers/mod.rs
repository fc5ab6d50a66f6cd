pub mod assignments;
pub mod auth;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod courses;
pub mod reports;
pub mod users;
pub mod viewer;

use crate::ipc::error::{bad_params, err, no_workspace};
use crate::ipc::types::Request;
use crate::model::{Role, UserDoc};
use crate::store::{Collection, Store};

/// Extracts a required string parameter, trimmed.
pub(super) fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| bad_params(&req.id, format!("missing {}", key)))?;
    if raw.is_empty() {
        return Err(bad_params(&req.id, format!("{} must not be empty", key)));
    }
    Ok(raw)
}

pub(super) fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(super) fn store_ref<'a>(
    store: &'a Option<Store>,
    req: &Request,
) -> Result<&'a Store, serde_json::Value> {
    store.as_ref().ok_or_else(|| no_workspace(&req.id))
}

/// Loads a user document and checks its role, mapping the failure modes to
/// the IPC error taxonomy.
pub(super) fn load_user_with_role(
    store: &Store,
    req: &Request,
    user_id: &str,
    expected: Role,
) -> Result<UserDoc, serde_json::Value> {
    let doc = match store.get(Collection::Users, user_id) {
        Ok(v) => v,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    let Some(value) = doc else {
        return Err(err(
            &req.id,
            "not_found",
            format!("user not found: {}", user_id),
            None,
        ));
    };
    let user: UserDoc = match serde_json::from_value(value) {
        Ok(u) => u,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    if user.role != expected {
        return Err(bad_params(
            &req.id,
            format!("user {} is not a {}", user_id, expected.as_str()),
        ));
    }
    Ok(user)
}
