use super::{optional_str, required_str, store_ref};
use crate::identity;
use crate::ipc::error::{bad_params, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{Role, UserDoc};
use crate::store::{Collection, Filter, Store};
use serde_json::json;

fn create_one_user(
    store: &Store,
    email: &str,
    password: &str,
    role: Role,
    class_id: Option<&str>,
) -> anyhow::Result<String> {
    let uid = identity::create_identity(store, email, password)?;
    let doc = UserDoc {
        email: email.trim().to_string(),
        role,
        // Only students carry a class membership.
        class_id: match role {
            Role::Student => class_id.map(|c| c.to_string()),
            _ => None,
        },
    };
    store.set_with_merge(Collection::Users, &uid, &serde_json::to_value(&doc)?)?;
    Ok(uid)
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(role) = Role::parse(&role_raw) else {
        return bad_params(&req.id, "role must be one of: admin, teacher, student");
    };
    let class_id = optional_str(req, "classId");

    match create_one_user(store, &email, &password, role, class_id.as_deref()) {
        Ok(uid) => ok(
            &req.id,
            json!({ "uid": uid, "email": email, "role": role.as_str() }),
        ),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

/// One line per user: `email,password,role[,classId]`. Rows are processed
/// sequentially; a bad row is logged and skipped, it never aborts the rest.
fn handle_users_bulk_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let text = match required_str(req, "text") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut log = Vec::new();
    let mut created = 0usize;
    let mut failed = 0usize;

    for (index, line) in text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
    {
        let row = index + 1;
        match parse_bulk_line(line) {
            Err(reason) => {
                failed += 1;
                log.push(json!({
                    "row": row,
                    "ok": false,
                    "error": format!("invalid line: {}", reason),
                }));
            }
            Ok((email, password, role, class_id)) => {
                match create_one_user(store, &email, &password, role, class_id.as_deref()) {
                    Ok(uid) => {
                        created += 1;
                        log.push(json!({
                            "row": row,
                            "ok": true,
                            "email": email,
                            "uid": uid,
                            "role": role.as_str(),
                        }));
                    }
                    Err(e) => {
                        failed += 1;
                        log.push(json!({
                            "row": row,
                            "ok": false,
                            "email": email,
                            "error": e.to_string(),
                        }));
                    }
                }
            }
        }
    }

    ok(
        &req.id,
        json!({ "created": created, "failed": failed, "log": log }),
    )
}

fn parse_bulk_line(line: &str) -> Result<(String, String, Role, Option<String>), String> {
    let mut parts = line.split(',').map(str::trim);
    let email = parts.next().unwrap_or("").to_string();
    let password = parts.next().unwrap_or("").to_string();
    let role_raw = parts.next().unwrap_or("").to_string();
    let class_id = parts.next().map(|s| s.to_string()).filter(|s| !s.is_empty());

    if email.is_empty() {
        return Err("missing email".to_string());
    }
    if password.is_empty() {
        return Err("missing password".to_string());
    }
    let role = Role::parse(&role_raw)
        .ok_or_else(|| format!("unknown role: {}", role_raw))?;
    Ok((email, password, role, class_id))
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut filters = Vec::new();
    if let Some(role_raw) = optional_str(req, "role") {
        let Some(role) = Role::parse(&role_raw) else {
            return bad_params(&req.id, "role must be one of: admin, teacher, student");
        };
        filters.push(Filter::eq("role", role.as_str()));
    }

    let rows = match store.query(Collection::Users, &filters) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut users: Vec<serde_json::Value> = rows
        .into_iter()
        .filter_map(|(uid, value)| {
            let doc: UserDoc = serde_json::from_value(value).ok()?;
            Some(json!({
                "uid": uid,
                "email": doc.email,
                "role": doc.role.as_str(),
                "classId": doc.class_id,
            }))
        })
        .collect();
    users.sort_by(|a, b| {
        a.get("email")
            .and_then(|v| v.as_str())
            .cmp(&b.get("email").and_then(|v| v.as_str()))
    });

    ok(&req.id, json!({ "users": users }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.bulkCreate" => Some(handle_users_bulk_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        _ => None,
    }
}
