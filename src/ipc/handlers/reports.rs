use super::{load_user_with_role, optional_str, required_str, store_ref};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::report;
use serde_json::json;

fn handle_reports_global(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = optional_str(req, "teacherId");
    let class_id = optional_str(req, "classId");

    match report::global_report(store, teacher_id.as_deref(), class_id.as_deref()) {
        Ok(result) => ok(&req.id, json!(result)),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = load_user_with_role(store, req, &teacher_id, Role::Teacher) {
        return e;
    }

    match report::teacher_report(store, &teacher_id) {
        Ok(result) => ok(&req.id, json!(result)),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user = match load_user_with_role(store, req, &student_id, Role::Student) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match report::student_view(store, &student_id, user.class_id.as_deref()) {
        Ok(result) => ok(&req.id, json!(result)),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.global" => Some(handle_reports_global(state, req)),
        "reports.teacher" => Some(handle_reports_teacher(state, req)),
        "reports.student" => Some(handle_reports_student(state, req)),
        _ => None,
    }
}
