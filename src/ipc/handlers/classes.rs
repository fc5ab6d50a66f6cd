use super::{load_user_with_role, optional_str, required_str, store_ref};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{ClassDoc, Role, UserDoc};
use crate::store::{Collection, Filter};
use serde_json::{json, Value};

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // A class belongs to exactly one teacher, and that teacher must exist.
    if let Err(e) = load_user_with_role(store, req, &teacher_id, Role::Teacher) {
        return e;
    }

    let doc = ClassDoc {
        name: name.clone(),
        teacher_id,
    };
    let value = match serde_json::to_value(&doc) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    match store.create(Collection::Classes, &value) {
        Ok(class_id) => ok(&req.id, json!({ "classId": class_id, "name": name })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut filters = Vec::new();
    if let Some(teacher_id) = optional_str(req, "teacherId") {
        filters.push(Filter::eq("teacherId", teacher_id));
    }
    let rows = match store.query(Collection::Classes, &filters) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Include membership counts so the admin dashboard has something to show.
    let students = match store.query(Collection::Users, &[Filter::eq("role", "student")]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut classes: Vec<serde_json::Value> = rows
        .into_iter()
        .filter_map(|(class_id, value)| {
            let doc: ClassDoc = serde_json::from_value(value).ok()?;
            let member_count = students
                .iter()
                .filter(|(_, user)| {
                    user.get("classId").and_then(|v| v.as_str()) == Some(class_id.as_str())
                })
                .count();
            Some(json!({
                "classId": class_id,
                "name": doc.name,
                "teacherId": doc.teacher_id,
                "studentCount": member_count,
            }))
        })
        .collect();
    classes.sort_by(|a, b| {
        a.get("name")
            .and_then(|v| v.as_str())
            .cmp(&b.get("name").and_then(|v| v.as_str()))
    });

    ok(&req.id, json!({ "classes": classes }))
}

fn roster_entry(uid: &str, user: &UserDoc) -> serde_json::Value {
    json!({ "uid": uid, "email": user.email })
}

fn handle_roster_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store.get(Collection::Classes, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let members = match store.query(
        Collection::Users,
        &[
            Filter::eq("role", "student"),
            Filter::eq("classId", class_id.as_str()),
        ],
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let unassigned = match store.query(
        Collection::Users,
        &[
            Filter::eq("role", "student"),
            Filter::eq("classId", Value::Null),
        ],
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut in_class: Vec<serde_json::Value> = members
        .iter()
        .filter_map(|(uid, value)| {
            let user: UserDoc = serde_json::from_value(value.clone()).ok()?;
            Some(roster_entry(uid, &user))
        })
        .collect();
    let mut available: Vec<serde_json::Value> = unassigned
        .iter()
        .filter_map(|(uid, value)| {
            let user: UserDoc = serde_json::from_value(value.clone()).ok()?;
            Some(roster_entry(uid, &user))
        })
        .collect();
    let by_email = |a: &serde_json::Value, b: &serde_json::Value| {
        a.get("email")
            .and_then(|v| v.as_str())
            .cmp(&b.get("email").and_then(|v| v.as_str()))
    };
    in_class.sort_by(by_email);
    available.sort_by(by_email);

    ok(
        &req.id,
        json!({ "classId": class_id, "inClass": in_class, "unassigned": available }),
    )
}

fn handle_roster_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = load_user_with_role(store, req, &student_id, Role::Student) {
        return e;
    }
    match store.get(Collection::Classes, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match store.update_field(Collection::Users, &student_id, "classId", json!(class_id)) {
        Ok(()) => ok(
            &req.id,
            json!({ "studentId": student_id, "classId": class_id }),
        ),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_roster_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // Removing an already-unassigned student is an observable no-op, not an
    // error.
    let changed = user.class_id.is_some();
    if changed {
        if let Err(e) = store.update_field(Collection::Users, &student_id, "classId", Value::Null)
        {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
    }
    ok(
        &req.id,
        json!({ "studentId": student_id, "classId": null, "changed": changed }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "roster.get" => Some(handle_roster_get(state, req)),
        "roster.add" => Some(handle_roster_add(state, req)),
        "roster.remove" => Some(handle_roster_remove(state, req)),
        _ => None,
    }
}
