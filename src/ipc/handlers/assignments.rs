use super::{optional_str, required_str, store_ref};
use crate::ipc::error::{bad_params, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{AssignmentDoc, ContentRef, Role, TargetKind, UserDoc};
use crate::resolver;
use crate::store::{Collection, Filter, Store};
use serde_json::json;

fn parse_content(req: &Request) -> Result<ContentRef, serde_json::Value> {
    let raw = req
        .params
        .get("content")
        .cloned()
        .ok_or_else(|| bad_params(&req.id, "missing content"))?;
    serde_json::from_value(raw)
        .map_err(|e| bad_params(&req.id, format!("invalid content descriptor: {}", e)))
}

/// A content ref is the direct subject of the mutation, so a dangling
/// reference is an explicit error here, unlike at resolution time where it
/// degrades to "not accessible".
fn validate_content(
    store: &Store,
    req: &Request,
    content: &ContentRef,
) -> Result<(), serde_json::Value> {
    match content {
        ContentRef::Video { id } => {
            if id.trim().is_empty() {
                return Err(bad_params(&req.id, "content.id must not be empty"));
            }
            let courses = resolver::load_courses(store, &[])
                .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
            let known = courses.iter().any(|(_, c)| c.contains_video(id));
            if !known {
                return Err(err(
                    &req.id,
                    "not_found",
                    format!("video not found in any course: {}", id),
                    None,
                ));
            }
        }
        ContentRef::Topic {
            course_id,
            topic_name,
        } => {
            let value = store
                .get(Collection::Courses, course_id)
                .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
            let Some(value) = value else {
                return Err(err(&req.id, "not_found", "course not found", None));
            };
            let course: crate::model::CourseDoc = serde_json::from_value(value)
                .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
            if course.topic_videos(topic_name).is_none() {
                return Err(err(&req.id, "not_found", "topic not found", None));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Target {
    kind: TargetKind,
    id: String,
}

fn parse_targets(req: &Request) -> Result<Vec<Target>, serde_json::Value> {
    let raw = req
        .params
        .get("targets")
        .and_then(|v| v.as_array())
        .ok_or_else(|| bad_params(&req.id, "targets must be an array"))?;
    if raw.is_empty() {
        return Err(bad_params(&req.id, "targets must not be empty"));
    }

    let mut targets = Vec::with_capacity(raw.len());
    for (index, entry) in raw.iter().enumerate() {
        let kind = match entry.get("type").and_then(|v| v.as_str()) {
            Some("student") => TargetKind::Student,
            Some("class") => TargetKind::Class,
            _ => {
                return Err(bad_params(
                    &req.id,
                    format!("targets[{}].type must be student or class", index),
                ))
            }
        };
        let id = entry
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| bad_params(&req.id, format!("targets[{}].id is required", index)))?;
        targets.push(Target {
            kind,
            id: id.to_string(),
        });
    }
    Ok(targets)
}

fn check_target(store: &Store, target: &Target) -> anyhow::Result<()> {
    match target.kind {
        TargetKind::Student => {
            let Some(value) = store.get(Collection::Users, &target.id)? else {
                anyhow::bail!("student not found: {}", target.id);
            };
            let user: UserDoc = serde_json::from_value(value)?;
            if user.role != Role::Student {
                anyhow::bail!("user {} is not a student", target.id);
            }
        }
        TargetKind::Class => {
            if store.get(Collection::Classes, &target.id)?.is_none() {
                anyhow::bail!("class not found: {}", target.id);
            }
        }
    }
    Ok(())
}

fn assignment_value(content: &ContentRef, target: &Target) -> anyhow::Result<serde_json::Value> {
    let doc = AssignmentDoc {
        content: content.clone(),
        assigned_to_type: target.kind,
        assigned_to_id: target.id.clone(),
        created_at: Some(chrono::Utc::now().to_rfc3339()),
    };
    Ok(serde_json::to_value(&doc)?)
}

/// Fan-out: one assignment record per target, each with its own outcome. A
/// failed target never rolls back or aborts the others.
fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let content = match parse_content(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = validate_content(store, req, &content) {
        return e;
    }
    let targets = match parse_targets(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut results = Vec::with_capacity(targets.len());
    let mut created = 0usize;
    let mut failed = 0usize;
    for target in &targets {
        let outcome = check_target(store, target)
            .and_then(|()| assignment_value(&content, target))
            .and_then(|value| store.create(Collection::Assignments, &value));
        match outcome {
            Ok(assignment_id) => {
                created += 1;
                results.push(json!({
                    "targetType": target.kind.as_str(),
                    "targetId": target.id,
                    "ok": true,
                    "assignmentId": assignment_id,
                }));
            }
            Err(e) => {
                failed += 1;
                results.push(json!({
                    "targetType": target.kind.as_str(),
                    "targetId": target.id,
                    "ok": false,
                    "error": e.to_string(),
                }));
            }
        }
    }

    ok(
        &req.id,
        json!({ "created": created, "failed": failed, "results": results }),
    )
}

/// Replaces every assignment of one content unit with a fresh target list.
/// Delete and recreate run inside a single store transaction, so a failure
/// leaves the previous assignments untouched instead of dropping them.
fn handle_assignments_replace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let content = match parse_content(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = validate_content(store, req, &content) {
        return e;
    }
    let targets = match parse_targets(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Validate every target up front; replace is all-or-nothing.
    for target in &targets {
        if let Err(e) = check_target(store, target) {
            return err(&req.id, "not_found", e.to_string(), None);
        }
    }

    let outcome = store.transaction(|tx| {
        let existing = tx.query(Collection::Assignments, &[])?;
        let mut removed = 0usize;
        for (assignment_id, value) in existing {
            let parsed: Result<AssignmentDoc, _> = serde_json::from_value(value);
            if let Ok(doc) = parsed {
                if doc.content == content {
                    tx.delete(Collection::Assignments, &assignment_id)?;
                    removed += 1;
                }
            }
        }
        let mut created_ids = Vec::with_capacity(targets.len());
        for target in &targets {
            let value = assignment_value(&content, target)?;
            created_ids.push(tx.create(Collection::Assignments, &value)?);
        }
        Ok((removed, created_ids))
    });

    match outcome {
        Ok((removed, created_ids)) => ok(
            &req.id,
            json!({ "removed": removed, "created": created_ids.len(), "assignmentIds": created_ids }),
        ),
        Err(e) => err(&req.id, "db_tx_failed", e.to_string(), None),
    }
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut filters = Vec::new();
    if let Some(kind) = optional_str(req, "assignedToType") {
        if kind != "student" && kind != "class" {
            return bad_params(&req.id, "assignedToType must be student or class");
        }
        filters.push(Filter::eq("assignedToType", kind));
    }
    if let Some(target) = optional_str(req, "assignedToId") {
        filters.push(Filter::eq("assignedToId", target));
    }

    let rows = match store.query(Collection::Assignments, &filters) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assignments: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(assignment_id, mut value)| {
            if let Some(obj) = value.as_object_mut() {
                obj.insert("assignmentId".to_string(), json!(assignment_id));
            }
            value
        })
        .collect();

    ok(&req.id, json!({ "assignments": assignments }))
}

/// Exposes the pure resolver over the learner's current assignments and the
/// current course structure.
fn handle_assignments_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user = match super::load_user_with_role(store, req, &student_id, Role::Student) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let assignments =
        match resolver::load_learner_assignments(store, &student_id, user.class_id.as_deref()) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    let courses = match resolver::load_courses(store, &[]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let allowed = resolver::resolve_accessible_videos(
        &student_id,
        user.class_id.as_deref(),
        &assignments,
        &courses,
    );
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "videoIds": allowed.into_iter().collect::<Vec<_>>(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.replace" => Some(handle_assignments_replace(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "assignments.resolve" => Some(handle_assignments_resolve(state, req)),
        _ => None,
    }
}
