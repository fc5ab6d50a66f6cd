use super::{load_user_with_role, optional_str, required_str};
use crate::ipc::error::{bad_params, err, no_workspace, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::player::{EventOutcome, PlaybackEvent, ViewerSession};
use crate::progress;
use crate::resolver;
use serde_json::json;

fn handle_viewer_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match state.store.as_ref() {
        Some(s) => s,
        None => return no_workspace(&req.id),
    };
    let video_id = match required_str(req, "videoId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Explicit param wins; otherwise the signed-in user is the learner.
    let student_id = match optional_str(req, "studentId")
        .or_else(|| state.session.as_ref().map(|s| s.uid.clone()))
    {
        Some(v) => v,
        None => return bad_params(&req.id, "missing studentId (no signed-in user)"),
    };
    let user = match load_user_with_role(store, req, &student_id, Role::Student) {
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
    if !allowed.contains(&video_id) {
        return err(
            &req.id,
            "not_assigned",
            "video is not assigned to this student",
            None,
        );
    }

    // A directly-assigned video may no longer exist in any course; the
    // player ref then degrades to the raw id.
    let player_ref = courses
        .iter()
        .flat_map(|(_, course)| course.all_videos())
        .find(|video| video.video_id == video_id)
        .map(|video| video.player_id().to_string())
        .unwrap_or_else(|| video_id.clone());

    // Opening a new video tears down the previous session first.
    if let Some(previous) = state.viewer.as_mut() {
        previous.close();
    }
    let session = ViewerSession::open(&student_id, &video_id, &player_ref);
    let response = json!({
        "studentId": student_id,
        "videoId": video_id,
        "playerRef": player_ref,
        "state": session.state().as_str(),
    });
    state.viewer = Some(session);
    ok(&req.id, response)
}

fn handle_viewer_event(state: &mut AppState, req: &Request) -> serde_json::Value {
    let event_raw = match required_str(req, "event") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(event) = PlaybackEvent::parse(&event_raw) else {
        return bad_params(
            &req.id,
            "event must be one of: ready, playing, paused, buffering, ended",
        );
    };
    let Some(viewer) = state.viewer.as_mut() else {
        return err(&req.id, "no_viewer", "no viewing session is open", None);
    };
    let store = match state.store.as_ref() {
        Some(s) => s,
        None => return no_workspace(&req.id),
    };

    let outcome = match viewer.on_event(event) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "viewer_closed", e.to_string(), None),
    };

    let mut payload = json!({
        "state": viewer.state().as_str(),
        "sampling": viewer.sampling(),
    });
    if outcome == EventOutcome::Completed {
        let position = req.params.get("positionSeconds").and_then(|v| v.as_f64());
        match progress::record_ended(store, &viewer.user_id, &viewer.video_id, position) {
            Ok(snapshot) => {
                payload["progress"] = json!(snapshot);
            }
            Err(e) => {
                viewer.halt_sampling();
                return err(&req.id, "db_write_failed", e.to_string(), None);
            }
        }
    }
    ok(&req.id, payload)
}

fn handle_viewer_sample(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(viewer) = state.viewer.as_mut() else {
        return err(&req.id, "no_viewer", "no viewing session is open", None);
    };
    let store = match state.store.as_ref() {
        Some(s) => s,
        None => return no_workspace(&req.id),
    };
    let Some(position) = req.params.get("positionSeconds").and_then(|v| v.as_f64()) else {
        return bad_params(&req.id, "missing positionSeconds");
    };
    let duration = req
        .params
        .get("durationSeconds")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    // Samples only land while the player is actually playing; a paused or
    // torn-down gate drops them instead of recording stale positions.
    if !viewer.accepts_samples() {
        return ok(
            &req.id,
            json!({
                "recorded": false,
                "state": viewer.state().as_str(),
                "sampling": viewer.sampling(),
            }),
        );
    }

    match progress::apply_sample(store, &viewer.user_id, &viewer.video_id, position, duration) {
        Ok(snapshot) => ok(
            &req.id,
            json!({
                "recorded": true,
                "watchTime": snapshot.watch_time,
                "completionPercentage": snapshot.completion_percentage,
            }),
        ),
        Err(e) => {
            // Stop the sampling gate so a broken store is not hit again on
            // every tick; the caller sees the failure.
            viewer.halt_sampling();
            err(&req.id, "db_write_failed", e.to_string(), None)
        }
    }
}

fn handle_viewer_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.viewer.as_mut() {
        Some(viewer) => {
            viewer.close();
            state.viewer = None;
            ok(&req.id, json!({ "closed": true }))
        }
        None => ok(&req.id, json!({ "closed": false })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "viewer.open" => Some(handle_viewer_open(state, req)),
        "viewer.event" => Some(handle_viewer_event(state, req)),
        "viewer.sample" => Some(handle_viewer_sample(state, req)),
        "viewer.close" => Some(handle_viewer_close(state, req)),
        _ => None,
    }
}
