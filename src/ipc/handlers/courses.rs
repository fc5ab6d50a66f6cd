use super::{load_user_with_role, optional_str, required_str, store_ref};
use crate::ipc::error::{bad_params, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{CourseDoc, Role, Video};
use crate::store::{Collection, Filter};
use serde_json::json;

fn valid_topic_name(req: &Request, name: &str) -> Result<(), serde_json::Value> {
    // Topics are addressed with dotted field paths; a dot in the name would
    // silently nest instead.
    if name.contains('.') {
        return Err(bad_params(&req.id, "topicName must not contain '.'"));
    }
    Ok(())
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
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

    let doc = CourseDoc {
        title: title.clone(),
        teacher_id,
        topics: Default::default(),
    };
    let value = match serde_json::to_value(&doc) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    match store.create(Collection::Courses, &value) {
        Ok(course_id) => ok(&req.id, json!({ "courseId": course_id, "title": title })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut filters = Vec::new();
    if let Some(teacher_id) = optional_str(req, "teacherId") {
        filters.push(Filter::eq("teacherId", teacher_id));
    }
    let rows = match store.query(Collection::Courses, &filters) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut courses: Vec<serde_json::Value> = rows
        .into_iter()
        .filter_map(|(course_id, value)| {
            let doc: CourseDoc = serde_json::from_value(value).ok()?;
            Some(json!({
                "courseId": course_id,
                "title": doc.title,
                "teacherId": doc.teacher_id,
                "topicCount": doc.topics.len(),
                "videoCount": doc.all_videos().count(),
                "topics": doc.topics,
            }))
        })
        .collect();
    courses.sort_by(|a, b| {
        a.get("title")
            .and_then(|v| v.as_str())
            .cmp(&b.get("title").and_then(|v| v.as_str()))
    });

    ok(&req.id, json!({ "courses": courses }))
}

fn load_course(
    state: &AppState,
    req: &Request,
    course_id: &str,
) -> Result<CourseDoc, serde_json::Value> {
    let store = store_ref(&state.store, req)?;
    let value = match store.get(Collection::Courses, course_id) {
        Ok(v) => v,
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    let Some(value) = value else {
        return Err(err(&req.id, "not_found", "course not found", None));
    };
    serde_json::from_value(value)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn handle_courses_add_topic(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let topic_name = match required_str(req, "topicName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = valid_topic_name(req, &topic_name) {
        return e;
    }
    let course = match load_course(state, req, &course_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if course.topics.contains_key(&topic_name) {
        // The structured upload is the sanctioned overwrite path; a plain
        // re-add must not clobber an existing video list.
        return err(&req.id, "already_exists", "topic already exists", None);
    }

    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store.update_field(
        Collection::Courses,
        &course_id,
        &format!("topics.{}", topic_name),
        json!([]),
    ) {
        Ok(()) => ok(
            &req.id,
            json!({ "courseId": course_id, "topicName": topic_name }),
        ),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_courses_add_video(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let topic_name = match required_str(req, "topicName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let video_id = match required_str(req, "videoId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let player_ref = optional_str(req, "playerRef");

    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Append under the transaction so a concurrent edit cannot drop entries.
    let outcome = store.transaction(|tx| {
        let Some(value) = tx.get(Collection::Courses, &course_id)? else {
            anyhow::bail!("course not found");
        };
        let mut course: CourseDoc = serde_json::from_value(value)?;
        if course.contains_video(&video_id) {
            anyhow::bail!("video id already present in course");
        }
        let Some(videos) = course.topics.get_mut(&topic_name) else {
            anyhow::bail!("topic not found");
        };
        videos.push(Video {
            title: title.clone(),
            video_id: video_id.clone(),
            player_ref: player_ref.clone(),
        });
        tx.update_field(
            Collection::Courses,
            &course_id,
            &format!("topics.{}", topic_name),
            serde_json::to_value(videos)?,
        )?;
        Ok(())
    });

    match outcome {
        Ok(()) => ok(
            &req.id,
            json!({ "courseId": course_id, "topicName": topic_name, "videoId": video_id }),
        ),
        Err(e) => {
            let message = e.to_string();
            let code = if message.contains("not found") {
                "not_found"
            } else if message.contains("already present") {
                "already_exists"
            } else {
                "db_write_failed"
            };
            err(&req.id, code, message, None)
        }
    }
}

/// Bulk content upload: a whole topic in one structured document. Uploading
/// to an existing topic name overwrites its entire video list (no merge).
fn handle_courses_upload_topic(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let document = req.params.get("document").cloned().unwrap_or_default();
    let topic_name = match document
        .get("topicName")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(v) => v.to_string(),
        None => return bad_params(&req.id, "document.topicName must be a non-empty string"),
    };
    if let Err(e) = valid_topic_name(req, &topic_name) {
        return e;
    }
    let Some(raw_videos) = document.get("videos").and_then(|v| v.as_array()) else {
        return bad_params(&req.id, "document.videos must be an array");
    };
    if raw_videos.is_empty() {
        return bad_params(&req.id, "document.videos must not be empty");
    }

    let mut videos = Vec::with_capacity(raw_videos.len());
    for (index, entry) in raw_videos.iter().enumerate() {
        let title = entry.get("title").and_then(|v| v.as_str()).map(str::trim);
        let video_id = entry.get("videoId").and_then(|v| v.as_str()).map(str::trim);
        match (title, video_id) {
            (Some(title), Some(video_id)) if !title.is_empty() && !video_id.is_empty() => {
                videos.push(Video {
                    title: title.to_string(),
                    video_id: video_id.to_string(),
                    player_ref: entry
                        .get("playerRef")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                });
            }
            _ => {
                return bad_params(
                    &req.id,
                    format!("videos[{}] must have both title and videoId", index),
                )
            }
        }
    }

    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let count = videos.len();
    let outcome = store.transaction(|tx| {
        let Some(value) = tx.get(Collection::Courses, &course_id)? else {
            anyhow::bail!("course not found");
        };
        let course: CourseDoc = serde_json::from_value(value)?;
        // Video ids are the join key for progress and assignments; they must
        // stay unique within the course, ignoring the topic being replaced.
        for video in &videos {
            let clash = course
                .topics
                .iter()
                .filter(|(name, _)| name.as_str() != topic_name)
                .flat_map(|(_, vs)| vs)
                .any(|v| v.video_id == video.video_id);
            if clash {
                anyhow::bail!("video id already present in course: {}", video.video_id);
            }
        }
        tx.update_field(
            Collection::Courses,
            &course_id,
            &format!("topics.{}", topic_name),
            serde_json::to_value(&videos)?,
        )?;
        Ok(())
    });

    match outcome {
        Ok(()) => ok(
            &req.id,
            json!({ "courseId": course_id, "topicName": topic_name, "videoCount": count }),
        ),
        Err(e) => {
            let message = e.to_string();
            let code = if message.contains("not found") {
                "not_found"
            } else if message.contains("already present") {
                "already_exists"
            } else {
                "db_write_failed"
            };
            err(&req.id, code, message, None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.addTopic" => Some(handle_courses_add_topic(state, req)),
        "courses.addVideo" => Some(handle_courses_add_video(state, req)),
        "courses.uploadTopic" => Some(handle_courses_upload_topic(state, req)),
        _ => None,
    }
}
