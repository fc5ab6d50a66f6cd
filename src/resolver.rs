use crate::model::{AssignmentDoc, ContentRef, CourseDoc, TargetKind};
use crate::store::{Collection, Filter, Store};
use std::collections::BTreeSet;

/// Computes the set of video ids a learner may currently access.
///
/// Pure function of its inputs: assignments are filtered to the learner (or
/// the learner's class), video refs contribute their single id, and topic
/// refs expand against the course structure as it exists at call time. A
/// topic ref whose course or topic no longer exists contributes nothing:
/// missing content resolves to "not accessible", never an error.
pub fn resolve_accessible_videos(
    learner_id: &str,
    learner_class_id: Option<&str>,
    assignments: &[AssignmentDoc],
    courses: &[(String, CourseDoc)],
) -> BTreeSet<String> {
    let mut allowed = BTreeSet::new();

    for assignment in assignments {
        let applies = match assignment.assigned_to_type {
            TargetKind::Student => assignment.assigned_to_id == learner_id,
            TargetKind::Class => {
                learner_class_id.is_some_and(|cid| assignment.assigned_to_id == cid)
            }
        };
        if !applies {
            continue;
        }

        match &assignment.content {
            ContentRef::Video { id } => {
                allowed.insert(id.clone());
            }
            ContentRef::Topic {
                course_id,
                topic_name,
            } => {
                let topic = courses
                    .iter()
                    .find(|(id, _)| id == course_id)
                    .and_then(|(_, course)| course.topic_videos(topic_name));
                if let Some(videos) = topic {
                    allowed.extend(videos.iter().map(|v| v.video_id.clone()));
                }
            }
        }
    }

    allowed
}

/// Loads the assignments that could apply to a learner: direct student
/// assignments plus assignments to the learner's class, when they have one.
pub fn load_learner_assignments(
    store: &Store,
    learner_id: &str,
    class_id: Option<&str>,
) -> anyhow::Result<Vec<AssignmentDoc>> {
    let mut rows = store.query(
        Collection::Assignments,
        &[
            Filter::eq("assignedToType", "student"),
            Filter::eq("assignedToId", learner_id),
        ],
    )?;
    if let Some(class_id) = class_id {
        rows.extend(store.query(
            Collection::Assignments,
            &[
                Filter::eq("assignedToType", "class"),
                Filter::eq("assignedToId", class_id),
            ],
        )?);
    }
    Ok(rows
        .into_iter()
        .filter_map(|(_, value)| serde_json::from_value(value).ok())
        .collect())
}

/// Typed course loader. A document that fails to parse is skipped; the
/// access model degrades to "not accessible" rather than erroring.
pub fn load_courses(
    store: &Store,
    filters: &[Filter],
) -> anyhow::Result<Vec<(String, CourseDoc)>> {
    let rows = store.query(Collection::Courses, filters)?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, value)| serde_json::from_value(value).ok().map(|doc| (id, doc)))
        .collect())
}
