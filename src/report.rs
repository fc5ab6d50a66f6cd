use crate::model::{CourseDoc, ProgressDoc, UserDoc};
use crate::resolver::{load_courses, load_learner_assignments, resolve_accessible_videos};
use crate::store::{Collection, Filter, Store};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

const MSG_TEACHER_NO_CLASSES: &str = "This teacher has no classes.";
const MSG_NO_STUDENTS_MATCHING: &str = "No students found matching criteria.";
const MSG_NO_ROSTER: &str = "You have no students assigned to your classes.";
const MSG_NO_PROGRESS: &str = "No progress recorded.";
const MSG_NO_COURSES: &str = "No courses are available in the system yet.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportLine {
    pub video_title: String,
    pub completion_percentage: u32,
    pub watch_count: u64,
    pub watch_time: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSection {
    pub student_id: String,
    pub email: String,
    pub lines: Vec<ReportLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A scoped progress report. `message` carries the explicit empty-state text
/// when the scope matched nothing; the UI never renders a blank table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub students: Vec<StudentSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// How a progress record whose videoId no longer resolves is rendered.
/// The global report keeps it under an explicit label so admins can see
/// orphaned progress; the teacher view drops it because only the teacher's
/// own content is relevant there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownVideoPolicy {
    Label,
    Drop,
}

pub fn video_title_map(courses: &[(String, CourseDoc)]) -> HashMap<String, String> {
    let mut titles = HashMap::new();
    for (_, course) in courses {
        for video in course.all_videos() {
            titles.insert(video.video_id.clone(), video.title.clone());
        }
    }
    titles
}

pub fn progress_lines(
    records: &[ProgressDoc],
    titles: &HashMap<String, String>,
    policy: UnknownVideoPolicy,
) -> Vec<ReportLine> {
    let mut lines: Vec<ReportLine> = records
        .iter()
        .filter_map(|record| {
            let title = match titles.get(&record.video_id) {
                Some(title) => title.clone(),
                None => match policy {
                    UnknownVideoPolicy::Label => format!("Unknown Video ({})", record.video_id),
                    UnknownVideoPolicy::Drop => return None,
                },
            };
            Some(ReportLine {
                video_title: title,
                completion_percentage: record.completion_percentage.min(100),
                watch_count: record.watch_count,
                watch_time: record.watch_time,
            })
        })
        .collect();
    lines.sort_by(|a, b| a.video_title.cmp(&b.video_title));
    lines
}

/// Global/admin report. The class filter takes precedence over the teacher
/// filter when both are supplied; a bare teacher filter expands to that
/// teacher's class ids.
pub fn global_report(
    store: &Store,
    teacher_id: Option<&str>,
    class_id: Option<&str>,
) -> anyhow::Result<ProgressReport> {
    let courses = load_courses(store, &[])?;
    let titles = video_title_map(&courses);

    let mut filters = vec![Filter::eq("role", "student")];
    if let Some(class_id) = class_id {
        filters.push(Filter::eq("classId", class_id));
    } else if let Some(teacher_id) = teacher_id {
        let class_ids = teacher_class_ids(store, teacher_id)?;
        if class_ids.is_empty() {
            return Ok(ProgressReport {
                students: Vec::new(),
                message: Some(MSG_TEACHER_NO_CLASSES.to_string()),
            });
        }
        filters.push(Filter::is_in(
            "classId",
            class_ids.into_iter().map(Value::from).collect(),
        ));
    }

    let students = load_users(store, &filters)?;
    if students.is_empty() {
        return Ok(ProgressReport {
            students: Vec::new(),
            message: Some(MSG_NO_STUDENTS_MATCHING.to_string()),
        });
    }

    build_sections(store, students, &titles, UnknownVideoPolicy::Label)
}

/// Teacher-scoped report: only the teacher's own courses resolve titles and
/// only students from the teacher's classes appear.
pub fn teacher_report(store: &Store, teacher_id: &str) -> anyhow::Result<ProgressReport> {
    let courses = load_courses(store, &[Filter::eq("teacherId", teacher_id)])?;
    let titles = video_title_map(&courses);

    let class_ids = teacher_class_ids(store, teacher_id)?;
    let students = if class_ids.is_empty() {
        Vec::new()
    } else {
        load_users(
            store,
            &[
                Filter::eq("role", "student"),
                Filter::is_in("classId", class_ids.into_iter().map(Value::from).collect()),
            ],
        )?
    };
    if students.is_empty() {
        return Ok(ProgressReport {
            students: Vec::new(),
            message: Some(MSG_NO_ROSTER.to_string()),
        });
    }

    build_sections(store, students, &titles, UnknownVideoPolicy::Drop)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRow {
    pub video_id: String,
    pub title: String,
    pub assigned: bool,
    pub completion_percentage: u32,
    pub watch_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicBlock {
    pub name: String,
    pub videos: Vec<VideoRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseBlock {
    pub course_id: String,
    pub title: String,
    pub topics: Vec<TopicBlock>,
}

/// The student dashboard join: the full course structure with each video
/// marked assigned or locked, carrying that student's own progress numbers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub courses: Vec<CourseBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn student_view(
    store: &Store,
    student_id: &str,
    class_id: Option<&str>,
) -> anyhow::Result<StudentView> {
    let courses = load_courses(store, &[])?;
    if courses.is_empty() {
        return Ok(StudentView {
            courses: Vec::new(),
            message: Some(MSG_NO_COURSES.to_string()),
        });
    }

    let assignments = load_learner_assignments(store, student_id, class_id)?;
    let allowed = resolve_accessible_videos(student_id, class_id, &assignments, &courses);

    let progress = load_progress(store, student_id)?;
    let by_video: HashMap<&str, &ProgressDoc> = progress
        .iter()
        .map(|record| (record.video_id.as_str(), record))
        .collect();

    let blocks = courses
        .iter()
        .map(|(course_id, course)| CourseBlock {
            course_id: course_id.clone(),
            title: course.title.clone(),
            topics: course
                .topics
                .iter()
                .map(|(name, videos)| TopicBlock {
                    name: name.clone(),
                    videos: videos
                        .iter()
                        .map(|video| {
                            let record = by_video.get(video.video_id.as_str());
                            VideoRow {
                                video_id: video.video_id.clone(),
                                title: video.title.clone(),
                                assigned: allowed.contains(&video.video_id),
                                completion_percentage: record
                                    .map(|r| r.completion_percentage.min(100))
                                    .unwrap_or(0),
                                watch_count: record.map(|r| r.watch_count).unwrap_or(0),
                            }
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    Ok(StudentView {
        courses: blocks,
        message: None,
    })
}

fn build_sections(
    store: &Store,
    students: Vec<(String, UserDoc)>,
    titles: &HashMap<String, String>,
    policy: UnknownVideoPolicy,
) -> anyhow::Result<ProgressReport> {
    let mut sections = Vec::with_capacity(students.len());
    for (student_id, user) in students {
        let records = load_progress(store, &student_id)?;
        let lines = progress_lines(&records, titles, policy);
        let note = lines.is_empty().then(|| MSG_NO_PROGRESS.to_string());
        sections.push(StudentSection {
            student_id,
            email: user.email,
            lines,
            note,
        });
    }
    sections.sort_by(|a, b| a.email.cmp(&b.email));
    Ok(ProgressReport {
        students: sections,
        message: None,
    })
}

fn teacher_class_ids(store: &Store, teacher_id: &str) -> anyhow::Result<Vec<String>> {
    let classes = store.query(Collection::Classes, &[Filter::eq("teacherId", teacher_id)])?;
    Ok(classes.into_iter().map(|(id, _)| id).collect())
}

fn load_users(store: &Store, filters: &[Filter]) -> anyhow::Result<Vec<(String, UserDoc)>> {
    let rows = store.query(Collection::Users, filters)?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, value)| {
            serde_json::from_value(value).ok().map(|doc| (id, doc))
        })
        .collect())
}

fn load_progress(store: &Store, student_id: &str) -> anyhow::Result<Vec<ProgressDoc>> {
    let rows = store.query(Collection::Progress, &[Filter::eq("userId", student_id)])?;
    Ok(rows
        .into_iter()
        .filter_map(|(_, value)| serde_json::from_value::<ProgressDoc>(value).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Video;
    use std::collections::BTreeMap;

    fn course_with(videos: &[(&str, &str)]) -> (String, CourseDoc) {
        let mut topics = BTreeMap::new();
        topics.insert(
            "Intro".to_string(),
            videos
                .iter()
                .map(|(id, title)| Video {
                    title: title.to_string(),
                    video_id: id.to_string(),
                    player_ref: None,
                })
                .collect::<Vec<_>>(),
        );
        (
            "crs".to_string(),
            CourseDoc {
                title: "Course".into(),
                teacher_id: "t1".into(),
                topics,
            },
        )
    }

    fn record(video_id: &str, pct: u32, count: u64, time: u64) -> ProgressDoc {
        ProgressDoc {
            user_id: "s1".into(),
            video_id: video_id.into(),
            watch_time: time,
            completion_percentage: pct,
            watch_count: count,
            updated_at: None,
        }
    }

    #[test]
    fn title_map_spans_all_topics() {
        let courses = vec![course_with(&[("v1", "Sets"), ("v2", "Maps")])];
        let titles = video_title_map(&courses);
        assert_eq!(titles.get("v1").map(String::as_str), Some("Sets"));
        assert_eq!(titles.get("v2").map(String::as_str), Some("Maps"));
    }

    #[test]
    fn unknown_videos_labelled_in_global_view() {
        let courses = vec![course_with(&[("v1", "Sets")])];
        let titles = video_title_map(&courses);
        let records = vec![record("v1", 50, 0, 30), record("deleted", 10, 0, 5)];

        let lines = progress_lines(&records, &titles, UnknownVideoPolicy::Label);
        assert_eq!(lines.len(), 2);
        assert!(lines
            .iter()
            .any(|l| l.video_title == "Unknown Video (deleted)"));
    }

    #[test]
    fn unknown_videos_dropped_in_teacher_view() {
        let courses = vec![course_with(&[("v1", "Sets")])];
        let titles = video_title_map(&courses);
        let records = vec![record("v1", 50, 0, 30), record("other-teachers", 10, 0, 5)];

        let lines = progress_lines(&records, &titles, UnknownVideoPolicy::Drop);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].video_title, "Sets");
    }

    #[test]
    fn stored_percentage_is_capped_at_display_time() {
        let courses = vec![course_with(&[("v1", "Sets")])];
        let titles = video_title_map(&courses);
        let records = vec![record("v1", 250, 1, 30)];

        let lines = progress_lines(&records, &titles, UnknownVideoPolicy::Label);
        assert_eq!(lines[0].completion_percentage, 100);
    }
}
