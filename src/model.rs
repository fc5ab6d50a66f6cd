use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    /// Landing page key for post-sign-in routing. Admin wins over teacher,
    /// teacher over student.
    pub fn landing(self) -> &'static str {
        self.as_str()
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Student,
    Class,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Student => "student",
            TargetKind::Class => "class",
        }
    }
}

/// A content unit an assignment points at. Topic references expand against
/// the course structure at resolution time, not at assignment time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentRef {
    Video {
        id: String,
    },
    #[serde(rename_all = "camelCase")]
    Topic {
        course_id: String,
        topic_name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub email: String,
    pub role: Role,
    /// Class membership. Only meaningful for students; always null for
    /// admins and teachers.
    #[serde(default)]
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDoc {
    pub name: String,
    pub teacher_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub title: String,
    /// Database-local id; the join key for assignments and progress.
    pub video_id: String,
    /// External player reference when it differs from the database id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_ref: Option<String>,
}

impl Video {
    /// The id handed to the embedded playback widget.
    pub fn player_id(&self) -> &str {
        self.player_ref.as_deref().unwrap_or(&self.video_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDoc {
    pub title: String,
    pub teacher_id: String,
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<Video>>,
}

impl CourseDoc {
    pub fn topic_videos(&self, topic_name: &str) -> Option<&[Video]> {
        self.topics.get(topic_name).map(|v| v.as_slice())
    }

    pub fn all_videos(&self) -> impl Iterator<Item = &Video> {
        self.topics.values().flatten()
    }

    pub fn contains_video(&self, video_id: &str) -> bool {
        self.all_videos().any(|v| v.video_id == video_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDoc {
    pub content: ContentRef,
    pub assigned_to_type: TargetKind,
    pub assigned_to_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDoc {
    pub user_id: String,
    pub video_id: String,
    #[serde(default)]
    pub watch_time: u64,
    #[serde(default)]
    pub completion_percentage: u32,
    #[serde(default)]
    pub watch_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}
