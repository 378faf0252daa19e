use super::Frequency;
use serde::{Serialize, Serializer};
use time::{OffsetDateTime, Time};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub frequency: Frequency,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Cached from the completion ledger; see `Store::rebuild_completion_cache`.
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_completed_at: Option<OffsetDateTime>,
    #[serde(serialize_with = "serialize_clock")]
    pub reminder_time: Option<Time>,
    pub points: i64,
}

/// Validated input for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub frequency: Frequency,
    pub reminder_time: Option<Time>,
    pub points: i64,
}

impl NewTask {
    pub fn new<T: Into<String>>(title: T, frequency: Frequency) -> Self {
        Self {
            title: title.into(),
            frequency,
            reminder_time: None,
            points: 0,
        }
    }

    pub fn with_reminder_time(mut self, at: Time) -> Self {
        self.reminder_time = Some(at);
        self
    }

    pub fn with_points(mut self, points: i64) -> Self {
        self.points = points;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEvent {
    pub id: i64,
    pub task_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

fn serialize_clock<S: Serializer>(value: &Option<Time>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(at) => serializer.collect_str(&format_args!("{:02}:{:02}", at.hour(), at.minute())),
        None => serializer.serialize_none(),
    }
}
