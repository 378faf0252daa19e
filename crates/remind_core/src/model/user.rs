use serde::Serialize;
use time::OffsetDateTime;

/// A registered chat participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    /// Chat id assigned by the messaging gateway.
    pub external_id: i64,
    pub points: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_notified: Option<OffsetDateTime>,
}
