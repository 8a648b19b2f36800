use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a graph edge relative to the target.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RelationKind {
    Follower,
    Following,
}

/// One observed edge, keyed by (target, counterpart, job, kind).
///
/// The same counterpart may appear across jobs (history) and, within one
/// job, under both kinds; the kind is part of the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub target_id: i64,
    pub counterpart_id: i64,
    pub job_id: i64,
    pub relation_kind: RelationKind,

    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub is_private: bool,

    /// True iff the counterpart appears under both kinds in the same job.
    pub is_mutual: bool,
    /// Set by the delta engine when this follower was absent from the
    /// previous completed job.
    pub is_new: bool,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
