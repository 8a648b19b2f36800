//! Follower delta between successive completed jobs.
//!
//! Only follower-kind records participate in delta accounting; the
//! following side is stored but not delta-tracked.

use std::collections::HashSet;

use sqlx::PgPool;

use crate::db::queries;
use crate::models::relationship::RelationKind;

/// New and lost follower ids relative to the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FollowerDelta {
    pub new_ids: HashSet<i64>,
    pub lost_ids: HashSet<i64>,
}

/// Set difference between the current follower-id set and the previous
/// one. With no previous snapshot every current follower is new.
pub fn diff_followers(
    current: &HashSet<i64>,
    previous: Option<&HashSet<i64>>,
) -> FollowerDelta {
    match previous {
        None => FollowerDelta {
            new_ids: current.clone(),
            lost_ids: HashSet::new(),
        },
        Some(previous) => FollowerDelta {
            new_ids: current.difference(previous).copied().collect(),
            lost_ids: previous.difference(current).copied().collect(),
        },
    }
}

/// Compute the delta for a job against the target's most recent prior
/// completed job, flag new followers in the snapshot, and write the
/// scalar counts onto the job row.
pub async fn compute_job_delta(
    pool: &PgPool,
    target_id: i64,
    job_id: i64,
) -> Result<FollowerDelta, sqlx::Error> {
    let current = queries::relation_ids_for_job(pool, job_id, RelationKind::Follower).await?;

    let previous = match queries::previous_completed_job_id(pool, target_id, job_id).await? {
        Some(previous_job_id) => {
            Some(queries::relation_ids_for_job(pool, previous_job_id, RelationKind::Follower).await?)
        }
        None => None,
    };

    let delta = diff_followers(&current, previous.as_ref());

    queries::mark_new_followers(pool, job_id, &delta.new_ids).await?;
    queries::set_job_delta_counts(
        pool,
        job_id,
        delta.new_ids.len() as i64,
        delta.lost_ids.len() as i64,
    )
    .await?;

    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[i64]) -> HashSet<i64> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_no_previous_snapshot_all_new() {
        let delta = diff_followers(&ids(&[1, 2, 3]), None);
        assert_eq!(delta.new_ids, ids(&[1, 2, 3]));
        assert!(delta.lost_ids.is_empty());
    }

    #[test]
    fn test_gain_and_loss() {
        let previous = ids(&[1, 2, 3]);
        let current = ids(&[2, 3, 4]);

        let delta = diff_followers(&current, Some(&previous));
        assert_eq!(delta.new_ids, ids(&[4]));
        assert_eq!(delta.lost_ids, ids(&[1]));
    }

    #[test]
    fn test_identical_snapshots_are_empty_delta() {
        let set = ids(&[1, 2, 3]);
        let delta = diff_followers(&set, Some(&set));
        assert!(delta.new_ids.is_empty());
        assert!(delta.lost_ids.is_empty());
    }

    #[test]
    fn test_empty_current_loses_everything() {
        let previous = ids(&[1, 2]);
        let delta = diff_followers(&HashSet::new(), Some(&previous));
        assert!(delta.new_ids.is_empty());
        assert_eq!(delta.lost_ids, ids(&[1, 2]));
    }
}
