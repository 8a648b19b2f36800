//! Relationship collection: fetch strategies, coordination, delta
//! computation, and the job execution procedure.

pub mod delta;
pub mod orchestrator;
pub mod public;
pub mod scheduler;
pub mod session;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::relationship::{RelationKind, Relationship};

/// Normalized profile shape shared by every fetch source.
///
/// Source-specific field names (`pk`, `node.id`, ...) must not leak past
/// this boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: i64,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub is_private: bool,
}

/// One page of relationship edges from a source.
#[derive(Debug, Clone, Default)]
pub struct RelationPage {
    pub items: Vec<ProfileSummary>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Target '{0}' could not be resolved")]
    TargetNotFound(String),

    #[error("Unexpected response shape: {0}")]
    Malformed(String),

    /// The provider asked us to slow down; the session strategy has
    /// already served its cooldown by the time this surfaces.
    #[error("Upstream throttled the session")]
    UpstreamThrottled,

    #[error("No usable credential for the session identity")]
    AuthenticationUnavailable,

    #[error("Login rejected: {0}")]
    LoginFailed(String),
}

/// Capability contract shared by the public and authenticated strategies.
#[async_trait]
pub trait RelationSource: Send {
    /// Fetch one page of edges of `kind` for `target`, resuming from
    /// `cursor` when given.
    async fn fetch_page(
        &mut self,
        target: &str,
        kind: RelationKind,
        cursor: Option<&str>,
    ) -> Result<RelationPage, FetchError>;
}

/// Result of a coordinated fetch.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub items: Vec<ProfileSummary>,
    /// True when the provider signalled throttling along the way; the
    /// caller records a rate-limit violation with the governor.
    pub throttled: bool,
}

/// Tries the public strategy first and falls back to the authenticated
/// session strategy on failure, emptiness, or explicit request.
pub struct FetchCoordinator<P, S> {
    public: P,
    session: S,
}

impl<P: RelationSource, S: RelationSource> FetchCoordinator<P, S> {
    pub fn new(public: P, session: S) -> Self {
        Self { public, session }
    }

    /// Collect the full relationship list of `kind` for `target`.
    ///
    /// Failures degrade rather than propagate: a dead public endpoint, a
    /// missing credential, or an upstream cooldown each yield whatever was
    /// collected so far. An empty result is an empty list, not an error.
    pub async fn fetch(
        &mut self,
        target: &str,
        kind: RelationKind,
        prefer_authenticated: bool,
    ) -> FetchOutcome {
        let (public_items, public_err) = drain(&mut self.public, target, kind).await;

        if let Some(e) = &public_err {
            tracing::warn!(target = %target, kind = %kind, error = %e, "Public fetch ended early");
        }

        let public_throttled = matches!(public_err, Some(FetchError::UpstreamThrottled));
        if !public_items.is_empty() && !prefer_authenticated {
            return FetchOutcome {
                items: public_items,
                throttled: public_throttled,
            };
        }

        let (session_items, session_err) = drain(&mut self.session, target, kind).await;
        let mut throttled = public_throttled;
        match session_err {
            None => {}
            Some(FetchError::AuthenticationUnavailable) => {
                tracing::info!(target = %target, "No session credential; returning public results only");
            }
            Some(FetchError::UpstreamThrottled) => {
                tracing::warn!(target = %target, "Session fetch throttled by provider, aborted");
                throttled = true;
            }
            Some(e) => {
                tracing::warn!(target = %target, kind = %kind, error = %e, "Session fetch failed");
            }
        }

        let items = if session_items.is_empty() { public_items } else { session_items };
        FetchOutcome { items, throttled }
    }
}

/// Page through a source until exhaustion or the first error. Returns the
/// items collected plus the error that ended pagination, if any.
async fn drain<Src: RelationSource>(
    source: &mut Src,
    target: &str,
    kind: RelationKind,
) -> (Vec<ProfileSummary>, Option<FetchError>) {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        match source.fetch_page(target, kind, cursor.as_deref()).await {
            Ok(page) => {
                items.extend(page.items);
                if !page.has_more {
                    return (items, None);
                }
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => return (items, None),
                }
            }
            Err(e) => return (items, Some(e)),
        }
    }
}

/// Build relationship rows for one job from normalized profiles.
pub fn build_relationships(
    target_id: i64,
    job_id: i64,
    kind: RelationKind,
    profiles: &[ProfileSummary],
) -> Vec<Relationship> {
    let now = Utc::now();
    profiles
        .iter()
        .map(|p| Relationship {
            target_id,
            counterpart_id: p.id,
            job_id,
            relation_kind: kind,
            handle: p.handle.clone(),
            display_name: p.display_name.clone(),
            avatar_url: p.avatar_url.clone(),
            is_verified: p.is_verified,
            is_private: p.is_private,
            is_mutual: false,
            is_new: false,
            first_seen: now,
            last_seen: now,
        })
        .collect()
}

/// Set the mutual flag on every record whose counterpart appears under
/// both relation kinds within the same job's record set.
pub fn mark_mutuals(records: &mut [Relationship]) {
    let followers: HashSet<i64> = records
        .iter()
        .filter(|r| r.relation_kind == RelationKind::Follower)
        .map(|r| r.counterpart_id)
        .collect();
    let following: HashSet<i64> = records
        .iter()
        .filter(|r| r.relation_kind == RelationKind::Following)
        .map(|r| r.counterpart_id)
        .collect();

    for record in records.iter_mut() {
        record.is_mutual = followers.contains(&record.counterpart_id)
            && following.contains(&record.counterpart_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: i64) -> ProfileSummary {
        ProfileSummary {
            id,
            handle: format!("user_{id}"),
            display_name: None,
            avatar_url: None,
            is_verified: false,
            is_private: false,
        }
    }

    /// Source returning a scripted sequence of page results.
    struct ScriptedSource {
        pages: Vec<Result<RelationPage, FetchError>>,
        calls: usize,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<RelationPage, FetchError>>) -> Self {
            Self { pages, calls: 0 }
        }

        fn empty() -> Self {
            Self::new(vec![Ok(RelationPage::default())])
        }

        fn single(ids: &[i64]) -> Self {
            Self::new(vec![Ok(RelationPage {
                items: ids.iter().copied().map(profile).collect(),
                next_cursor: None,
                has_more: false,
            })])
        }

        fn failing(error: FetchError) -> Self {
            Self::new(vec![Err(error)])
        }
    }

    #[async_trait]
    impl RelationSource for ScriptedSource {
        async fn fetch_page(
            &mut self,
            _target: &str,
            _kind: RelationKind,
            _cursor: Option<&str>,
        ) -> Result<RelationPage, FetchError> {
            let index = self.calls.min(self.pages.len() - 1);
            self.calls += 1;
            std::mem::replace(&mut self.pages[index], Ok(RelationPage::default()))
        }
    }

    #[tokio::test]
    async fn test_public_result_used_when_nonempty() {
        let mut coordinator =
            FetchCoordinator::new(ScriptedSource::single(&[1, 2]), ScriptedSource::single(&[9]));

        let outcome = coordinator.fetch("acme", RelationKind::Follower, false).await;
        let ids: Vec<i64> = outcome.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(!outcome.throttled);
    }

    #[tokio::test]
    async fn test_falls_back_to_session_when_public_empty() {
        let mut coordinator =
            FetchCoordinator::new(ScriptedSource::empty(), ScriptedSource::single(&[9, 10]));

        let outcome = coordinator.fetch("acme", RelationKind::Follower, false).await;
        let ids: Vec<i64> = outcome.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![9, 10]);
    }

    #[tokio::test]
    async fn test_falls_back_to_session_when_public_errors() {
        let mut coordinator = FetchCoordinator::new(
            ScriptedSource::failing(FetchError::Malformed("bad json".into())),
            ScriptedSource::single(&[9]),
        );

        let outcome = coordinator.fetch("acme", RelationKind::Follower, false).await;
        assert_eq!(outcome.items.len(), 1);
    }

    #[tokio::test]
    async fn test_prefer_authenticated_overrides_public_result() {
        let mut coordinator =
            FetchCoordinator::new(ScriptedSource::single(&[1]), ScriptedSource::single(&[9]));

        let outcome = coordinator.fetch("acme", RelationKind::Follower, true).await;
        let ids: Vec<i64> = outcome.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![9]);
    }

    #[tokio::test]
    async fn test_missing_credential_returns_public_results() {
        let mut coordinator = FetchCoordinator::new(
            ScriptedSource::single(&[1, 2]),
            ScriptedSource::failing(FetchError::AuthenticationUnavailable),
        );

        let outcome = coordinator.fetch("acme", RelationKind::Follower, true).await;
        let ids: Vec<i64> = outcome.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(!outcome.throttled);
    }

    #[tokio::test]
    async fn test_session_throttle_keeps_partial_items_and_flags() {
        let mut coordinator = FetchCoordinator::new(
            ScriptedSource::empty(),
            ScriptedSource::new(vec![
                Ok(RelationPage {
                    items: vec![profile(5)],
                    next_cursor: Some("c1".into()),
                    has_more: true,
                }),
                Err(FetchError::UpstreamThrottled),
            ]),
        );

        let outcome = coordinator.fetch("acme", RelationKind::Follower, false).await;
        assert_eq!(outcome.items.len(), 1);
        assert!(outcome.throttled);
    }

    #[tokio::test]
    async fn test_pagination_follows_cursors() {
        let source = ScriptedSource::new(vec![
            Ok(RelationPage {
                items: vec![profile(1)],
                next_cursor: Some("c1".into()),
                has_more: true,
            }),
            Ok(RelationPage {
                items: vec![profile(2)],
                next_cursor: None,
                has_more: false,
            }),
        ]);
        let mut coordinator = FetchCoordinator::new(source, ScriptedSource::empty());

        let outcome = coordinator.fetch("acme", RelationKind::Follower, false).await;
        let ids: Vec<i64> = outcome.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_mutual_iff_present_under_both_kinds() {
        let mut records = build_relationships(1, 10, RelationKind::Follower, &[profile(1), profile(2)]);
        records.extend(build_relationships(
            1,
            10,
            RelationKind::Following,
            &[profile(2), profile(3)],
        ));

        mark_mutuals(&mut records);

        for record in &records {
            let expected = record.counterpart_id == 2;
            assert_eq!(record.is_mutual, expected, "counterpart {}", record.counterpart_id);
        }
    }

    #[test]
    fn test_mutuals_empty_set() {
        let mut records: Vec<Relationship> = Vec::new();
        mark_mutuals(&mut records);
        assert!(records.is_empty());
    }
}
