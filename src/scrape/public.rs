//! Unauthenticated fetch strategy over the provider's public GraphQL
//! endpoint.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::{FetchError, ProfileSummary, RelationPage, RelationSource};
use crate::models::relationship::RelationKind;

const BASE_URL: &str = "https://www.instagram.com";
const GRAPHQL_URL: &str = "https://www.instagram.com/graphql/query/";
/// Provider query hashes for the two edge collections.
const FOLLOWERS_HASH: &str = "5aefa9893005572d237da5068082d8d5";
const FOLLOWING_HASH: &str = "6df9f20c4ad9b22fb7b35b816f0c426e";
const PAGE_SIZE: u32 = 100;

/// Public paginated strategy: resolves a handle to the provider's numeric
/// id once, then walks cursor pages. Any fetch error ends pagination and
/// is treated as exhaustion by the coordinator, not as a job failure.
pub struct PublicGraphSource {
    http: reqwest::Client,
    profile_id_pattern: Regex,
    resolved_id: Option<String>,
}

impl PublicGraphSource {
    pub fn new() -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
            )
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        // The numeric profile id is embedded in the page markup.
        let profile_id_pattern =
            Regex::new(r#""profilePage_([0-9]+)""#).expect("valid pattern");

        Ok(Self {
            http,
            profile_id_pattern,
            resolved_id: None,
        })
    }

    /// Resolve and cache the numeric id behind a handle.
    async fn resolve_id(&mut self, handle: &str) -> Result<String, FetchError> {
        if let Some(id) = &self.resolved_id {
            return Ok(id.clone());
        }

        let response = self.http.get(format!("{BASE_URL}/{handle}/")).send().await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::UpstreamThrottled);
        }
        if !response.status().is_success() {
            return Err(FetchError::TargetNotFound(handle.to_string()));
        }

        let body = response.text().await?;
        let id = self
            .profile_id_pattern
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| FetchError::TargetNotFound(handle.to_string()))?;

        self.resolved_id = Some(id.clone());
        Ok(id)
    }

    fn edge_key(kind: RelationKind) -> &'static str {
        match kind {
            RelationKind::Follower => "edge_followed_by",
            RelationKind::Following => "edge_follow",
        }
    }

    fn query_hash(kind: RelationKind) -> &'static str {
        match kind {
            RelationKind::Follower => FOLLOWERS_HASH,
            RelationKind::Following => FOLLOWING_HASH,
        }
    }
}

/// Map one GraphQL edge node into the normalized profile shape.
fn parse_node(node: &Value) -> Option<ProfileSummary> {
    let id = node.get("id")?.as_str()?.parse::<i64>().ok()?;
    let handle = node.get("username")?.as_str()?.to_string();

    Some(ProfileSummary {
        id,
        handle,
        display_name: node
            .get("full_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        avatar_url: node
            .get("profile_pic_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        is_verified: node.get("is_verified").and_then(Value::as_bool).unwrap_or(false),
        is_private: node.get("is_private").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Parse one GraphQL edge-collection page.
fn parse_page(body: &Value, edge_key: &str) -> Result<RelationPage, FetchError> {
    let collection = body
        .get("data")
        .and_then(|d| d.get("user"))
        .and_then(|u| u.get(edge_key))
        .ok_or_else(|| FetchError::Malformed(format!("missing {edge_key} collection")))?;

    let edges = collection
        .get("edges")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("missing edges array".into()))?;

    let items = edges
        .iter()
        .filter_map(|edge| edge.get("node").and_then(parse_node))
        .collect();

    let page_info = collection.get("page_info");
    let has_more = page_info
        .and_then(|p| p.get("has_next_page"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let next_cursor = page_info
        .and_then(|p| p.get("end_cursor"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(RelationPage {
        items,
        next_cursor,
        has_more,
    })
}

#[async_trait]
impl RelationSource for PublicGraphSource {
    async fn fetch_page(
        &mut self,
        target: &str,
        kind: RelationKind,
        cursor: Option<&str>,
    ) -> Result<RelationPage, FetchError> {
        let user_id = self.resolve_id(target).await?;

        let variables = serde_json::json!({
            "id": user_id,
            "first": PAGE_SIZE,
            "after": cursor,
        });

        let response = self
            .http
            .get(GRAPHQL_URL)
            .query(&[
                ("query_hash", Self::query_hash(kind)),
                ("variables", &variables.to_string()),
            ])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::UpstreamThrottled);
        }
        if !response.status().is_success() {
            return Err(FetchError::Malformed(format!(
                "provider returned HTTP {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        parse_page(&body, Self::edge_key(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_json(edge_key: &str) -> Value {
        serde_json::json!({
            "data": { "user": { edge_key: {
                "edges": [
                    { "node": {
                        "id": "12345",
                        "username": "counterpart_one",
                        "full_name": "Counterpart One",
                        "profile_pic_url": "https://cdn.example/1.jpg",
                        "is_verified": true,
                        "is_private": false
                    }},
                    { "node": {
                        "id": "67890",
                        "username": "counterpart_two",
                        "full_name": "",
                        "is_verified": false,
                        "is_private": true
                    }}
                ],
                "page_info": { "has_next_page": true, "end_cursor": "abc123" }
            }}}
        })
    }

    #[test]
    fn test_parse_follower_page() {
        let page = parse_page(&page_json("edge_followed_by"), "edge_followed_by").unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, 12345);
        assert_eq!(page.items[0].handle, "counterpart_one");
        assert_eq!(page.items[0].display_name.as_deref(), Some("Counterpart One"));
        assert!(page.items[0].is_verified);
        // Empty display names normalize to None.
        assert_eq!(page.items[1].display_name, None);
        assert!(page.items[1].is_private);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_last_page() {
        let body = serde_json::json!({
            "data": { "user": { "edge_follow": {
                "edges": [],
                "page_info": { "has_next_page": false, "end_cursor": null }
            }}}
        });

        let page = parse_page(&body, "edge_follow").unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn test_parse_rejects_missing_collection() {
        let body = serde_json::json!({ "data": { "user": {} } });
        assert!(matches!(
            parse_page(&body, "edge_followed_by"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn test_nodes_without_numeric_id_are_skipped() {
        let body = serde_json::json!({
            "data": { "user": { "edge_followed_by": {
                "edges": [ { "node": { "id": "not-a-number", "username": "x" } } ],
                "page_info": { "has_next_page": false, "end_cursor": null }
            }}}
        });

        let page = parse_page(&body, "edge_followed_by").unwrap();
        assert!(page.items.is_empty());
    }
}
