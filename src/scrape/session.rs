//! Authenticated fetch strategy over the provider's private interface.
//!
//! Requires a stored credential; logs in lazily, once per coordinator
//! lifetime. On a "please wait" signal it serves a fixed cooldown and
//! abandons the remainder of the fetch instead of retrying indefinitely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{FetchError, ProfileSummary, RelationPage, RelationSource};
use crate::models::relationship::RelationKind;

const BASE_URL: &str = "https://www.instagram.com";
const APP_ID_HEADER: (&str, &str) = ("x-ig-app-id", "936619743392459");
/// Cooldown served after an upstream "please wait" signal.
const COOLDOWN_SECONDS: u64 = 60;
const PAGE_SIZE: u32 = 100;

pub struct SessionGraphSource {
    http: reqwest::Client,
    cookies: Arc<reqwest::cookie::Jar>,
    /// Decrypted (handle, secret) pair, if any credential is stored.
    credential: Option<(String, String)>,
    logged_in: bool,
    resolved_id: Option<String>,
}

impl SessionGraphSource {
    pub fn new(credential: Option<(String, String)>) -> Result<Self, FetchError> {
        let cookies = Arc::new(reqwest::cookie::Jar::default());
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .cookie_provider(cookies.clone())
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            cookies,
            credential,
            logged_in: false,
            resolved_id: None,
        })
    }

    fn csrf_token(&self) -> Option<String> {
        use reqwest::cookie::CookieStore;

        let url = BASE_URL.parse().ok()?;
        let header = self.cookies.cookies(&url)?;
        let raw = header.to_str().ok()?;
        raw.split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == "csrftoken")
            .map(|(_, value)| value.to_string())
    }

    /// Interactive login, performed once. Missing credential means the
    /// strategy is unavailable, not that the job failed.
    async fn ensure_login(&mut self) -> Result<(), FetchError> {
        if self.logged_in {
            return Ok(());
        }
        let Some((handle, secret)) = self.credential.clone() else {
            return Err(FetchError::AuthenticationUnavailable);
        };

        // Prime the cookie jar for the csrf token.
        self.http.get(BASE_URL).send().await?;
        let csrf = self.csrf_token().unwrap_or_default();

        let response = self
            .http
            .post(format!("{BASE_URL}/api/v1/web/accounts/login/ajax/"))
            .header("x-csrftoken", csrf)
            .header(APP_ID_HEADER.0, APP_ID_HEADER.1)
            .form(&[
                ("username", handle.as_str()),
                ("enc_password", &format!("#PWD_INSTAGRAM_BROWSER:0:0:{secret}")),
            ])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tokio::time::sleep(Duration::from_secs(COOLDOWN_SECONDS)).await;
            return Err(FetchError::UpstreamThrottled);
        }

        let body: Value = response.json().await?;
        if body.get("authenticated").and_then(Value::as_bool) != Some(true) {
            return Err(FetchError::LoginFailed(format!(
                "provider did not authenticate session for '{handle}'"
            )));
        }

        self.logged_in = true;
        Ok(())
    }

    async fn resolve_id(&mut self, handle: &str) -> Result<String, FetchError> {
        if let Some(id) = &self.resolved_id {
            return Ok(id.clone());
        }

        let response = self
            .http
            .get(format!("{BASE_URL}/api/v1/users/web_profile_info/"))
            .header(APP_ID_HEADER.0, APP_ID_HEADER.1)
            .query(&[("username", handle)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::TargetNotFound(handle.to_string()));
        }

        let body: Value = response.json().await?;
        let id = body
            .get("data")
            .and_then(|d| d.get("user"))
            .and_then(|u| u.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| FetchError::TargetNotFound(handle.to_string()))?;

        self.resolved_id = Some(id.clone());
        Ok(id)
    }

    fn endpoint(kind: RelationKind) -> &'static str {
        match kind {
            RelationKind::Follower => "followers",
            RelationKind::Following => "following",
        }
    }
}

/// True when the private API asked the session to slow down.
fn is_throttle_signal(body: &Value) -> bool {
    body.get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| m.contains("please_wait") || m.contains("wait a few minutes"))
}

/// Map one private-API user object into the normalized profile shape.
/// The private interface names the id `pk` and may send it as a number or
/// a string.
fn parse_user(user: &Value) -> Option<ProfileSummary> {
    let pk = user.get("pk")?;
    let id = pk
        .as_i64()
        .or_else(|| pk.as_str().and_then(|s| s.parse::<i64>().ok()))?;
    let handle = user.get("username")?.as_str()?.to_string();

    Some(ProfileSummary {
        id,
        handle,
        display_name: user
            .get("full_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        avatar_url: user
            .get("profile_pic_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        is_verified: user.get("is_verified").and_then(Value::as_bool).unwrap_or(false),
        is_private: user.get("is_private").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_friendship_page(body: &Value) -> Result<RelationPage, FetchError> {
    let users = body
        .get("users")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("missing users array".into()))?;

    let items = users.iter().filter_map(parse_user).collect();
    let next_cursor = body
        .get("next_max_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(RelationPage {
        has_more: next_cursor.is_some(),
        items,
        next_cursor,
    })
}

#[async_trait]
impl RelationSource for SessionGraphSource {
    async fn fetch_page(
        &mut self,
        target: &str,
        kind: RelationKind,
        cursor: Option<&str>,
    ) -> Result<RelationPage, FetchError> {
        self.ensure_login().await?;
        let user_id = self.resolve_id(target).await?;

        let mut request = self
            .http
            .get(format!(
                "{BASE_URL}/api/v1/friendships/{user_id}/{}/",
                Self::endpoint(kind)
            ))
            .header(APP_ID_HEADER.0, APP_ID_HEADER.1)
            .query(&[("count", PAGE_SIZE.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("max_id", cursor)]);
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tokio::time::sleep(Duration::from_secs(COOLDOWN_SECONDS)).await;
            return Err(FetchError::UpstreamThrottled);
        }

        let body: Value = response.json().await?;
        if is_throttle_signal(&body) {
            tokio::time::sleep(Duration::from_secs(COOLDOWN_SECONDS)).await;
            return Err(FetchError::UpstreamThrottled);
        }

        parse_friendship_page(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_credential_is_unavailable() {
        let mut source = SessionGraphSource::new(None).unwrap();
        let result = source
            .fetch_page("acme", RelationKind::Follower, None)
            .await;
        assert!(matches!(result, Err(FetchError::AuthenticationUnavailable)));
    }

    #[test]
    fn test_parse_friendship_page() {
        let body = serde_json::json!({
            "users": [
                { "pk": 12345, "username": "counterpart_one", "full_name": "Counterpart One",
                  "profile_pic_url": "https://cdn.example/1.jpg", "is_verified": false, "is_private": true },
                { "pk": "67890", "username": "counterpart_two", "full_name": "" }
            ],
            "next_max_id": "100",
            "status": "ok"
        });

        let page = parse_friendship_page(&body).unwrap();
        assert_eq!(page.items.len(), 2);
        // Numeric and string pk forms normalize to the same id field.
        assert_eq!(page.items[0].id, 12345);
        assert_eq!(page.items[1].id, 67890);
        assert_eq!(page.items[1].display_name, None);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("100"));
    }

    #[test]
    fn test_parse_final_page_has_no_cursor() {
        let body = serde_json::json!({ "users": [], "status": "ok" });
        let page = parse_friendship_page(&body).unwrap();
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn test_throttle_signal_detection() {
        let throttled = serde_json::json!({ "message": "please_wait_few_minutes" });
        assert!(is_throttle_signal(&throttled));

        let ok = serde_json::json!({ "status": "ok", "users": [] });
        assert!(!is_throttle_signal(&ok));
    }
}
