use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked identity whose relationship graph is collected.
///
/// Created on first reference (scrape submission or credential storage),
/// updated with aggregate counts after each completed job, never deleted
/// implicitly.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Target {
    pub id: i64,
    /// Normalized lowercase handle, unique.
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub is_private: bool,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    /// Drives scheduler eligibility for daily scrapes.
    pub is_bookmarked: bool,
    /// AES-256-GCM encrypted session secret, base64-encoded.
    #[serde(skip_serializing)]
    pub encrypted_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_scraped: Option<DateTime<Utc>>,
}

/// Normalize a handle for storage and lookup.
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

/// Validate provider handle rules: 1-30 chars, letters/digits/periods/
/// underscores, no leading, trailing, or consecutive periods.
pub fn is_valid_handle(handle: &str) -> bool {
    if handle.is_empty() || handle.len() > 30 {
        return false;
    }
    if handle.starts_with('.') || handle.ends_with('.') || handle.contains("..") {
        return false;
    }
    handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("  @Acme_Co "), "acme_co");
        assert_eq!(normalize_handle("ACME"), "acme");
    }

    #[test]
    fn test_valid_handles() {
        assert!(is_valid_handle("acme"));
        assert!(is_valid_handle("acme.co_99"));
        assert!(is_valid_handle("a"));
    }

    #[test]
    fn test_invalid_handles() {
        assert!(!is_valid_handle(""));
        assert!(!is_valid_handle(&"a".repeat(31)));
        assert!(!is_valid_handle(".acme"));
        assert!(!is_valid_handle("acme."));
        assert!(!is_valid_handle("ac..me"));
        assert!(!is_valid_handle("ac me"));
        assert!(!is_valid_handle("ac-me"));
    }
}
