use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use ulid::Ulid;

use crate::config::StaticTokenSettings;

pub const SCOPE_READ_APPOINTMENTS: &str = "read:appointments";
pub const SCOPE_WRITE_APPOINTMENTS: &str = "write:appointments";
pub const SCOPE_ADMIN_ALL: &str = "admin:all";

/// What the token-validation service says about a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub organization_id: Ulid,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenInfo {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn can_write(&self) -> bool {
        self.has_scope(SCOPE_WRITE_APPOINTMENTS) || self.has_scope(SCOPE_ADMIN_ALL)
    }

    pub fn can_read(&self) -> bool {
        self.has_scope(SCOPE_READ_APPOINTMENTS) || self.can_write()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid or expired token")]
    Invalid,
    #[error("token validation unavailable: {0}")]
    Upstream(String),
    #[error("bad token configuration: {0}")]
    Config(String),
}

/// Extract the credential from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Missing)?;
    let (scheme, token) = value.trim().split_once(' ').ok_or(AuthError::Missing)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::Missing);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::Missing);
    }
    Ok(token)
}

/// Hex SHA-256 of a token. Caches and static tables key on this, never on the
/// raw credential.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<TokenInfo, AuthError>;
}

/// Validated tokens with the instant they were validated.
pub struct TokenCache {
    entries: DashMap<String, (TokenInfo, Instant)>,
    ttl: Duration,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<TokenInfo> {
        let fresh = self
            .entries
            .get(key)
            .map(|e| (e.value().1.elapsed() < self.ttl).then(|| e.value().0.clone()));
        match fresh {
            Some(Some(info)) => Some(info),
            Some(None) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a fresh entry, dropping every expired one so tokens that are
    /// never presented again do not pile up.
    pub fn insert(&self, key: String, info: TokenInfo) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.retain(|_, (_, at)| at.elapsed() < self.ttl);
        self.entries.insert(key, (info, Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validates against the external token service: `POST url` with the same
/// bearer header, answered by `{organization_id, scopes, token_id}` or 401.
pub struct HttpTokenValidator {
    client: reqwest::Client,
    url: String,
    cache: TokenCache,
}

impl HttpTokenValidator {
    pub fn new(url: impl Into<String>, timeout: Duration, cache_ttl: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AuthError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            cache: TokenCache::new(cache_ttl),
        })
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }
}

#[async_trait]
impl TokenValidator for HttpTokenValidator {
    async fn validate(&self, token: &str) -> Result<TokenInfo, AuthError> {
        let key = hash_token(token);
        if let Some(info) = self.cache.get(&key) {
            return Ok(info);
        }

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::Invalid);
        }
        if !status.is_success() {
            tracing::warn!(%status, "token validation service returned an error");
            return Err(AuthError::Upstream(format!("validation service returned {status}")));
        }
        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("malformed validation response: {e}")))?;

        tracing::debug!(token_id = %info.token_id, organization_id = %info.organization_id, "token validated");
        self.cache.insert(key, info.clone());
        Ok(info)
    }
}

/// Fixed token table for self-hosted setups and tests.
pub struct StaticTokenValidator {
    tokens: HashMap<String, TokenInfo>,
}

impl StaticTokenValidator {
    /// Keys are hex SHA-256 digests of the tokens.
    pub fn new(tokens: HashMap<String, TokenInfo>) -> Self {
        Self { tokens }
    }

    pub fn from_settings(entries: &[StaticTokenSettings]) -> Result<Self, AuthError> {
        let mut tokens = HashMap::with_capacity(entries.len());
        for entry in entries {
            let organization_id = entry.organization_id.parse::<Ulid>().map_err(|e| {
                AuthError::Config(format!("token {}: bad organization_id: {e}", entry.token_id))
            })?;
            tokens.insert(
                entry.token_sha256.to_ascii_lowercase(),
                TokenInfo {
                    token_id: entry.token_id.clone(),
                    organization_id,
                    scopes: entry.scopes.clone(),
                },
            );
        }
        Ok(Self::new(tokens))
    }

    /// Table keyed by raw tokens, hashed on the way in.
    pub fn from_plain(entries: impl IntoIterator<Item = (String, TokenInfo)>) -> Self {
        Self::new(
            entries
                .into_iter()
                .map(|(token, info)| (hash_token(&token), info))
                .collect(),
        )
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<TokenInfo, AuthError> {
        self.tokens.get(&hash_token(token)).cloned().ok_or(AuthError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use httpmock::prelude::*;

    fn info(scopes: &[&str]) -> TokenInfo {
        TokenInfo {
            token_id: "tok_1".into(),
            organization_id: Ulid::new(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn scope_checks() {
        assert!(info(&[SCOPE_WRITE_APPOINTMENTS]).can_write());
        assert!(info(&[SCOPE_ADMIN_ALL]).can_write());
        assert!(info(&[SCOPE_ADMIN_ALL]).can_read());
        assert!(info(&[SCOPE_READ_APPOINTMENTS]).can_read());
        assert!(!info(&[SCOPE_READ_APPOINTMENTS]).can_write());
        assert!(!info(&["read:clients"]).can_read());
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AuthError::Missing)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer   abc123 "));
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert!(matches!(bearer_token(&headers), Err(AuthError::Missing)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(matches!(bearer_token(&headers), Err(AuthError::Missing)));
    }

    #[test]
    fn cache_expires_entries() {
        let cache = TokenCache::new(Duration::from_millis(20));
        cache.insert("k".into(), info(&[]));
        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());

        let disabled = TokenCache::new(Duration::ZERO);
        disabled.insert("k".into(), info(&[]));
        assert!(disabled.get("k").is_none());
    }

    #[test]
    fn cache_insert_prunes_tokens_never_seen_again() {
        let cache = TokenCache::new(Duration::from_millis(20));
        for i in 0..5 {
            cache.insert(format!("stale-{i}"), info(&[]));
        }
        assert_eq!(cache.len(), 5);
        std::thread::sleep(Duration::from_millis(40));
        cache.insert("fresh".into(), info(&[]));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("fresh").is_some());
    }

    #[tokio::test]
    async fn static_validator_matches_hashed_tokens() {
        let expected = info(&[SCOPE_WRITE_APPOINTMENTS]);
        let validator = StaticTokenValidator::from_plain([("s3cret".to_string(), expected.clone())]);
        assert_eq!(validator.validate("s3cret").await.unwrap(), expected);
        assert!(matches!(validator.validate("other").await, Err(AuthError::Invalid)));
    }

    #[test]
    fn static_settings_reject_bad_organization() {
        let entries = [StaticTokenSettings {
            token_sha256: hash_token("x"),
            token_id: "tok".into(),
            organization_id: "not-a-ulid".into(),
            scopes: vec![],
        }];
        assert!(matches!(
            StaticTokenValidator::from_settings(&entries),
            Err(AuthError::Config(_))
        ));
    }

    #[tokio::test]
    async fn http_validator_accepts_and_caches() {
        let server = MockServer::start_async().await;
        let org = Ulid::new();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/validate")
                    .header("authorization", "Bearer good-token");
                then.status(200).json_body(serde_json::json!({
                    "token_id": "tok_42",
                    "organization_id": org.to_string(),
                    "scopes": ["write:appointments"],
                }));
            })
            .await;

        let validator = HttpTokenValidator::new(
            server.url("/validate"),
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .unwrap();

        let first = validator.validate("good-token").await.unwrap();
        assert_eq!(first.organization_id, org);
        assert!(first.can_write());
        let second = validator.validate("good-token").await.unwrap();
        assert_eq!(first, second);
        mock.assert_hits_async(1).await;
        assert_eq!(validator.cache().len(), 1);
    }

    #[tokio::test]
    async fn http_validator_maps_401_to_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/validate");
                then.status(401).json_body(serde_json::json!({"error": "invalid token"}));
            })
            .await;
        let validator = HttpTokenValidator::new(
            server.url("/validate"),
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(matches!(validator.validate("bad").await, Err(AuthError::Invalid)));
        assert!(validator.cache().is_empty());
    }

    #[tokio::test]
    async fn http_validator_reports_upstream_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/validate");
                then.status(503);
            })
            .await;
        let validator = HttpTokenValidator::new(
            server.url("/validate"),
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(matches!(validator.validate("any").await, Err(AuthError::Upstream(_))));
    }
}
