//! Bearer tokens for the document store.
//!
//! The store accepts OAuth2 access tokens obtained through the JWT-bearer
//! grant: a service account signs an assertion with its RSA key, posts it to
//! the token endpoint and receives a short-lived access token.
//!
//! ```text
//! header  {"alg": "RS256", "typ": "JWT"}
//! claims  {"iss": client_email, "scope": .., "aud": token_uri,
//!          "iat": now, "exp": now + 3600}
//! POST token_uri  grant_type=urn:ietf:params:oauth:grant-type:jwt-bearer
//!                 &assertion=<jwt>
//! → {"access_token": "...", "expires_in": 3599}
//! ```
//!
//! [`ServiceAccountTokenManager`] caches the token for the lifetime of the
//! instance and regenerates it once it is within [`EXPIRY_SKEW_SECS`] of
//! expiring. There is no retry here; a rejected exchange surfaces as
//! [`IntakeError::Auth`].

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::{truncate_body, IntakeError, Result};

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// A token is only handed out while it has more than this many seconds left.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// Lifetime requested for each signed assertion.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Something that can produce a bearer token for store requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a currently valid bearer token.
    async fn token(&self) -> Result<String>;

    /// Drops any cached token so the next call re-authenticates.
    fn invalidate(&self) {}
}

/// A fixed token, used against the local store emulator and in tests.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// The fields of a service-account key file this crate uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    /// PEM-encoded RSA private key (PKCS#1 or PKCS#8).
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Load a JSON key file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IntakeError::InvalidConfig(format!(
                "Failed to read service account key {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            IntakeError::InvalidConfig(format!(
                "Failed to parse service account key {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// A bearer token and the instant it stops being accepted.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// `now + skew < expiry`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(EXPIRY_SKEW_SECS) < self.expires_at
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

/// Exchanges signed service-account assertions for access tokens.
pub struct ServiceAccountTokenManager {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    token_uri: String,
    client: reqwest::Client,
    cached: Mutex<Option<AuthToken>>,
}

impl ServiceAccountTokenManager {
    /// Create a manager for the given key.
    ///
    /// `token_uri` overrides the key file's endpoint (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError::Signing`] if the private key is not valid PEM.
    pub fn new(
        key: ServiceAccountKey,
        scope: Option<&str>,
        token_uri: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| IntakeError::Signing(format!("invalid RSA private key: {}", e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let token_uri = token_uri
            .map(str::to_string)
            .unwrap_or_else(|| key.token_uri.clone());

        Ok(Self {
            key,
            encoding_key,
            scope: scope.unwrap_or(DEFAULT_SCOPE).to_string(),
            token_uri,
            client,
            cached: Mutex::new(None),
        })
    }

    /// Build and sign the JWT assertion for `now`.
    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.token_uri,
            exp: iat + ASSERTION_LIFETIME_SECS,
            iat,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| IntakeError::Signing(e.to_string()))
    }

    async fn exchange(&self) -> Result<AuthToken> {
        let now = Utc::now();
        let assertion = self.sign_assertion(now)?;

        let resp = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "token exchange rejected");
            return Err(IntakeError::Auth {
                status: status.as_u16(),
                body: truncate_body(&body, 500),
            });
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| IntakeError::Decode(format!("token response: {}", e)))?;

        tracing::debug!(expires_in = parsed.expires_in, "obtained access token");
        Ok(AuthToken {
            token: parsed.access_token,
            expires_at: now + chrono::Duration::seconds(parsed.expires_in),
        })
    }

    fn cached_token(&self, now: DateTime<Utc>) -> Option<String> {
        let mut guard = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(t) if t.is_usable_at(now) => Some(t.token.clone()),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenManager {
    async fn token(&self) -> Result<String> {
        if let Some(token) = self.cached_token(Utc::now()) {
            return Ok(token);
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = Some(fresh);
        Ok(token)
    }

    fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn token_usable_only_outside_skew_window() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let token = AuthToken {
            token: "t".into(),
            expires_at: now + chrono::Duration::seconds(61),
        };
        assert!(token.is_usable_at(now));

        let token = AuthToken {
            token: "t".into(),
            expires_at: now + chrono::Duration::seconds(60),
        };
        assert!(!token.is_usable_at(now));
    }

    #[test]
    fn rejects_non_pem_private_key() {
        let key = ServiceAccountKey {
            client_email: "svc@example.iam".into(),
            private_key: "not a key".into(),
            token_uri: DEFAULT_TOKEN_URI.into(),
            project_id: None,
        };
        let err = ServiceAccountTokenManager::new(key, None, None, Duration::from_secs(5))
            .err()
            .expect("invalid key must be rejected");
        assert!(matches!(err, IntakeError::Signing(_)));
    }

    #[test]
    fn key_file_defaults_token_uri() {
        let key: ServiceAccountKey = serde_json::from_str(
            r#"{"client_email": "svc@example.iam", "private_key": "pem"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        assert!(key.project_id.is_none());
    }
}
