//! Client-side view of a login token.
//!
//! The payload segment of a JWT is decoded *without* verifying the signature.
//! Nothing here is a security boundary: the claims only decide what the UI
//! shows (admin console, logged-in state) and when to drop a stale session.
//! The backend still verifies every request it receives.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed token: expected 3 segments, got {0}")] Segments(usize),
    #[error("payload is not base64url: {0}")] Base64(String),
    #[error("payload is not a JSON object: {0}")] Json(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub fn decode_claims(token: &str) -> Result<TokenClaims, SessionError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(SessionError::Segments(segments.len()));
    }
    let payload = segments[1].trim_end_matches('=');
    let raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| SessionError::Base64(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| SessionError::Json(e.to_string()))
}

#[derive(Clone, Debug)]
pub struct Session {
    pub token: String,
    pub claims: TokenClaims,
}

impl Session {
    pub fn from_token<S: Into<String>>(token: S) -> Result<Self, SessionError> {
        let token = token.into();
        let claims = decode_claims(&token)?;
        Ok(Self { token, claims })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims
            .exp
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Tokens without `exp` never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(at) => now >= at,
            None => false,
        }
    }

    /// Time left before expiry; `None` for tokens without `exp`, zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let at = self.expires_at()?;
        Some((at - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.claims
            .role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(role))
    }

    /// Resolves once the token has expired. Pending forever for tokens without `exp`.
    pub async fn expired(&self) {
        match self.remaining_at(Utc::now()) {
            Some(left) => tokio::time::sleep(left).await,
            None => std::future::pending::<()>().await,
        }
    }
}
