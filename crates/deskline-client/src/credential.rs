//! Bearer credentials and their decoded claims.
//!
//! Tokens are JWTs issued by the backend. The client only reads the
//! payload segment to learn who it is and when the token expires; signature
//! verification is the backend's job.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Seconds before `exp` at which a token is already treated as expired.
pub const EXPIRY_LEEWAY_SECS: i64 = 5;

/// Claims carried by access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user) identifier.
    #[serde(deserialize_with = "string_or_number")]
    pub sub: String,
    /// Tenant the user belongs to.
    #[serde(rename = "tenantID", deserialize_with = "string_or_number")]
    pub tenant_id: String,
    /// Role name.
    #[serde(default)]
    pub role: String,
    /// Issued-at, seconds since the epoch.
    #[serde(default)]
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// A bearer token together with its decoded claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    claims: Claims,
}

impl Credential {
    /// Decode a JWT without verifying its signature.
    pub fn decode(token: &str) -> Result<Self> {
        let mut parts = token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => {
                return Err(Error::InvalidCredential(
                    "expected three dot-separated segments".to_string(),
                ));
            }
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| Error::InvalidCredential(format!("payload is not base64url: {}", e)))?;
        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidCredential(format!("malformed claims: {}", e)))?;

        Ok(Self {
            token: token.to_string(),
            claims,
        })
    }

    /// The raw bearer token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The decoded claims.
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Subject identifier.
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    /// Tenant identifier.
    pub fn tenant_id(&self) -> &str {
        &self.claims.tenant_id
    }

    /// Whether the token is expired at `now` (seconds since the epoch).
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.claims.exp.saturating_sub(EXPIRY_LEEWAY_SECS)
    }

    /// Whether the token is expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    /// Seconds until expiry, zero once expired.
    pub fn expires_in_secs(&self) -> u64 {
        let remaining = self.claims.exp - chrono::Utc::now().timestamp();
        remaining.max(0) as u64
    }
}

/// The token strings persisted by a [`TokenStore`](crate::TokenStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Primary bearer credential.
    pub access_token: String,
    /// Material for the refresh endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    /// Create a pair with both tokens.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
