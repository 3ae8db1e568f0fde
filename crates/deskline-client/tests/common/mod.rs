//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use deskline_client::{MemoryTokenStore, TokenPair};

pub const SUBJECT: &str = "user-1";
pub const TENANT: &str = "tenant-1";

/// Nothing listens here; realtime connections just keep backing off.
pub const UNREACHABLE_WS: &str = "ws://127.0.0.1:9/ws";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Build an unsigned JWT for `sub` expiring at `exp`.
pub fn mint(sub: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "sub": sub,
        "tenantID": TENANT,
        "role": "agent",
        "iat": exp - 3600,
        "exp": exp,
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig-{}", header, payload, exp)
}

/// A token valid for the next hour. `salt` keeps tokens minted in the same
/// second distinct.
pub fn valid_token(salt: i64) -> String {
    mint(SUBJECT, now() + 3600 + salt)
}

/// A token that expired a minute ago.
pub fn expired_token() -> String {
    mint(SUBJECT, now() - 60)
}

pub fn store_with(access: String, refresh: Option<&str>) -> Arc<MemoryTokenStore> {
    Arc::new(MemoryTokenStore::with_tokens(TokenPair {
        access_token: access,
        refresh_token: refresh.map(str::to_string),
    }))
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
