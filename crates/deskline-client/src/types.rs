//! Wire types for the auth endpoints.

use serde::{Deserialize, Serialize};

use crate::credential::TokenPair;

/// `POST /auth/login` body.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// `POST /auth/login` response.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub tokens: AuthTokens,
}

/// Token pair as returned by the login and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl From<AuthTokens> for TokenPair {
    fn from(tokens: AuthTokens) -> Self {
        TokenPair {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.filter(|t| !t.is_empty()),
        }
    }
}

/// `POST /auth/refresh-tokens` body.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    #[serde(rename = "tenantID", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub refresh_token: String,
}

/// `POST /auth/logout` body.
#[derive(Debug, Clone, Serialize)]
pub struct LogoutRequest {
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    pub user: String,
}
