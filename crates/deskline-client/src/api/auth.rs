//! Auth API.

use reqwest::Method;

use crate::error::Result;
use crate::gateway::{Gateway, PendingRequest};
use crate::types::{LoginRequest, LoginResponse, LogoutRequest};

/// Auth endpoints.
///
/// Login is sent without credentials; logout goes through the normal
/// authenticated path.
pub struct AuthApi {
    gateway: Gateway,
}

impl AuthApi {
    pub(crate) fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Exchange email and password for a token pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.gateway
            .send_anonymous(Method::POST, "auth/login", Some(&body))
            .await
    }

    /// Tell the backend the user logged out.
    pub async fn logout(&self, tenant_id: &str, user: &str) -> Result<()> {
        let body = LogoutRequest {
            tenant_id: tenant_id.to_string(),
            user: user.to_string(),
        };
        let pending =
            PendingRequest::new(Method::POST, "auth/logout").with_body(serde_json::to_value(&body)?);
        self.gateway.execute(pending).await.map(|_| ())
    }
}
