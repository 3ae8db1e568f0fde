//! CLI command handlers.

pub mod listen;
pub mod login;
pub mod logout;
pub mod request;
pub mod whoami;

use anyhow::{Context as _, Result};
use deskline_client::{DesklineClient, Session, file_token_store};
use deskline_config::DesklineConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Resolved configuration.
    pub config: DesklineConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Build a client backed by the configured token file.
    pub fn client(&self) -> Result<DesklineClient> {
        let api_url = self.config.api_url()?;
        let realtime_url = self.config.realtime_url()?;
        let token_file = self.config.token_file()?;

        let mut builder = DesklineClient::builder()
            .base_url(api_url.as_str())
            .realtime_url(realtime_url.as_str())
            .token_store(file_token_store(&token_file))
            .timeout(self.config.timeout())
            .max_backoff(self.config.max_backoff());
        if let Some(ref agent) = self.config.http.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        builder.build().context("failed to create client")
    }

    /// Build a client and restore the stored session.
    pub async fn restored(&self) -> Result<(DesklineClient, Session)> {
        let client = self.client()?;
        let session = client.restore().await;
        Ok((client, session))
    }
}

/// Error out unless a user is signed in.
pub fn require_session(session: &Session) -> Result<()> {
    if session.is_authenticated() {
        Ok(())
    } else {
        anyhow::bail!("Not logged in. Run 'deskline login' first.")
    }
}
