//! Whoami command - show the signed-in user.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use console::{Style, style};
use deskline_client::Credential;
use serde::Serialize;

use super::{Context, require_session};

/// Arguments for the whoami command.
#[derive(Args, Debug)]
pub struct WhoamiArgs {}

#[derive(Debug, Serialize)]
struct WhoamiOutput {
    subject: String,
    tenant_id: String,
    role: String,
    expires_at: Option<DateTime<Utc>>,
    expired: bool,
}

/// Run the whoami command.
pub async fn run(_args: WhoamiArgs, ctx: &Context) -> Result<()> {
    let (client, session) = ctx.restored().await?;
    client.realtime().disconnect();
    require_session(&session)?;

    let credential = client
        .gateway()
        .token_store()
        .read()
        .await?
        .map(|pair| Credential::decode(&pair.access_token))
        .transpose()?;

    let output = WhoamiOutput {
        subject: session.subject().unwrap_or_default().to_string(),
        tenant_id: session.tenant_id().unwrap_or_default().to_string(),
        role: session.role().unwrap_or_default().to_string(),
        expires_at: credential
            .as_ref()
            .and_then(|c| DateTime::from_timestamp(c.claims().exp, 0)),
        expired: credential.as_ref().is_none_or(Credential::is_expired),
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Deskline Session").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!("  {} {}", dim.apply_to("User:  "), output.subject);
    println!("  {} {}", dim.apply_to("Tenant:"), output.tenant_id);
    println!("  {} {}", dim.apply_to("Role:  "), output.role);
    if let Some(expires_at) = output.expires_at {
        let status = if output.expired {
            Style::new().yellow().apply_to("expired, refreshes on next request")
        } else {
            Style::new().green().apply_to("valid")
        };
        println!(
            "  {} {} ({})",
            dim.apply_to("Token: "),
            expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            status
        );
    }
    println!();
    Ok(())
}
