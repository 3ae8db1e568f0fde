//! Login command - exchange email and password for a session.

use anyhow::{Context as _, Result};
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the login command.
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Account email
    #[arg(short, long)]
    pub email: String,

    /// Password (prompted with hidden input when omitted)
    #[arg(short, long)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginOutput<'a> {
    subject: Option<&'a str>,
    tenant_id: Option<&'a str>,
    role: Option<&'a str>,
}

/// Run the login command.
pub async fn run(args: LoginArgs, ctx: &Context) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ").context("failed to read password")?,
    };

    let client = ctx.client()?;
    let session = client.login(&args.email, &password).await?;
    // A one-shot command has no use for the realtime socket.
    client.realtime().disconnect();

    if ctx.json_output {
        let output = LoginOutput {
            subject: session.subject(),
            tenant_id: session.tenant_id(),
            role: session.role(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let green = Style::new().green();
    let dim = Style::new().dim();
    println!(
        "{} Logged in as {}",
        green.apply_to("✓"),
        style(&args.email).bold()
    );
    if ctx.verbose {
        println!(
            "  {} {}",
            dim.apply_to("Tenant:"),
            session.tenant_id().unwrap_or("-")
        );
        println!("  {} {}", dim.apply_to("Role:"), session.role().unwrap_or("-"));
    }
    Ok(())
}
