//! Logout command - end the session and clear stored credentials.

use anyhow::Result;
use clap::Args;
use console::Style;

use super::Context;

/// Arguments for the logout command.
#[derive(Args, Debug)]
pub struct LogoutArgs {}

/// Run the logout command.
pub async fn run(_args: LogoutArgs, ctx: &Context) -> Result<()> {
    let (client, session) = ctx.restored().await?;
    let was_authenticated = session.is_authenticated();

    client.logout().await;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "logged_out": was_authenticated }));
    } else if was_authenticated {
        println!("{} Logged out", Style::new().green().apply_to("✓"));
    } else {
        println!("Not logged in.");
    }
    Ok(())
}
