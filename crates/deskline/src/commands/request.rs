//! Request command - send an authenticated API request.

use anyhow::{Context as _, Result};
use clap::Args;
use deskline_client::Method;
use serde_json::Value;

use super::{Context, require_session};

/// Arguments for the request command.
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    #[arg(value_parser = parse_method)]
    pub method: Method,

    /// API path, relative to the server URL (e.g. leads/42)
    pub path: String,

    /// JSON request body
    #[arg(short, long)]
    pub data: Option<String>,
}

fn parse_method(s: &str) -> std::result::Result<Method, String> {
    Method::from_bytes(s.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid HTTP method '{}'", s))
}

/// Run the request command.
pub async fn run(args: RequestArgs, ctx: &Context) -> Result<()> {
    let body: Option<Value> = args
        .data
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--data is not valid JSON")?;

    let (client, session) = ctx.restored().await?;
    client.realtime().disconnect();
    require_session(&session)?;

    tracing::debug!(method = %args.method, path = %args.path, "sending request");
    let response: Value = client
        .request(args.method, &args.path, body.as_ref())
        .await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string(&response)?);
    } else if !response.is_null() {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}
