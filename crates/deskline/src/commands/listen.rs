//! Listen command - print realtime events until interrupted.

use anyhow::Result;
use clap::Args;
use console::Style;
use deskline_client::{Subscription, events};
use serde_json::Value;

use super::{Context, require_session};

/// Arguments for the listen command.
#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Event to print (repeatable; default: notification, messageNotification)
    #[arg(short, long = "event")]
    pub events: Vec<String>,
}

/// Run the listen command.
pub async fn run(args: ListenArgs, ctx: &Context) -> Result<()> {
    let (client, session) = ctx.restored().await?;
    require_session(&session)?;

    let names = if args.events.is_empty() {
        vec![
            events::NOTIFICATION.to_string(),
            events::MESSAGE_NOTIFICATION.to_string(),
        ]
    } else {
        args.events
    };

    let realtime = client.realtime();
    let json_output = ctx.json_output;
    let mut subscriptions: Vec<Subscription> = names
        .iter()
        .map(|name| {
            let event = name.clone();
            realtime.subscribe(name, move |data| print_event(&event, data, json_output))
        })
        .collect();

    if !json_output {
        let dim = Style::new().dim();
        subscriptions.push(realtime.subscribe(events::CONNECT, move |_| {
            eprintln!("{}", dim.apply_to("connected"));
        }));
        let yellow = Style::new().yellow();
        subscriptions.push(realtime.subscribe(events::DISCONNECT, move |data| {
            let reason = data["reason"].as_str().unwrap_or("unknown");
            eprintln!("{} {}", yellow.apply_to("disconnected:"), reason);
        }));
    }
    subscriptions.push(realtime.subscribe(events::ERROR, |data| {
        tracing::warn!(error = %data, "realtime error");
    }));

    eprintln!(
        "Listening for {} as {} (Ctrl-C to stop)",
        names.join(", "),
        session.subject().unwrap_or("-")
    );

    let mut session_changes = client.session().watch();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = session_changes.changed() => {
                if changed.is_err() || !session_changes.borrow_and_update().is_authenticated() {
                    eprintln!("Session ended. Run 'deskline login' to sign in again.");
                    break;
                }
            }
        }
    }

    drop(subscriptions);
    realtime.disconnect();
    Ok(())
}

fn print_event(event: &str, data: &Value, json_output: bool) {
    if json_output {
        println!("{}", serde_json::json!({ "event": event, "data": data }));
    } else {
        let cyan = Style::new().cyan();
        println!(
            "{} {} {}",
            chrono::Local::now().format("%H:%M:%S"),
            cyan.apply_to(event),
            data
        );
    }
}
