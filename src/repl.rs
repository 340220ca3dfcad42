//! Interactive terminal front end.
//!
//! Plain lines are sent as queries (or as the answer to a pending
//! clarification). Slash commands manage clients, sessions and preferences.

use crate::api::ws;
use crate::commands::chat::SubmitOutcome;
use crate::commands::portfolio::{self, PortfolioSummary};
use crate::commands::session::SessionState;
use crate::commands::{settings, ChatError, ValidationError};
use crate::db::models::{Message, Preferences, Role, Theme};
use crate::state::AppState;
use futures::FutureExt;
use std::future::Future;
use std::io::Write;
use std::panic::AssertUnwindSafe;

/// REPL commands recognised in the input loop.
#[derive(Debug, PartialEq)]
pub enum ReplCommand {
    Exit,
    Help,
    Clients,
    Client(String),
    Portfolio,
    History,
    Clear,
    Health,
    Set { key: String, value: String },
    Message(String),
    Unknown(String),
}

pub fn parse_repl_input(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return ReplCommand::Message(trimmed.to_string());
    };
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    match (name, args.as_slice()) {
        ("exit" | "quit", _) => ReplCommand::Exit,
        ("help", _) => ReplCommand::Help,
        ("clients", _) => ReplCommand::Clients,
        ("client", [id]) => ReplCommand::Client(id.to_ascii_uppercase()),
        ("portfolio", _) => ReplCommand::Portfolio,
        ("history", _) => ReplCommand::History,
        ("clear" | "new", _) => ReplCommand::Clear,
        ("health", _) => ReplCommand::Health,
        ("set", [key, value @ ..]) if !value.is_empty() => ReplCommand::Set {
            key: key.to_string(),
            value: value.join(" "),
        },
        _ => ReplCommand::Unknown(trimmed.to_string()),
    }
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  /clients            list clients");
    eprintln!("  /client <id>        switch to a client (e.g. /client CLT-001)");
    eprintln!("  /portfolio          show the selected client's holdings");
    eprintln!("  /history            show the conversation");
    eprintln!("  /clear              forget this conversation (also /new)");
    eprintln!("  /health             check the API");
    eprintln!("  /set <key> <value>  theme light|dark, sidebar_collapsed, show_agent_activity");
    eprintln!("  /exit or /quit      quit (or press Ctrl+D)");
}

/// Transient notification for a failed action.
fn notify(err: &ChatError) {
    eprintln!("! {}", err);
}

/// Read a line from stdin in a blocking task.
async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(e) => {
                eprintln!("\nError reading from stdin: {}", e);
                None
            }
        }
    })
    .await
    .ok()
    .flatten()
}

fn print_prompt(state: &AppState, prefs: &Preferences) {
    let mut prompt = String::new();
    if !prefs.sidebar_collapsed {
        if let Some(client) = state.coordinator().client_id() {
            prompt.push_str(&format!("[{}] ", client));
        }
    }
    if state.orchestrator().pending_clarification().is_some() {
        prompt.push_str("clarify");
    }
    prompt.push_str("> ");
    let mut stderr = std::io::stderr();
    let _ = stderr.write_all(prompt.as_bytes());
    let _ = stderr.flush();
}

fn role_label(role: Role, theme: Theme) -> String {
    let label = match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    match theme {
        Theme::Light => label.to_string(),
        Theme::Dark => format!("\x1b[1;36m{}\x1b[0m", label),
    }
}

pub fn format_message(message: &Message, prefs: &Preferences) -> String {
    let mut out = format!("{}: {}", role_label(message.role, prefs.theme), message.content);
    if !prefs.show_agent_activity {
        return out;
    }
    let Some(meta) = &message.metadata else {
        return out;
    };
    let mut notes = Vec::new();
    if let Some(activity) = &meta.agent_activity {
        let agents = activity.active_agents();
        if !agents.is_empty() {
            notes.push(format!("agents: {}", agents.join(", ")));
        }
    }
    if let Some(ms) = meta.query_time_ms {
        notes.push(format!("{} ms", ms));
    }
    if meta.visualization.is_some() {
        notes.push("chart attached".to_string());
    }
    if !notes.is_empty() {
        out.push_str(&format!("\n  [{}]", notes.join(" | ")));
    }
    out
}

pub fn format_summary(summary: &PortfolioSummary) -> String {
    let mut out = format!(
        "{}: {} holdings, cost basis ${:.2}\n",
        summary.client_id, summary.total_holdings, summary.total_cost_basis
    );
    for (title, slices) in [
        ("By asset class", &summary.by_asset_class),
        ("By sector", &summary.by_sector),
    ] {
        out.push_str(&format!("{}:\n", title));
        for slice in slices {
            out.push_str(&format!(
                "  {:<24} {:>14.2} {:>6.1}%\n",
                slice.label,
                slice.value,
                slice.weight * 100.0
            ));
        }
    }
    out
}

fn print_history(state: &AppState, prefs: &Preferences) {
    let session = state.coordinator().snapshot();
    if session.messages.is_empty() {
        eprintln!("(no messages)");
        return;
    }
    for message in &session.messages {
        println!("{}", format_message(message, prefs));
        if let Some(failed) = session
            .failed_turns
            .iter()
            .find(|f| f.message_id == message.id)
        {
            println!("  (not answered: {})", failed.error);
        }
    }
}

fn describe_state(state: &AppState, session_state: SessionState) {
    let count = state.coordinator().messages().len();
    match session_state {
        SessionState::Active => eprintln!("Resumed conversation ({} messages).", count),
        _ => eprintln!("New conversation."),
    }
}

/// Run `fut`, printing live agent activity if the feed is enabled and a session exists.
async fn with_agent_feed<F: Future>(state: &AppState, prefs: &Preferences, fut: F) -> F::Output {
    let session_id = state.coordinator().session_id();
    let feed = match session_id {
        Some(id) if state.config.agent_status_feed && prefs.show_agent_activity => {
            let url = ws::feed_url(state.config.ws_base_url(), &id);
            ws::subscribe(&url)
                .await
                .map_err(|e| tracing::debug!(url = %url, error = %e, "agent feed unavailable"))
                .ok()
        }
        _ => None,
    };
    let Some(mut feed) = feed else {
        return fut.await;
    };

    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return out,
            Some(status) = feed.events.recv() => eprintln!("  · {} {}", status.agent, status.status),
        }
    }
}

async fn send_text(state: &AppState, prefs: &Preferences, text: &str) {
    let orchestrator = state.orchestrator();
    let result = if orchestrator.pending_clarification().is_some() {
        with_agent_feed(state, prefs, orchestrator.clarify(text)).await
    } else {
        with_agent_feed(state, prefs, orchestrator.submit(text)).await
    };
    match result {
        Ok(SubmitOutcome::Answered(reply)) => println!("{}", format_message(&reply, prefs)),
        Ok(SubmitOutcome::NeedsClarification(pending)) => {
            println!("{}: {}", role_label(Role::Assistant, prefs.theme), pending.prompt)
        }
        Err(e) => notify(&e),
    }
}

async fn handle(state: &AppState, command: ReplCommand) {
    let prefs = state.preferences();
    match command {
        ReplCommand::Exit => {}
        ReplCommand::Help => print_help(),
        ReplCommand::Clients => {
            let selected = state.coordinator().client_id();
            for client in state.clients() {
                let marker = if selected.as_deref() == Some(client.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {}  {} ({} holdings)",
                    marker, client.id, client.label, client.holdings
                );
            }
        }
        ReplCommand::Client(id) => match state.select_client(&id).await {
            Ok(session_state) => describe_state(state, session_state),
            Err(e) => notify(&e),
        },
        ReplCommand::Portfolio => {
            let Some(client_id) = state.coordinator().client_id() else {
                notify(&ValidationError::NoClientSelected.into());
                return;
            };
            match portfolio::fetch_portfolio(state.api.as_ref(), &client_id).await {
                Ok(p) => {
                    for h in &p.holdings {
                        println!(
                            "  {:<6} {:<40} {:>10.2} @ {:>9.2}  {}",
                            h.symbol, h.security_name, h.quantity, h.purchase_price, h.purchase_date
                        );
                    }
                    print!("{}", format_summary(&portfolio::summarize(&p)));
                }
                Err(e) => notify(&e),
            }
        }
        ReplCommand::History => print_history(state, &prefs),
        ReplCommand::Clear => {
            state.orchestrator().clear().await;
            eprintln!("Conversation cleared.");
        }
        ReplCommand::Health => match state.api.health().await {
            Ok(health) => println!(
                "{} (version {}, {} active sessions)",
                health.status,
                health.version.as_deref().unwrap_or("unknown"),
                health.active_sessions.unwrap_or(0)
            ),
            Err(e) => notify(&e.into()),
        },
        ReplCommand::Set { key, value } => {
            match settings::set_preference(state.store(), &key, &value) {
                Ok(_) => eprintln!("{} = {}", key, value),
                Err(e) => notify(&e.into()),
            }
        }
        ReplCommand::Message(text) => send_text(state, &prefs, &text).await,
        ReplCommand::Unknown(input) => eprintln!("Unknown command: {} (try /help)", input),
    }
}

/// Entry point for the interactive session.
pub async fn run(state: &AppState) -> anyhow::Result<()> {
    eprintln!("Portfolio Intelligence ({}). Type /help for commands.", state.api.base_url());
    match state.restore().await {
        Some(session_state) => {
            if let Some(client) = state.coordinator().client_id() {
                eprintln!("Client {}.", client);
            }
            describe_state(state, session_state);
        }
        None => eprintln!("Pick a client with /client <id> (see /clients)."),
    }

    loop {
        print_prompt(state, &state.preferences());
        let Some(line) = read_line().await else {
            break;
        };
        let command = parse_repl_input(&line);
        match command {
            ReplCommand::Exit => break,
            ReplCommand::Message(ref text) if text.is_empty() => continue,
            _ => {}
        }

        if AssertUnwindSafe(handle(state, command))
            .catch_unwind()
            .await
            .is_err()
        {
            eprintln!("! Something went wrong displaying that. Use /clear to reset the conversation if it persists.");
        }
    }
    Ok(())
}
