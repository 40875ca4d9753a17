//! Slash commands for the interactive prompt.
//!
//! Lines that do not start with `/` are messages and are left to the caller.

use crate::ui_text::ui_text;
use pc_llm::{ChatSession, ConfigPatch, default_snapshot_name};
use std::path::{Path, PathBuf};

const SUPPORTED: &str = "/config /settings /models /save /load /clear /help /exit";

#[derive(Debug, PartialEq)]
pub enum CommandOutcome {
    Reply(String),
    Exit,
}

pub async fn handle_command(
    session: &mut ChatSession,
    input: &str,
    save_dir: Option<&Path>,
) -> Option<CommandOutcome> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (name, rest) = trimmed
        .split_once(char::is_whitespace)
        .map_or((trimmed, ""), |(name, rest)| (name, rest.trim()));
    let text = ui_text(&session.config().language);

    let reply = match name {
        "/exit" | "/quit" => return Some(CommandOutcome::Exit),
        "/help" => help(),
        "/settings" => settings(session),
        "/models" => models(session),
        "/config" => configure(session, rest),
        "/clear" => {
            session.clear_history();
            text.cleared.to_string()
        }
        "/save" => {
            let path = match (rest.is_empty(), save_dir) {
                (false, _) => Some(PathBuf::from(rest)),
                (true, Some(dir)) => Some(dir.join(default_snapshot_name())),
                (true, None) => None,
            };
            match session.save(path.as_deref()).await {
                Ok(written) => format!("{} {}", text.saved_to, written.display()),
                Err(e) => format!("{}: {e}", text.error),
            }
        }
        "/load" => {
            if rest.is_empty() {
                "Usage: /load <path>".to_string()
            } else {
                let path = Path::new(rest);
                match session.load(path).await {
                    Ok(()) => format!(
                        "{} {} ({} messages)",
                        text.loaded_from,
                        path.display(),
                        session.history().len()
                    ),
                    Err(e) => format!("{}: {e}", text.error),
                }
            }
        }
        _ => format!("Unknown command. Supported: {SUPPORTED}"),
    };
    Some(CommandOutcome::Reply(reply))
}

fn help() -> String {
    [
        "/config key=value [key=value ...]  update settings (all or nothing)",
        "/settings                          show current settings",
        "/models                            list models for this provider",
        "/save [path]                       save the conversation as JSON",
        "/load <path>                       replace the conversation from JSON",
        "/clear                             forget the conversation",
        "/exit                              quit",
    ]
    .join("\n")
}

fn settings(session: &ChatSession) -> String {
    let config = session.config();
    let mut lines = vec![format!("provider={}", session.provider_name())];
    lines.extend(
        session
            .supported_options()
            .iter()
            .map(|option| format!("{option}={}", config.display_value(*option))),
    );
    lines.join("\n")
}

fn models(session: &ChatSession) -> String {
    session
        .models()
        .iter()
        .map(|model| {
            let marker = if *model == session.config().model { "*" } else { " " };
            format!("{marker} {model}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn configure(session: &mut ChatSession, assignments: &str) -> String {
    if assignments.is_empty() {
        let keys: Vec<String> = session
            .supported_options()
            .iter()
            .map(ToString::to_string)
            .collect();
        return format!(
            "Usage: /config key=value [key=value ...]\nkeys: {}",
            keys.join(", ")
        );
    }

    let result = ConfigPatch::from_assignments(assignments.split_whitespace())
        .and_then(|patch| session.configure(&patch).map(|()| patch));
    // Labels follow the language in effect after the update.
    let text = ui_text(&session.config().language);
    match result {
        Ok(patch) => {
            let fields: Vec<String> = patch.touched().iter().map(ToString::to_string).collect();
            format!("{}: {}", text.config_updated, fields.join(", "))
        }
        Err(e) => format!("{}: {e}", text.error),
    }
}
