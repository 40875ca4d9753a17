//! polychat: terminal chat over OpenAI, Groq, Perplexity and Anthropic.

mod commands;
mod config;
mod ui_text;

use crate::commands::{CommandOutcome, handle_command};
use crate::config::PolychatConfig;
use crate::ui_text::{UiText, ui_text};
use clap::{Parser, Subcommand};
use pc_llm::{ChatError, ChatSession, ConfigOption, ConfigPatch, Provider, Reply, resolve_api_key};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "polychat", version, about = "Multi-provider terminal chat")]
struct Cli {
    /// Config file (default: ~/.polychat/config.toml).
    #[arg(long, env = "POLYCHAT_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// openai, groq, perplexity or anthropic.
    #[arg(long, global = true)]
    provider: Option<String>,
    #[arg(long, global = true)]
    model: Option<String>,
    /// Reply language (pt-br or en).
    #[arg(long, global = true)]
    language: Option<String>,
    /// Wait for whole replies instead of streaming fragments.
    #[arg(long, global = true)]
    no_stream: bool,
    /// Send requests to a compatible gateway instead of the public API.
    #[arg(long, global = true)]
    endpoint: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat (default).
    Chat,
    /// Send one message and print the reply.
    Ask { message: String },
    /// List providers and their models.
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    init_tracing()?;
    install_panic_hook();

    let mut cli = Cli::parse();
    let command = cli.command.take().unwrap_or(Command::Chat);

    if let Command::Models = command {
        print_models();
        return Ok(());
    }

    let cfg = PolychatConfig::load(cli.config.clone()).await?;
    let mut session = build_session(&cli, &cfg)?;

    match command {
        Command::Ask { message } => ask_once(&mut session, &message).await,
        _ => run_chat(&mut session, &cfg).await,
    }
}

fn build_session(cli: &Cli, cfg: &PolychatConfig) -> anyhow::Result<ChatSession> {
    let provider = match &cli.provider {
        Some(name) => name.parse::<Provider>()?,
        None => cfg.provider()?,
    };
    let adapter = match &cli.endpoint {
        Some(endpoint) => provider.adapter_with_endpoint(endpoint),
        None => provider.adapter(),
    };

    let api_key = match resolve_api_key(adapter.api_key_env(), cfg.api_key_for(provider)) {
        Ok(key) => key,
        Err(ChatError::ConfigMissing { var }) => {
            return Err(anyhow::anyhow!(
                "{var} is not set; export it, add it to a .env file, or set keys.{provider}_api_key in the config file"
            ));
        }
        Err(e) => return Err(e.into()),
    };
    let mut session = ChatSession::new(adapter, api_key)?;

    let mut cli_patch = ConfigPatch {
        model: cli.model.clone(),
        language: cli.language.clone(),
        ..ConfigPatch::default()
    };
    if cli.no_stream && session.supported_options().contains(&ConfigOption::Stream) {
        cli_patch.stream = Some(false);
    }
    let patch = cfg.session_patch_for(provider).merge(cli_patch);
    if !patch.is_empty() {
        session
            .configure(&patch)
            .map_err(|e| anyhow::anyhow!("{provider} settings: {e}"))?;
    }

    tracing::info!(
        provider = %provider,
        model = %session.config().model,
        stream = session.config().stream,
        "session ready"
    );
    Ok(session)
}

fn print_models() {
    for provider in Provider::ALL {
        let adapter = provider.adapter();
        let default = adapter.default_config().model;
        println!("{provider} ({})", adapter.api_key_env());
        for model in adapter.constraints().models {
            let marker = if *model == default { "*" } else { " " };
            println!("  {marker} {model}");
        }
    }
}

async fn ask_once(session: &mut ChatSession, message: &str) -> anyhow::Result<()> {
    let streaming = session.config().stream;
    let reply = session.send_message_with(message, print_fragment).await?;
    if streaming {
        println!();
    } else {
        println!("{}", reply.text);
    }
    print_extras(&reply, ui_text(&session.config().language));
    Ok(())
}

async fn run_chat(session: &mut ChatSession, cfg: &PolychatConfig) -> anyhow::Result<()> {
    println!(
        "polychat: {} / {} (/help for commands)",
        session.provider_name(),
        session.config().model
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let exit = chat_loop(
        session,
        stdin,
        cfg.general.save_dir.as_deref(),
        tokio::signal::ctrl_c,
    )
    .await?;
    tracing::debug!(?exit, "chat loop finished");

    if exit == ChatExit::Interrupted {
        println!();
    }
    println!("{}", ui_text(&session.config().language).goodbye);
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ChatExit {
    EndOfInput,
    ExitCommand,
    Interrupted,
}

/// Reads lines until EOF, `/exit` or an interrupt at the prompt. An interrupt
/// while a reply is pending only abandons that reply.
async fn chat_loop<R, I, F>(
    session: &mut ChatSession,
    input: R,
    save_dir: Option<&Path>,
    mut interrupt: I,
) -> anyhow::Result<ChatExit>
where
    R: AsyncBufRead + Unpin,
    I: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    let mut lines = input.lines();
    loop {
        let text = ui_text(&session.config().language);
        print!("\n{}: ", text.you);
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Ok(()) = interrupt() => return Ok(ChatExit::Interrupted),
        };
        let Some(line) = line else {
            return Ok(ChatExit::EndOfInput);
        };
        if line.trim().is_empty() {
            continue;
        }

        match handle_command(session, &line, save_dir).await {
            Some(CommandOutcome::Exit) => return Ok(ChatExit::ExitCommand),
            Some(CommandOutcome::Reply(out)) => println!("{out}"),
            None => send_interactive(session, &line, text, interrupt()).await,
        }
    }
}

async fn send_interactive<F>(session: &mut ChatSession, line: &str, text: &UiText, interrupted: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    let streaming = session.config().stream;
    print!("\n{}: ", text.assistant);
    let _ = std::io::stdout().flush();

    tokio::select! {
        biased;
        result = session.send_message_with(line, print_fragment) => match result {
            Ok(reply) => {
                if streaming {
                    println!();
                } else {
                    println!("{}", reply.text);
                }
                print_extras(&reply, text);
            }
            Err(e) => {
                if streaming {
                    println!();
                }
                println!("{}: {e}", text.error);
                if let Some(note) = failure_note(&e, text) {
                    println!("{note}");
                }
            }
        },
        Ok(()) = interrupted => {
            println!("\n{}", text.interrupted);
            tracing::info!("send interrupted by user");
        }
    }
}

/// Extra hint after a failed send whose user turn stayed in the history.
fn failure_note(e: &ChatError, text: &UiText) -> Option<&'static str> {
    e.is_request_failure().then_some(text.turn_kept)
}

fn print_fragment(fragment: &str) {
    print!("{fragment}");
    let _ = std::io::stdout().flush();
}

fn print_extras(reply: &Reply, text: &UiText) {
    if !reply.citations.is_empty() {
        println!("\n{}:", text.sources);
        for citation in &reply.citations {
            println!("  [{}] {}", citation.index, citation.url);
        }
    }
    if !reply.related_questions.is_empty() {
        println!("\n{}:", text.related);
        for question in &reply.related_questions {
            println!("  - {question}");
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("warn"),
    };
    let log_format = std::env::var("POLYCHAT_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported POLYCHAT_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pc_llm::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("polychat").chain(args.iter().copied()))
            .expect("args")
    }

    #[test]
    fn flags_are_accepted_before_or_after_the_subcommand() {
        let parsed = cli(&["--provider", "groq", "ask", "--no-stream", "hi"]);
        assert_eq!(parsed.provider.as_deref(), Some("groq"));
        assert!(parsed.no_stream);
        assert!(matches!(parsed.command, Some(Command::Ask { ref message }) if message == "hi"));
    }

    #[test]
    fn cli_flags_override_file_settings() {
        let cfg = PolychatConfig::parse(
            "[keys]\ngroq_api_key = \"gsk-file\"\n[session.groq]\nmodel = \"mixtral-8x7b-32768\"\ntemperature = 0.4\n",
        )
        .expect("config");
        let args = cli(&["--provider", "groq", "--model", "llama3-70b-8192", "--no-stream"]);
        let session = build_session(&args, &cfg).expect("session");
        assert_eq!(session.provider_name(), "groq");
        assert_eq!(session.config().model, "llama3-70b-8192");
        assert_eq!(session.config().temperature, 0.4);
        assert!(!session.config().stream);
    }

    #[test]
    fn no_stream_is_harmless_for_non_streaming_providers() {
        let cfg = PolychatConfig::parse("[keys]\nperplexity_api_key = \"pplx-file\"\n")
            .expect("config");
        let session = build_session(&cli(&["--provider", "perplexity", "--no-stream"]), &cfg)
            .expect("session");
        assert!(!session.config().stream);
    }

    #[test]
    fn invalid_file_settings_fail_startup() {
        let cfg = PolychatConfig::parse(
            "[keys]\nanthropic_api_key = \"sk-ant\"\n[session.anthropic]\ntemperature = 1.5\n",
        )
        .expect("config");
        let err = build_session(&cli(&["--provider", "anthropic"]), &cfg).expect_err("invalid");
        assert!(err.to_string().contains("temperature"), "{err}");
    }

    fn chat_session(endpoint: &str) -> ChatSession {
        ChatSession::new(Provider::OpenAI.adapter_with_endpoint(endpoint), "sk-test")
            .expect("session")
    }

    fn never() -> std::future::Pending<std::io::Result<()>> {
        std::future::pending()
    }

    #[tokio::test]
    async fn loop_stops_at_exit_command_or_end_of_input() {
        let mut s = chat_session("http://127.0.0.1:9/unused");
        let exit = chat_loop(&mut s, &b"/clear\n\n/exit\n/config temperature=1.5\n"[..], None, never)
            .await
            .expect("loop");
        assert_eq!(exit, ChatExit::ExitCommand);
        assert_eq!(s.config().temperature, 0.7);

        let exit = chat_loop(&mut s, &b"/config temperature=1.5\n"[..], None, never)
            .await
            .expect("loop");
        assert_eq!(exit, ChatExit::EndOfInput);
        assert_eq!(s.config().temperature, 1.5);
    }

    #[tokio::test]
    async fn interrupt_at_the_prompt_ends_the_chat_after_a_send() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/chat", closed.local_addr().expect("addr"));
        drop(closed);
        let mut s = chat_session(&url);

        // The writer stays open so the second prompt waits, as a terminal would.
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(b"hello\n").await.expect("write");

        // Calls: first prompt, the send, second prompt.
        let calls = AtomicUsize::new(0);
        let exit = chat_loop(&mut s, BufReader::new(rx), None, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    std::future::pending::<()>().await;
                }
                Ok::<(), std::io::Error>(())
            }
        })
        .await
        .expect("loop");

        assert_eq!(exit, ChatExit::Interrupted);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(s.history().len(), 1);
        drop(tx);
    }

    #[tokio::test]
    async fn interrupt_during_a_reply_abandons_only_that_reply() {
        // Connections queue in the backlog and never get an answer.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/chat", silent.local_addr().expect("addr"));
        let mut s = chat_session(&url);

        let calls = AtomicUsize::new(0);
        let exit = chat_loop(&mut s, &b"hello\n"[..], None, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n != 1 {
                    std::future::pending::<()>().await;
                }
                Ok::<(), std::io::Error>(())
            }
        })
        .await
        .expect("loop");

        assert_eq!(exit, ChatExit::EndOfInput);
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].role, Role::User);
        drop(silent);
    }

    #[test]
    fn failed_sends_after_the_request_mention_the_kept_turn() {
        let text = ui_text("en");
        assert_eq!(
            failure_note(&ChatError::Transport("reset".to_string()), text),
            Some(text.turn_kept)
        );
        assert_eq!(
            failure_note(
                &ChatError::Api {
                    status: 500,
                    body: String::new()
                },
                text
            ),
            Some(text.turn_kept)
        );
        assert_eq!(
            failure_note(&ChatError::Validation("empty".to_string()), text),
            None
        );
    }
}
