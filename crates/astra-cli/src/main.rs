use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use astra_contracts::chat::{parse_intent, ChatMessage, Transcript, CHAT_HELP_COMMANDS};
use astra_contracts::events::EventLog;
use astra_contracts::viz::{current_view, TaskPatch, TaskPhase, ViewState, VizStore};
use astra_engine::{
    default_text_providers, json_object, non_empty_env, write_document_page, ChatClient,
    ChatSession, VizOrchestrator, DEFAULT_VIZ_MODEL, DEFAULT_WEBHOOK_URL,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "astra-rs", version, about = "Astra chat and visualization CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Viz(VizArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Directory visualization pages are written into.
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    webhook_url: Option<String>,
    #[arg(long, default_value = "gemini")]
    viz_provider: String,
    #[arg(long, default_value = DEFAULT_VIZ_MODEL)]
    viz_model: String,
    #[arg(long)]
    relay_url: Option<String>,
}

#[derive(Debug, Parser)]
struct VizArgs {
    /// Text to visualize, without going through a chat session.
    #[arg(long)]
    text: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long, default_value = DEFAULT_VIZ_MODEL)]
    model: String,
    #[arg(long)]
    relay_url: Option<String>,
    #[arg(long, default_value_t = 120)]
    timeout_seconds: u64,
}

const COLLAPSED_MESSAGE_CHARS: usize = 280;
const WAIT_TIMEOUT: Duration = Duration::from_secs(120);

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("astra-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Viz(args) => run_viz(args),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventLog::new(events_path, Uuid::new_v4().to_string());

    let webhook_url = args
        .webhook_url
        .clone()
        .or_else(|| non_empty_env("ASTRA_WEBHOOK_URL"))
        .unwrap_or_else(|| DEFAULT_WEBHOOK_URL.to_string());
    let mut viz_model = args.viz_model.clone();
    let registry = default_text_providers(&viz_model, args.relay_url.as_deref())?;
    let provider = registry.get(&args.viz_provider).with_context(|| {
        format!(
            "unknown visualization provider '{}' (available: {})",
            args.viz_provider,
            registry.names().join(", ")
        )
    })?;

    let mut session = ChatSession::new(Box::new(ChatClient::new(&webhook_url)), events.clone());
    let mut orchestrator = VizOrchestrator::new(provider, events.clone());
    let mut store = VizStore::new();
    let mut last_document: Option<(String, String)> = None;

    println!("Astra chat started. Type /help for commands.");
    print_message(session.transcript(), 1);

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        let resolved = orchestrator.pump(&mut store);
        announce_resolutions(session.transcript(), &resolved);
        render_view(&store, &args.out, &events, &mut last_document)?;

        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "chat_send" => {
                let Some(prompt) = intent.prompt.as_deref() else {
                    continue;
                };
                if session.send_message(prompt).is_some() {
                    print_message(session.transcript(), session.transcript().len());
                }
            }
            "create_viz" => {
                let Some(target) = viz_target(session.transcript(), intent.ordinal()) else {
                    continue;
                };
                let (message_id, text, ordinal) = target;
                orchestrator.generate(&mut store, &message_id, &text);
                println!("Creating visualization for message {ordinal}...");
            }
            "view_viz" => {
                let Some((message_id, _, ordinal)) = viz_target(session.transcript(), intent.ordinal())
                else {
                    continue;
                };
                if store.get(&message_id).is_none() {
                    println!("No visualization yet for message {ordinal} - use /viz {ordinal}");
                    continue;
                }
                store.upsert(
                    &message_id,
                    TaskPatch {
                        visible: Some(true),
                        ..TaskPatch::default()
                    },
                );
                store.select(Some(&message_id));
            }
            "back" => {
                store.select(None);
                println!("Back to chat.");
            }
            "wait_viz" => {
                let Some(message_id) = store.selected().map(str::to_string) else {
                    println!("No visualization is selected - use /viz or /view first.");
                    continue;
                };
                if !orchestrator.wait_for(&mut store, &message_id, WAIT_TIMEOUT) {
                    println!("Still generating; try /wait again.");
                }
            }
            "toggle_expand" => {
                let Some(ordinal) = intent.ordinal() else {
                    continue;
                };
                let Some(message_id) = session
                    .transcript()
                    .by_ordinal(ordinal)
                    .map(|message| message.id.clone())
                else {
                    println!("No message {ordinal}.");
                    continue;
                };
                session.transcript_mut().toggle_expansion(&message_id);
                print_message(session.transcript(), ordinal);
            }
            "history" => {
                for ordinal in 1..=session.transcript().len() {
                    print_message(session.transcript(), ordinal);
                }
            }
            "set_viz_model" => {
                let Some(model) = intent
                    .command_args
                    .get("value")
                    .and_then(serde_json::Value::as_str)
                else {
                    println!("Visualization model: {viz_model}");
                    continue;
                };
                viz_model = model.trim().to_string();
                let registry = default_text_providers(&viz_model, args.relay_url.as_deref())?;
                let provider = registry
                    .get(orchestrator.provider_name())
                    .or_else(|| registry.get(&args.viz_provider))
                    .with_context(|| format!("provider unavailable for model {viz_model}"))?;
                orchestrator.set_provider(provider);
                let _ = events.emit(
                    "viz_model_changed",
                    json_object(json!({ "model": viz_model })),
                );
                println!("Visualization model set to {viz_model}");
            }
            _ => {
                println!("Unrecognized command. Type /help for commands.");
            }
        }
    }

    Ok(())
}

fn run_viz(args: VizArgs) -> Result<i32> {
    let events = match args.events.as_ref() {
        Some(path) => EventLog::new(path, Uuid::new_v4().to_string()),
        None => EventLog::disabled(Uuid::new_v4().to_string()),
    };
    let registry = default_text_providers(&args.model, args.relay_url.as_deref())?;
    let provider = registry.get(&args.provider).with_context(|| {
        format!(
            "unknown visualization provider '{}' (available: {})",
            args.provider,
            registry.names().join(", ")
        )
    })?;

    let orchestrator = VizOrchestrator::new(provider, events);
    let mut store = VizStore::new();
    let message_id = Uuid::new_v4().to_string();

    orchestrator.generate(&mut store, &message_id, &args.text);
    if !orchestrator.wait_for(
        &mut store,
        &message_id,
        Duration::from_secs(args.timeout_seconds),
    ) {
        println!("Visualization timed out after {}s.", args.timeout_seconds);
        return Ok(1);
    }

    let Some(task) = store.get(&message_id) else {
        println!("Visualization produced no result.");
        return Ok(1);
    };
    let artifact = task.artifact.as_deref().unwrap_or_default();
    let path = write_document_page(&args.out, &message_id, artifact)?;
    match task.phase {
        TaskPhase::Ready => {
            println!("Visualization written to {}", path.display());
            Ok(0)
        }
        _ => {
            println!(
                "Visualization failed; details written to {}",
                path.display()
            );
            Ok(1)
        }
    }
}

fn render_view(
    store: &VizStore,
    out_dir: &Path,
    events: &EventLog,
    last_document: &mut Option<(String, String)>,
) -> Result<()> {
    match current_view(store) {
        ViewState::Conversation => {}
        ViewState::GeneratingViz { message_id } => {
            println!("Generating visualization for {message_id}... (/back to return, /wait to block)");
        }
        ViewState::Document {
            message_id,
            artifact,
        } => {
            let rendered = (message_id.to_string(), artifact.to_string());
            if last_document.as_ref() == Some(&rendered) {
                return Ok(());
            }
            let path = write_document_page(out_dir, message_id, artifact)?;
            let _ = events.emit(
                "document_written",
                json_object(json!({
                    "message_id": message_id,
                    "path": path.display().to_string(),
                })),
            );
            println!(
                "Visualization ready: {} (open in a browser, /back to return)",
                path.display()
            );
            *last_document = Some(rendered);
        }
    }
    Ok(())
}

fn announce_resolutions(transcript: &Transcript, resolved: &[(String, TaskPhase)]) {
    for (message_id, phase) in resolved {
        let position = ordinal_of(transcript, message_id)
            .map(|ordinal| format!("message {ordinal}"))
            .unwrap_or_else(|| message_id.clone());
        match phase {
            TaskPhase::Ready => println!("Visualization for {position} is ready."),
            TaskPhase::Failed => println!("Visualization for {position} failed."),
            TaskPhase::Generating => {}
        }
    }
}

/// Resolve a `/viz` or `/view` target: an explicit ordinal, or the
/// latest assistant message. Visualizations only exist for Astra's
/// replies, mirroring where the create button lives.
fn viz_target(transcript: &Transcript, ordinal: Option<usize>) -> Option<(String, String, usize)> {
    let message = match ordinal {
        Some(ordinal) => {
            let Some(message) = transcript.by_ordinal(ordinal) else {
                println!("No message {ordinal}.");
                return None;
            };
            message
        }
        None => {
            let Some(message) = transcript.latest_assistant() else {
                println!("No assistant message to visualize yet.");
                return None;
            };
            message
        }
    };
    if message.from_user || message.centered {
        println!("Visualizations are available for Astra's replies only.");
        return None;
    }
    let ordinal = ordinal_of(transcript, &message.id).unwrap_or(transcript.len());
    Some((message.id.clone(), message.text.clone(), ordinal))
}

fn ordinal_of(transcript: &Transcript, message_id: &str) -> Option<usize> {
    transcript
        .messages()
        .iter()
        .position(|message| message.id == message_id)
        .map(|index| index + 1)
}

fn print_message(transcript: &Transcript, ordinal: usize) {
    let Some(message) = transcript.by_ordinal(ordinal) else {
        return;
    };
    let speaker = if message.from_user { "You" } else { "Astra" };
    println!("[{ordinal}] {speaker}: {}", display_text(message));
}

/// Long replies start collapsed, like the chat bubbles they mirror;
/// `/expand <n>` toggles the full text.
fn display_text(message: &ChatMessage) -> String {
    if message.expanded || message.text.chars().count() <= COLLAPSED_MESSAGE_CHARS {
        return message.text.clone();
    }
    let truncated: String = message.text.chars().take(COLLAPSED_MESSAGE_CHARS).collect();
    format!("{truncated}… (/expand to read everything)")
}

#[cfg(test)]
mod tests {
    use astra_contracts::chat::Transcript;

    use super::{display_text, ordinal_of, viz_target};

    #[test]
    fn viz_target_defaults_to_latest_assistant_reply() {
        let mut transcript = Transcript::with_welcome();
        transcript.push_user("how did Q3 go?");
        let reply_id = transcript.push_assistant("Q3 revenue was $1.2M").id.clone();

        let (message_id, text, ordinal) = viz_target(&transcript, None).expect("target resolved");
        assert_eq!(message_id, reply_id);
        assert_eq!(text, "Q3 revenue was $1.2M");
        assert_eq!(ordinal, 3);
    }

    #[test]
    fn viz_target_rejects_user_messages_and_the_welcome() {
        let mut transcript = Transcript::with_welcome();
        transcript.push_user("hello");

        assert!(viz_target(&transcript, Some(1)).is_none(), "welcome is centered");
        assert!(viz_target(&transcript, Some(2)).is_none(), "user message");
        assert!(viz_target(&transcript, Some(9)).is_none(), "out of range");
        assert!(viz_target(&transcript, None).is_none(), "no assistant reply yet");
    }

    #[test]
    fn ordinal_lookup_matches_display_positions() {
        let mut transcript = Transcript::with_welcome();
        let id = transcript.push_user("hi").id.clone();
        assert_eq!(ordinal_of(&transcript, &id), Some(2));
        assert_eq!(ordinal_of(&transcript, "missing"), None);
    }

    #[test]
    fn long_messages_collapse_until_expanded() {
        let mut transcript = Transcript::with_welcome();
        let id = transcript.push_assistant(&"x".repeat(400)).id.clone();

        let collapsed = display_text(transcript.get(&id).expect("message"));
        assert!(collapsed.contains("/expand"));
        assert!(collapsed.chars().count() < 400);

        transcript.toggle_expansion(&id);
        let expanded = display_text(transcript.get(&id).expect("message"));
        assert_eq!(expanded, "x".repeat(400));
    }
}
