//! `webchat` command line: one-shot chats and model listings.

use std::io::Write;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::models::ProviderKey;
use crate::provider::{AdapterRegistry, HandleMessageOptions, MessageCallbacks};
use crate::types::{ConversationMetadata, Message};

/// Environment variable read when `--credential` is not given.
pub const CREDENTIAL_ENV: &str = "WEBCHAT_CREDENTIAL";

#[derive(Parser, Debug)]
#[command(name = "webchat", version, about = "Chat with AI web apps from the terminal")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message and stream the reply
    Chat(ChatArgs),
    /// List the models a provider offers
    Models(ModelsArgs),
}

#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Model id; selects the provider (e.g. gemini-web-fast, qwen3-max, gpt-4o)
    #[arg(short, long, default_value = "gemini-web-fast")]
    pub model: String,

    /// Conversation id printed by a previous turn
    #[arg(short, long)]
    pub conversation: Option<String>,

    /// Credential blob (defaults to $WEBCHAT_CREDENTIAL)
    #[arg(long)]
    pub credential: Option<String>,

    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Read the whole reply before printing it
    #[arg(long)]
    pub no_stream: bool,

    /// Print thinking deltas to stderr
    #[arg(long)]
    pub show_thinking: bool,

    pub prompt: String,
}

#[derive(Parser, Debug)]
pub struct ModelsArgs {
    /// Provider key (gemini-web, qwen-web, openai-compatible, ollama)
    #[arg(short, long)]
    pub provider: String,

    /// Credential blob (defaults to $WEBCHAT_CREDENTIAL)
    #[arg(long)]
    pub credential: Option<String>,

    /// Print the raw JSON list
    #[arg(long)]
    pub json: bool,
}

fn credential_or_env(credential: Option<String>) -> String {
    credential
        .or_else(|| std::env::var(CREDENTIAL_ENV).ok())
        .unwrap_or_default()
}

/// Writes content to stdout as it arrives.
struct TerminalCallbacks {
    show_thinking: bool,
    conversation_id: Option<String>,
    error: Option<BridgeError>,
}

impl MessageCallbacks for TerminalCallbacks {
    fn on_content(&mut self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn on_thinking(&mut self, text: &str) {
        if self.show_thinking {
            eprint!("{text}");
        }
    }

    fn on_metadata(&mut self, metadata: &ConversationMetadata) {
        if let Some(id) = &metadata.conversation_id {
            self.conversation_id = Some(id.clone());
        }
    }

    fn on_done(&mut self) {
        println!();
    }

    fn on_error(&mut self, error: BridgeError) {
        self.error = Some(error);
    }
}

pub async fn handle_chat(args: ChatArgs) -> Result<(), BridgeError> {
    let registry = AdapterRegistry::from_config(&BridgeConfig::from_env());
    let adapter = registry.route(&args.model)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let options = HandleMessageOptions::builder()
        .credential(credential_or_env(args.credential))
        .messages(vec![Message::user(args.prompt)])
        .model(args.model)
        .maybe_conversation_id(args.conversation)
        .stream(!args.no_stream)
        .maybe_temperature(args.temperature)
        .cancel(cancel)
        .build();

    let mut callbacks = TerminalCallbacks {
        show_thinking: args.show_thinking,
        conversation_id: None,
        error: None,
    };
    adapter.handle_message(options, &mut callbacks).await;

    if let Some(id) = callbacks.conversation_id {
        eprintln!("conversation: {id}");
    }
    match callbacks.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

pub async fn handle_models(args: ModelsArgs) -> Result<(), BridgeError> {
    let key = ProviderKey::parse(&args.provider)
        .ok_or_else(|| BridgeError::Configuration(format!("Unknown provider '{}'", args.provider)))?;
    let registry = AdapterRegistry::from_config(&BridgeConfig::from_env());
    let adapter = registry
        .get(key)
        .ok_or_else(|| BridgeError::Configuration(format!("Provider '{key}' is not registered")))?;

    let models = adapter.get_models(&credential_or_env(args.credential)).await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }
    for model in models {
        let thinking = if model.is_thinking { " (thinking)" } else { "" };
        match model.description {
            Some(description) => println!("{}  {}{thinking}  {description}", model.id, model.name),
            None => println!("{}  {}{thinking}", model.id, model.name),
        }
    }
    Ok(())
}
