//! Shapchat CLI - talk to a language model about a prediction explanation

mod terminal;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use shapchat_core::prelude::*;
use terminal::TerminalRenderer;

#[derive(Parser)]
#[command(name = "shapchat")]
#[command(about = "Chat about model explanations within a token budget", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file merged over the standard locations
    #[arg(long, global = true, env = "SHAPCHAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a conversation
    Chat {
        /// Persona role key; prompts for one when omitted
        #[arg(short, long)]
        role: Option<String>,

        /// File holding the formatted explanation to open the conversation with
        #[arg(short, long)]
        prompt_file: Option<PathBuf>,

        /// Backend model
        #[arg(short, long)]
        model: Option<String>,

        /// Token budget for the retained history
        #[arg(short, long)]
        budget: Option<usize>,
    },
    /// List the available personas
    Personas,
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("shapchat {}", env!("CARGO_PKG_VERSION"));
            println!("shapchat-core {}", shapchat_core::VERSION);
        }
        Commands::Personas => {
            let config = ShapchatConfig::load_with(cli.config.as_ref())?;
            for persona in config.persona_registry()?.disclosed() {
                println!(
                    "{}. {:<18} {} (temperature {}, up to {} tokens)",
                    persona.selection_key,
                    persona.role_key,
                    persona.label,
                    persona.temperature,
                    persona.response_token_cap
                );
            }
        }
        Commands::Chat {
            role,
            prompt_file,
            model,
            budget,
        } => {
            let mut config = ShapchatConfig::load_with(cli.config.as_ref())?;
            if let Some(model) = model {
                config.llm.model = model;
            }
            if let Some(budget) = budget {
                if budget == 0 {
                    bail!("--budget must be positive");
                }
                config.history.budget = budget;
            }
            let opening = match prompt_file {
                Some(path) => Some(
                    tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                None => None,
            };

            let interrupted = chat(config, role, opening).await?;
            if interrupted {
                // Standard input is read on a blocking thread that cannot be cancelled
                std::process::exit(130);
            }
        }
    }

    Ok(())
}

/// Run an interactive conversation. Returns whether it ended through Ctrl-C.
async fn chat(config: ShapchatConfig, role: Option<String>, opening: Option<String>) -> Result<bool> {
    let registry = config.persona_registry()?;
    let provider = LLMProviderFactory::create(&config.llm)?;
    let counter = Arc::new(HeuristicTokenCounter::new(config.llm.model.clone()));

    let mut renderer = TerminalRenderer::stdout();
    let mut input = LineReader::stdin();

    let persona = match role {
        Some(role) => registry.resolve(&role)?,
        None => match select_interactive(&registry, &mut input, &mut renderer).await? {
            Selection::Chosen(persona) => persona,
            Selection::Exit => return Ok(false),
        },
    };

    let mut orchestrator = ConversationOrchestrator::new(
        provider,
        counter,
        renderer,
        input,
        config.orchestrator_config(),
    );
    orchestrator.start(persona)?;

    let handle = orchestrator.interrupt_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !handle.interrupt() {
                handle.shutdown();
                break;
            }
        }
    });

    if let Some(prompt) = opening {
        orchestrator.send_opening(&prompt).await?;
    }

    orchestrator
        .renderer_mut()
        .notice(
            NoticeLevel::Info,
            "Type your questions. /help lists commands; exit or quit leaves.",
        )?;
    orchestrator.run().await?;

    Ok(orchestrator.interrupt_handle().is_shutdown())
}
