use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use synlogos_app::{logging, Config, Repl};
use synlogos_core::{build_system_prompt, AgentLoop, Session};
use synlogos_providers::OpenAICompatibleProvider;
use synlogos_tools::default_registry;
use tokio::sync::mpsc::unbounded_channel;
use tracing::info;

/// Agent runtime that answers with direct tool calls or short
/// orchestration scripts.
#[derive(Debug, Parser)]
#[command(name = "synlogos", version)]
struct Cli {
    /// Path to synlogos.json
    #[arg(long)]
    config: Option<PathBuf>,
    /// Agent type from the `agent` section of the config
    #[arg(long)]
    agent: Option<String>,
    /// Model as provider/model
    #[arg(long)]
    model: Option<String>,
    /// Workspace the tools operate in
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Run a single prompt and exit
    #[arg(short = 'p', long)]
    prompt: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let config = Config::discover(cli.config.as_deref())?;
    let resolved = config.resolve(cli.agent.as_deref(), cli.model.as_deref())?;
    let workdir = match cli.workdir.or_else(|| config.workdir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let workdir = workdir
        .canonicalize()
        .with_context(|| format!("Workspace {} is not accessible", workdir.display()))?;
    info!(
        "Using {}/{} in {}",
        resolved.provider,
        resolved.model,
        workdir.display()
    );

    let registry = default_registry(&workdir)
        .context("Failed to register tools")?
        .with_timeout(config.runtime.tool_timeout());
    let provider = OpenAICompatibleProvider::with_timeout(
        resolved.base_url.clone(),
        resolved.api_key.clone(),
        resolved.model.clone(),
        config.runtime.provider_timeout(),
    )
    .context("Failed to create the provider client")?;

    let (tx, rx) = unbounded_channel();
    let agent = AgentLoop::new(Arc::new(provider), Arc::new(registry), config.runtime.clone())
        .with_events(tx);

    let mut instructions = config.load_instructions();
    instructions.push(resolved.instructions.clone());
    let system_prompt = build_system_prompt(&workdir, &agent.namespace(), &instructions);
    let session = Session::new(agent.config(), system_prompt)
        .with_pricing(config.cost.input_per_1k, config.cost.output_per_1k);

    let mut repl = Repl::new(agent, session, rx);
    let outcome = match cli.prompt {
        Some(prompt) => match repl.run_task(&prompt).await {
            Ok(answer) => {
                println!("{}", answer.text);
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e)),
        },
        None => repl.run().await.context("Terminal I/O failed"),
    };

    println!("\n{}", repl.session().metrics_snapshot().summary());
    println!("{}", repl.session().usage().summary());
    outcome
}
