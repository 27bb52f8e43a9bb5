mod terminal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatflow_core::config::AppConfig;
use chatflow_core::log::{ChannelLogSink, TracingLogSink};
use chatflow_core::traits::{LogSink, TypebotLookup};
use chatflow_core::validate::validate_typebot;
use chatflow_core::Typebot;
use chatflow_engine::{
    sample_result, Conversation, DefaultIntegrationExecutor, DefaultLogicExecutor,
    DirectoryTypebots, Services,
};

#[derive(Parser)]
#[command(name = "chatflow", version, about = "Run typebot conversation flows in the terminal")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "chatflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat through a typebot
    Run {
        /// Typebot JSON file
        typebot: PathBuf,
        /// Simulate webhooks instead of calling them
        #[arg(long)]
        preview: bool,
        /// Directory of `<id>.json` typebots used to resolve links
        #[arg(long, env = "CHATFLOW_TYPEBOTS_DIR")]
        typebots_dir: Option<PathBuf>,
    },
    /// Print the sample webhook payload for a step
    SampleResult {
        /// Typebot JSON file
        typebot: PathBuf,
        /// Step id to generate the sample for
        step_id: String,
    },
    /// Validate a typebot file
    Check {
        /// Typebot JSON file
        typebot: PathBuf,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing on stderr so it never interleaves with the chat
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chatflow=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "chatflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "No config file found, using defaults");
        AppConfig::default()
    };

    match cli.command {
        Commands::Run {
            typebot,
            preview,
            typebots_dir,
        } => run(config, &typebot, preview, typebots_dir).await,
        Commands::SampleResult { typebot, step_id } => {
            let typebot = load_typebot(&typebot)?;
            let result = sample_result(&typebot, &step_id)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Check { typebot } => check(&typebot),
        Commands::Completions { .. } => Ok(()),
    }
}

fn load_typebot(path: &Path) -> anyhow::Result<Typebot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid typebot in {}", path.display()))
}

fn check(path: &Path) -> anyhow::Result<()> {
    let typebot = load_typebot(path)?;
    match validate_typebot(&typebot) {
        Ok(()) => {
            println!(
                "{}: ok ({} blocks, {} edges, {} variables)",
                typebot.name,
                typebot.blocks.len(),
                typebot.edges.len(),
                typebot.variables.len()
            );
            Ok(())
        }
        Err(problems) => {
            println!("{}:", typebot.name);
            for problem in &problems {
                println!("  - {}", problem);
            }
            bail!("{} problem(s) found", problems.len())
        }
    }
}

async fn run(
    mut config: AppConfig,
    path: &Path,
    preview: bool,
    typebots_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let typebot = load_typebot(path)?;
    if let Err(problems) = validate_typebot(&typebot) {
        for problem in &problems {
            warn!(typebot_id = %typebot.id, "{}", problem);
        }
    }

    config.engine.is_preview |= preview;
    let dir = typebots_dir
        .or_else(|| config.typebots_dir())
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    info!(dir = %dir.display(), preview = config.engine.is_preview, "Resolving linked typebots");

    let (log, logs) = if config.display.show_logs {
        let (sink, rx) = ChannelLogSink::new();
        (Arc::new(sink) as Arc<dyn LogSink>, Some(rx))
    } else {
        (Arc::new(TracingLogSink) as Arc<dyn LogSink>, None)
    };
    let lookup: Arc<dyn TypebotLookup> = Arc::new(DirectoryTypebots::new(dir));
    let services = Services::new(
        lookup,
        Arc::new(DefaultLogicExecutor::new()),
        Arc::new(DefaultIntegrationExecutor::new(&config.webhook)?),
        log,
    );

    let mut conversation = Conversation::new(typebot, services, config.engine.clone());
    terminal::run(&mut conversation, &config.display, logs).await
}
