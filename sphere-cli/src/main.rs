//! Sphere CLI
//!
//! Multi-perspective analysis with a local, git-backed report log.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

use sphere_agents::{create_gateway, GatewayConfig, PersonaRegistry, RetryPolicy, DEFAULT_PERSONA_SET};
use sphere_core::{CancelToken, PersonaSet, RunStatus, DEFAULT_STORE_DIR};
use sphere_log::{open_audit_log, LogQuery, LogStore, PersistOutcome};
use sphere_runtime::{AnalysisConfig, Pipeline};

#[derive(Parser)]
#[command(name = "sphere")]
#[command(author, version, about = "Sphere: multi-agent analysis with a versioned report log", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,
}

#[derive(Args)]
struct GlobalArgs {
    /// LLM provider preset
    #[arg(long, default_value = "ollama", global = true)]
    provider: String,

    /// Model to use (default: the provider's default model)
    #[arg(long, global = true)]
    model: Option<String>,

    /// API base URL override
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// API key (or set SPHERE_API_KEY env var)
    #[arg(long, env = "SPHERE_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Anthropic API key (or set ANTHROPIC_API_KEY env var)
    #[arg(long, env = "ANTHROPIC_API_KEY", global = true, hide_env_values = true)]
    anthropic_key: Option<String>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long, env = "OPENAI_API_KEY", global = true, hide_env_values = true)]
    openai_key: Option<String>,

    /// OpenRouter API key (or set OPENROUTER_API_KEY env var)
    #[arg(long, env = "OPENROUTER_API_KEY", global = true, hide_env_values = true)]
    openrouter_key: Option<String>,

    /// Report store directory (default: ~/.sphere)
    #[arg(long, env = "SPHERE_HOME", global = true)]
    store: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "60", global = true)]
    timeout: u64,

    /// Per-agent deadline in seconds, retries included (0 = none)
    #[arg(long, default_value = "180", global = true)]
    agent_timeout: u64,

    /// Retries per model call after the first attempt
    #[arg(long, default_value = "2", global = true)]
    retries: u32,

    /// Maximum agents running at once
    #[arg(long, default_value = "6", global = true)]
    concurrency: usize,

    /// Persona set to use
    #[arg(long, default_value = DEFAULT_PERSONA_SET, global = true)]
    persona: String,

    /// Directory of additional persona set TOML files
    #[arg(long, global = true)]
    personas: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a query from every perspective of a persona set
    Analyze {
        /// The query to analyze
        query: String,

        /// Additional context passed to every agent
        #[arg(short, long)]
        context: Option<String>,

        /// Only run the first N agents of the set
        #[arg(long)]
        max_agents: Option<usize>,

        /// Persist the report even when the run is cancelled
        #[arg(long)]
        persist_cancelled: bool,
    },

    /// Run a single agent role, without synthesis or persistence
    Test {
        /// Role name from the persona set
        role: String,

        /// The query to analyze
        query: String,
    },

    /// Browse past analyses
    Log {
        /// Only analyses whose message contains this text
        #[arg(short, long)]
        query: Option<String>,

        /// Only analyses after this date
        #[arg(long)]
        after: Option<String>,

        /// Only analyses before this date
        #[arg(long)]
        before: Option<String>,

        /// Maximum number of entries
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Print the report introduced by this commit
        #[arg(long)]
        show: Option<String>,
    },

    /// Inspect persona sets
    Persona {
        #[command(subcommand)]
        command: PersonaCommands,
    },
}

#[derive(Subcommand)]
enum PersonaCommands {
    /// List available persona sets
    List,

    /// Show the agents of a persona set
    Show {
        /// Persona set id (default: the selected persona)
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // Console output plus a persistent audit.log in the store
    let (audit_writer, audit_guard) = match open_audit_log(&store_root(&cli.global)) {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(writer), Some(guard))
        }
        Err(e) => {
            eprintln!("⚠️  Could not open audit log: {}", e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .compact()
                .with_filter(LevelFilter::from_level(log_level)),
        )
        .with(audit_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(LevelFilter::INFO)
        }))
        .init();

    let code = match cli.command {
        Commands::Analyze {
            query,
            context,
            max_agents,
            persist_cancelled,
        } => run_analyze(&cli.global, &query, context.as_deref(), max_agents, persist_cancelled).await?,
        Commands::Test { role, query } => run_test(&cli.global, &role, &query).await?,
        Commands::Log {
            query,
            after,
            before,
            limit,
            show,
        } => {
            let store = LogStore::open(store_root(&cli.global));
            match show {
                Some(commit) => show_report(&store, &commit).await?,
                None => {
                    let query = LogQuery {
                        limit,
                        grep: query,
                        after,
                        before,
                    };
                    list_history(&store, &query).await?
                }
            }
            0
        }
        Commands::Persona { command } => {
            let registry = load_registry(&cli.global)?;
            match command {
                PersonaCommands::List => list_personas(&registry),
                PersonaCommands::Show { name } => {
                    show_persona(&registry, name.as_deref().unwrap_or(&cli.global.persona))?
                }
            }
            0
        }
    };

    if code != 0 {
        // exit skips destructors; flush the audit log first
        drop(audit_guard);
        std::process::exit(code);
    }
    Ok(())
}

async fn run_analyze(
    global: &GlobalArgs,
    query: &str,
    context: Option<&str>,
    max_agents: Option<usize>,
    persist_cancelled: bool,
) -> Result<i32> {
    if query.trim().is_empty() {
        bail!("Query must not be empty");
    }

    let registry = load_registry(global)?;
    let mut personas = select_personas(&registry, &global.persona)?;
    if let Some(max) = max_agents {
        personas = personas.limited(max);
    }

    let gateway_config = gateway_config(global)?;
    let provider_label = format!("{} ({})", gateway_config.provider_name, gateway_config.model);
    let gateway = create_gateway(gateway_config)?;

    let config = analysis_config(global).with_persist_cancelled(persist_cancelled);
    let pipeline = Pipeline::new(gateway, config);

    println!("🔮 Sphere - Multi-Perspective Analysis\n");
    println!("📡 Provider: {}", provider_label);
    println!("🎭 Persona: {} ({} agents)", personas.name(), personas.len());
    println!("🔍 Query: {}\n", query);

    let cancel = CancelToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Cancelling analysis...");
            ctrl_c.cancel();
        }
    });

    let outcome = pipeline
        .analyze(query, context, &personas, &cancel)
        .await
        .context("Failed to persist analysis report")?;
    let run = &outcome.run;

    println!(
        "\n📊 Status: {} | Agents: {}/{} | Time: {:.1}s",
        run.status,
        run.ok_count(),
        run.results.len(),
        run.elapsed.as_secs_f64()
    );

    for result in run.results.iter().filter(|r| !r.is_ok()) {
        println!(
            "   ⚠️  {}: {} ({})",
            result.role,
            result.status,
            result.error.as_deref().unwrap_or("no detail")
        );
    }

    match &outcome.persisted {
        Some(PersistOutcome::Committed(commit)) => {
            println!("📄 Report saved to: {}", commit.report_path.display());
            println!("🔖 Commit: {}", commit.hash);
        }
        Some(PersistOutcome::Warning(warning)) => {
            println!("📄 Report saved to: {}", warning.report_path.display());
            println!("⚠️  Not committed: {}", warning.error);
        }
        None => println!("⏹️  Run cancelled, no report written"),
    }

    match run.status {
        RunStatus::Failed => {
            println!(
                "\n❌ {}",
                run.error.as_deref().unwrap_or("All agents failed")
            );
        }
        RunStatus::SynthesisFailed => {
            println!(
                "\n⚠️  Synthesis failed ({}); the report contains the raw agent perspectives.",
                run.synthesis_error.as_deref().unwrap_or("unknown error")
            );
        }
        _ => {
            if let Some(synthesis) = &run.synthesis {
                println!("\n{}", "=".repeat(60));
                let preview: String = synthesis.chars().take(1000).collect();
                println!("{}", preview);
                if synthesis.chars().count() > 1000 {
                    println!("...\n[truncated - see full report]");
                }
            }
        }
    }

    Ok(outcome.exit_code())
}

async fn run_test(global: &GlobalArgs, role: &str, query: &str) -> Result<i32> {
    let registry = load_registry(global)?;
    let personas = select_personas(&registry, &global.persona)?;
    let gateway = create_gateway(gateway_config(global)?)?;
    let pipeline = Pipeline::new(gateway, analysis_config(global));

    info!("Testing role {} from '{}'", role, personas.name());
    let result = pipeline
        .test_agent(&personas, role, query, &CancelToken::new())
        .await?;

    if result.is_ok() {
        println!("### {} ({:.1}s)\n", result.role, result.latency.as_secs_f64());
        println!("{}", result.output);
        Ok(0)
    } else {
        println!(
            "❌ {} {}: {}",
            result.role,
            result.status,
            result.error.as_deref().unwrap_or("no detail")
        );
        Ok(1)
    }
}

async fn list_history(store: &LogStore, query: &LogQuery) -> Result<()> {
    let entries = store
        .history(query)
        .await
        .with_context(|| format!("Failed to read history from {}", store.root().display()))?;

    if entries.is_empty() {
        println!("No analyses found in {}", store.root().display());
        return Ok(());
    }

    for entry in entries {
        let short = entry.hash.get(..8).unwrap_or(&entry.hash);
        println!(
            "{}  {}  {}",
            short,
            entry.date.format("%Y-%m-%d %H:%M"),
            entry.subject
        );
    }
    Ok(())
}

async fn show_report(store: &LogStore, commit: &str) -> Result<()> {
    match store.show(commit).await? {
        Some(document) => println!("{}", document),
        None => bail!("Commit {} does not contain a report", commit),
    }
    Ok(())
}

fn list_personas(registry: &PersonaRegistry) {
    println!("Available persona sets:\n");
    for id in registry.list_ids() {
        if let Some(def) = registry.definition(id) {
            println!(
                "  {:<12} {} ({} agents)",
                id,
                def.persona_set.name,
                def.agents.len()
            );
            if !def.persona_set.description.is_empty() {
                println!("  {:<12} {}", "", def.persona_set.description);
            }
        }
    }
}

fn show_persona(registry: &PersonaRegistry, id: &str) -> Result<()> {
    let def = registry
        .definition(id)
        .ok_or_else(|| anyhow!("Unknown persona '{}'", id))?;

    println!("{} [{}]", def.persona_set.name, def.persona_set.id);
    if !def.persona_set.description.is_empty() {
        println!("{}", def.persona_set.description);
    }
    println!();
    for (i, agent) in def.agents.iter().enumerate() {
        println!("{:>2}. {} - {}", i + 1, agent.role, agent.perspective);
    }
    Ok(())
}

fn load_registry(global: &GlobalArgs) -> Result<PersonaRegistry> {
    let mut registry = PersonaRegistry::load_embedded();
    if let Some(dir) = &global.personas {
        let loaded = registry
            .extend_from_dir(dir)
            .with_context(|| format!("Failed to read persona directory {}", dir.display()))?;
        info!("Loaded {} persona sets from {}", loaded, dir.display());
    }
    Ok(registry)
}

fn select_personas(registry: &PersonaRegistry, id: &str) -> Result<PersonaSet> {
    registry.get(id).ok_or_else(|| {
        anyhow!(
            "Unknown persona '{}'. Available: {}",
            id,
            registry.list_ids().join(", ")
        )
    })
}

fn gateway_config(global: &GlobalArgs) -> Result<GatewayConfig> {
    let provider_key = match global.provider.to_ascii_lowercase().as_str() {
        "anthropic" => global.anthropic_key.as_deref(),
        "openai" => global.openai_key.as_deref(),
        "openrouter" => global.openrouter_key.as_deref(),
        _ => None,
    };
    let api_key = global.api_key.as_deref().or(provider_key);

    let config = GatewayConfig::from_preset(
        &global.provider,
        api_key,
        global.model.as_deref(),
        global.base_url.as_deref(),
    )?;
    Ok(config)
}

fn analysis_config(global: &GlobalArgs) -> AnalysisConfig {
    let retry = RetryPolicy::default()
        .with_max_attempts(global.retries.saturating_add(1))
        .with_request_timeout(Duration::from_secs(global.timeout.max(1)));
    let agent_timeout = (global.agent_timeout > 0).then(|| Duration::from_secs(global.agent_timeout));

    AnalysisConfig::new(store_root(global))
        .with_retry(retry)
        .with_max_concurrency(global.concurrency)
        .with_agent_timeout(agent_timeout)
}

fn store_root(global: &GlobalArgs) -> PathBuf {
    global.store.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_STORE_DIR))
            .unwrap_or_else(|| Path::new(DEFAULT_STORE_DIR).to_path_buf())
    })
}
