use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_core::{parse_interval_ms, to_json_pretty, to_yaml};
use warden_pengine::allocate::{calculate, stage0};
use warden_pengine::{schedule, EngineConfig, PolicyEngine, WorkingSet};

#[derive(Parser)]
#[command(name = "warden", about = "Warden cluster policy engine")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute one transition graph from a cluster document
    Simulate {
        /// Cluster document (JSON, or YAML with a .yaml/.yml extension)
        #[arg(long)]
        input: PathBuf,
        /// Write the graph here instead of standard output
        #[arg(long)]
        output: Option<PathBuf>,
        /// Graph serialization format
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
        /// Log every allocation score
        #[arg(long)]
        show_scores: bool,
        /// Id of the computed transition
        #[arg(long, default_value_t = 0)]
        transition_id: u64,
    },
    /// Recompute a transition every time the cluster document changes
    Watch {
        /// Cluster document to poll
        #[arg(long)]
        input: PathBuf,
        /// Directory receiving transition-<id>.json files
        #[arg(long)]
        output_dir: PathBuf,
        /// Poll interval (e.g. 500ms, 5s, 1min)
        #[arg(long, default_value = "5s")]
        interval: String,
    },
    /// Validate a cluster document and print where resources would run
    Check {
        /// Cluster document to check
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    match cli.command {
        Commands::Simulate {
            input,
            output,
            format,
            show_scores,
            transition_id,
        } => run_simulate(&input, output.as_deref(), format, show_scores, transition_id).await,
        Commands::Watch {
            input,
            output_dir,
            interval,
        } => run_watch(input, output_dir, &interval).await,
        Commands::Check { input } => run_check(&input).await,
    }
}

/// Compute and print (or write) a single transition
async fn run_simulate(
    input: &Path,
    output: Option<&Path>,
    format: OutputFormat,
    show_scores: bool,
    transition_id: u64,
) -> miette::Result<()> {
    let doc = PolicyEngine::load(input).await?;
    let (ws, graph) = schedule(&doc, transition_id, show_scores);
    for problem in &ws.config_errors {
        warn!("Configuration error: {}", problem);
    }

    let rendered = match format {
        OutputFormat::Json => to_json_pretty(&graph)?,
        OutputFormat::Yaml => to_yaml(&graph)?,
    };
    match output {
        Some(path) => {
            tokio::fs::write(path, rendered)
                .await
                .map_err(|e| miette::miette!("Failed to write {}: {}", path.display(), e))?;
            info!("Wrote transition {} to {}", graph.transition_id, path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

/// Run the polling service until Ctrl-C
async fn run_watch(input: PathBuf, output_dir: PathBuf, interval: &str) -> miette::Result<()> {
    let interval_ms = parse_interval_ms(interval)?;
    if interval_ms == 0 {
        return Err(miette::miette!("Poll interval must be greater than zero"));
    }

    let engine = PolicyEngine::new(EngineConfig {
        poll_interval: Duration::from_millis(interval_ms),
        output_dir,
        ..Default::default()
    });

    let token = CancellationToken::new();
    let engine_token = token.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = engine.run(&input, engine_token).await {
            error!("Policy engine error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for Ctrl-C: {}", e))?;
    info!("Received shutdown signal");
    token.cancel();

    handle
        .await
        .map_err(|e| miette::miette!("Policy engine task failed: {}", e))?;
    Ok(())
}

/// Unpack and place, then report problems and the placement of every resource
async fn run_check(input: &Path) -> miette::Result<()> {
    let doc = PolicyEngine::load(input).await?;
    let mut ws = stage0(&doc, false);
    let unpack_errors = ws.config_errors.len();
    calculate(&mut ws);

    print_placement(&ws);

    if ws.config_errors.is_empty() {
        println!("No configuration errors");
        return Ok(());
    }
    for problem in &ws.config_errors {
        println!("error: {}", problem);
    }
    Err(miette::miette!(
        "{} configuration errors ({} found while unpacking)",
        ws.config_errors.len(),
        unpack_errors
    ))
}

fn print_placement(ws: &WorkingSet) {
    for node in ws.node_ids() {
        let n = ws.node(node);
        let state = if n.unclean {
            "UNCLEAN"
        } else if !n.online {
            "offline"
        } else if n.standby {
            "standby"
        } else {
            "online"
        };
        println!("node {}: {}", n.uname, state);
    }

    for rsc in ws.all_leaves() {
        let r = ws.rsc(rsc);
        let current: Vec<&str> = r.running_on.iter().map(|n| ws.uname(*n)).collect();
        let next = r.allocated_to.map(|n| ws.uname(n)).unwrap_or("-");
        println!(
            "resource {} ({}): {} on [{}] -> {} on {}{}",
            r.id,
            r.agent,
            r.role,
            current.join(", "),
            r.next_role,
            next,
            if r.managed { "" } else { " (unmanaged)" }
        );
    }
}
