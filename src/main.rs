//! dtou CLI: usage-control policy engine.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use dtou_engine::engine::{EngineConfig, PolicyEngine, RequestContext, StoreConfig};
use dtou_engine::graph::PolicyDocument;
use dtou_engine::paths::DtouPaths;
use dtou_engine::store::paired_policy_url;

#[derive(Parser)]
#[command(name = "dtou", version, about = "Usage-control policy engine")]
struct Cli {
    /// Configuration file (default: $DTOU_CONFIG or $XDG_CONFIG_HOME/dtou/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a durable resource store in this directory.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the identifiers extracted from an application policy.
    Inspect {
        /// Turtle file with the application policy.
        policy: PathBuf,
    },

    /// Store a data policy at the paired location of a data URL.
    Attach {
        /// URL of the data resource.
        data_url: String,
        /// Turtle file with the data policy.
        policy: PathBuf,
    },

    /// Report conflicts between an application's usage and its data policies.
    Compliance(RunArgs),

    /// Report obligations activated by an application's usage.
    Obligations(RunArgs),

    /// Derive the policies of an application's output ports.
    Derive {
        #[command(flatten)]
        run: RunArgs,

        /// Only the derived policy of this port.
        #[arg(long)]
        port: Option<String>,

        /// Persist the port's policy at the paired location of each URL.
        #[arg(long, num_args = 1.., requires = "port")]
        commit: Vec<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Turtle file with the application policy.
    policy: PathBuf,

    /// Application identifier.
    #[arg(long, default_value = "cli")]
    app: String,

    /// Acting user.
    #[arg(long)]
    user: Option<String>,

    /// Seed a data policy before reasoning, as `<data-url>=<file>`.
    #[arg(long = "data-policy", value_name = "URL=FILE")]
    data_policies: Vec<String>,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.store_dir)?;

    match cli.command {
        Commands::Inspect { policy } => {
            let engine = PolicyEngine::new(config)?;
            let record = engine.register("inspect", read_document(&policy)?)?;
            let json = serde_json::to_string_pretty(&*record).into_diagnostic()?;
            println!("{json}");
        }

        Commands::Attach { data_url, policy } => {
            if config.store == StoreConfig::Memory {
                tracing::warn!("memory store: the attached policy is lost on exit");
            }
            let engine = PolicyEngine::new(config)?;
            let url = paired_policy_url(&data_url, &engine.config().policy_suffix);
            engine.store().put(&url, &read_document(&policy)?)?;
            println!("Attached {} at {url}", policy.display());
        }

        Commands::Compliance(run) => {
            let (engine, request) = prepare(config, &run)?;
            print!("{}", engine.check_compliance(&request)?);
        }

        Commands::Obligations(run) => {
            let (engine, request) = prepare(config, &run)?;
            print!("{}", engine.check_obligations(&request)?);
        }

        Commands::Derive { run, port, commit } => {
            let (engine, request) = prepare(config, &run)?;
            if commit.is_empty() {
                print!("{}", engine.derive_policies(&request, port.as_deref())?);
            } else {
                let report = engine.commit_derived_policies(&request, port.as_deref(), &commit)?;
                for url in &report.written {
                    println!("Committed port \"{}\" to {url}", report.port);
                }
            }
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>, store_dir: Option<PathBuf>) -> Result<EngineConfig> {
    let mut config = match explicit {
        Some(path) => EngineConfig::load(path)?,
        None => match DtouPaths::resolve() {
            Ok(paths) => EngineConfig::load_or_default(&paths.config_file())?,
            Err(_) => EngineConfig::default(),
        },
    };
    if let Some(path) = store_dir {
        config.store = StoreConfig::Durable { path: Some(path) };
    }
    Ok(config)
}

fn read_document(path: &Path) -> Result<PolicyDocument> {
    let text = std::fs::read_to_string(path)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("reading {}", path.display())))?;
    Ok(PolicyDocument::new(text))
}

/// Build the engine, seed data policies and register the application.
fn prepare(config: EngineConfig, run: &RunArgs) -> Result<(PolicyEngine, RequestContext)> {
    let engine = PolicyEngine::new(config)?;
    for seed in &run.data_policies {
        let Some((data_url, file)) = seed.split_once('=') else {
            miette::bail!("--data-policy expects <data-url>=<file>, got \"{seed}\"");
        };
        let url = paired_policy_url(data_url, &engine.config().policy_suffix);
        engine.store().put(&url, &read_document(Path::new(file))?)?;
    }
    engine.register(run.app.as_str(), read_document(&run.policy)?)?;
    Ok((engine, RequestContext::now(run.app.as_str(), run.user.clone())))
}
