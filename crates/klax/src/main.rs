//! Klax
//!
//! Loads a KlaxScript project, attaches its scripts to the entity it
//! describes and fires events or calls functions on them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use klax::host::Host;
use klax::klax_runtime::FunctionRegistry;
use klax::project::ProjectLoader;
use klax_types::Value;

const DEFAULT_LOG_FILTER: &str = "klax=info,klax_runtime=info";

/// KlaxScript project host
#[derive(Parser, Debug)]
#[command(name = "klax")]
#[command(about = "KlaxScript project host", long_about = None)]
struct Args {
    /// Path to the project directory
    #[arg(short, long, global = true, default_value = "./project")]
    project: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fire an event on the project's entity
    Run {
        /// Event name
        #[arg(long, default_value = "OnStart")]
        event: String,

        /// Fire the event on this component instead of the entity
        #[arg(long)]
        component: Option<Uuid>,

        /// Event arguments as a JSON array
        #[arg(long, default_value = "[]")]
        args: String,
    },

    /// Call a script function and print its outputs as JSON
    Call {
        /// Script object name
        #[arg(long)]
        script: String,

        /// Function name
        #[arg(long)]
        function: String,

        /// Call the function of this interface instead of a custom function
        #[arg(long)]
        interface: Option<String>,

        /// Function arguments as a JSON array
        #[arg(long, default_value = "[]")]
        args: String,
    },

    /// Load and compile every script, then report what was found
    Check,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // The manifest may carry the log filter, so read it before logging starts
    let manifest = ProjectLoader::load_manifest(&args.project)
        .with_context(|| format!("Failed to load project from {}", args.project.display()))?;
    init_tracing(manifest.runtime.log_filter.as_deref(), args.log_json);

    info!("Starting klax v{}", env!("CARGO_PKG_VERSION"));
    let project = ProjectLoader::load(&args.project)?;
    info!("Loaded project: {} ({})", project.name(), project.id());

    let host = Host::start(project, Arc::new(FunctionRegistry::with_builtins()))?;

    match args.command {
        Command::Run {
            event,
            component,
            args,
        } => {
            let args = parse_args(&args)?;
            host.fire(component, &event, &args)?;
        }
        Command::Call {
            script,
            function,
            interface,
            args,
        } => {
            let args = parse_args(&args)?;
            let outputs = match interface {
                Some(interface) => host.call_interface(&script, &interface, &function, &args)?,
                None => host.call(&script, &function, &args)?,
            };
            let json: Vec<serde_json::Value> = outputs.into_iter().map(Into::into).collect();
            println!("{}", serde_json::Value::Array(json));
        }
        Command::Check => {
            let summaries = host.summaries();
            for summary in &summaries {
                info!(
                    script = %summary.name,
                    events = summary.event_graphs,
                    functions = summary.function_graphs,
                    interfaces = summary.interface_graphs,
                    nodes = summary.nodes,
                    "Script compiled"
                );
            }
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
    }

    host.shutdown();
    Ok(())
}

fn init_tracing(manifest_filter: Option<&str>, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(manifest_filter.unwrap_or(DEFAULT_LOG_FILTER)));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Parse a JSON array of arguments into script values
fn parse_args(text: &str) -> Result<Vec<Value>> {
    let parsed: serde_json::Value =
        serde_json::from_str(text).with_context(|| format!("Invalid JSON arguments: {text}"))?;
    let serde_json::Value::Array(items) = parsed else {
        bail!("Arguments must be a JSON array, got: {text}");
    };
    Ok(items.into_iter().map(Value::from).collect())
}
