//! # Jobflow Configuration Validator
//!
//! Command-line tool for checking a configuration directory, and optionally a
//! JSON template catalog, before starting the engine.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use jobflow_core::config::{ConfigManager, JobflowConfig};
use jobflow_core::models::JobTemplate;
use jobflow_core::registry::TemplateRegistry;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate jobflow configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment overlay to apply (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (table, json)
    #[arg(long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration (default)
    Config,

    /// Validate a JSON array of templates, in registration order
    Templates {
        /// Path to the catalog file
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already set");
    }

    let result = match &cli.command {
        None | Some(Commands::Config) => validate_config(&cli),
        Some(Commands::Templates { path }) => validate_templates(path),
    };

    if let Err(e) = result {
        error!("{e:#}");
        eprintln!("❌ {e:#}");
        process::exit(1);
    }
}

fn validate_config(cli: &Cli) -> Result<()> {
    let manager =
        ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
            .with_context(|| format!("environment '{}'", cli.environment))?;
    info!(environment = %manager.environment(), "configuration valid");

    match cli.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(manager.config())?),
        "table" => print_table(manager.config(), manager.environment()),
        other => bail!("unknown output format '{other}'"),
    }
    Ok(())
}

fn print_table(config: &JobflowConfig, environment: &str) {
    println!("✅ configuration valid for '{environment}'");
    println!(
        "  database        {}",
        if config.database.url.is_some() { "postgres" } else { "in-memory" }
    );
    println!("  max_connections {}", config.database.max_connections);
    println!("  log level       {} (json: {})", config.logging.level, config.logging.json);
    println!("  websocket cap   {}", config.notifications.websocket_capacity);

    let defaults = config.default_actions();
    for (kind, actions) in [("workable", &defaults.workable), ("meta", &defaults.meta)] {
        println!("  {kind} defaults:");
        for action in actions {
            let suppressed = if action.suppress_for_parent { " (suppressed for children)" } else { "" };
            println!(
                "    {:<8} {}{suppressed}",
                action.transition.as_str(),
                action.notification.kind()
            );
        }
    }
}

fn validate_templates(path: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let templates: Vec<JobTemplate> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let registry = TemplateRegistry::new();
    for template in templates {
        let identifier = template.identifier();
        registry
            .validate(&template)
            .with_context(|| format!("template {identifier}"))?;
        registry.insert(template);
        println!("✅ {identifier}");
    }
    let stats = registry.stats();
    println!(
        "{} templates valid ({} meta)",
        stats.total_templates, stats.meta_templates
    );
    Ok(())
}
