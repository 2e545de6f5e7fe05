use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ceaplan_core::app::provider_from_config;
use ceaplan_core::config::ProviderConfig;
use ceaplan_core::domain::{ExecutionPlan, Reply, ScriptHelp};
use ceaplan_core::ports::CapabilityProvider;
use ceaplan_core::{AssistantBuilder, Config};

#[derive(Parser)]
#[command(name = "ceaplan")]
#[command(about = "Turn a natural-language request into a CEA execution plan", long_about = None)]
#[command(version)]
struct Cli {
    /// Request text, e.g. "design a cost-optimal cooling system for zone.geojson"
    #[arg(required_unless_present = "script_help")]
    query: Option<String>,

    /// Print the reply as JSON
    #[arg(long)]
    json: bool,

    /// Config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local catalog file
    #[arg(long, conflicts_with = "remote")]
    catalog: Option<PathBuf>,

    /// Remote catalog service base URL
    #[arg(long)]
    remote: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Show documentation for a script (id or name) and exit
    #[arg(long, value_name = "ID")]
    script_help: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).await?,
        None => Config::default(),
    }
    .with_env_overrides();
    apply_flags(&mut config, &cli);

    // RUST_LOG > --verbose > config
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(&config.log_filter)
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    debug!(provider = ?config.provider, timeout_ms = config.request_timeout_ms, "config resolved");

    let provider = provider_from_config(&config.provider)
        .await
        .context("failed to open the catalog")?;

    if let Some(id) = &cli.script_help {
        let help = provider.script_help(id).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&help)?);
        } else {
            print_help(&help);
        }
        return Ok(());
    }

    let query = cli.query.clone().unwrap_or_default();
    let assistant = AssistantBuilder::new(config)
        .provider(Arc::clone(&provider))
        .build()?;
    assistant.start().await;
    let result = assistant.ask(&query, cli.json).await;
    assistant.shutdown().await;

    let reply = result?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else {
        print_reply(&reply);
    }
    Ok(())
}

fn apply_flags(config: &mut Config, cli: &Cli) {
    if let Some(path) = &cli.catalog {
        config.provider = ProviderConfig::Local {
            catalog_path: Some(path.clone()),
        };
    }
    if let Some(url) = &cli.remote {
        let timeout_ms = match &config.provider {
            ProviderConfig::Remote { timeout_ms, .. } => *timeout_ms,
            ProviderConfig::Local { .. } => 5_000,
        };
        config.provider = ProviderConfig::Remote {
            base_url: url.clone(),
            timeout_ms,
        };
    }
    if let Some(ms) = cli.timeout_ms {
        config.request_timeout_ms = ms;
    }
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Faq { answer } => println!("{answer}"),
        Reply::Clarify {
            question,
            confidence,
            ..
        } => {
            println!("{question}");
            println!("(confidence {confidence:.2})");
        }
        Reply::Plan { plan } => print_plan(plan),
    }
}

fn print_plan(plan: &ExecutionPlan) {
    println!("{}", plan.explanation);
    println!();
    for step in &plan.steps {
        match &step.action {
            Some(action) => println!("{}. {} [{action}]", step.index, step.entry.name),
            None => println!("{}. {}", step.index, step.entry.name),
        }
        if !step.invocation.is_empty() {
            println!("   $ {}", step.invocation);
        }
    }
    if !plan.missing_inputs.is_empty() {
        println!();
        println!("Missing inputs:");
        for name in &plan.missing_inputs {
            println!("  - {name}");
        }
    }
    if !plan.assumptions.is_empty() {
        println!();
        println!("Assumptions:");
        for note in &plan.assumptions {
            println!("  - {note}");
        }
    }
}

fn print_help(help: &ScriptHelp) {
    println!("{} ({})", help.name, help.id);
    if !help.doc.is_empty() {
        println!("{}", help.doc);
    }
    if !help.invocation.is_empty() {
        println!();
        println!("  $ {}", help.invocation);
    }
    println!();
    println!("Inputs:");
    for input in &help.inputs {
        let mut line = format!("  - {}", input.name);
        if let Some(ext) = &input.file_type {
            line.push_str(&format!(" (.{ext})"));
        }
        if !input.required {
            line.push_str(" [optional]");
        }
        if let Some(default) = &input.default {
            line.push_str(&format!(" default={default}"));
        }
        if !input.description.is_empty() {
            line.push_str(&format!(": {}", input.description));
        }
        println!("{line}");
    }
    println!("Outputs:");
    for output in &help.outputs {
        println!("  - {}: {}", output.name, output.description);
    }
}
