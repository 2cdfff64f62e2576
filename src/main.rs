use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};

use riskaudit::artifact::{demo_context, ModelContext};
use riskaudit::batch::{run_batch, BatchConfig};
use riskaudit::explain::Attribution;

#[derive(Parser)]
#[command(
    name = "riskaudit",
    about = "Corporate bankruptcy-risk scoring and attribution."
)]
struct Cli {
    /// Path to the fitted artifact bundle (JSON).
    #[arg(long, global = true)]
    artifact: Option<PathBuf>,

    /// Use the built-in demo artifact instead of a file.
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP scoring service
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },

    /// Score a single company
    Score {
        /// Path to a JSON object of feature -> value
        #[arg(long)]
        input: Option<PathBuf>,

        /// Inline feature values, repeatable: --set "Net worth/Assets=0.6"
        #[arg(long = "set", value_name = "NAME=VALUE")]
        sets: Vec<String>,

        /// Output format: json or summary
        #[arg(long, default_value = "summary")]
        format: String,
    },

    /// Audit a portfolio from a CSV table
    Batch {
        /// Input CSV path
        #[arg(long)]
        input: PathBuf,

        /// Output format: json, csv, or summary
        #[arg(long, default_value = "summary")]
        format: String,

        /// Output file path (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the CSV template header (schema columns in order)
    Template,
}

fn load_context(artifact: &Option<PathBuf>, demo: bool) -> Result<ModelContext> {
    if demo {
        return Ok(demo_context());
    }
    let path = artifact
        .as_ref()
        .ok_or_else(|| eyre!("no artifact: pass --artifact <path> or --demo"))?;
    ModelContext::load(path).wrap_err_with(|| format!("Failed to load artifact {:?}", path))
}

fn cmd_serve(artifact: Option<PathBuf>, demo: bool, bind: String) -> Result<()> {
    use riskaudit::server::{run_server, ServerConfig};

    let bind_addr = bind
        .parse()
        .wrap_err_with(|| format!("Invalid bind address: {}", bind))?;

    // Degraded mode instead of refusing to start: the service stays up and
    // answers 503 until an artifact is provided and the process restarted.
    let context = match load_context(&artifact, demo) {
        Ok(ctx) => Some(Arc::new(ctx)),
        Err(e) => {
            eprintln!("Warning: {e:#}. Serving degraded.");
            None
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_server(ServerConfig { bind_addr }, context))?;
    Ok(())
}

fn parse_sets(sets: &[String]) -> Result<HashMap<String, f64>> {
    let mut raw = HashMap::new();
    for pair in sets {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| eyre!("--set expects NAME=VALUE, got `{pair}`"))?;
        let value: f64 = value
            .trim()
            .parse()
            .wrap_err_with(|| format!("Non-numeric value in --set `{pair}`"))?;
        raw.insert(name.trim().to_string(), value);
    }
    Ok(raw)
}

fn cmd_score(
    artifact: Option<PathBuf>,
    demo: bool,
    input: Option<PathBuf>,
    sets: Vec<String>,
    format: String,
) -> Result<()> {
    let ctx = load_context(&artifact, demo)?;

    let mut raw: HashMap<String, f64> = match &input {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("Failed to read input {:?}", path))?;
            serde_json::from_str(&content).wrap_err("Input must be a JSON object of numbers")?
        }
        None => HashMap::new(),
    };
    raw.extend(parse_sets(&sets)?);

    let result = riskaudit::score_single(&ctx, &raw)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Risk probability : {:.1}%", result.probability * 100.0);
    println!(
        "Classification   : {} (threshold {:.0}%)",
        result.status.as_str(),
        result.threshold * 100.0
    );
    match &result.attribution {
        Attribution::Exact { baseline, impacts } => {
            println!("Key drivers (exact, baseline {:.1}%):", baseline * 100.0);
            for i in impacts {
                println!("  {:+.4}  {} = {}", i.impact, i.feature, i.value);
            }
        }
        Attribution::Approximate { impacts } => {
            println!("Key drivers (approximate):");
            for i in impacts {
                println!("  {:+.4}  {} = {}", i.impact, i.feature, i.value);
            }
        }
        Attribution::Unavailable { error } => {
            println!("Explanation unavailable: {}", error);
        }
    }
    Ok(())
}

fn cmd_template(artifact: Option<PathBuf>, demo: bool) -> Result<()> {
    let ctx = load_context(&artifact, demo)?;
    println!("{}", ctx.schema.template_columns().join(","));
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { bind } => cmd_serve(cli.artifact, cli.demo, bind),
        Commands::Score {
            input,
            sets,
            format,
        } => cmd_score(cli.artifact, cli.demo, input, sets, format),
        Commands::Batch {
            input,
            format,
            output,
        } => {
            let ctx = load_context(&cli.artifact, cli.demo)?;
            run_batch(
                &ctx,
                &BatchConfig {
                    input,
                    format,
                    output,
                },
            )
        }
        Commands::Template => cmd_template(cli.artifact, cli.demo),
    }
}
