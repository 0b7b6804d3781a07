//! qail-shard: inspect sharding rules and routes
//!
//! # Usage
//!
//! ```bash
//! # Validate the configuration and list data nodes
//! qail-shard check --config shard.toml
//!
//! # Route and rewrite a statement
//! qail-shard route select.json --bind 42,7
//!
//! # Expand an inline expression
//! qail-shard nodes 'ds_${0..1}.t_order_${0..2}'
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use qail_shard::prelude::*;

#[derive(Parser)]
#[command(name = "qail-shard")]
#[command(version)]
#[command(about = "Route, rewrite and inspect sharded SQL statements", long_about = None)]
#[command(after_help = "EXAMPLES:
    qail-shard check --config shard.toml
    qail-shard route select.json --bind 42 --format json
    qail-shard nodes 'ds_${0..1}.t_order_${0..2}'")]
struct Cli {
    /// Rule configuration file (defaults to $QAIL_SHARD_CONFIG, then ~/.qail/shard.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration, then print its data nodes
    Check,
    /// Print the route units and rewritten SQL of a statement
    Route {
        /// JSON file holding the statement tree
        statement: PathBuf,

        /// Parameter bindings ($1, $2, etc.)
        #[arg(short, long, value_delimiter = ',')]
        bind: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Expand an inline expression
    Nodes {
        /// Expression such as ds_${0..1}.t_order_${0..2}
        expr: String,
    },
}

/// Statement file: either a bare statement tree or one with parameters and hints.
#[derive(Deserialize)]
#[serde(untagged)]
enum StatementFile {
    Full {
        statement: Statement,
        #[serde(default)]
        params: Vec<Value>,
        #[serde(default)]
        hints: Hints,
    },
    Bare(Statement),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Check => check(cli.config.as_deref()),
        Commands::Route {
            statement,
            bind,
            format,
        } => route_statement(cli.config.as_deref(), statement, bind, *format),
        Commands::Nodes { expr } => nodes(expr),
    };
    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("qail_shard=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qail_shard=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_runtime(path: Option<&Path>) -> anyhow::Result<(ShardConfig, ShardingRuntime)> {
    let config = ShardConfig::load(path).context("loading configuration")?;
    let runtime = config
        .runtime()
        .with_context(|| format!("validating {}", config.path.display()))?;
    Ok((config, runtime))
}

fn check(path: Option<&Path>) -> anyhow::Result<()> {
    let (config, runtime) = load_runtime(path)?;
    let rules = runtime.store().snapshot();

    println!("{} {}", "✓".green().bold(), config.path.display().to_string().white());
    println!();
    println!("{}", "Data sources:".cyan());
    for ds in rules.data_sources() {
        println!("  {}", ds);
    }

    if let Some(sharding) = rules.sharding() {
        println!();
        println!("{}", "Sharded tables:".cyan());
        for table in sharding.table_rules() {
            println!(
                "  {} {} {}",
                table.logic_table.yellow().bold(),
                "→".dimmed(),
                format!("{} data nodes", table.data_nodes.len()).dimmed()
            );
            for node in &table.data_nodes {
                println!("      {}", node);
            }
        }
        let broadcast: Vec<&str> = sharding.broadcast_tables().collect();
        if !broadcast.is_empty() {
            println!();
            println!("{} {}", "Broadcast tables:".cyan(), broadcast.join(", "));
        }
        if let Some(ds) = sharding.default_data_source() {
            println!("{} {}", "Default data source:".cyan(), ds);
        }
    }

    if let Some(rw) = rules.readwrite() {
        println!();
        println!("{}", "Read-write groups:".cyan());
        for group in rw.groups() {
            println!(
                "  {} write={} reads=[{}]",
                group.name.yellow(),
                group.write,
                group.reads.join(", ")
            );
        }
    }

    if let Some(shadow) = rules.shadow() {
        println!();
        println!("{}", "Shadow data sources:".cyan());
        for pair in shadow.data_sources() {
            println!("  {} {} {}", pair.production, "→".dimmed(), pair.shadow);
        }
    }
    Ok(())
}

fn route_statement(
    path: Option<&Path>,
    statement: &Path,
    bind: &[String],
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (_, runtime) = load_runtime(path)?;
    let content = std::fs::read_to_string(statement)
        .with_context(|| format!("reading {}", statement.display()))?;
    let file: StatementFile = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", statement.display()))?;
    let (stmt, mut params, hints) = match file {
        StatementFile::Full {
            statement,
            params,
            hints,
        } => (statement, params, hints),
        StatementFile::Bare(statement) => (statement, Vec::new(), Hints::default()),
    };
    if !bind.is_empty() {
        params = bind.iter().map(|b| parse_bind(b)).collect();
    }

    let ctx = StatementContext::new(stmt, params)?.with_hints(hints);
    let plan = runtime.prepare(&ctx)?;

    match format {
        OutputFormat::Json => {
            let out = json!({
                "class": plan.route.class,
                "units": plan.units,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => print_plan(&plan),
    }
    Ok(())
}

fn print_plan(plan: &ExecutionPlan) {
    println!(
        "{} {:?} {}",
        "Route:".green().bold(),
        plan.route.class,
        format!("({} units)", plan.units.len()).dimmed()
    );
    for (i, unit) in plan.units.iter().enumerate() {
        println!();
        let ds = &unit.unit.data_source;
        if ds.logical == ds.actual {
            println!("{} {}", format!("[{}]", i).dimmed(), ds.actual.yellow().bold());
        } else {
            println!(
                "{} {} {} {}",
                format!("[{}]", i).dimmed(),
                ds.logical.yellow(),
                "→".dimmed(),
                ds.actual.yellow().bold()
            );
        }
        println!("    {}", unit.sql.white());
        for (n, value) in unit.params.iter().enumerate() {
            println!("    ${} = {}", n + 1, value.to_string().cyan());
        }
    }
    if plan.units.is_empty() {
        println!("{}", "No shard matched; a read returns an empty result.".yellow());
    }
}

fn nodes(expr: &str) -> anyhow::Result<()> {
    let expanded = qail_shard::rule::inline::expand(expr)?;
    for node in &expanded {
        println!("{}", node);
    }
    println!("{}", format!("{} nodes", expanded.len()).dimmed());
    Ok(())
}

/// Bind value from the command line: integers, floats, booleans and `null`
/// are typed, everything else is a string.
fn parse_bind(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Int(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" | "NULL" => Value::Null,
        other => Value::String(other.to_string()),
    }
}
