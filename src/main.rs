//! Querysmith command-line entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use querysmith::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

/// Querysmith: natural-language questions to validated search DSL
#[derive(Parser, Debug)]
#[command(name = "querysmith")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable JSON logging format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a question into a search DSL
    Compile {
        /// Natural-language question
        query: String,
        /// Logical index to query
        #[arg(short, long, default_value = "communications")]
        index: String,
        /// Free-text context for the question
        #[arg(long)]
        context: Option<String>,
        /// Timezone for relative dates (UTC, Z or +HH:MM)
        #[arg(short, long)]
        timezone: Option<String>,
        /// Execute the query and summarize the results
        #[arg(short, long)]
        execute: bool,
        /// Print this run's pipeline metrics (Prometheus text) to stderr
        #[arg(long)]
        metrics: bool,
    },
    /// Refine a generated DSL with analyst feedback
    Refine {
        /// Original question
        query: String,
        /// Logical index to query
        #[arg(short, long, default_value = "communications")]
        index: String,
        /// What was wrong with the previous result
        #[arg(short, long)]
        feedback: String,
        /// File containing the previously generated DSL (JSON)
        #[arg(short, long)]
        dsl: PathBuf,
    },
    /// Run the security validator on a DSL file
    Validate {
        /// DSL file (JSON)
        file: PathBuf,
        /// Also check field names against this index's schema
        #[arg(short, long)]
        index: Option<String>,
    },
    /// Resolve a relative time phrase
    ResolveTime {
        /// Phrase such as "last week" or "past 3 days"
        phrase: String,
        /// Timezone (UTC, Z or +HH:MM)
        #[arg(short, long)]
        timezone: Option<String>,
    },
    /// List example questions for an index
    Examples {
        #[arg(short, long, default_value = "communications")]
        index: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let config = if let Some(path) = &args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    match args.command {
        Command::Compile {
            query,
            index,
            context,
            timezone,
            execute,
            metrics,
        } => cli::run_compile(config, query, index, context, timezone, execute, metrics).await,
        Command::Refine {
            query,
            index,
            feedback,
            dsl,
        } => cli::run_refine(config, query, index, feedback, &dsl).await,
        Command::Validate { file, index } => cli::run_validate(&config, &file, index),
        Command::ResolveTime { phrase, timezone } => cli::run_resolve_time(phrase, timezone),
        Command::Examples { index } => cli::run_examples(index),
    }
}
