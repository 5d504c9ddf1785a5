//! Command-line entry point for drillcheck.

use std::path::PathBuf;
use std::process;

use clap::{ArgGroup, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "drillcheck",
    version,
    about = "Answer evaluation and grading for data-analysis drills"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a free-text answer to a concept challenge
    #[command(group(ArgGroup::new("input").required(true).args(["answer", "answer_file"])))]
    Concept {
        /// Challenge-set TOML file
        #[arg(long)]
        challenge_set: PathBuf,

        /// Concept challenge id
        #[arg(long)]
        id: u32,

        /// Answer text
        #[arg(long)]
        answer: Option<String>,

        /// Read the answer from a file
        #[arg(long)]
        answer_file: Option<PathBuf>,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Record missed and covered terms in this review store
        #[arg(long)]
        review_store: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check table and column references of a query against a challenge schema
    LintSql {
        /// Challenge-set TOML file
        #[arg(long)]
        challenge_set: PathBuf,

        /// SQL challenge id
        #[arg(long)]
        id: u32,

        /// Query to check
        #[arg(long)]
        sql: String,

        /// Exit code 1 if any issue is found
        #[arg(long)]
        strict: bool,
    },

    /// Compare two JSON result files
    Compare {
        /// Expected rows (JSON)
        #[arg(long)]
        expected: PathBuf,

        /// Actual rows (JSON)
        #[arg(long)]
        actual: PathBuf,

        /// Ordering keys, e.g. "revenue:desc,country"
        #[arg(long)]
        order_by: Option<String>,

        /// Column names used to resolve ordering keys
        #[arg(long)]
        columns: Option<String>,

        /// Absolute numeric tolerance
        #[arg(long)]
        tolerance: Option<f64>,
    },

    /// Grade a submissions file against a challenge set
    Grade {
        /// Challenge-set TOML file
        #[arg(long)]
        challenge_set: PathBuf,

        /// Submissions JSON: {"concept": {id: answer}, "sql": {...}, "python": {...}}
        #[arg(long)]
        submissions: PathBuf,

        /// Output directory (defaults to runner.output_dir)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List concept terms due for review
    Review {
        /// Review store JSON file
        #[arg(long)]
        store: PathBuf,

        /// List every scheduled term, due or not
        #[arg(long)]
        all: bool,

        /// Remove every scheduled term
        #[arg(long)]
        clear: bool,
    },

    /// Validate challenge-set TOML files
    Validate {
        /// Path to challenge-set file or directory
        #[arg(long)]
        challenge_set: PathBuf,
    },

    /// Create starter config and example challenge set
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("drillcheck=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Concept {
            challenge_set,
            id,
            answer,
            answer_file,
            format,
            review_store,
            config,
        } => {
            commands::concept::execute(
                challenge_set,
                id,
                answer,
                answer_file,
                format,
                review_store,
                config,
            )
            .await
        }
        Commands::LintSql {
            challenge_set,
            id,
            sql,
            strict,
        } => commands::lint_sql::execute(challenge_set, id, sql, strict),
        Commands::Compare {
            expected,
            actual,
            order_by,
            columns,
            tolerance,
        } => commands::compare::execute(expected, actual, order_by, columns, tolerance),
        Commands::Grade {
            challenge_set,
            submissions,
            output,
            config,
        } => commands::grade::execute(challenge_set, submissions, output, config).await,
        Commands::Review { store, all, clear } => commands::review::execute(store, all, clear),
        Commands::Validate { challenge_set } => commands::validate::execute(challenge_set),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
