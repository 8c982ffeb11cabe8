use augur::commands::{self, Report, ValidateTarget, EXIT_FAILED};
use augur::{bootstrap, obs};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "augur")]
#[command(
    about = "Answer questions about OHLCV market data with verified numbers.",
    version,
    arg_required_else_help = true
)]
#[command(
    after_help = "Examples:\n  augur --config configs/augur.toml ask \"How did Mondays close in 2024?\"\n  augur run --steps configs/steps/monday_count.json\n  augur validate --query \"SELECT close FROM ohlcv_candles\"\n  augur verify --result out.json --summary \"12 of 52 Mondays closed down\"\n"
)]
struct Cli {
    /// Config file path (TOML). If omitted, uses env AUGUR_CONFIG, then configs/augur.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this host:port.
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a natural-language question end to end.
    Ask { question: String },
    /// Validate and execute a JSON step list without a language model.
    Run {
        #[arg(long)]
        steps: PathBuf,
    },
    /// Validate a raw query or a step list without executing it.
    Validate {
        #[arg(long, conflicts_with = "steps", required_unless_present = "steps")]
        query: Option<String>,
        #[arg(long)]
        steps: Option<PathBuf>,
        /// Row count the question implies, for the plausibility stage.
        #[arg(long)]
        expected_rows: Option<u64>,
    },
    /// Check every number in a summary against a result JSON document.
    Verify {
        #[arg(long)]
        result: PathBuf,
        #[arg(long)]
        summary: String,
        /// Overrides `[verifier].tolerance`.
        #[arg(long)]
        tolerance: Option<f64>,
    },
}

fn main() {
    let cli = Cli::parse();

    // `verify` works without a config file; everything else needs one.
    let loaded = match (&cli.command, bootstrap::load(cli.config.as_deref())) {
        (_, Ok(loaded)) => Some(loaded),
        (Command::Verify { .. }, Err(_)) if cli.config.is_none() => None,
        (_, Err(err)) => exit_with(&err),
    };

    let logging = loaded.as_ref().and_then(|l| l.config.logging.as_ref());
    if let Err(err) = obs::init_tracing(logging) {
        exit_with(&err);
    }
    if let Err(err) = obs::init_metrics(cli.metrics_addr.as_deref()) {
        exit_with(&err);
    }
    if let Some(loaded) = &loaded {
        tracing::info!(config = %loaded.path.display(), symbol = %loaded.settings.symbol, "config loaded");
    }

    let name = command_name(&cli.command);
    let result = match (cli.command, loaded.as_ref()) {
        (Command::Ask { question }, Some(loaded)) => commands::ask(loaded, &question),
        (Command::Run { steps }, Some(loaded)) => commands::run(loaded, &steps),
        (
            Command::Validate {
                query,
                steps,
                expected_rows,
            },
            Some(loaded),
        ) => match (query.as_deref(), steps.as_deref()) {
            (Some(sql), _) => commands::validate(loaded, ValidateTarget::Query(sql), expected_rows),
            (None, Some(path)) => commands::validate(loaded, ValidateTarget::Steps(path), expected_rows),
            (None, None) => Err("validate needs --query or --steps".to_string()),
        },
        (
            Command::Verify {
                result,
                summary,
                tolerance,
            },
            loaded,
        ) => {
            let tolerance = tolerance
                .or_else(|| loaded.map(|l| l.settings.tolerance))
                .unwrap_or(DEFAULT_TOLERANCE);
            commands::verify(&result, &summary, tolerance)
        }
        (_, None) => Err("missing config".to_string()),
    };

    let label = match &result {
        Ok(report) => report.exit_code.to_string(),
        Err(_) => EXIT_FAILED.to_string(),
    };
    metrics::counter!("augur.cli.commands_total", "command" => name, "exit" => label).increment(1);

    match result {
        Ok(Report { json, exit_code }) => {
            println!(
                "{}",
                serde_json::to_string(&json)
                    .unwrap_or_else(|_| "{\"status\":\"error\",\"error\":\"json\"}".to_string())
            );
            std::process::exit(exit_code);
        }
        Err(err) => exit_with(&err),
    }
}

const DEFAULT_TOLERANCE: f64 = 1e-6;

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Ask { .. } => "ask",
        Command::Run { .. } => "run",
        Command::Validate { .. } => "validate",
        Command::Verify { .. } => "verify",
    }
}

fn exit_with(err: &str) -> ! {
    eprintln!("error: {err}");
    std::process::exit(EXIT_FAILED);
}
