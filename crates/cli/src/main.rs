mod generate;
mod serve;
mod stress;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Document approval workflow service.
#[derive(Parser)]
#[command(name = "docflow", version, about = "Document approval workflow service")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server with the background workers
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
        /// Path to a TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Do not start the SUBMIT/APPROVE workers
        #[arg(long)]
        no_workers: bool,
    },

    /// Race concurrent approvals against a fresh in-memory document
    Stress {
        /// Number of concurrent workers
        #[arg(long, default_value = "5")]
        threads: usize,
        /// Total approval attempts
        #[arg(long, default_value = "10")]
        attempts: usize,
    },

    /// Create documents through a running server's HTTP API
    Generate {
        /// Number of documents to create
        #[arg(long, default_value = "10")]
        count: usize,
        /// Document collection endpoint
        #[arg(long, default_value = generate::DEFAULT_URL)]
        url: String,
        /// Parallel requests in flight
        #[arg(long, default_value = "4")]
        concurrency: usize,
        /// API key sent as X-API-Key
        #[arg(long, env = "DOCFLOW_API_KEY")]
        api_key: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    match cli.command {
        Commands::Serve {
            port,
            config,
            no_workers,
        } => {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    report_error(
                        &format!("failed to create tokio runtime: {}", e),
                        cli.output,
                        cli.quiet,
                    );
                    process::exit(1);
                }
            };
            let options = serve::ServeOptions {
                port,
                config,
                workers: !no_workers,
            };
            if let Err(e) = rt.block_on(serve::start_server(options)) {
                report_error(&format!("server error: {}", e), cli.output, cli.quiet);
                process::exit(1);
            }
        }
        Commands::Stress { threads, attempts } => {
            stress::cmd_stress(threads, attempts, cli.output, cli.quiet);
        }
        Commands::Generate {
            count,
            url,
            concurrency,
            api_key,
        } => {
            let options = generate::GenerateOptions {
                count,
                url,
                concurrency,
                api_key,
            };
            generate::cmd_generate(&options, cli.output, cli.quiet);
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins; otherwise `info`, or
/// `warn` under `--quiet`. Logs go to stderr so stdout stays parseable.
fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Report an error message respecting output format and quiet flag.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
