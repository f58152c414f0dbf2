use clap::{Args, Parser, Subcommand};
use procwatch_core::{CommandDescriptor, ProcwatchConfig};
use procwatch_runner::{CommandRunner, PidWatcher};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "procwatch")]
#[command(about = "Run commands with a timeout and wait on foreign processes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with [run] and [wait] defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command and print its output
    Run(RunArgs),

    /// Wait for a process that is not our child to exit
    WaitPid {
        /// Process ID
        pid: u32,

        /// Interval between probes in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Give up after this many milliseconds (0 waits forever)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Kill the command after this many milliseconds (0 disables)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Working directory
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Extra environment variable, KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_env)]
    envs: Vec<(String, String)>,

    /// Print a JSON report instead of the raw output
    #[arg(long)]
    json: bool,

    /// Program to run
    program: String,

    /// Program arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => ProcwatchConfig::from_file(path)?,
        None => ProcwatchConfig::default(),
    };

    match cli.command {
        Commands::Run(args) => {
            let mut options = config.run;
            if let Some(ms) = args.timeout_ms {
                options.timeout = Duration::from_millis(ms);
            }

            match which::which(&args.program) {
                Ok(path) => debug!(program = %args.program, path = %path.display(), "Resolved program"),
                Err(e) => warn!(program = %args.program, error = %e, "Program not found on PATH"),
            }

            let descriptor = build_descriptor(args.program, args.args, args.dir, args.envs);
            let report = CommandRunner::new().run_report(&descriptor, &options).await;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                if !report.output.is_empty() {
                    println!("{}", report.output);
                }
                if let Some(error) = &report.error {
                    eprintln!("❌ {}", error);
                }
            }

            if !report.success {
                process::exit(1);
            }
        }
        Commands::WaitPid {
            pid,
            poll_interval_ms,
            timeout_ms,
        } => {
            let mut options = config.wait;
            if let Some(ms) = poll_interval_ms {
                options.poll_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = timeout_ms {
                options.timeout = Duration::from_millis(ms);
            }

            if let Err(e) = PidWatcher::new().wait_for_exit(pid, &options).await {
                eprintln!("❌ {}", e);
                process::exit(1);
            }
            println!("✅ Process {} exited", pid);
        }
    }

    Ok(())
}

fn build_descriptor(
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
) -> CommandDescriptor {
    let mut descriptor = CommandDescriptor::new(program).args(args);
    if let Some(dir) = dir {
        descriptor = descriptor.current_dir(dir);
    }
    envs.into_iter()
        .fold(descriptor, |descriptor, (key, value)| descriptor.env(key, value))
}
