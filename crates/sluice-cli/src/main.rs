mod commands;

use clap::{Parser, Subcommand};
use commands::{Context, Failure};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "sluice",
    version,
    about = "Crash-aware staging of dependency updates for live directory trees"
)]
struct Cli {
    /// Path to the Sluice configuration file.
    #[arg(long, default_value = "sluice.toml", global = true)]
    config: PathBuf,

    /// Path to the Sluice state store directory.
    #[arg(long, default_value = "~/.local/share/sluice", global = true)]
    store: String,

    /// Identity that owns the stage (default: $SLUICE_OWNER, then $USER).
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a stage: copy the target into a fresh working copy.
    Create,
    /// Stage package requirements into the working copy.
    Require {
        /// Stage ID printed by `create`.
        id: String,
        /// Runtime requirements (`vendor/package[:constraint]`).
        packages: Vec<String>,
        /// Development requirement; may be repeated.
        #[arg(long = "dev", value_name = "PACKAGE")]
        dev: Vec<String>,
    },
    /// Copy the working copy over the target directory.
    Apply {
        /// Stage ID.
        id: String,
    },
    /// Run post-apply checks. Run this in a new invocation after `apply`.
    PostApply {
        /// Stage ID.
        id: String,
    },
    /// Delete the working copy and release the stage lock.
    Destroy {
        /// Stage ID. May be omitted with --force.
        id: Option<String>,
        /// Destroy a stage owned by someone else.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Reason shown to the owner when they next use the stage.
        #[arg(long)]
        message: Option<String>,
    },
    /// Run readiness checks without changing anything.
    Status,
    /// Show the current stage state.
    Inspect,
    /// Remove the failure marker once the target has been restored.
    ClearMarker,
    /// Verify store integrity.
    VerifyStore,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SLUICE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let store_path = expand_tilde(&cli.store);
    let json = cli.json;

    let result = match cli.command {
        Commands::VerifyStore => commands::verify_store::run(&store_path, json),
        command => Context::load(&cli.config, &store_path, cli.owner, json)
            .and_then(|ctx| dispatch(&ctx, command)),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            failure.report(json);
            ExitCode::from(failure.code)
        }
    }
}

fn dispatch(ctx: &Context, command: Commands) -> Result<u8, Failure> {
    match command {
        Commands::Create => commands::create::run(ctx),
        Commands::Require { id, packages, dev } => commands::require::run(ctx, &id, &packages, &dev),
        Commands::Apply { id } => commands::apply::run(ctx, &id),
        Commands::PostApply { id } => commands::post_apply::run(ctx, &id),
        Commands::Destroy { id, force, message } => {
            commands::destroy::run(ctx, id.as_deref(), force, message.as_deref())
        }
        Commands::Status => commands::status::run(ctx),
        Commands::Inspect => commands::inspect::run(ctx),
        Commands::ClearMarker => commands::clear_marker::run(ctx),
        Commands::VerifyStore => commands::verify_store::run(ctx.layout.root(), ctx.json),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
