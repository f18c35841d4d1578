//! Redoubt CLI: verify and install signed, attested release artifacts.
//!
//! Fetch a release, check its manifest signature, content digest, and
//! provenance, and only then put it in place.

mod commands;
#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
mod config;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;

/// Redoubt: verify and install signed, attested release artifacts.
///
/// Nothing is installed unless the `SHA256SUMS` signature, the artifact
/// digest, and the provenance statement all check out. Rejections exit
/// with a code per category: 10 signature, 11 manifest, 12 digest,
/// 13 provenance, 14 network, 15 timeout.
#[derive(Parser)]
#[command(name = "redoubt", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (repeat for more detail: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output logs as JSON (for machine consumption).
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Fetch, verify, and install a release artifact.
    Install(commands::install::InstallArgs),
    /// Verify release material already on disk, without installing.
    Verify(commands::verify::VerifyArgs),
    /// Display a manifest, signature, trust bundle, or provenance document.
    Inspect(commands::inspect::InspectArgs),
    /// Generate a signing key and print its trust bundle entry.
    Keygen(commands::keygen::KeygenArgs),
    /// Write a signed `SHA256SUMS` for a set of release files.
    Sign(commands::sign::SignArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Install(args) => commands::install::execute(args, config_path).await,
        Commands::Verify(args) => commands::verify::execute(args, config_path),
        Commands::Inspect(args) => commands::inspect::execute(&args),
        Commands::Keygen(args) => commands::keygen::execute(&args),
        Commands::Sign(args) => commands::sign::execute(&args),
    }
}
