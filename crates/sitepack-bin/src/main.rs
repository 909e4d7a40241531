use clap::Parser;
use indicatif::{MultiProgress, ProgressDrawTarget};
use miette::IntoDiagnostic;
use once_cell::sync::Lazy;
use tracing_subscriber::{filter::LevelFilter, util::SubscriberInitExt, EnvFilter};

mod commands;
mod writer;

/// Returns a global instance of [`indicatif::MultiProgress`].
///
/// Logging is routed through this instance so log lines never tear through a
/// progress bar that is being drawn.
pub fn global_multi_progress() -> MultiProgress {
    static GLOBAL_MP: Lazy<MultiProgress> = Lazy::new(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(20));
        mp
    });
    GLOBAL_MP.clone()
}

/// Pack static sites and deploy them to a sitepack server
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase logging verbosity, may be repeated
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Pack a site directory and deploy it
    Deploy(commands::deploy::Opt),

    /// Pack a site directory into a local archive and manifest
    Pack(commands::pack::Opt),
}

/// Entry point of the `sitepack` cli.
#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_filter.into())
        .from_env()
        .into_diagnostic()?
        // connection pool logs are very noisy
        .add_directive("hyper_util=info".parse().into_diagnostic()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer::IndicatifWriter::new(global_multi_progress()))
        .without_time()
        .finish()
        .try_init()
        .into_diagnostic()?;

    match cli.command {
        Commands::Deploy(opt) => commands::deploy::deploy(opt).await,
        Commands::Pack(opt) => commands::pack::pack(opt),
    }
}
