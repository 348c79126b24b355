use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod pick_open_reference_otus;

#[derive(Subcommand)]
enum Commands {
    PickOpenReferenceOtus(pick_open_reference_otus::PickOpenReferenceOtusArgs),
}

/// Open-reference OTU picking on top of the QIIME 1 clustering scripts
#[derive(Parser)]
#[clap(version)]
struct Cli {
    /// Log debug messages (RUST_LOG takes precedence)
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::PickOpenReferenceOtus(args) => {
            pick_open_reference_otus::pick_open_reference_otus(args)?;
        }
    }

    Ok(())
}
