//! symsync - replay scripted symbol-tree edits and print the semantic events

use clap::Parser;
use clap::Subcommand;
use color_eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use symsync_cli::Scenario;
use symsync_core::MirrorConfig;
use tracing::Level;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "symsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbosity level, logged to stderr
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a scenario file and print one JSON line per semantic event
    Replay {
        /// Scenario TOML file
        scenario: PathBuf,

        /// Mirror configuration overriding the scenario's `[mirror]` table
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the indexed types after the last step
        #[arg(long)]
        summary: bool,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Replay {
            scenario,
            config,
            summary,
        } => {
            let mut loaded = Scenario::load(&scenario)?;
            if let Some(path) = config {
                loaded.mirror = MirrorConfig::load(&path)?;
            }
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let written = symsync_cli::run(&loaded, &mut out, summary)?;
            out.flush()?;
            info!(events = written, "replay finished");
        }
    }
    Ok(())
}
