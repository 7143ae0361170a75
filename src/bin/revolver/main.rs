mod inspect;
mod rotate;

use anyhow::{anyhow, Context as _, Result};
use clap::Parser as _;
use revolver::config::{Config, DEFAULT_CONFIG_FILE};
use revolver::pcsc::{PcscReader, PcscService};
use revolver::service::{Reader as _, SeService as _, ServiceHandle};
use std::path::PathBuf;
use tracing::{debug, trace, trace_span};

#[derive(clap::Parser, Debug)]
struct Args {
    /// Increase log level.
    #[arg(short, long, action=clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log level.
    #[arg(short, long, action=clap::ArgAction::Count)]
    quiet: u8,

    /// Config file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Only use a specific reader (from list-readers).
    #[arg(short, long)]
    reader: Option<String>,

    /// Command.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run one rotation pass over every reader.
    Rotate,

    /// List connected readers.
    ListReaders,

    /// List installed profiles, without changing anything.
    Profiles,

    /// List pending notifications, without changing anything.
    Notifications,
}

impl Command {
    pub fn run(&self, args: &Args) -> Result<()> {
        let config = Config::load(&args.config)?;
        trace!(?config, "Loaded config");

        let handle = ServiceHandle::new();
        let service = handle
            .get_or_connect(PcscService::establish)
            .context("Couldn't connect to PC/SC")?;

        match self {
            Self::ListReaders => list_readers(&service),
            Self::Rotate => rotate::rotate(&config, select_readers(&service, &args.reader)?),
            Self::Profiles => inspect::profiles(&config, select_readers(&service, &args.reader)?),
            Self::Notifications => {
                inspect::notifications(&config, select_readers(&service, &args.reader)?)
            }
        }
    }
}

fn list_readers(service: &PcscService) -> Result<()> {
    let span = trace_span!("list_readers");
    let _enter = span.enter();

    for name in service.reader_names()? {
        println!("{}", name);
    }
    Ok(())
}

fn select_readers(service: &PcscService, name_: &Option<String>) -> Result<Vec<PcscReader>> {
    let span = trace_span!("select_readers", ?name_);
    let _enter = span.enter();

    let mut readers = service.readers()?;
    if let Some(name) = name_ {
        debug!(%name, "Using named reader");
        readers.retain(|r| r.name() == name.as_str());
        if readers.is_empty() {
            return Err(anyhow!("No reader named {:?}", name));
        }
    } else if readers.is_empty() {
        return Err(anyhow!("No supported reader connected"));
    }
    Ok(readers)
}

fn init_logging(args: &Args) {
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_max_level(match (2 + args.verbose).saturating_sub(args.quiet) {
            0 => tracing::Level::ERROR,
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            3 => tracing::Level::DEBUG,
            4.. => tracing::Level::TRACE,
        })
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);
    trace!(?args, "Starting up");
    args.command.run(&args)
}
