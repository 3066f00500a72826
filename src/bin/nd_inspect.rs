//! Binary entry point for inspecting flushed ndstore images.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use ndstore::storage::{Database, DatabaseOptions, DatabaseStats, NdConfig, ROOT_SLOTS};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "nd-inspect",
    version,
    about = "Inspect a flushed ndstore image",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        env = "ND_CONFIG",
        value_name = "FILE",
        help = "TOML configuration supplying the image path"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocator statistics.
    Stats {
        #[arg(value_name = "IMAGE")]
        image: Option<PathBuf>,
    },
    /// Root pointer slots.
    Roots {
        #[arg(value_name = "IMAGE")]
        image: Option<PathBuf>,
    },
    /// Effective configuration after defaults are applied.
    Config,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct RootsReport {
    roots: Vec<String>,
}

type CliResult<T> = std::result::Result<T, Box<dyn Error>>;

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run(cli: Cli) -> CliResult<()> {
    let config = match cli.config.as_ref() {
        Some(path) => NdConfig::load(path)?,
        None => NdConfig::default(),
    };
    match cli.command {
        Command::Stats { image } => {
            let db = open(config, image)?;
            print_stats(cli.format, &db.stats())
        }
        Command::Roots { image } => {
            let db = open(config, image)?;
            let roots = (0..ROOT_SLOTS)
                .map(|slot| db.root(slot).map(|addr| addr.to_string()))
                .collect::<ndstore::Result<Vec<_>>>()?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&RootsReport { roots })?)
                }
                OutputFormat::Text => {
                    for (slot, root) in roots.iter().enumerate() {
                        println!("  root[{slot}] {root}");
                    }
                }
            }
            Ok(())
        }
        Command::Config => {
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Text => print!("{}", config.to_toml_string()?),
            }
            Ok(())
        }
    }
}

fn open(config: NdConfig, image: Option<PathBuf>) -> CliResult<Database> {
    let mut options: DatabaseOptions = config.into_options();
    if let Some(image) = image {
        options.path = Some(image);
    }
    if options.path.is_none() {
        return Err("no image given; pass IMAGE or set [storage].path in --config".into());
    }
    Ok(Database::open(options)?)
}

fn print_stats(format: OutputFormat, stats: &DatabaseStats) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(stats)?),
        OutputFormat::Text => {
            print_field("Image", format_bytes(stats.image_bytes));
            print_field("Live blocks", stats.live_blocks);
            print_field("Live bytes", format_bytes(stats.live_bytes));
            print_field("Free blocks", stats.free_blocks);
            print_field("Free bytes", format_bytes(stats.free_bytes));
        }
    }
    Ok(())
}

fn print_field(name: &str, value: impl std::fmt::Display) {
    println!("  {:.<30} {}", name, value);
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
