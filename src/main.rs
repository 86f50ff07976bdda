mod app;
mod bookmarks;
mod config;
mod document;
mod engine;
mod error;
mod frame;
mod ingest;
mod ledger;
mod line_list;
mod match_index;
mod pattern;
mod renumber;
mod scheduler;
mod tags;
mod tasks;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use document::{Document, RopeDocument};
use engine::{Admission, Engine, Notification, Request};
use ledger::Change;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tasks::ScanRange;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "trawl", version, about = "Log and trace browser for the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// File to open, or `-` to read standard input
    file: Option<PathBuf>,

    /// Write logs to stderr instead of the log file
    #[arg(long, global = true)]
    log_stderr: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the config file in $EDITOR (default: vi)
    Config,
    /// Build a match list without the browser and print it
    Grep {
        file: PathBuf,
        /// Pattern to add to the list; may be repeated
        #[arg(short = 'e', long = "pattern", required = true)]
        patterns: Vec<String>,
        /// Treat patterns as regular expressions
        #[arg(long)]
        regex: bool,
        /// Match case-sensitively
        #[arg(long = "case")]
        case_sensitive: bool,
        /// Only search up to and including this line
        #[arg(long, value_name = "LINE", conflicts_with = "below")]
        above: Option<usize>,
        /// Only search from this line on
        #[arg(long, value_name = "LINE")]
        below: Option<usize>,
        /// Print line numbers without text
        #[arg(long)]
        line_numbers_only: bool,
    },
}

fn init_logging(cfg: &Config, to_stderr: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env("TRAWL_LOG")
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .init();
        return Ok(());
    }

    let Some(path) = cfg.log_file.as_ref() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

struct GrepArgs {
    file: PathBuf,
    patterns: Vec<String>,
    regex: bool,
    case_sensitive: bool,
    range: ScanRange,
    line_numbers_only: bool,
}

fn run_grep(cfg: &Config, args: GrepArgs) -> Result<()> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let doc = RopeDocument::from_text(&text);
    let mut engine = Engine::new(cfg.scheduler_policy(), &cfg.tags, &cfg.frame)?;

    let patterns = args
        .patterns
        .into_iter()
        .map(|p| pattern::SearchParams::new(p, args.regex, args.case_sensitive))
        .collect();
    let request = Request::Search {
        patterns,
        change: Change::Add,
        range: args.range,
    };
    match engine.request(&doc, request, Instant::now())? {
        Admission::Started => {
            for event in engine.drive(&doc, Instant::now(), usize::MAX) {
                match event {
                    Notification::Warning(msg) => tracing::warn!(%msg, "grep"),
                    Notification::Aborted { kind } => anyhow::bail!("{} aborted", kind.label()),
                    _ => {}
                }
            }
        }
        other => tracing::debug!(?other, "nothing to search"),
    }

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let lines = engine.lines().to_vec();
    for line in lines {
        if args.line_numbers_only {
            writeln!(out, "{line}")?;
            continue;
        }
        let text = doc.line_text(line).unwrap_or_default();
        match engine.frame_marker(&doc, line) {
            Some(marker) if !marker.frm.is_empty() => {
                writeln!(out, "{line}\t[{}:{}]\t{text}", marker.frm, marker.val)?
            }
            Some(marker) => writeln!(out, "{line}\t[{}]\t{text}", marker.val)?,
            None => writeln!(out, "{line}\t{text}")?,
        }
    }
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Config) = cli.command {
        return config::open_config_in_editor();
    }

    let cfg = config::load_config()?;
    init_logging(&cfg, cli.log_stderr)?;

    if let Some(Commands::Grep {
        file,
        patterns,
        regex,
        case_sensitive,
        above,
        below,
        line_numbers_only,
    }) = cli.command
    {
        let range = match (above, below) {
            (Some(line), _) => ScanRange::Above(line),
            (_, Some(line)) => ScanRange::Below(line),
            _ => ScanRange::Whole,
        };
        return run_grep(
            &cfg,
            GrepArgs {
                file,
                patterns,
                regex,
                case_sensitive,
                range,
                line_numbers_only,
            },
        );
    }

    let file = cli
        .file
        .ok_or_else(|| anyhow::anyhow!("No file provided. Try `trawl <file.log>` or `trawl -`."))?;
    tracing::info!(file = %file.display(), "starting browser");
    app::run_app(file, cfg)
}
