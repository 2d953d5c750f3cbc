//! # paxcat CLI
//!
//! Archive a directory tree into `<output>.pax.gz` and write its checksum
//! catalog to `<output>.txt` in a single pass.
//!
//! ## Usage
//! ```bash
//! # Back up a home directory
//! paxcat /home/alice /backups/alice
//!
//! # Show every directory and entry as it is processed
//! paxcat --verbose /home/alice /backups/alice
//!
//! # Deterministic order, faster compression, then check the result
//! paxcat --sort --level 6 --verify /home/alice /backups/alice
//! ```

use clap::Parser;
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use paxcat::{BackupReport, PaxcatBuilder, Result, VerificationReport, WalkEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// paxcat - single-pass PAX archive plus SHA-1 catalog
#[derive(Parser)]
#[command(name = "paxcat")]
#[command(version)]
#[command(about = "Archive a directory into a gzip PAX tar and write a SHA-1 catalog of its contents")]
#[command(long_about = None)]
struct Cli {
    /// Print every processed directory and entry
    #[arg(short, long)]
    verbose: bool,

    /// Process each directory's entries in file-name order
    #[arg(long)]
    sort: bool,

    /// Gzip compression level
    #[arg(long, default_value_t = 9, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,

    /// Render catalog timestamps in UTC
    #[arg(long)]
    utc: bool,

    /// Re-read the archive and catalog afterwards and check them against each other
    #[arg(long)]
    verify: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Directory to archive
    dir: PathBuf,

    /// Output prefix; writes <output>.pax.gz and <output>.txt
    output: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over the verbosity default
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let spinner = if cli.verbose || cli.json {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Some(pb)
    };

    let paxcat = PaxcatBuilder::new()
        .sort_entries(cli.sort)
        .compression_level(cli.level)
        .utc_timestamps(cli.utc)
        .on_event(event_printer(cli.verbose, cli.json, spinner.clone()))
        .build(&cli.dir, &cli.output)?;
    if let Some(pb) = &spinner {
        pb.enable_steady_tick(Duration::from_millis(100));
    }

    let plan = paxcat.plan();
    if !cli.json {
        say(&spinner, format!("Reading contents of {}", plan.source_dir.display()));
        say(&spinner, format!("Writing to archive at {}", plan.archive_path.display()));
        say(&spinner, format!("Writing to catalog at {}", plan.catalog_path.display()));
    }

    let result = paxcat.run();
    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    let report = result?;

    let verification = if cli.verify {
        Some(paxcat.verify()?)
    } else {
        None
    };

    if cli.json {
        let mut value = serde_json::to_value(&report)?;
        if let Some(verification) = &verification {
            value["verification"] = serde_json::to_value(verification)?;
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_report(&report);
        if let Some(verification) = &verification {
            print_verification(verification);
        }
    }

    match verification {
        Some(v) if !v.is_valid() => Err(paxcat::PaxcatError::Verification(format!(
            "{} issue(s) between archive and catalog",
            v.issues.len()
        ))),
        _ => Ok(()),
    }
}

/// Build the walk event callback
///
/// Skip notices are always shown; everything else only in verbose mode.
/// With JSON output, stdout carries nothing but the report.
fn event_printer(verbose: bool, json: bool, spinner: Option<ProgressBar>) -> paxcat::EventCallback {
    Arc::new(move |event: &WalkEvent| match event {
        WalkEvent::Skipped(path) => {
            let notice = format!(" {} {}", "Skipping non-file".yellow(), path.display());
            if json {
                eprintln!("{}", notice);
            } else {
                say(&spinner, notice);
            }
        }
        _ if verbose => match event {
            WalkEvent::DirectoryStarted(dir) => println!("Processing directory {}", dir.display()),
            WalkEvent::Symlink(path) => println!(" {} [symlink]", entry_name(path)),
            WalkEvent::DirectoryQueued(path) => println!(" {} [directory; queued]", entry_name(path)),
            WalkEvent::File { path, .. } => println!(" {}", entry_name(path)),
            WalkEvent::Skipped(_) => {}
        },
        WalkEvent::DirectoryStarted(dir) => {
            if let Some(pb) = &spinner {
                pb.set_message(format!("Processing {}", dir.display()));
            }
        }
        _ => {}
    })
}

/// Final component of an entry path, as listed under its directory
fn entry_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Print a line without tearing the spinner
fn say(spinner: &Option<ProgressBar>, line: String) {
    match spinner {
        Some(pb) => pb.println(line),
        None => println!("{}", line),
    }
}

fn print_report(report: &BackupReport) {
    let stats = &report.stats;
    println!("{}", "Done!".green().bold());
    println!("  Files: {}", stats.files.to_string().cyan());
    println!("  Directories: {}", stats.directories.to_string().cyan());
    println!("  Symlinks: {}", stats.symlinks.to_string().cyan());
    if stats.skipped > 0 {
        println!("  Skipped: {}", stats.skipped.to_string().yellow());
    }
    println!("  Size: {}", format_bytes(stats.bytes).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.elapsed_ms)).to_string().cyan()
    );
}

fn print_verification(report: &VerificationReport) {
    println!("\n{}", "Verification Report:".bold());
    println!("  Members checked: {}", report.members_checked);
    println!("  Catalog entries: {}", report.catalog_entries);
    if report.is_valid() {
        println!("  Status: {}", "✓ Valid".green());
    } else {
        println!("  Status: {}", "✗ Invalid".red());
        for issue in &report.issues {
            println!("    {}", issue.to_string().red());
        }
    }
}

/// Format bytes as human-readable size
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
