//! Main entry point for the ziplinter CLI application.
//!
//! Loads an archive from the local filesystem or an HTTP URL, analyzes
//! its structure and prints the range map and anomalies.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ziplinter::{Cli, HttpRangeReader, LocalFileReader, Report, parse_reader};

/// Application entry point.
///
/// Parses command-line arguments, loads the archive from wherever it
/// lives and renders the report.
#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let report = if cli.is_http_url() {
        // Remote archive, fetched via HTTP Range requests
        let reader = HttpRangeReader::new(cli.file.clone()).await?;
        let report = parse_reader(&reader).await?;

        if !cli.quiet && !cli.json {
            eprintln!(
                "Total bytes transferred: {}",
                format_size(reader.transferred_bytes())
            );
        }
        report
    } else {
        let reader = LocalFileReader::new(Path::new(&cli.file))?;
        parse_reader(&reader).await?
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, cli.anomalies_only);
    }

    if cli.strict && !report.is_consistent() {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

/// Install a stderr subscriber honoring `RUST_LOG`, falling back to the
/// verbosity requested on the command line.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print the report as text.
///
/// Ranges are listed one per line with their size; anomalies follow.
fn print_report(report: &Report, anomalies_only: bool) {
    if !anomalies_only {
        println!(
            "{:>10}  {:>10}  {:>10}  {:<40} Name",
            "Start", "End", "Size", "Contains"
        );
        println!("{}", "-".repeat(90));

        for range in &report.parsed_ranges {
            let mut contains = range.contains.to_string();
            if !range.flags.is_empty() {
                contains.push_str(" *");
            }
            println!(
                "{:>10}  {:>10}  {:>10}  {:<40} {}",
                range.start,
                range.end,
                range.len(),
                contains,
                range.description.as_deref().unwrap_or("")
            );
        }

        println!("{}", "-".repeat(90));
        println!(
            "{} ranges, {} entries, comment: {:?}",
            report.parsed_ranges.len(),
            report.entries.len(),
            report.comment
        );
    }

    if report.anomalies.is_empty() {
        println!("No anomalies");
        return;
    }

    println!("\n{} anomalies:", report.anomalies.len());
    for anomaly in &report.anomalies {
        println!("  {}", anomaly);
    }
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
