#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI that checks IMAP mailbox quotas and sends one consolidated
//! warning per run

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use mail_quota_warning::{
    Config, ImapProber, JsonFileStore, QuotaMonitor, RunOutcome, SmtpNotifier,
    StateStore,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-quota-warning")]
#[command(
    about = "Check IMAP mailbox quotas and send one consolidated warning"
)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// Probe and print the report without sending mail or writing state
    #[arg(long)]
    dry_run: bool,

    /// Output per-account results as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let store = JsonFileStore::new(&config.state_file);
    let monitor = QuotaMonitor::new(
        ImapProber::new(config.probe_timeout()),
        config.monitor_settings(),
    );
    let now = Utc::now();

    let outcome = if args.dry_run {
        let state = store.load()?;
        monitor.evaluate(&config.accounts, &state, now).await
    } else {
        let mail = config.mail.clone().context(
            "the `mail` section is required unless --dry-run is given",
        )?;
        monitor
            .run(&config.accounts, &store, &SmtpNotifier::new(mail), now)
            .await?
    };

    if args.json {
        print_json(&outcome)?;
    } else {
        print_text(&outcome, args.dry_run);
    }

    Ok(())
}

fn print_json(outcome: &RunOutcome) -> anyhow::Result<()> {
    let value = serde_json::json!({
        "results": outcome.results,
        "triggered": outcome.triggered,
        "report": outcome.report,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_text(outcome: &RunOutcome, dry_run: bool) {
    println!("{:<24} {}", "Account", "Quota");
    println!("{}", "-".repeat(72));
    for (name, result) in &outcome.results {
        let mark = if outcome.triggered.contains(name) {
            " [warning]"
        } else {
            ""
        };
        println!("{:<24} {result}{mark}", truncate(name, 24));
    }

    match &outcome.report {
        Some(report) if dry_run => {
            println!("\nSubject: {}\n", report.subject);
            print!("{}", report.body);
        }
        Some(report) => println!("\nWarning sent: {}", report.subject),
        None => println!("\nNo warning needed."),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
