//! Consolidated IMAP mailbox quota warnings
//!
//! Probes the storage quota of several IMAP accounts, compares usage
//! with a percentage threshold, and renders a single warning covering
//! every account that crossed it. A per-account cooldown, persisted in
//! a small JSON file, keeps the same account from being reported on
//! every run.
//!
//! Servers expose quotas inconsistently, so each probe walks an ordered
//! [`QuotaSelector`] chain and keeps only the `STORAGE` resource.

mod config;
mod connection;
mod cooldown;
mod error;
mod evaluator;
mod monitor;
mod notify;
mod prober;
mod quota;
mod report;
mod selector;
mod state;

pub use config::{Account, Config, ImapConfig, MailConfig, Security};
pub use cooldown::should_alert;
pub use error::{Error, Result};
pub use evaluator::{Classification, classify};
pub use monitor::{MonitorSettings, QuotaMonitor, RunOutcome};
pub use notify::{Notifier, SmtpNotifier};
pub use prober::{ImapProber, ProbeResult, Prober, UnavailableReason};
pub use quota::{QuotaReading, format_units, parse_storage};
pub use report::{Marker, Report, SummaryEntry, compose};
pub use selector::{
    CommandError, Discovery, QuotaCommands, QuotaSelector, discover,
};
pub use state::{AlertState, JsonFileStore, StateStore};
