//! Consolidated warning report
//!
//! One report covers every account of a run: the subject and opening
//! paragraph name the accounts that triggered, and a summary section
//! lists all accounts by descending usage.

use crate::prober::ProbeResult;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

const FOOTER: &str =
    "Please take action to free up space for accounts over the threshold.\n";

/// How an account appears in the summary section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    /// Over threshold and alerted in this run.
    Triggered,
    /// Over threshold, but still within the cooldown of an earlier alert.
    PreviouslyAlerted,
    BelowThreshold,
    /// No reading: unsupported, unparseable, or the probe failed.
    Unavailable,
}

impl Marker {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Triggered => "⚠️",
            Self::PreviouslyAlerted => "↻",
            Self::BelowThreshold => "✓",
            Self::Unavailable => "?",
        }
    }
}

/// One line of the summary section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryEntry {
    pub account: String,
    pub marker: Marker,
    pub result: ProbeResult,
}

impl SummaryEntry {
    fn percent(&self) -> Option<f64> {
        self.result.reading().map(crate::QuotaReading::percent_used)
    }

    fn render(&self) -> String {
        let symbol = self.marker.symbol();
        match (&self.result, self.marker) {
            (ProbeResult::Success(reading), Marker::PreviouslyAlerted) => {
                format!(
                    "{symbol} {}: {reading} - already notified",
                    self.account
                )
            }
            (ProbeResult::Success(reading), _) => {
                format!("{symbol} {}: {reading}", self.account)
            }
            (other, _) => format!(
                "{symbol} {}: Quota info unavailable ({other})",
                self.account
            ),
        }
    }
}

/// A rendered warning, ready for a delivery adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub subject: String,
    pub body: String,
    pub summary: Vec<SummaryEntry>,
}

/// Render the report for one run.
///
/// `results` must hold every account of the run; `triggered` is the
/// subset alerted now. Accounts at or above the threshold that are not
/// in `triggered` are marked as previously alerted.
#[must_use]
pub fn compose(
    results: &BTreeMap<String, ProbeResult>,
    triggered: &BTreeSet<String>,
    threshold_percent: u8,
) -> Report {
    let summary = summarize(results, triggered, threshold_percent);
    let alerted: Vec<&SummaryEntry> = summary
        .iter()
        .filter(|e| e.marker == Marker::Triggered)
        .collect();

    let mut body = String::new();
    let subject = if let [single] = alerted.as_slice() {
        let percent = single.percent().unwrap_or_default();
        let _ = writeln!(
            body,
            "The mailbox for account '{}' has reached {percent:.1}% \
             of its quota.",
            single.account
        );
        if let Some(reading) = single.result.reading() {
            let _ = writeln!(
                body,
                "Usage: {} of {}",
                crate::quota::format_units(reading.used_units()),
                crate::quota::format_units(reading.limit_units())
            );
        }
        format!(
            "[Quota Warning] {} mailbox usage at {percent:.1}%",
            single.account
        )
    } else {
        let _ = writeln!(
            body,
            "The following mailboxes have exceeded the quota threshold \
             ({threshold_percent}%):"
        );
        body.push('\n');
        for entry in &alerted {
            if let Some(reading) = entry.result.reading() {
                let _ = writeln!(body, "• {}: {reading}", entry.account);
            }
        }
        format!("[Quota Warning] {} mailboxes over threshold", alerted.len())
    };

    body.push('\n');
    body.push_str("--- All Account Summary ---\n");
    for entry in &summary {
        body.push_str(&entry.render());
        body.push('\n');
    }
    body.push('\n');
    body.push_str(FOOTER);

    Report {
        subject,
        body,
        summary,
    }
}

fn summarize(
    results: &BTreeMap<String, ProbeResult>,
    triggered: &BTreeSet<String>,
    threshold_percent: u8,
) -> Vec<SummaryEntry> {
    let mut entries: Vec<SummaryEntry> = results
        .iter()
        .map(|(account, result)| {
            let marker = match result.reading() {
                None => Marker::Unavailable,
                Some(_) if triggered.contains(account) => Marker::Triggered,
                Some(r) if r.percent_used() >= f64::from(threshold_percent) => {
                    Marker::PreviouslyAlerted
                }
                Some(_) => Marker::BelowThreshold,
            };
            SummaryEntry {
                account: account.clone(),
                marker,
                result: result.clone(),
            }
        })
        .collect();

    entries.sort_by(|a, b| match (a.percent(), b.percent()) {
        (Some(x), Some(y)) => {
            y.total_cmp(&x).then_with(|| a.account.cmp(&b.account))
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.account.cmp(&b.account),
    });
    entries
}
