//! The quota monitor: probes every account, decides which ones warrant
//! a warning, and renders a single report for the whole run.

use crate::config::Account;
use crate::cooldown::should_alert;
use crate::error::{Error, Result};
use crate::evaluator::{Classification, classify};
use crate::notify::Notifier;
use crate::prober::{ProbeResult, Prober};
use crate::report::{Report, compose};
use crate::state::{AlertState, StateStore};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info};

/// Alerting policy for one monitor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Inclusive usage percentage at which an account warrants a warning.
    pub threshold_percent: u8,
    /// Minimum whole days between two warnings for the same account.
    pub interval_days: u32,
    /// Upper bound on simultaneous IMAP sessions.
    pub max_concurrency: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            threshold_percent: 80,
            interval_days: 7,
            max_concurrency: 4,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// One result per configured account.
    pub results: BTreeMap<String, ProbeResult>,
    /// Accounts alerted in this run.
    pub triggered: BTreeSet<String>,
    /// Present only when `triggered` is non-empty.
    pub report: Option<Report>,
    /// The previous state with `triggered` accounts stamped at the run
    /// time.
    pub state: AlertState,
}

pub struct QuotaMonitor<P> {
    prober: P,
    settings: MonitorSettings,
}

impl<P: Prober> QuotaMonitor<P> {
    #[must_use]
    pub const fn new(prober: P, settings: MonitorSettings) -> Self {
        Self { prober, settings }
    }

    /// Probe all accounts and decide what to report, without touching
    /// persistent storage or sending anything.
    ///
    /// Probes run concurrently, at most `max_concurrency` at a time.
    /// The returned state is `state` plus a `now` stamp for every
    /// triggered account.
    pub async fn evaluate(
        &self,
        accounts: &[Account],
        state: &AlertState,
        now: DateTime<Utc>,
    ) -> RunOutcome {
        let results: BTreeMap<String, ProbeResult> = stream::iter(accounts)
            .map(|account| async move {
                (account.name.clone(), self.prober.probe(account).await)
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        let MonitorSettings {
            threshold_percent,
            interval_days,
            ..
        } = self.settings;

        let mut triggered = BTreeSet::new();
        for (name, result) in &results {
            match classify(result, threshold_percent) {
                Classification::AtOrAboveThreshold => {
                    if should_alert(name, state, interval_days, now) {
                        triggered.insert(name.clone());
                    } else {
                        info!(
                            "Warning already sent recently for {name}, \
                             skipping."
                        );
                    }
                }
                Classification::BelowThreshold => {
                    debug!("{name} is below threshold: {result}");
                }
                Classification::Unavailable | Classification::Errored => {
                    debug!("Quota info not available for {name}: {result}");
                }
            }
        }

        let mut next_state = state.clone();
        for name in &triggered {
            next_state.record(name, now);
        }

        let report = (!triggered.is_empty())
            .then(|| compose(&results, &triggered, threshold_percent));

        RunOutcome {
            results,
            triggered,
            report,
            state: next_state,
        }
    }

    /// A complete run: load state, evaluate, deliver at most one report,
    /// then overwrite the stored state.
    ///
    /// The state is saved even when delivery fails, so a broken mail
    /// relay does not cause a flood of warnings later.
    ///
    /// # Errors
    ///
    /// - [`Error::State`] / [`Error::Io`] if the state cannot be loaded
    ///   or saved
    /// - [`Error::Delivery`] if the report could not be sent (returned
    ///   after the state has been saved)
    pub async fn run<S, N>(
        &self,
        accounts: &[Account],
        store: &S,
        notifier: &N,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome>
    where
        S: StateStore,
        N: Notifier,
    {
        let state = store.load()?;
        let outcome = self.evaluate(accounts, &state, now).await;

        let delivery = match &outcome.report {
            Some(report) => {
                let names: Vec<&str> =
                    outcome.triggered.iter().map(String::as_str).collect();
                info!("Sending warning for: {}", names.join(", "));
                notifier.deliver(report).await
            }
            None => {
                info!("No account needs a warning");
                Ok(())
            }
        };
        if let Err(e) = &delivery {
            error!("Error sending warning email: {e}");
        }

        if let Err(e) = store.save(&outcome.state) {
            error!(
                "Failed to persist alert state; \
                 warnings for {:?} may repeat: {e}",
                outcome.triggered
            );
            return Err(match e {
                Error::State(_) => e,
                other => Error::State(other.to_string()),
            });
        }

        delivery?;
        Ok(outcome)
    }
}
