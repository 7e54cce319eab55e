//! Repeat-alert suppression

use crate::state::AlertState;
use chrono::{DateTime, Duration, Utc};

/// Whether `account` may be alerted at `now`.
///
/// True when the account was never alerted, or when at least
/// `interval_days` full days (measured by timestamp difference, not
/// calendar dates) have passed since the last alert.
#[must_use]
pub fn should_alert(
    account: &str,
    state: &AlertState,
    interval_days: u32,
    now: DateTime<Utc>,
) -> bool {
    state
        .last_alert(account)
        .is_none_or(|last| {
            now - last >= Duration::days(i64::from(interval_days))
        })
}
