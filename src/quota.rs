//! Normalized quota readings and QUOTA payload parsing
//!
//! Servers answer `GETQUOTA` / `GETQUOTAROOT` with a resource list
//! (RFC 2087). Two payload shapes are seen in the wild:
//!
//! ```text
//!   (STORAGE 512 1024)
//!   "user/alice" (MESSAGE 12 5000 STORAGE 512 1024)
//! ```
//!
//! The first is a single parenthesized tuple; the second is a freeform
//! string in which `STORAGE used limit` can appear anywhere. Only the
//! `STORAGE` resource is used; message counts and vendor resources are
//! ignored.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static STORAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bSTORAGE\s+(\d+)\s+(\d+)")
        .expect("static STORAGE pattern is valid")
});

/// Storage usage of one mailbox, in KiB as reported by the server.
///
/// The percentage is always derived from `used / limit`; it cannot be
/// supplied from outside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaReading {
    used_units: u64,
    limit_units: u64,
    percent_used: f64,
}

impl QuotaReading {
    /// Build a reading. Returns `None` when `limit_units` is zero, which
    /// servers use for "no limit".
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(used_units: u64, limit_units: u64) -> Option<Self> {
        if limit_units == 0 {
            return None;
        }
        Some(Self {
            used_units,
            limit_units,
            percent_used: used_units as f64 / limit_units as f64 * 100.0,
        })
    }

    #[must_use]
    pub const fn used_units(&self) -> u64 {
        self.used_units
    }

    #[must_use]
    pub const fn limit_units(&self) -> u64 {
        self.limit_units
    }

    #[must_use]
    pub const fn percent_used(&self) -> f64 {
        self.percent_used
    }
}

impl fmt::Display for QuotaReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}% ({} of {})",
            self.percent_used,
            format_units(self.used_units),
            format_units(self.limit_units)
        )
    }
}

/// Extract the STORAGE reading from one QUOTA payload.
///
/// Tries the parenthesized tuple form first, then scans the whole text
/// for a `STORAGE used limit` run. Returns `None` for payloads without a
/// usable STORAGE resource (absent, malformed, or a zero limit).
#[must_use]
pub fn parse_storage(payload: &str) -> Option<QuotaReading> {
    parse_tuple(payload).or_else(|| parse_freeform(payload))
}

/// `(RESOURCE used limit)` where RESOURCE is STORAGE.
fn parse_tuple(payload: &str) -> Option<QuotaReading> {
    let open = payload.find('(')?;
    let close = open + payload[open..].find(')')?;
    let mut parts = payload[open + 1..close].split_whitespace();

    let resource = parts.next()?;
    if !resource.eq_ignore_ascii_case("STORAGE") {
        return None;
    }
    let used = parts.next()?.parse().ok()?;
    let limit = parts.next()?.parse().ok()?;
    QuotaReading::new(used, limit)
}

fn parse_freeform(payload: &str) -> Option<QuotaReading> {
    let caps = STORAGE_PATTERN.captures(payload)?;
    let used = caps[1].parse().ok()?;
    let limit = caps[2].parse().ok()?;
    QuotaReading::new(used, limit)
}

/// Render a KiB amount with a human-readable unit.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_units(kib: u64) -> String {
    const MIB: u64 = 1024;
    const GIB: u64 = 1024 * 1024;

    if kib >= GIB {
        format!("{:.1} GB", kib as f64 / GIB as f64)
    } else if kib >= MIB {
        format!("{:.1} MB", kib as f64 / MIB as f64)
    } else {
        format!("{kib} KB")
    }
}
