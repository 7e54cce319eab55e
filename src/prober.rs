//! Per-account quota probing
//!
//! A probe opens one IMAP session, walks the selector chain, and always
//! logs out before returning. Every failure is folded into the
//! [`ProbeResult`] for that account; nothing propagates to other
//! accounts.

use crate::config::Account;
use crate::connection::{self, ImapSession};
use crate::error::Error;
use crate::quota::QuotaReading;
use crate::selector::{
    self, CommandError, Discovery, QuotaCommands, QuotaSelector,
};
use async_imap::types::{Quota, QuotaResourceName, QuotaRoot};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

/// Why a server gave no usable reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Every quota command was refused.
    ProtocolUnsupported,
    /// The server answered, but never with a STORAGE resource that has
    /// a limit.
    NoStorageQuota,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolUnsupported => {
                f.write_str("quota extension not supported")
            }
            Self::NoStorageQuota => f.write_str("no storage quota reported"),
        }
    }
}

/// The outcome of probing one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ProbeResult {
    Success(QuotaReading),
    Unavailable(UnavailableReason),
    AuthFailure(String),
    TransportError(String),
}

impl ProbeResult {
    /// The reading, if the probe succeeded.
    #[must_use]
    pub const fn reading(&self) -> Option<&QuotaReading> {
        match self {
            Self::Success(reading) => Some(reading),
            _ => None,
        }
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(reading) => write!(f, "{reading}"),
            Self::Unavailable(reason) => write!(f, "unavailable: {reason}"),
            Self::AuthFailure(detail) => {
                write!(f, "authentication failed: {detail}")
            }
            Self::TransportError(detail) => {
                write!(f, "transport error: {detail}")
            }
        }
    }
}

/// Something that can obtain a [`ProbeResult`] for an account.
pub trait Prober {
    fn probe(
        &self,
        account: &Account,
    ) -> impl Future<Output = ProbeResult> + Send;
}

/// Probes accounts over IMAP, bounding each phase by a timeout.
#[derive(Debug, Clone)]
pub struct ImapProber {
    timeout: Duration,
}

impl ImapProber {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn timed_out(&self, phase: &str) -> String {
        format!("{phase} timed out after {}s", self.timeout.as_secs())
    }
}

impl Prober for ImapProber {
    async fn probe(&self, account: &Account) -> ProbeResult {
        let name = &account.name;
        debug!(
            "Checking quota for account: {} ({})",
            name, account.imap.username
        );

        let connecting = connection::connect(&account.imap);
        let mut session = match time::timeout(self.timeout, connecting).await {
            Ok(Ok(session)) => session,
            Ok(Err(Error::Auth(detail))) => {
                warn!(account = %name, "Login rejected: {detail}");
                return ProbeResult::AuthFailure(detail);
            }
            Ok(Err(e)) => {
                warn!(account = %name, "Connection failed: {e}");
                return ProbeResult::TransportError(e.to_string());
            }
            Err(_) => {
                warn!(account = %name, "Connection timed out");
                return ProbeResult::TransportError(self.timed_out("connect"));
            }
        };

        let selectors = QuotaSelector::chain_for(&account.imap.username);
        let discovery = selector::discover(&mut session, &selectors);
        let outcome = time::timeout(self.timeout, discovery).await;

        match time::timeout(self.timeout, session.logout()).await {
            Ok(Ok(())) => debug!(account = %name, "Logged out"),
            Ok(Err(e)) => debug!(account = %name, "LOGOUT failed: {e}"),
            Err(_) => debug!(account = %name, "LOGOUT timed out"),
        }

        let result = match outcome {
            Ok(Ok(Discovery::Found { reading, selector })) => {
                debug!(account = %name, "Quota found via {selector}");
                ProbeResult::Success(reading)
            }
            Ok(Ok(Discovery::Unsupported)) => ProbeResult::Unavailable(
                UnavailableReason::ProtocolUnsupported,
            ),
            Ok(Ok(Discovery::NoStorage)) => {
                ProbeResult::Unavailable(UnavailableReason::NoStorageQuota)
            }
            Ok(Err(detail)) => ProbeResult::TransportError(detail),
            Err(_) => {
                ProbeResult::TransportError(self.timed_out("quota lookup"))
            }
        };

        match &result {
            ProbeResult::Success(reading) => {
                info!(account = %name, "Quota usage: {reading}");
            }
            other => warn!(account = %name, "No quota data: {other}"),
        }
        result
    }
}

impl QuotaCommands for ImapSession {
    async fn get_quota(
        &mut self,
        root: &str,
    ) -> Result<Vec<String>, CommandError> {
        let quota = ImapSession::get_quota(self, root)
            .await
            .map_err(command_error)?;
        Ok(vec![render_quota(&quota)])
    }

    async fn get_quota_root(
        &mut self,
        mailbox: &str,
    ) -> Result<Vec<String>, CommandError> {
        let (roots, quotas) = ImapSession::get_quota_root(self, mailbox)
            .await
            .map_err(command_error)?;
        quota_root_payloads(&roots, &quotas)
    }
}

/// A refused GETQUOTA surfaces as a parse error (no QUOTA response);
/// only a broken connection aborts the chain.
fn command_error(e: async_imap::error::Error) -> CommandError {
    use async_imap::error::Error as ImapError;

    match e {
        ImapError::Io(io) => CommandError::Transport(io.to_string()),
        ImapError::ConnectionLost => {
            CommandError::Transport("connection lost".into())
        }
        other => CommandError::Rejected(other.to_string()),
    }
}

/// async-imap does not check the tagged status of GETQUOTAROOT, so a
/// NO or BAD comes back as an empty answer. Without a QUOTAROOT line
/// the command counts as refused.
fn quota_root_payloads(
    roots: &[QuotaRoot],
    quotas: &[Quota],
) -> Result<Vec<String>, CommandError> {
    if roots.is_empty() && quotas.is_empty() {
        return Err(CommandError::Rejected("no QUOTAROOT response".into()));
    }
    Ok(quotas.iter().map(render_quota).collect())
}

/// Render a parsed QUOTA response back into its RFC 2087 payload,
/// e.g. `"user/alice" (STORAGE 512 1024 MESSAGE 3 100)`.
fn render_quota(quota: &Quota) -> String {
    let resources: Vec<String> = quota
        .resources
        .iter()
        .map(|r| {
            format!("{} {} {}", resource_name(&r.name), r.usage, r.limit)
        })
        .collect();
    format!("\"{}\" ({})", quota.root_name, resources.join(" "))
}

fn resource_name(name: &QuotaResourceName) -> &str {
    match name {
        QuotaResourceName::Storage => "STORAGE",
        QuotaResourceName::Message => "MESSAGE",
        QuotaResourceName::Atom(atom) => atom,
    }
}
