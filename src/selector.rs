//! Quota selector chain
//!
//! Quota roots are named differently across servers. Discovery walks a
//! fixed, ordered list of selectors and stops at the first one that
//! yields a STORAGE reading:
//!
//! 1. `GETQUOTA INBOX`
//! 2. `GETQUOTA <username>`
//! 3. `GETQUOTA user/<username>`
//! 4. `GETQUOTA user.<username>`
//! 5. `GETQUOTAROOT INBOX`, scanning every returned quota
//!
//! A rejected or unusable answer moves on to the next selector. Only a
//! transport failure aborts the chain.

use crate::quota::{QuotaReading, parse_storage};
use std::fmt;
use tracing::debug;

/// Outcome of a single quota command that did not produce payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The server refused or could not answer the command (NO, BAD,
    /// unsupported extension, unparseable response).
    Rejected(String),
    /// The connection is no longer usable.
    Transport(String),
}

/// The quota commands a session must offer. Each returns the QUOTA
/// payloads (root name and resource list) in the order received.
pub trait QuotaCommands {
    fn get_quota(
        &mut self,
        root: &str,
    ) -> impl Future<Output = Result<Vec<String>, CommandError>> + Send;

    fn get_quota_root(
        &mut self,
        mailbox: &str,
    ) -> impl Future<Output = Result<Vec<String>, CommandError>> + Send;
}

/// One quota lookup strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaSelector {
    /// `GETQUOTA <root>`; the answer is a single resource tuple.
    Tuple(String),
    /// `GETQUOTAROOT <mailbox>`; any quota in the answer may carry the
    /// STORAGE resource.
    RootDiscovery(String),
}

impl QuotaSelector {
    /// The ordered selector list for a login name.
    #[must_use]
    pub fn chain_for(username: &str) -> Vec<Self> {
        vec![
            Self::Tuple("INBOX".to_string()),
            Self::Tuple(username.to_string()),
            Self::Tuple(format!("user/{username}")),
            Self::Tuple(format!("user.{username}")),
            Self::RootDiscovery("INBOX".to_string()),
        ]
    }

    async fn attempt<S: QuotaCommands>(&self, session: &mut S) -> Attempt {
        let response = match self {
            Self::Tuple(root) => session.get_quota(root).await,
            Self::RootDiscovery(mailbox) => {
                session.get_quota_root(mailbox).await
            }
        };

        match response {
            Ok(payloads) => payloads
                .iter()
                .find_map(|payload| parse_storage(payload))
                .map_or(Attempt::Unusable, Attempt::Found),
            Err(CommandError::Rejected(reason)) => {
                debug!("{self} rejected: {reason}");
                Attempt::Rejected
            }
            Err(CommandError::Transport(reason)) => Attempt::Transport(reason),
        }
    }
}

impl fmt::Display for QuotaSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tuple(root) => write!(f, "GETQUOTA {root}"),
            Self::RootDiscovery(mailbox) => write!(f, "GETQUOTAROOT {mailbox}"),
        }
    }
}

enum Attempt {
    Found(QuotaReading),
    Unusable,
    Rejected,
    Transport(String),
}

/// Result of walking the selector chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    /// A STORAGE reading and the selector that produced it.
    Found {
        reading: QuotaReading,
        selector: QuotaSelector,
    },
    /// Every selector was refused by the server.
    Unsupported,
    /// At least one selector answered, but no answer carried a usable
    /// STORAGE resource.
    NoStorage,
}

/// Walk `selectors` in order until one yields a reading.
///
/// # Errors
///
/// Returns the transport detail if the session fails mid-chain; no
/// further selectors are tried in that case.
pub async fn discover<S: QuotaCommands>(
    session: &mut S,
    selectors: &[QuotaSelector],
) -> Result<Discovery, String> {
    let mut answered = false;

    for selector in selectors {
        match selector.attempt(session).await {
            Attempt::Found(reading) => {
                debug!("{selector} yielded {reading}");
                return Ok(Discovery::Found {
                    reading,
                    selector: selector.clone(),
                });
            }
            Attempt::Unusable => {
                debug!("{selector} answered without a STORAGE resource");
                answered = true;
            }
            Attempt::Rejected => {}
            Attempt::Transport(reason) => return Err(reason),
        }
    }

    Ok(if answered {
        Discovery::NoStorage
    } else {
        Discovery::Unsupported
    })
}
