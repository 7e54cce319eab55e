//! Server behavior for the fake IMAP server
//!
//! Provides a builder-style API describing one account's server:
//!
//! ```ignore
//! let profile = ServerProfile::new("alice", "secret")
//!     .quota("user/alice", "MESSAGE 12 5000 STORAGE 850 1000")
//!     .quota_root("INBOX", &["user/alice"])
//!     .starttls();
//! ```
//!
//! Quota roots not listed answer `NO`, the way servers answer an
//! unknown root. A quota with an empty resource list is allowed.

use mail_quota_warning::Security;
use std::collections::HashMap;

/// Everything the fake server needs to know to answer a session.
#[derive(Debug, Clone)]
pub struct ServerProfile {
    pub username: String,
    pub password: String,
    pub security: Security,
    /// Quota root -> resource list text, e.g. `STORAGE 10 100`.
    pub quotas: HashMap<String, String>,
    /// Mailbox -> quota roots reported by GETQUOTAROOT.
    pub quota_roots: HashMap<String, Vec<String>>,
    /// Never answer quota commands (the connection stays open).
    pub stall_quota_commands: bool,
}

impl ServerProfile {
    /// A server accepting `username` / `password` over implicit TLS
    /// with no quota support.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            security: Security::Tls,
            quotas: HashMap::new(),
            quota_roots: HashMap::new(),
            stall_quota_commands: false,
        }
    }

    /// Answer `GETQUOTA root` with `* QUOTA "root" (resources)`.
    pub fn quota(mut self, root: &str, resources: &str) -> Self {
        self.quotas.insert(root.to_string(), resources.to_string());
        self
    }

    /// Answer `GETQUOTAROOT mailbox` with the given roots, followed by
    /// a QUOTA response for each root that has one.
    pub fn quota_root(mut self, mailbox: &str, roots: &[&str]) -> Self {
        self.quota_roots.insert(
            mailbox.to_string(),
            roots.iter().map(ToString::to_string).collect(),
        );
        self
    }

    /// Expect a plain connection upgraded with STARTTLS.
    pub const fn starttls(mut self) -> Self {
        self.security = Security::StartTls;
        self
    }

    /// Accept quota commands but never reply to them.
    pub const fn stall_quota_commands(mut self) -> Self {
        self.stall_quota_commands = true;
        self
    }
}
