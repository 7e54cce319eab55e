//! In-process fake IMAP server for integration testing
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   implicit TLS: TLS handshake, then greeting
//!   STARTTLS:     greeting, STARTTLS command, then TLS handshake
//!       |
//!   Client sends LOGIN with username and password
//!       |
//!   Client issues GETQUOTA / GETQUOTAROOT
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! ## The QUOTA extension
//!
//! RFC 2087 adds two read commands. GETQUOTA names a quota root
//! directly; GETQUOTAROOT names a mailbox and lets the server say which
//! roots apply to it. Both answer with untagged QUOTA responses that
//! carry `(RESOURCE usage limit ...)` lists, where STORAGE is counted
//! in units of 1024 octets.
//!
//! Quota arguments are plain astrings, which this server reads itself;
//! the remaining commands go through `imap-codec`.

use super::handlers::{
    handle_getquota, handle_getquotaroot, handle_login, handle_logout,
};
use super::io::write_line;
use super::profile::ServerProfile;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use mail_quota_warning::Security;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

const GREETING: &str = "* OK IMAP4rev1 Fake server ready\r\n";

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so clients must connect with `accept_invalid_certs`. Every
/// command received is appended to a log that tests can inspect.
pub struct FakeImapServer {
    port: u16,
    commands: Arc<Mutex<Vec<String>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAP server answering with `profile`.
    ///
    /// The server runs until the `FakeImapServer` is dropped.
    pub async fn start(profile: ServerProfile) -> Self {
        // Multiple tests may race to install the provider; ignore the
        // error if it's already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let profile = Arc::new(profile);
        let commands = Arc::new(Mutex::new(Vec::new()));

        let log = commands.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let profile = profile.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, &profile, &log).await;
                });
            }
        });

        Self {
            port,
            commands,
            handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Commands received so far, e.g. `LOGIN alice`, `GETQUOTA INBOX`.
    /// Passwords are not recorded.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Drop for FakeImapServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    profile: &ServerProfile,
    log: &Mutex<Vec<String>>,
) {
    match profile.security {
        Security::Tls => {
            let Ok(tls_stream) = acceptor.accept(stream).await else {
                return;
            };
            let mut reader = BufReader::new(tls_stream);
            if write_line(&mut reader, GREETING).await.is_err() {
                return;
            }
            handle_imap_session(reader, profile, log).await;
        }
        Security::StartTls => {
            let mut reader = BufReader::new(stream);
            if write_line(&mut reader, GREETING).await.is_err() {
                return;
            }

            let mut line = String::new();
            if reader.read_line(&mut line).await.is_err() {
                return;
            }
            let Some(request) = Request::parse(&line) else {
                return;
            };
            log.lock().unwrap().push(request.summary());

            if request.verb != "STARTTLS" {
                let resp = format!("{} BAD Expected STARTTLS\r\n", request.tag);
                let _ = write_line(&mut reader, &resp).await;
                return;
            }
            let resp = format!("{} OK Begin TLS negotiation now\r\n", request.tag);
            if write_line(&mut reader, &resp).await.is_err() {
                return;
            }

            let tcp = reader.into_inner();
            let Ok(tls_stream) = acceptor.accept(tcp).await else {
                return;
            };
            handle_imap_session(BufReader::new(tls_stream), profile, log).await;
        }
    }
}

/// A command line split into tag, upper-cased verb, and arguments
/// (quoted strings unescaped).
struct Request {
    tag: String,
    verb: String,
    args: Vec<String>,
}

impl Request {
    fn parse(line: &str) -> Option<Self> {
        let (tag, rest) = line.trim().split_once(' ')?;
        let (verb, args) = rest.split_once(' ').unwrap_or((rest, ""));
        Some(Self {
            tag: tag.to_string(),
            verb: verb.to_uppercase(),
            args: parse_args(args),
        })
    }

    fn summary(&self) -> String {
        if self.verb == "LOGIN" {
            let user = self.args.first().map_or("", String::as_str);
            return format!("LOGIN {user}");
        }
        let mut parts = vec![self.verb.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

fn parse_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut arg = String::new();
        if first == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            arg.push(escaped);
                        }
                    }
                    '"' => break,
                    other => arg.push(other),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                arg.push(c);
                chars.next();
            }
        }
        args.push(arg);
    }
    args
}

/// Run the post-TLS command loop until LOGOUT or disconnect.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    mut reader: BufReader<S>,
    profile: &ServerProfile,
    log: &Mutex<Vec<String>>,
) {
    let codec = CommandCodec::default();
    let mut authenticated = false;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }

        let Some(request) = Request::parse(&line) else {
            let resp = format!("{} BAD Parse error\r\n", line.trim());
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };
        log.lock().unwrap().push(request.summary());
        let tag = request.tag.as_str();

        match request.verb.as_str() {
            "LOGIN" => {
                let [username, password] = request.args.as_slice() else {
                    let resp = format!("{tag} BAD LOGIN arguments\r\n");
                    let _ = write_line(&mut reader, &resp).await;
                    continue;
                };
                authenticated =
                    handle_login(tag, username, password, profile, &mut reader)
                        .await;
            }
            "GETQUOTA" | "GETQUOTAROOT" => {
                if !authenticated {
                    let resp = format!("{tag} BAD Not authenticated\r\n");
                    let _ = write_line(&mut reader, &resp).await;
                    continue;
                }
                if profile.stall_quota_commands {
                    continue;
                }
                let Some(name) = request.args.first() else {
                    let resp = format!("{tag} BAD Missing argument\r\n");
                    let _ = write_line(&mut reader, &resp).await;
                    continue;
                };
                if request.verb == "GETQUOTA" {
                    handle_getquota(tag, name, profile, &mut reader).await;
                } else {
                    handle_getquotaroot(tag, name, profile, &mut reader).await;
                }
            }
            _ => {
                let Ok((_, command)) = codec.decode(line.as_bytes()) else {
                    let resp = format!("{tag} BAD Parse error\r\n");
                    if write_line(&mut reader, &resp).await.is_err() {
                        break;
                    }
                    continue;
                };

                match command.body {
                    CommandBody::Noop => {
                        let resp = format!("{tag} OK NOOP completed\r\n");
                        let _ = write_line(&mut reader, &resp).await;
                    }
                    CommandBody::Logout => {
                        handle_logout(tag, &mut reader).await;
                        break;
                    }
                    _ => {
                        let resp = format!("{tag} BAD Unknown command\r\n");
                        if write_line(&mut reader, &resp).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_login() {
        let request = Request::parse("A0001 LOGIN \"alice@example.com\" \"p\\\"w\"\r\n").unwrap();
        assert_eq!(request.tag, "A0001");
        assert_eq!(request.verb, "LOGIN");
        assert_eq!(request.args, vec!["alice@example.com", "p\"w"]);
        assert_eq!(request.summary(), "LOGIN alice@example.com");
    }

    #[test]
    fn parses_atom_arguments() {
        let request = Request::parse("A0002 getquota user.alice\r\n").unwrap();
        assert_eq!(request.verb, "GETQUOTA");
        assert_eq!(request.args, vec!["user.alice"]);
        assert_eq!(request.summary(), "GETQUOTA user.alice");
    }

    #[test]
    fn parses_bare_command() {
        let request = Request::parse("A0003 LOGOUT\r\n").unwrap();
        assert_eq!(request.verb, "LOGOUT");
        assert!(request.args.is_empty());
    }
}
