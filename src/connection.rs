//! IMAP connection and TLS helpers
//!
//! Opens an authenticated session in either implicit-TLS or STARTTLS
//! mode. Failures are split into transport faults, TLS faults and
//! rejected credentials so the prober can report them distinctly.

use crate::config::{ImapConfig, Security};
use crate::error::{Error, Result};
use async_imap::Session;
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

/// A TLS-wrapped IMAP session.
pub type ImapSession = Session<Compat<TlsStream<TcpStream>>>;

/// Build a TLS connector for the given verification policy.
///
/// Verification uses the Mozilla root set unless the account opts out
/// with `accept_invalid_certs`.
fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| {
            Error::Tls(format!("Unsupported TLS configuration: {e}"))
        })?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Open a fresh TLS-wrapped IMAP session and log in.
///
/// Connects to `config.host:config.port` via TCP, secures the stream
/// according to `config.security`, and authenticates. When the server
/// rejects the credentials a LOGOUT is still sent before the
/// connection is dropped.
///
/// # Errors
///
/// - [`Error::Transport`] for TCP / DNS / mid-stream I/O failures
/// - [`Error::Tls`] for handshake or STARTTLS failures
/// - [`Error::Auth`] when LOGIN is answered with NO or BAD
pub async fn connect(config: &ImapConfig) -> Result<ImapSession> {
    let addr = format!("{}:{}", config.host, config.port);
    debug!("Connecting to IMAP server at {} ({})", addr, config.security);

    let tcp_stream = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(|e| {
            Error::Transport(format!("Cannot connect to {addr}: {e}"))
        })?;

    let tcp_stream = match config.security {
        Security::Tls => tcp_stream,
        Security::StartTls => {
            let mut client = async_imap::Client::new(tcp_stream.compat());
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;
            client.into_inner().into_inner()
        }
    };

    let connector = tls_connector(config.accept_invalid_certs)?;
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;

    let tls_client = async_imap::Client::new(tls_stream.compat());

    match tls_client.login(&config.username, &config.password).await {
        Ok(session) => {
            info!("Logged in to {} as {}", addr, config.username);
            Ok(session)
        }
        Err((e, mut client)) => {
            let err = classify_login_error(e);
            if matches!(err, Error::Auth(_)) {
                client.run_command_and_check_ok("LOGOUT", None).await.ok();
            }
            Err(err)
        }
    }
}

fn classify_login_error(e: async_imap::error::Error) -> Error {
    use async_imap::error::Error as ImapError;

    match e {
        ImapError::No(msg) | ImapError::Bad(msg) => Error::Auth(msg),
        ImapError::Io(io) => Error::Transport(io.to_string()),
        ImapError::ConnectionLost => {
            Error::Transport("connection lost during LOGIN".into())
        }
        other => Error::Imap(format!("Login failed: {other}")),
    }
}

/// Certificate verifier that accepts all certificates
/// (for servers with self-signed certs).
#[derive(Debug)]
struct DangerousVerifier;

impl ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
