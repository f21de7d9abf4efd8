//! Connection establishment for the NNTP client
//!
//! Handles TCP connect with socket tuning, the optional TLS handshake, and
//! server greeting validation.

use crate::config::ServerConfig;
use crate::error::{IndexError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use super::stream::NntpStream;
use super::{ConnectionState, NntpClient};

/// TCP connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// TLS handshake timeout
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// BufReader capacity; XOVER responses for 100k-article chunks are large
const BUFREADER_CAPACITY: usize = 256 * 1024;

/// TCP receive buffer size requested from the OS (4MB)
const RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Certificate verifier that accepts anything
///
/// **Security warning:** disables all certificate validation. Used only when
/// `allow_insecure_tls` is set.
#[derive(Debug)]
struct DangerousAcceptAnyCertificate;

impl ServerCertVerifier for DangerousAcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

impl NntpClient {
    /// Connect to the NNTP server (TLS or plain per the config)
    ///
    /// Establishes the connection and reads the greeting. Does not
    /// authenticate; call [`authenticate`](Self::authenticate) afterwards.
    ///
    /// # Errors
    ///
    /// - [`IndexError::Io`] - TCP connect fails (DNS, unreachable, refused)
    /// - [`IndexError::Tls`] - TLS handshake fails
    /// - [`IndexError::Timeout`] - connect or handshake exceeds 60 s
    /// - [`IndexError::Protocol`] - greeting is not 200/201
    pub async fn connect(config: Arc<ServerConfig>) -> Result<Self> {
        debug!("Connecting to NNTP server {}:{}", config.host, config.port);

        let tcp_stream = Self::connect_tcp(&config).await?;

        let stream = if config.use_tls {
            let tls_stream = Self::handshake_tls(&config, tcp_stream).await?;
            NntpStream::Tls(Box::new(tls_stream))
        } else {
            NntpStream::Plain(tcp_stream)
        };

        let mut client = Self {
            stream: BufReader::with_capacity(BUFREADER_CAPACITY, stream),
            state: ConnectionState::Ready,
            config,
            current_group: None,
            is_broken: false,
        };

        let greeting = client.read_response().await?;
        debug!("Server greeting: {} {}", greeting.code, greeting.message);

        if !greeting.is_success() {
            return Err(IndexError::Protocol {
                code: greeting.code,
                message: greeting.message,
            });
        }

        Ok(client)
    }

    /// TCP connect with socket tuning via socket2
    async fn connect_tcp(config: &ServerConfig) -> Result<TcpStream> {
        use std::net::ToSocketAddrs;
        let addr = format!("{}:{}", config.host, config.port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| {
                IndexError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Failed to resolve address: {}", e),
                ))
            })?
            .next()
            .ok_or_else(|| {
                IndexError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "No address resolved",
                ))
            })?;

        use socket2::{Domain, Protocol, Socket, Type};
        let domain = if socket_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket =
            Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(IndexError::Io)?;

        // Low-latency command/response pattern
        socket.set_nodelay(true).map_err(IndexError::Io)?;

        // Large receive buffer: XOVER streams hundreds of MB for big chunks
        if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
            warn!("Failed to set receive buffer size: {}", e);
        }

        // socket2 connect is blocking; switch to non-blocking only after it
        // succeeds, then hand the stream to tokio
        let tcp_stream = timeout(
            CONNECT_TIMEOUT,
            tokio::task::spawn_blocking(move || -> std::io::Result<std::net::TcpStream> {
                socket.connect(&socket_addr.into())?;
                socket.set_nonblocking(true)?;
                Ok(socket.into())
            }),
        )
        .await
        .map_err(|_| IndexError::Timeout)?
        .map_err(|e| IndexError::Io(std::io::Error::other(format!("Task join error: {}", e))))?
        .map_err(IndexError::Io)?;

        TcpStream::from_std(tcp_stream).map_err(IndexError::Io)
    }

    /// TLS handshake over an established TCP stream
    async fn handshake_tls(
        config: &ServerConfig,
        tcp_stream: TcpStream,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
        use tokio_rustls::rustls::crypto::{ring, CryptoProvider};
        let _ = CryptoProvider::install_default(ring::default_provider());

        let tls_config = if config.allow_insecure_tls {
            warn!("TLS certificate validation disabled - connection vulnerable to MITM attacks");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertificate))
                .with_no_client_auth()
        } else {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(config.host.as_str())
            .map_err(|e| IndexError::Tls(format!("Invalid domain: {}", e)))?
            .to_owned();

        timeout(
            TLS_HANDSHAKE_TIMEOUT,
            connector.connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| IndexError::Timeout)?
        .map_err(|e| IndexError::Tls(format!("TLS handshake failed: {}", e)))
    }
}
