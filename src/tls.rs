//! TLS upgrade for MySQL connections.
//!
//! The upgrade happens mid-handshake: after the server greeting the client
//! sends a short SSLRequest packet (the first half of a handshake response),
//! runs the TLS handshake on the raw stream, and only then sends the full
//! authentication response over the encrypted channel.
//!
//! The stream implementation requires the `tls` feature; without it only the
//! packet builder and the policy checks are available.

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};

use crate::config::{SslMode, TlsConfig};
use crate::error::{Error, NetworkErrorKind, Result};
use crate::protocol::{capabilities, PacketWriter};

#[cfg(feature = "tls")]
use std::sync::Arc;

/// Build the 32-byte SSLRequest payload: capability flags with CLIENT_SSL,
/// max packet size, charset, and 23 reserved zero bytes.
pub fn ssl_request_payload(client_caps: u32, max_packet_size: u32, charset: u8) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(32);
    w.write_u32_le(client_caps | capabilities::CLIENT_SSL);
    w.write_u32_le(max_packet_size);
    w.write_u8(charset);
    w.write_zeros(23);
    w.into_bytes()
}

pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & capabilities::CLIENT_SSL != 0
}

/// Decide whether to upgrade, failing when the policy demands TLS the server
/// cannot provide.
pub fn validate_ssl_mode(ssl_mode: SslMode, server_caps: u32) -> Result<bool> {
    match ssl_mode {
        SslMode::Disable => Ok(false),
        SslMode::Preferred => Ok(server_supports_ssl(server_caps)),
        SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if server_supports_ssl(server_caps) {
                Ok(true)
            } else {
                Err(tls_error("server does not support TLS"))
            }
        }
    }
}

/// Check certificate material against the requested mode.
pub fn validate_tls_config(ssl_mode: SslMode, tls: &TlsConfig) -> Result<()> {
    match ssl_mode {
        SslMode::Disable | SslMode::Preferred | SslMode::Required => Ok(()),
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if tls.ca_cert_path.is_none() && !tls.danger_skip_verify {
                return Err(tls_error(
                    "certificate verification requires a CA certificate path",
                ));
            }
            if tls.client_cert_path.is_some() && tls.client_key_path.is_none() {
                return Err(tls_error(
                    "a client certificate needs its private key for mutual TLS",
                ));
            }
            Ok(())
        }
    }
}

fn tls_error(message: impl Into<String>) -> Error {
    Error::network(NetworkErrorKind::Tls, message)
}

/// A stream wrapped in rustls, driving the TLS records synchronously.
#[cfg(feature = "tls")]
pub struct TlsStream<S: Read + Write> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> TlsStream<S> {
    /// Wrap `stream` and run the TLS handshake to completion.
    pub fn new(mut stream: S, tls: &TlsConfig, server_name: &str, ssl_mode: SslMode) -> Result<Self> {
        let config = build_client_config(tls, ssl_mode)?;

        let sni = tls.server_name.as_deref().unwrap_or(server_name);
        let sni = sni
            .to_string()
            .try_into()
            .map_err(|e| tls_error(format!("invalid server name {sni:?}: {e}")))?;

        let mut conn = rustls::ClientConnection::new(Arc::new(config), sni)
            .map_err(|e| tls_error(format!("TLS setup failed: {e}")))?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake write failed: {e}")))?;
            }
            if conn.wants_read() {
                conn.read_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake read failed: {e}")))?;
                conn.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake failed: {e}")))?;
            }
        }

        Ok(Self { conn, stream })
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if self.conn.wants_read() {
                if self.conn.read_tls(&mut self.stream)? == 0 {
                    return Ok(0);
                }
                self.conn
                    .process_new_packets()
                    .map_err(|e| std::io::Error::other(format!("TLS error: {e}")))?;
            } else {
                return Ok(0);
            }
        }
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        self.stream.flush()
    }
}

#[cfg(feature = "tls")]
fn build_client_config(tls: &TlsConfig, ssl_mode: SslMode) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    match ssl_mode {
        SslMode::Disable => Err(tls_error("TLS stream requested with SslMode::Disable")),
        SslMode::Preferred | SslMode::Required => {
            // self-signed server certs are routine for MySQL; these modes
            // encrypt without verifying when asked to
            if tls.danger_skip_verify {
                build_no_verify_config(&provider)
            } else {
                build_webpki_config(&provider, tls)
            }
        }
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if tls.danger_skip_verify {
                build_no_verify_config(&provider)
            } else if let Some(ca_path) = &tls.ca_cert_path {
                build_custom_ca_config(&provider, tls, ca_path)
            } else {
                build_webpki_config(&provider, tls)
            }
        }
    }
}

#[cfg(feature = "tls")]
fn build_no_verify_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ClientConfig> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    #[derive(Debug)]
    struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }

    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("TLS version setup failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();

    Ok(config)
}

#[cfg(feature = "tls")]
fn build_webpki_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls: &TlsConfig,
) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("TLS version setup failed: {e}")))?
        .with_root_certificates(roots);

    add_client_auth(builder, tls)
}

#[cfg(feature = "tls")]
fn build_custom_ca_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls: &TlsConfig,
    ca_path: &std::path::Path,
) -> Result<rustls::ClientConfig> {
    use std::fs::File;
    use std::io::BufReader;

    let ca_file = File::open(ca_path)
        .map_err(|e| tls_error(format!("cannot open CA bundle {}: {e}", ca_path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(ca_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("cannot parse CA bundle: {e}")))?;

    if certs.is_empty() {
        return Err(tls_error(format!(
            "no certificates in CA bundle {}",
            ca_path.display()
        )));
    }

    let mut roots = rustls::RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| tls_error(format!("bad CA certificate: {e}")))?;
    }

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("TLS version setup failed: {e}")))?
        .with_root_certificates(roots);

    add_client_auth(builder, tls)
}

#[cfg(feature = "tls")]
fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    tls: &TlsConfig,
) -> Result<rustls::ClientConfig> {
    use std::fs::File;
    use std::io::BufReader;

    let (Some(cert_path), Some(key_path)) = (&tls.client_cert_path, &tls.client_key_path) else {
        return Ok(builder.with_no_client_auth());
    };

    let cert_file = File::open(cert_path)
        .map_err(|e| tls_error(format!("cannot open client cert {}: {e}", cert_path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("cannot parse client cert: {e}")))?;

    let key_file = File::open(key_path)
        .map_err(|e| tls_error(format!("cannot open client key {}: {e}", key_path.display())))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| tls_error(format!("cannot parse client key: {e}")))?
        .ok_or_else(|| tls_error(format!("no private key in {}", key_path.display())))?;

    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| tls_error(format!("client auth setup failed: {e}")))
}

/// Placeholder when the `tls` feature is disabled: construction always fails.
#[cfg(not(feature = "tls"))]
#[derive(Debug)]
pub struct TlsStream<S> {
    #[allow(dead_code)]
    inner: S,
}

#[cfg(not(feature = "tls"))]
impl<S: Read + Write> TlsStream<S> {
    #[allow(unused_variables)]
    pub fn new(stream: S, tls: &TlsConfig, server_name: &str, ssl_mode: SslMode) -> Result<Self> {
        Err(tls_error(
            "TLS connections require the `tls` cargo feature",
        ))
    }
}

#[cfg(not(feature = "tls"))]
impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("TLS feature disabled"))
    }
}

#[cfg(not(feature = "tls"))]
impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("TLS feature disabled"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::other("TLS feature disabled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::charset;

    #[test]
    fn ssl_request_layout() {
        let payload = ssl_request_payload(
            capabilities::DEFAULT_CLIENT_FLAGS,
            16 * 1024 * 1024,
            charset::UTF8MB4_GENERAL_CI,
        );
        assert_eq!(payload.len(), 32);

        let caps = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert!(caps & capabilities::CLIENT_SSL != 0);
        let max = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        assert_eq!(max, 16 * 1024 * 1024);
        assert_eq!(payload[8], charset::UTF8MB4_GENERAL_CI);
        assert!(payload[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn ssl_mode_validation() {
        let ssl = capabilities::CLIENT_SSL;

        assert!(!validate_ssl_mode(SslMode::Disable, ssl).unwrap());
        assert!(!validate_ssl_mode(SslMode::Preferred, 0).unwrap());
        assert!(validate_ssl_mode(SslMode::Preferred, ssl).unwrap());
        assert!(validate_ssl_mode(SslMode::Required, 0).is_err());
        assert!(validate_ssl_mode(SslMode::Required, ssl).unwrap());
        assert!(validate_ssl_mode(SslMode::VerifyIdentity, 0).is_err());
    }

    #[test]
    fn tls_config_validation() {
        let bare = TlsConfig::new();
        assert!(validate_tls_config(SslMode::Required, &bare).is_ok());
        assert!(validate_tls_config(SslMode::VerifyCa, &bare).is_err());

        let with_ca = TlsConfig::new().ca_cert("/path/ca.pem");
        assert!(validate_tls_config(SslMode::VerifyCa, &with_ca).is_ok());

        let skipped = TlsConfig::new().skip_verify(true);
        assert!(validate_tls_config(SslMode::VerifyIdentity, &skipped).is_ok());

        let cert_no_key = TlsConfig::new().ca_cert("/ca").client_cert("/cert");
        assert!(validate_tls_config(SslMode::VerifyCa, &cert_no_key).is_err());
    }
}
