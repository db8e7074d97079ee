//! mTLS material loading and organization-pinned rustls configurations.
//!
//! Every inter-service link speaks TLS 1.3. Servers require a client
//! certificate signed by the private CA; both directions additionally pin
//! the peer leaf certificate's Subject `Organization` to the expected
//! upstream identity, so a stolen-but-valid certificate from the wrong
//! service still fails the hop.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    EmptyCertFile(String),

    #[error("no private key found in {0}")]
    EmptyKeyFile(String),

    #[error("certificate parse error: {0}")]
    CertParse(String),

    #[error("TLS configuration error: {0}")]
    Config(String),
}

impl From<rustls::Error> for TlsSetupError {
    fn from(e: rustls::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Identity extracted from a peer leaf certificate.
///
/// This is what lands in the audit log on every accepted and rejected
/// connection: subject CN and O plus the certificate serial, never any
/// request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub common_name: String,
    pub organization: String,
    pub serial: String,
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CN={} O={} serial={}",
            self.common_name, self.organization, self.serial
        )
    }
}

/// Parse CN, O, and serial out of a DER-encoded certificate.
pub fn peer_identity_from_der(der: &CertificateDer<'_>) -> Result<PeerIdentity, TlsSetupError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
        .map_err(|e| TlsSetupError::CertParse(e.to_string()))?;
    let subject = cert.subject();
    let common_name = subject
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let organization = subject
        .iter_organization()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string();
    Ok(PeerIdentity {
        common_name,
        organization,
        serial: cert.raw_serial_as_string(),
    })
}

/// Load a PEM certificate chain.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsSetupError> {
    let file = File::open(path).map_err(|source| TlsSetupError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|source| TlsSetupError::Io {
            path: path.display().to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsSetupError::EmptyCertFile(path.display().to_string()));
    }
    Ok(certs)
}

/// Load a PEM private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsSetupError> {
    let file = File::open(path).map_err(|source| TlsSetupError::Io {
        path: path.display().to_string(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsSetupError::Io {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsSetupError::EmptyKeyFile(path.display().to_string()))
}

/// Build a root store holding the private CA.
pub fn load_root_store(ca_path: &Path) -> Result<RootCertStore, TlsSetupError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots
            .add(cert)
            .map_err(|e| TlsSetupError::CertParse(e.to_string()))?;
    }
    Ok(roots)
}

/// Server certificate verifier that chains WebPKI validation and then pins
/// the peer's Subject Organization.
#[derive(Debug)]
struct OrgPinningVerifier {
    inner: Arc<WebPkiServerVerifier>,
    expected_org: String,
}

impl ServerCertVerifier for OrgPinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        let identity = peer_identity_from_der(end_entity)
            .map_err(|e| rustls::Error::General(format!("unparseable server certificate: {e}")))?;
        if identity.organization != self.expected_org {
            return Err(rustls::Error::General(format!(
                "unauthorized server organization: {:?}",
                identity.organization
            )));
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Client configuration for an outbound mTLS hop.
///
/// TLS 1.3 only; server chain validated against the private CA and the leaf
/// pinned to `expected_org`. The local certificate/key pair is presented for
/// mutual authentication.
pub fn client_config(
    ca_path: &Path,
    cert_path: &Path,
    key_path: &Path,
    expected_org: &str,
) -> Result<ClientConfig, TlsSetupError> {
    let roots = load_root_store(ca_path)?;
    let webpki = WebPkiServerVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| TlsSetupError::Config(e.to_string()))?;
    let verifier = Arc::new(OrgPinningVerifier {
        inner: webpki,
        expected_org: expected_org.to_string(),
    });

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(certs, key)?;
    Ok(config)
}

/// Server configuration requiring a client certificate signed by the
/// private CA. Organization pinning of the client happens at the HTTP layer,
/// where a categorised 401/403 can be returned instead of a bare handshake
/// failure.
pub fn mtls_server_config(
    cert_path: &Path,
    key_path: &Path,
    ca_path: &Path,
) -> Result<ServerConfig, TlsSetupError> {
    let roots = load_root_store(ca_path)?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| TlsSetupError::Config(e.to_string()))?;

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    Ok(config)
}

/// Server configuration for the public entry point: server-side TLS only.
pub fn public_server_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<ServerConfig, TlsSetupError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DnType, KeyPair};

    fn self_signed(cn: &str, org: &str) -> CertificateDer<'static> {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.distinguished_name.push(DnType::OrganizationName, org);
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().der().clone()
    }

    #[test]
    fn extracts_peer_identity_fields() {
        let der = self_signed("security-switch", "Switch");
        let identity = peer_identity_from_der(&der).unwrap();
        assert_eq!(identity.common_name, "security-switch");
        assert_eq!(identity.organization, "Switch");
        assert!(!identity.serial.is_empty());
    }

    #[test]
    fn identity_display_has_no_payload_fields() {
        let der = self_signed("database-vault", "Vault");
        let identity = peer_identity_from_der(&der).unwrap();
        let line = identity.to_string();
        assert!(line.contains("CN=database-vault"));
        assert!(line.contains("O=Vault"));
        assert!(line.contains("serial="));
    }

    #[test]
    fn missing_organization_is_empty_not_error() {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, "anonymous");
        let key = KeyPair::generate().unwrap();
        let der = params.self_signed(&key).unwrap().der().clone();

        let identity = peer_identity_from_der(&der).unwrap();
        assert_eq!(identity.common_name, "anonymous");
        assert_eq!(identity.organization, "");
    }

    #[test]
    fn load_certs_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            load_certs(&path),
            Err(TlsSetupError::EmptyCertFile(_))
        ));
    }

    #[test]
    fn load_certs_reads_pem() {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, "ca");
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, cert.pem()).unwrap();

        let loaded = load_certs(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(load_root_store(&path).is_ok());
    }
}
