//! rustls configuration for the bundled engine.

use std::io::BufRead;
use std::sync::Arc;

use rcgen::{CertificateParams, KeyPair, PKCS_ECDSA_P256_SHA256};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{RootCertStore, SupportedProtocolVersion, server::WebPkiClientVerifier};
use strata_config::{ClientAuthPolicy, SecureConfig};
use tracing::{info, warn};

use crate::error::SecureError;

type CertChain = Vec<CertificateDer<'static>>;

/// Build the server-role config from the secure section.
///
/// Without a configured certificate an ephemeral self-signed one is used.
pub fn load_server_config(cfg: &SecureConfig) -> Result<rustls::ServerConfig, SecureError> {
    let (certs, key) = match (&cfg.certificate, &cfg.private_key) {
        (Some(cert), Some(key)) => (load_certs(cert)?, load_private_key(key)?),
        (None, None) => {
            warn!("no certificate configured, generating a self-signed one");
            generate_self_signed()?
        }
        _ => {
            return Err(SecureError::Config(
                "certificate and private_key must be set together".into(),
            ));
        }
    };

    let builder = rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(protocol_versions(cfg))
        .map_err(|e| SecureError::Config(format!("TLS version error: {}", e)))?;

    let ca = cfg.ca_certificate.as_deref();
    let builder = match (cfg.client_auth, ca) {
        (ClientAuthPolicy::None, _) | (ClientAuthPolicy::Optional, None) => {
            builder.with_no_client_auth()
        }
        (ClientAuthPolicy::Optional, Some(ca)) => {
            builder.with_client_cert_verifier(client_verifier(ca, true)?)
        }
        (ClientAuthPolicy::Required, Some(ca)) => {
            builder.with_client_cert_verifier(client_verifier(ca, false)?)
        }
        (ClientAuthPolicy::Required, None) => {
            return Err(SecureError::Config(
                "client_auth = required needs ca_certificate".into(),
            ));
        }
    };

    let mut config = builder.with_single_cert(certs, key)?;
    // One flight per side; no post-handshake records.
    config.send_tls13_tickets = 0;

    info!(
        min_version = %cfg.min_version,
        max_version = %cfg.max_version,
        client_auth = ?cfg.client_auth,
        "server TLS configured"
    );

    Ok(config)
}

/// Build the client-role config.
///
/// Returns `None` when the peer cannot be verified: no CA bundle while the
/// client-auth policy still asks for verification.
pub fn load_client_config(
    cfg: &SecureConfig,
) -> Result<Option<rustls::ClientConfig>, SecureError> {
    let builder = rustls::ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(protocol_versions(cfg))
        .map_err(|e| SecureError::Config(format!("TLS version error: {}", e)))?;

    let mut config = match (&cfg.ca_certificate, cfg.client_auth) {
        (Some(ca), _) => builder
            .with_root_certificates(root_store(ca)?)
            .with_no_client_auth(),
        (None, ClientAuthPolicy::None) => {
            warn!("client role skips server certificate verification");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        }
        (None, _) => {
            info!("no CA bundle configured, client role disabled");
            return Ok(None);
        }
    };
    config.resumption = rustls::client::Resumption::disabled();

    Ok(Some(config))
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn protocol_versions(cfg: &SecureConfig) -> &'static [&'static SupportedProtocolVersion] {
    match (cfg.min_version.as_str(), cfg.max_version.as_str()) {
        ("tls13", "tls13") => TLS13_ONLY,
        ("tls12", "tls12") => TLS12_ONLY,
        _ => rustls::ALL_VERSIONS,
    }
}

fn client_verifier(
    ca: &str,
    allow_unauthenticated: bool,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>, SecureError> {
    let mut builder =
        WebPkiClientVerifier::builder_with_provider(Arc::new(root_store(ca)?), provider());
    if allow_unauthenticated {
        builder = builder.allow_unauthenticated();
    }
    builder
        .build()
        .map_err(|e| SecureError::Config(format!("client verifier error: {}", e)))
}

fn root_store(source: &str) -> Result<RootCertStore, SecureError> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(source)? {
        store
            .add(cert)
            .map_err(|e| SecureError::Config(format!("failed to add CA cert: {}", e)))?;
    }
    Ok(store)
}

/// PEM material is either inline text or a path to a file.
fn pem_reader(source: &str) -> Result<Box<dyn BufRead>, SecureError> {
    if source.trim_start().starts_with("-----BEGIN") {
        Ok(Box::new(std::io::Cursor::new(source.as_bytes().to_vec())))
    } else {
        Ok(Box::new(std::io::BufReader::new(std::fs::File::open(
            source,
        )?)))
    }
}

pub(crate) fn load_certs(source: &str) -> Result<CertChain, SecureError> {
    let mut reader = pem_reader(source)?;
    let certs: CertChain = rustls_pemfile::certs(&mut reader)
        .filter_map(|c| c.ok().map(|v| v.into_owned()))
        .collect();
    if certs.is_empty() {
        return Err(SecureError::Config("no certificates found".into()));
    }
    Ok(certs)
}

pub(crate) fn load_private_key(source: &str) -> Result<PrivateKeyDer<'static>, SecureError> {
    let mut reader = pem_reader(source)?;
    loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            Some(_) => continue,
            None => break,
        }
    }
    Err(SecureError::Config("no private key found".into()))
}

fn generate_self_signed() -> Result<(CertChain, PrivateKeyDer<'static>), SecureError> {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| SecureError::CertGeneration(e.to_string()))?;
    let params = CertificateParams::new(vec!["localhost".to_string()])
        .map_err(|e| SecureError::CertGeneration(e.to_string()))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| SecureError::CertGeneration(e.to_string()))?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok((vec![cert_der], key_der))
}

/// Accepts any server certificate. Only used with `client_auth = "none"`
/// and no CA bundle.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
