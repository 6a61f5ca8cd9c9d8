//! rustls client configurations for the TLS modes that a bare CA file
//! (`TlsConfiguration::Simple`) cannot express: the platform trust store,
//! and a broker whose certificate does not carry the host name we dial.

use std::{fs::File, io::BufReader, sync::Arc};

use rumqttc::{
    tokio_rustls::rustls::{
        client::{
            danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
            WebPkiServerVerifier,
        },
        pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
        CertificateError, ClientConfig, DigitallySignedStruct, Error as RustlsError,
        RootCertStore, SignatureScheme,
    },
    TlsConfiguration,
};
use tracing::{debug, warn};

use super::{config::TlsConfig, error::TransferError};

/// Builds the rustls client configuration for `tls`.
///
/// Roots come from `ca_cert_path` when set, otherwise from the platform
/// trust store. The chain is always verified; `insecure` only waives the
/// host name match.
pub(crate) fn rustls_configuration(tls: &TlsConfig) -> Result<TlsConfiguration, TransferError> {
    let roots = Arc::new(root_store(tls)?);

    let builder = ClientConfig::builder();
    let builder = if tls.insecure {
        warn!("TLS host name verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AnyHostName::new(roots)?))
    } else {
        builder.with_root_certificates(roots)
    };

    let config = match (
        tls.client_cert_path.as_deref(),
        tls.client_key_path.as_deref(),
    ) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| TransferError::ClientSetup(format!("Client certificate: {}", e)))?,
        _ => builder.with_no_client_auth(),
    };

    Ok(TlsConfiguration::Rustls(Arc::new(config)))
}

fn root_store(tls: &TlsConfig) -> Result<RootCertStore, TransferError> {
    let mut roots = RootCertStore::empty();

    let (added, ignored) = match tls.ca_cert_path.as_deref() {
        Some(ca) => roots.add_parsable_certificates(load_certs(ca)?),
        None => {
            let native = rustls_native_certs::load_native_certs().map_err(|e| {
                TransferError::ClientSetup(format!("Platform trust store unavailable: {}", e))
            })?;
            roots.add_parsable_certificates(native)
        }
    };
    debug!("TLS roots: {} loaded, {} ignored", added, ignored);

    if roots.is_empty() {
        return Err(TransferError::ClientSetup(
            "No usable TLS root certificate".into(),
        ));
    }
    Ok(roots)
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TransferError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TransferError::ClientSetup(format!(
            "No PEM certificate in {}",
            path
        )));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, TransferError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| TransferError::ClientSetup(format!("No PEM private key in {}", path)))
}

/// WebPKI verification that accepts a certificate issued for another name.
#[derive(Debug)]
struct AnyHostName {
    inner: Arc<WebPkiServerVerifier>,
}

impl AnyHostName {
    fn new(roots: Arc<RootCertStore>) -> Result<Self, TransferError> {
        let inner = WebPkiServerVerifier::builder(roots)
            .build()
            .map_err(|e| TransferError::ClientSetup(format!("TLS verifier: {}", e)))?;
        Ok(AnyHostName { inner })
    }
}

impl ServerCertVerifier for AnyHostName {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        // The chain is checked before the name, so only the name is waived.
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(RustlsError::InvalidCertificate(CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
