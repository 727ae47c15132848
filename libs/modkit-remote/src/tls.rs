//! rustls setup for the remote transport.
//!
//! Native root certificates are loaded from the OS store once per process.

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::RemoteError;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(|| {
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            tracing::warn!(error = %err, "error loading native root certificate");
        }
        tracing::debug!(count = loaded.certs.len(), "loaded native root certificates");
        loaded.certs
    })
}

/// Globally installed crypto provider, or aws-lc-rs without installing it.
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn native_client_config() -> Result<rustls::ClientConfig, RemoteError> {
    let certs = native_root_certs();
    let mut store = rustls::RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(RemoteError::Tls(
            format!(
                "no usable native root CA certificates (found {})",
                certs.len()
            )
            .into(),
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| RemoteError::Tls(Box::new(e)))?
        .with_root_certificates(store)
        .with_no_client_auth();
    Ok(config)
}

/// Wrap a TCP connector with rustls.
///
/// Plain `http://` is only accepted when the transport allows it; ALPN
/// advertises both h2 and http/1.1.
///
/// # Errors
///
/// Returns `RemoteError::Tls` if the root store cannot be prepared.
pub fn https_connector(
    roots: TlsRootConfig,
    transport: TransportSecurity,
    tcp: HttpConnector,
) -> Result<HttpsConnector<HttpConnector>, RemoteError> {
    let builder = match roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| RemoteError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(native_client_config()?)
        }
    };

    let connector = match transport {
        TransportSecurity::AllowInsecureHttp => builder
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(tcp),
        TransportSecurity::TlsOnly => builder.https_only().enable_all_versions().wrap_connector(tcp),
    };
    Ok(connector)
}
