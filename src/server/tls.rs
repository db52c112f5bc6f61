use crate::config::TlsConfig;
use crate::error::ServerError;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

#[derive(Clone)]
pub struct TlsManager {
    acceptor: TlsAcceptor,
}

impl TlsManager {
    /// Loads the PEM certificate chain and private key named by `tls_config`.
    pub fn new(tls_config: &TlsConfig) -> Result<Self, ServerError> {
        let acceptor = Self::create_tls_acceptor(tls_config)?;
        Ok(Self { acceptor })
    }

    pub fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }

    fn create_tls_acceptor(tls_config: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
        let cert_path = &tls_config.certificate;
        let key_path = &tls_config.private_key;

        let mut cert_reader = open(cert_path)?;
        let cert_chain: Vec<_> = certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| certificate_error(cert_path, format!("invalid certificate: {}", e)))?;

        if cert_chain.is_empty() {
            return Err(certificate_error(cert_path, "no certificates found"));
        }

        let mut key_reader = open(key_path)?;
        let private_key = private_key(&mut key_reader)
            .map_err(|e| certificate_error(key_path, format!("invalid private key: {}", e)))?
            .ok_or_else(|| certificate_error(key_path, "no private key found"))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| certificate_error(cert_path, e.to_string()))?;

        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, ServerError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| certificate_error(path, e.to_string()))
}

fn certificate_error(path: &Path, reason: impl Into<String>) -> ServerError {
    ServerError::Certificate {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
