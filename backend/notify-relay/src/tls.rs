use crate::config::TlsConfig;
use crate::error::{AppError, AppResult};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Build the HTTPS server configuration from a PEM certificate chain and key
pub fn load_server_config(tls: &TlsConfig) -> AppResult<ServerConfig> {
    let certs = load_certs(&tls.cert)?;
    let key = load_private_key(&tls.key)?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| AppError::Tls(format!("invalid certificate/key pair: {e}")))
}

fn open(path: &Path) -> AppResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| AppError::Tls(format!("open {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> AppResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Tls(format!("read certificates from {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(AppError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> AppResult<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| AppError::Tls(format!("read private key from {}: {e}", path.display())))?
        .ok_or_else(|| AppError::Tls(format!("no private key found in {}", path.display())))
}
