use crate::error::Error;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use rustls_pemfile::certs;
use std::fs::File;
use std::io::BufReader;

/// Loads the PEM certificates in `ca_cert_path` into a root store.
pub fn load_root_store(ca_cert_path: &str) -> Result<RootCertStore, Error> {
    let ca_cert_file = File::open(ca_cert_path).map_err(|e| Error::TlsCertificateLoad {
        path: ca_cert_path.to_string(),
        source: e,
    })?;
    let ca_certs: Vec<CertificateDer> = certs(&mut BufReader::new(ca_cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::TlsInvalidCertificate(format!("Failed to parse CA certificates: {e}"))
        })?;

    if ca_certs.is_empty() {
        return Err(Error::TlsInvalidCertificate(
            "No CA certificates found in file".to_string(),
        ));
    }

    let mut root_cert_store = RootCertStore::empty();
    for cert in ca_certs {
        root_cert_store
            .add(cert)
            .map_err(|e| Error::TlsInvalidCertificate(e.to_string()))?;
    }

    Ok(root_cert_store)
}
