#![cfg(feature = "tls")]
#![allow(dead_code)]

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::io::Write;
use tempfile::NamedTempFile;

/// A self-signed certificate for `localhost`, with the CA file on disk.
///
/// The temporary file is deleted when this is dropped.
pub struct TestCerts {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
    ca_cert_file: NamedTempFile,
}

impl TestCerts {
    pub fn ca_cert_path(&self) -> &str {
        self.ca_cert_file.path().to_str().unwrap()
    }

    /// Config with `tls_ca_cert` pointing at the CA file.
    pub fn config(&self) -> config::Config {
        config::Config::builder()
            .set_default("tls_ca_cert", self.ca_cert_path())
            .unwrap()
            .build()
            .unwrap()
    }
}

/// Generate a self-signed certificate and write it out as the CA file
pub fn generate_test_certs() -> TestCerts {
    let certified_key = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let cert_pem = certified_key.cert.pem();

    // For testing, CA cert is the same as server cert (self-signed)
    let mut ca_cert_file = NamedTempFile::new().unwrap();
    ca_cert_file.write_all(cert_pem.as_bytes()).unwrap();
    ca_cert_file.flush().unwrap();

    TestCerts {
        cert: certified_key.cert.der().clone(),
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified_key.key_pair.serialize_der(),
        )),
        ca_cert_file,
    }
}

/// Write a file that contains no certificates at all
pub fn empty_pem_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"not a certificate\n").unwrap();
    file.flush().unwrap();
    file
}
