//! Certificate fixtures for unit tests.

use std::sync::Arc;

use rcgen::{CertificateParams, CustomExtension, KeyPair, PKCS_ECDSA_P256_SHA256};

use crate::certs::store::{CertStore, ExtensionPolicy};

pub const CAN_SIGN_HTTP_EXCHANGES: &[u64] = &[1, 3, 6, 1, 4, 1, 11129, 2, 1, 22];

/// PEM chain and PKCS#8 key for a self-signed P-256 certificate.
pub fn generate_pem(domain: &str, can_sign: bool) -> (String, String) {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
    if can_sign {
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(CAN_SIGN_HTTP_EXCHANGES, vec![0x05, 0x00]));
    }
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem(), key_pair.serialize_pem())
}

pub fn store() -> Arc<CertStore> {
    let (cert_pem, key_pem) = generate_pem("example.com", true);
    Arc::new(CertStore::from_pem(cert_pem.as_bytes(), &key_pem, ExtensionPolicy::Require).unwrap())
}
