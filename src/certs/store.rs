//! Immutable certificate chain and private key.
//!
//! # Responsibilities
//! - Parse the PEM chain (leaf first) and the P-256 private key
//! - Enforce load-time invariants: non-empty chain, CanSignHttpExchanges
//!   extension on the leaf, key matching the leaf public key
//! - Precompute what every exchange references: the leaf SHA-256 and the
//!   content-derived certificate name

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::pem::Pem;
use x509_parser::prelude::X509Certificate;

use crate::certs::key::{ExchangeKey, KeyError, P256Key};

/// OID of the CanSignHttpExchanges certificate extension.
pub const CAN_SIGN_HTTP_EXCHANGES_OID: &str = "1.3.6.1.4.1.11129.2.1.22";

const OCSP_ACCESS_METHOD_OID: &str = "1.3.6.1.5.5.7.48.1";

/// Errors that make the certificate material unusable. All are fatal at startup.
#[derive(Debug, Error)]
pub enum CertStoreError {
    #[error("no certificate found")]
    NoCertificates,

    #[error("PEM error: {0}")]
    Pem(String),

    #[error("certificate {index} does not parse: {reason}")]
    Parse { index: usize, reason: String },

    #[error("cert is missing CanSignHttpExchanges extension")]
    MissingCanSignHttpExchanges,

    #[error("private key does not match the leaf certificate")]
    KeyMismatch,

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Whether the leaf must carry the CanSignHttpExchanges extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtensionPolicy {
    #[default]
    Require,
    /// Development only: accept ordinary TLS certificates.
    Skip,
}

/// Facts about the leaf certificate extracted once at load.
#[derive(Debug, Clone)]
pub struct LeafInfo {
    /// DER content octets of the serial number INTEGER.
    pub serial: Vec<u8>,
    /// DER of the issuer distinguished name.
    pub issuer_name: Vec<u8>,
    pub ocsp_url: Option<String>,
    pub can_sign_exchanges: bool,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    pub sha256: [u8; 32],
    /// `base64url(sha256(leaf DER))`, the publication name of the chain.
    pub name: String,
}

/// Certificate chain plus private key, immutable for the process lifetime.
pub struct CertStore {
    chain: Vec<Vec<u8>>,
    leaf: LeafInfo,
    /// subjectPublicKey bits of the leaf's issuer (the leaf itself for a
    /// single-certificate chain).
    issuer_public_key: Vec<u8>,
    key: Arc<dyn ExchangeKey>,
}

impl CertStore {
    /// Build from DER certificates (leaf first) and a signing key.
    pub fn new(
        chain: Vec<Vec<u8>>,
        key: Arc<dyn ExchangeKey>,
        policy: ExtensionPolicy,
    ) -> Result<Self, CertStoreError> {
        let leaf_der = chain.first().ok_or(CertStoreError::NoCertificates)?;
        let leaf_cert = parse(leaf_der, 0)?;
        let leaf = leaf_info(leaf_der, &leaf_cert);

        if !leaf.can_sign_exchanges {
            match policy {
                ExtensionPolicy::Require => return Err(CertStoreError::MissingCanSignHttpExchanges),
                ExtensionPolicy::Skip => tracing::warn!(
                    cert_name = %leaf.name,
                    "Leaf certificate lacks CanSignHttpExchanges; exchanges will not verify in browsers"
                ),
            }
        }

        if *leaf_cert.public_key().subject_public_key.data != *key.public_key_sec1() {
            return Err(CertStoreError::KeyMismatch);
        }

        let issuer_public_key = match chain.get(1) {
            Some(issuer_der) => parse(issuer_der, 1)?
                .public_key()
                .subject_public_key
                .data
                .to_vec(),
            None => leaf_cert.public_key().subject_public_key.data.to_vec(),
        };
        for (index, der) in chain.iter().enumerate().skip(2) {
            parse(der, index)?;
        }

        tracing::info!(
            cert_name = %leaf.name,
            chain_len = chain.len(),
            ocsp_url = ?leaf.ocsp_url,
            "Certificate chain loaded"
        );

        Ok(Self {
            chain,
            leaf,
            issuer_public_key,
            key,
        })
    }

    /// Load a PEM chain and a PEM P-256 private key.
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &str,
        policy: ExtensionPolicy,
    ) -> Result<Self, CertStoreError> {
        let mut chain = Vec::new();
        for pem in Pem::iter_from_buffer(cert_pem) {
            let pem = pem.map_err(|e| CertStoreError::Pem(e.to_string()))?;
            if pem.label == "CERTIFICATE" {
                chain.push(pem.contents);
            }
        }
        if chain.is_empty() {
            return Err(CertStoreError::NoCertificates);
        }
        let key = P256Key::from_pem(key_pem)?;
        Self::new(chain, Arc::new(key), policy)
    }

    /// DER certificates, leaf first.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    pub fn leaf(&self) -> &LeafInfo {
        &self.leaf
    }

    pub fn leaf_der(&self) -> &[u8] {
        &self.chain[0]
    }

    pub fn issuer_public_key(&self) -> &[u8] {
        &self.issuer_public_key
    }

    pub fn key(&self) -> &dyn ExchangeKey {
        self.key.as_ref()
    }

    /// Content-derived publication name.
    pub fn cert_name(&self) -> &str {
        &self.leaf.name
    }
}

impl std::fmt::Debug for CertStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertStore")
            .field("cert_name", &self.leaf.name)
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// `base64url(sha256(der))` without padding.
pub fn cert_name(der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(der))
}

fn parse(der: &[u8], index: usize) -> Result<X509Certificate<'_>, CertStoreError> {
    x509_parser::parse_x509_certificate(der)
        .map(|(_, cert)| cert)
        .map_err(|e| CertStoreError::Parse {
            index,
            reason: e.to_string(),
        })
}

fn leaf_info(der: &[u8], cert: &X509Certificate<'_>) -> LeafInfo {
    let mut ocsp_url = None;
    let mut can_sign_exchanges = false;
    for ext in cert.extensions() {
        if ext.oid.to_id_string() == CAN_SIGN_HTTP_EXCHANGES_OID {
            can_sign_exchanges = true;
        }
        if let ParsedExtension::AuthorityInfoAccess(aia) = ext.parsed_extension() {
            for desc in &aia.accessdescs {
                if desc.access_method.to_id_string() == OCSP_ACCESS_METHOD_OID {
                    if let GeneralName::URI(uri) = &desc.access_location {
                        ocsp_url.get_or_insert_with(|| uri.to_string());
                    }
                }
            }
        }
    }

    let validity = cert.validity();
    LeafInfo {
        serial: cert.tbs_certificate.raw_serial().to_vec(),
        issuer_name: cert.tbs_certificate.issuer.as_raw().to_vec(),
        ocsp_url,
        can_sign_exchanges,
        not_before: to_system_time(validity.not_before.timestamp()),
        not_after: to_system_time(validity.not_after.timestamp()),
        sha256: Sha256::digest(der).into(),
        name: cert_name(der),
    }
}

fn to_system_time(unix: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::try_from(unix).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_name_is_unpadded_base64url() {
        let name = cert_name(b"certificate bytes");
        assert_eq!(name.len(), 43);
        assert!(!name.contains('='));
        assert!(!name.contains('+') && !name.contains('/'));
    }

    #[test]
    fn test_empty_pem_is_rejected() {
        let err = CertStore::from_pem(b"", "", ExtensionPolicy::Require).unwrap_err();
        assert!(matches!(err, CertStoreError::NoCertificates));
    }
}
