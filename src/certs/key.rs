//! Private-key signing primitive.
//!
//! Signed exchanges use `ecdsa_secp256r1_sha256`: ECDSA over P-256 with a
//! SHA-256 digest, signature encoded as an ASN.1 DER `Ecdsa-Sig-Value`.

use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use p256::SecretKey;
use thiserror::Error;

/// Errors from key loading and signing.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// A private key able to sign exchange messages.
///
/// Implementations are sync; signing is CPU-bound.
pub trait ExchangeKey: Send + Sync {
    /// Sign `message`, returning a DER-encoded signature.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError>;

    /// Uncompressed SEC1 public key point.
    fn public_key_sec1(&self) -> Vec<u8>;
}

/// ECDSA P-256 key.
pub struct P256Key {
    signing_key: SigningKey,
}

impl P256Key {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Parse a PEM private key, PKCS#8 ("PRIVATE KEY") or SEC1 ("EC PRIVATE KEY").
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        if let Ok(signing_key) = SigningKey::from_pkcs8_pem(pem) {
            return Ok(Self::new(signing_key));
        }
        let secret = SecretKey::from_sec1_pem(pem)
            .map_err(|e| KeyError::InvalidKey(format!("not a P-256 PKCS#8 or SEC1 key: {}", e)))?;
        Ok(Self::new(SigningKey::from(&secret)))
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl ExchangeKey for P256Key {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        let signature: Signature = self
            .signing_key
            .try_sign(message)
            .map_err(|e| KeyError::Signing(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn public_key_sec1(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }
}

impl std::fmt::Debug for P256Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("P256Key")
            .field("public_key", &self.public_key_sec1().len())
            .finish_non_exhaustive()
    }
}
