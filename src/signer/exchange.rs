//! Signed exchange wire format, version b3.
//!
//! ```text
//! "sxg1-b3\0"
//! fallback URL length (2 bytes BE) | fallback URL
//! signature length (3 bytes BE)    | header length (3 bytes BE)
//! Signature header value | CBOR response headers | mi-sha256-03 payload
//! ```
//!
//! The signature covers the signed message, which binds the validity-url,
//! date, expires, request URL and the exact CBOR header bytes; the payload
//! is bound through the `digest` header.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde_cbor::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::certs::key::{ExchangeKey, KeyError};

pub const SXG_CONTENT_TYPE: &str = "application/signed-exchange;v=b3";
pub const MAGIC: &[u8] = b"sxg1-b3\0";
pub const CONTEXT: &[u8] = b"HTTP Exchange 1 b3";
pub const MI_RECORD_SIZE: usize = 16384;
pub const MI_ENCODING: &str = "mi-sha256-03";
pub const INTEGRITY: &str = "digest/mi-sha256-03";

const MAX_FALLBACK_URL_LEN: usize = (1 << 16) - 1;
const MAX_SIGNATURE_LEN: usize = 16 * 1024;
const MAX_HEADER_LEN: usize = 512 * 1024;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{what} is {len} bytes, limit {limit}")]
    TooLarge {
        what: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("CBOR encoding failed: {0}")]
    Encoding(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("invalid signed exchange: {0}")]
    Decode(String),
}

/// Parameters of one Signature header entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    pub label: String,
    pub cert_sha256: [u8; 32],
    pub cert_url: String,
    pub validity_url: String,
    pub date: u64,
    pub expires: u64,
}

/// An unsigned exchange: request URL, response headers and encoded payload.
#[derive(Debug, Clone)]
pub struct Exchange {
    url: String,
    headers: BTreeMap<String, String>,
    payload: Vec<u8>,
}

impl Exchange {
    /// Build a `:status 200` exchange. `headers` must already be filtered;
    /// the payload encoding headers are added here.
    pub fn new(url: impl Into<String>, mut headers: BTreeMap<String, String>, body: &[u8]) -> Self {
        let (payload, proof) = mi_sha256_encode(body, MI_RECORD_SIZE);
        headers.insert("content-encoding".to_string(), MI_ENCODING.to_string());
        headers.insert(
            "digest".to_string(),
            format!("{}={}", MI_ENCODING, STANDARD.encode(proof)),
        );
        Self {
            url: url.into(),
            headers,
            payload,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Canonical CBOR map of the response headers plus `:status`.
    pub fn encoded_headers(&self) -> Result<Vec<u8>, ExchangeError> {
        let mut map = BTreeMap::new();
        map.insert(
            Value::Bytes(b":status".to_vec()),
            Value::Bytes(b"200".to_vec()),
        );
        for (name, value) in &self.headers {
            map.insert(
                Value::Bytes(name.to_ascii_lowercase().into_bytes()),
                Value::Bytes(value.as_bytes().to_vec()),
            );
        }
        serde_cbor::to_vec(&Value::Map(map)).map_err(|e| ExchangeError::Encoding(e.to_string()))
    }

    /// Sign and serialize.
    pub fn sign(&self, params: &SignatureParams, key: &dyn ExchangeKey) -> Result<Vec<u8>, ExchangeError> {
        let headers = self.encoded_headers()?;
        let message = signed_message(params, &self.url, &headers);
        let signature = key.sign(&message)?;
        let signature_header = signature_header(params, &signature);
        encode(&self.url, signature_header.as_bytes(), &headers, &self.payload)
    }
}

/// The byte string the signature is computed over.
pub fn signed_message(params: &SignatureParams, url: &str, headers_cbor: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(
        64 + CONTEXT.len() + 34 + params.validity_url.len() + url.len() + headers_cbor.len() + 40,
    );
    message.extend_from_slice(&[0x20; 64]);
    message.extend_from_slice(CONTEXT);
    message.push(0x00);
    message.push(0x20);
    message.extend_from_slice(&params.cert_sha256);
    push_prefixed(&mut message, params.validity_url.as_bytes());
    message.extend_from_slice(&params.date.to_be_bytes());
    message.extend_from_slice(&params.expires.to_be_bytes());
    push_prefixed(&mut message, url.as_bytes());
    push_prefixed(&mut message, headers_cbor);
    message
}

fn push_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Serialized Signature header value.
pub fn signature_header(params: &SignatureParams, signature: &[u8]) -> String {
    format!(
        "{};cert-sha256=*{}*;cert-url=\"{}\";date={};expires={};integrity=\"{}\";sig=*{}*;validity-url=\"{}\"",
        params.label,
        STANDARD.encode(params.cert_sha256),
        params.cert_url,
        params.date,
        params.expires,
        INTEGRITY,
        STANDARD.encode(signature),
        params.validity_url,
    )
}

fn encode(url: &str, signature: &[u8], headers: &[u8], payload: &[u8]) -> Result<Vec<u8>, ExchangeError> {
    check_len("fallback URL", url.len(), MAX_FALLBACK_URL_LEN)?;
    check_len("signature", signature.len(), MAX_SIGNATURE_LEN)?;
    check_len("response headers", headers.len(), MAX_HEADER_LEN)?;

    let mut out = Vec::with_capacity(
        MAGIC.len() + 2 + url.len() + 6 + signature.len() + headers.len() + payload.len(),
    );
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(url.len() as u16).to_be_bytes());
    out.extend_from_slice(url.as_bytes());
    out.extend_from_slice(&(signature.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(&(headers.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(signature);
    out.extend_from_slice(headers);
    out.extend_from_slice(payload);
    Ok(out)
}

fn check_len(what: &'static str, len: usize, limit: usize) -> Result<(), ExchangeError> {
    if len > limit {
        return Err(ExchangeError::TooLarge { what, len, limit });
    }
    Ok(())
}

/// mi-sha256-03 content encoding.
///
/// Returns the encoded body (8-byte record size, then records interleaved
/// with the proofs of their successors) and the top-level proof.
pub fn mi_sha256_encode(payload: &[u8], record_size: usize) -> (Vec<u8>, [u8; 32]) {
    let mut encoded = Vec::with_capacity(8 + payload.len() + 32 * (payload.len() / record_size + 1));
    encoded.extend_from_slice(&(record_size as u64).to_be_bytes());

    if payload.is_empty() {
        return (encoded, Sha256::digest([0u8]).into());
    }

    let records: Vec<&[u8]> = payload.chunks(record_size).collect();
    let mut proofs = vec![[0u8; 32]; records.len()];
    for i in (0..records.len()).rev() {
        let mut hasher = Sha256::new();
        hasher.update(records[i]);
        if i + 1 < records.len() {
            hasher.update(proofs[i + 1]);
            hasher.update([1u8]);
        } else {
            hasher.update([0u8]);
        }
        proofs[i] = hasher.finalize().into();
    }

    for (i, record) in records.iter().enumerate() {
        encoded.extend_from_slice(record);
        if i + 1 < records.len() {
            encoded.extend_from_slice(&proofs[i + 1]);
        }
    }
    (encoded, proofs[0])
}

/// Decode an mi-sha256-03 body, checking every record against `proof`.
pub fn mi_sha256_decode(encoded: &[u8], proof: &[u8; 32]) -> Result<Vec<u8>, ExchangeError> {
    let bad = |reason: &str| ExchangeError::Decode(format!("mi-sha256: {}", reason));
    let (size, mut rest) = encoded.split_first_chunk::<8>().ok_or_else(|| bad("missing record size"))?;
    let record_size = u64::from_be_bytes(*size) as usize;
    if record_size == 0 {
        return Err(bad("zero record size"));
    }
    if rest.is_empty() {
        return if Sha256::digest([0u8]).as_slice() == proof {
            Ok(Vec::new())
        } else {
            Err(bad("proof mismatch"))
        };
    }

    let mut expected = *proof;
    let mut payload = Vec::with_capacity(rest.len());
    loop {
        if rest.len() <= record_size {
            let actual: [u8; 32] = Sha256::new().chain_update(rest).chain_update([0u8]).finalize().into();
            if actual != expected {
                return Err(bad("proof mismatch"));
            }
            payload.extend_from_slice(rest);
            return Ok(payload);
        }
        if rest.len() < record_size + 32 {
            return Err(bad("truncated proof"));
        }
        let (record, tail) = rest.split_at(record_size);
        let (next, tail) = tail.split_at(32);
        let actual: [u8; 32] = Sha256::new()
            .chain_update(record)
            .chain_update(next)
            .chain_update([1u8])
            .finalize()
            .into();
        if actual != expected {
            return Err(bad("proof mismatch"));
        }
        payload.extend_from_slice(record);
        expected.copy_from_slice(next);
        rest = tail;
    }
}

/// A parsed b3 exchange.
#[derive(Debug, Clone)]
pub struct DecodedExchange {
    pub url: String,
    pub signature: DecodedSignature,
    /// Exact CBOR header bytes as signed.
    pub headers_cbor: Vec<u8>,
    /// Response headers including `:status`.
    pub headers: BTreeMap<String, String>,
    /// Encoded (mi-sha256-03) payload.
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSignature {
    pub params: SignatureParams,
    pub integrity: String,
    pub sig: Vec<u8>,
}

impl DecodedExchange {
    /// Verify the signature against the leaf's public key.
    pub fn verify(&self, verifying_key: &VerifyingKey) -> bool {
        let message = signed_message(&self.signature.params, &self.url, &self.headers_cbor);
        Signature::from_der(&self.signature.sig)
            .map(|sig| verifying_key.verify(&message, &sig).is_ok())
            .unwrap_or(false)
    }

    /// Payload after checking it against the `digest` header.
    pub fn body(&self) -> Result<Vec<u8>, ExchangeError> {
        let digest = self
            .headers
            .get("digest")
            .and_then(|d| d.strip_prefix("mi-sha256-03="))
            .ok_or_else(|| ExchangeError::Decode("missing mi-sha256-03 digest".to_string()))?;
        let proof: [u8; 32] = STANDARD
            .decode(digest)
            .ok()
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| ExchangeError::Decode("bad digest".to_string()))?;
        mi_sha256_decode(&self.payload, &proof)
    }
}

/// Parse b3 bytes.
pub fn decode(bytes: &[u8]) -> Result<DecodedExchange, ExchangeError> {
    let bad = |reason: &str| ExchangeError::Decode(reason.to_string());
    let rest = bytes.strip_prefix(MAGIC).ok_or_else(|| bad("wrong magic"))?;

    let (url_len, rest) = take(rest, 2).ok_or_else(|| bad("truncated URL length"))?;
    let url_len = u16::from_be_bytes([url_len[0], url_len[1]]) as usize;
    let (url, rest) = take(rest, url_len).ok_or_else(|| bad("truncated URL"))?;
    let url = String::from_utf8(url.to_vec()).map_err(|_| bad("URL is not UTF-8"))?;

    let (lens, rest) = take(rest, 6).ok_or_else(|| bad("truncated lengths"))?;
    let sig_len = u32::from_be_bytes([0, lens[0], lens[1], lens[2]]) as usize;
    let header_len = u32::from_be_bytes([0, lens[3], lens[4], lens[5]]) as usize;
    let (sig, rest) = take(rest, sig_len).ok_or_else(|| bad("truncated signature"))?;
    let (headers_cbor, payload) = take(rest, header_len).ok_or_else(|| bad("truncated headers"))?;

    let signature = parse_signature(std::str::from_utf8(sig).map_err(|_| bad("signature is not UTF-8"))?)?;

    let value: Value = serde_cbor::from_slice(headers_cbor).map_err(|e| bad(&e.to_string()))?;
    let Value::Map(map) = value else {
        return Err(bad("headers are not a map"));
    };
    let mut headers = BTreeMap::new();
    for (k, v) in map {
        match (k, v) {
            (Value::Bytes(k), Value::Bytes(v)) => {
                headers.insert(
                    String::from_utf8(k).map_err(|_| bad("header name is not UTF-8"))?,
                    String::from_utf8(v).map_err(|_| bad("header value is not UTF-8"))?,
                );
            }
            _ => return Err(bad("header entries must be byte strings")),
        }
    }

    Ok(DecodedExchange {
        url,
        signature,
        headers_cbor: headers_cbor.to_vec(),
        headers,
        payload: payload.to_vec(),
    })
}

fn take(input: &[u8], n: usize) -> Option<(&[u8], &[u8])> {
    (input.len() >= n).then(|| input.split_at(n))
}

fn parse_signature(header: &str) -> Result<DecodedSignature, ExchangeError> {
    let bad = |reason: String| ExchangeError::Decode(format!("signature: {}", reason));
    let mut parts = header.split(';');
    let label = parts.next().unwrap_or_default().to_string();

    let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
    for part in parts {
        let (k, v) = part.split_once('=').ok_or_else(|| bad(format!("bad parameter '{}'", part)))?;
        fields.insert(k, v);
    }
    let field = |name: &str| fields.get(name).copied().ok_or_else(|| bad(format!("missing {}", name)));
    let binary = |name: &str| -> Result<Vec<u8>, ExchangeError> {
        let raw = field(name)?;
        let inner = raw
            .strip_prefix('*')
            .and_then(|r| r.strip_suffix('*'))
            .ok_or_else(|| bad(format!("{} is not binary", name)))?;
        STANDARD.decode(inner).map_err(|e| bad(e.to_string()))
    };
    let string = |name: &str| -> Result<String, ExchangeError> {
        let raw = field(name)?;
        raw.strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .map(str::to_string)
            .ok_or_else(|| bad(format!("{} is not a string", name)))
    };
    let integer = |name: &str| -> Result<u64, ExchangeError> {
        field(name)?.parse().map_err(|_| bad(format!("{} is not an integer", name)))
    };

    let cert_sha256: [u8; 32] = binary("cert-sha256")?
        .try_into()
        .map_err(|_| bad("cert-sha256 is not 32 bytes".to_string()))?;

    Ok(DecodedSignature {
        params: SignatureParams {
            label,
            cert_sha256,
            cert_url: string("cert-url")?,
            validity_url: string("validity-url")?,
            date: integer("date")?,
            expires: integer("expires")?,
        },
        integrity: string("integrity")?,
        sig: binary("sig")?,
    })
}
