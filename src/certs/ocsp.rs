//! OCSP request construction, response parsing and the responder collaborator.
//!
//! # Responsibilities
//! - Build a DER `OCSPRequest` for the leaf certificate (SHA-256 CertID)
//! - Extract status and validity window from a DER `OCSPResponse`
//! - Fetch responses from the leaf's OCSP responder over HTTP
//!
//! # Design Decisions
//! - The response signature is not verified here; verifiers check it
//!   against the published chain. Status, serial and validity are checked
//!   so an unusable response is never published.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::certs::der::{self, DerError, Reader};
use crate::certs::store::CertStore;

/// DER of OID 2.16.840.1.101.3.4.2.1 (id-sha256).
const OID_SHA256: &[u8] = &[
    0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
];

/// DER of OID 1.3.6.1.5.5.7.48.1.1 (id-pkix-ocsp-basic).
pub const OID_OCSP_BASIC: &[u8] = &[
    0x06, 0x09, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01,
];

/// Errors from fetching or interpreting an OCSP response.
#[derive(Debug, Error)]
pub enum OcspError {
    #[error("leaf certificate has no OCSP responder URL")]
    NoResponder,

    #[error("OCSP request failed: {0}")]
    Fetch(String),

    #[error("OCSP request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed OCSP response: {0}")]
    Malformed(#[from] DerError),

    #[error("OCSP responder returned status {0}")]
    ResponderStatus(u8),

    #[error("OCSP response has no answer for the leaf certificate")]
    NoMatchingResponse,

    #[error("OCSP response reports the certificate as {0}")]
    BadCertStatus(CertStatus),

    #[error("OCSP response has no nextUpdate")]
    NoNextUpdate,

    #[error("OCSP response validity window is inverted")]
    InvertedWindow,
}

/// `certStatus` of a SingleResponse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    Good,
    Revoked,
    Unknown,
}

impl std::fmt::Display for CertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CertStatus::Good => "good",
            CertStatus::Revoked => "revoked",
            CertStatus::Unknown => "unknown",
        })
    }
}

/// The parts of an OCSP response the cache acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspResponseInfo {
    pub status: CertStatus,
    pub produced_at: SystemTime,
    pub this_update: SystemTime,
    pub next_update: SystemTime,
}

/// Collaborator that obtains raw DER OCSP responses for the leaf.
#[async_trait]
pub trait OcspSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, OcspError>;
}

/// Build the DER `OCSPRequest` for `store`'s leaf certificate.
pub fn build_request(store: &CertStore) -> Vec<u8> {
    let leaf = store.leaf();
    let cert_id = der::sequence(&[
        der::sequence(&[OID_SHA256.to_vec(), der::null()]),
        der::octet_string(&Sha256::digest(&leaf.issuer_name)),
        der::octet_string(&Sha256::digest(store.issuer_public_key())),
        der::integer_raw(&leaf.serial),
    ]);
    let request = der::sequence(&[cert_id]);
    let request_list = der::sequence(&[request]);
    let tbs_request = der::sequence(&[request_list]);
    der::sequence(&[tbs_request])
}

/// Parse a DER `OCSPResponse` and return the answer for `serial`.
pub fn parse_response(bytes: &[u8], serial: &[u8]) -> Result<OcspResponseInfo, OcspError> {
    let mut top = Reader::new(bytes);
    let mut response = top.read_nested(der::TAG_SEQUENCE)?;
    top.finish("OCSPResponse")?;

    let status = response.read(der::TAG_ENUMERATED)?;
    match status {
        [0] => {}
        [code] => return Err(OcspError::ResponderStatus(*code)),
        _ => return Err(OcspError::Malformed(DerError::BadLength)),
    }

    let mut response_bytes = response
        .read_nested(der::context(0))?
        .read_nested(der::TAG_SEQUENCE)?;
    let response_type = response_bytes.read(der::TAG_OID)?;
    if response_type != &OID_OCSP_BASIC[2..] {
        return Err(OcspError::Malformed(DerError::UnexpectedTag {
            expected: der::TAG_OID,
            found: der::TAG_OID,
        }));
    }
    let basic = response_bytes.read(der::TAG_OCTET_STRING)?;

    let mut basic = Reader::new(basic).read_nested(der::TAG_SEQUENCE)?;
    let mut tbs = basic.read_nested(der::TAG_SEQUENCE)?;
    tbs.read_optional(der::context(0))?;
    let responder_id = tbs.read_any()?;
    if responder_id.tag != der::context(1) && responder_id.tag != der::context(2) {
        return Err(OcspError::Malformed(DerError::UnexpectedTag {
            expected: der::context(1),
            found: responder_id.tag,
        }));
    }
    let produced_at = der::parse_generalized_time(tbs.read(der::TAG_GENERALIZED_TIME)?)?;

    let mut responses = tbs.read_nested(der::TAG_SEQUENCE)?;
    while !responses.is_empty() {
        let mut single = responses.read_nested(der::TAG_SEQUENCE)?;
        let mut cert_id = single.read_nested(der::TAG_SEQUENCE)?;
        cert_id.read(der::TAG_SEQUENCE)?;
        cert_id.read(der::TAG_OCTET_STRING)?;
        cert_id.read(der::TAG_OCTET_STRING)?;
        let response_serial = cert_id.read(der::TAG_INTEGER)?;
        if response_serial != serial {
            continue;
        }

        let status = match single.read_any()?.tag {
            t if t == der::context_primitive(0) => CertStatus::Good,
            t if t == der::context(1) => CertStatus::Revoked,
            t if t == der::context_primitive(2) => CertStatus::Unknown,
            found => {
                return Err(OcspError::Malformed(DerError::UnexpectedTag {
                    expected: der::context_primitive(0),
                    found,
                }))
            }
        };
        let this_update = der::parse_generalized_time(single.read(der::TAG_GENERALIZED_TIME)?)?;
        let next_update = match single.read_optional(der::context(0))? {
            Some(explicit) => {
                der::parse_generalized_time(Reader::new(explicit).read(der::TAG_GENERALIZED_TIME)?)?
            }
            None => return Err(OcspError::NoNextUpdate),
        };

        return Ok(OcspResponseInfo {
            status,
            produced_at,
            this_update,
            next_update,
        });
    }

    Err(OcspError::NoMatchingResponse)
}

/// Parse and require a usable answer: good status and a forward window.
pub fn parse_usable_response(bytes: &[u8], serial: &[u8]) -> Result<OcspResponseInfo, OcspError> {
    let info = parse_response(bytes, serial)?;
    if info.status != CertStatus::Good {
        return Err(OcspError::BadCertStatus(info.status));
    }
    if info.next_update <= info.this_update {
        return Err(OcspError::InvertedWindow);
    }
    Ok(info)
}

/// Fetches OCSP responses from the responder named in the leaf's AIA extension.
pub struct HttpOcspSource {
    client: reqwest::Client,
    responder_url: String,
    request_der: Vec<u8>,
    timeout: Duration,
}

impl HttpOcspSource {
    pub fn new(store: &CertStore, timeout: Duration) -> Result<Self, OcspError> {
        let responder_url = store.leaf().ocsp_url.clone().ok_or(OcspError::NoResponder)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcspError::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            responder_url,
            request_der: build_request(store),
            timeout,
        })
    }
}

#[async_trait]
impl OcspSource for HttpOcspSource {
    async fn fetch(&self) -> Result<Bytes, OcspError> {
        let response = self
            .client
            .post(&self.responder_url)
            .header("content-type", "application/ocsp-request")
            .header("accept", "application/ocsp-response")
            .body(self.request_der.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OcspError::Timeout(self.timeout)
                } else {
                    OcspError::Fetch(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcspError::Fetch(format!("responder returned HTTP {}", status)));
        }
        response
            .bytes()
            .await
            .map_err(|e| OcspError::Fetch(e.to_string()))
    }
}

impl std::fmt::Debug for HttpOcspSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOcspSource")
            .field("responder_url", &self.responder_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Encode a BasicOCSPResponse-carrying `OCSPResponse` with one SingleResponse.
///
/// The signature is a placeholder; used to synthesize responder answers.
pub fn encode_response(
    serial: &[u8],
    status: CertStatus,
    this_update: SystemTime,
    next_update: Option<SystemTime>,
) -> Vec<u8> {
    let cert_status = match status {
        CertStatus::Good => der::encode(der::context_primitive(0), &[]),
        CertStatus::Revoked => der::constructed(der::context(1), &[der::generalized_time(this_update)]),
        CertStatus::Unknown => der::encode(der::context_primitive(2), &[]),
    };
    let mut single = vec![
        der::sequence(&[
            der::sequence(&[OID_SHA256.to_vec(), der::null()]),
            der::octet_string(&[0u8; 32]),
            der::octet_string(&[0u8; 32]),
            der::integer_raw(serial),
        ]),
        cert_status,
        der::generalized_time(this_update),
    ];
    if let Some(next) = next_update {
        single.push(der::constructed(der::context(0), &[der::generalized_time(next)]));
    }

    let tbs = der::sequence(&[
        der::constructed(der::context(2), &[der::octet_string(&[0u8; 20])]),
        der::generalized_time(this_update),
        der::sequence(&[der::sequence(&single)]),
    ]);
    let basic = der::sequence(&[
        tbs,
        der::sequence(&[OID_SHA256.to_vec()]),
        der::encode(der::TAG_BIT_STRING, &[0u8; 9]),
    ]);
    der::sequence(&[
        der::encode(der::TAG_ENUMERATED, &[0]),
        der::constructed(
            der::context(0),
            &[der::sequence(&[OID_OCSP_BASIC.to_vec(), der::octet_string(&basic)])],
        ),
    ])
}
