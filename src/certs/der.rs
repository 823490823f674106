//! DER reading and writing for OCSP.
//!
//! Element framing is decoded by `asn1_rs` (through `x509_parser`); this
//! module walks OCSP structures one element at a time on top of it and only
//! accepts single-byte tags. The writer covers the few universal types OCSP
//! requests and test responses need.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime, Utc};
use x509_parser::der_parser::asn1_rs::{Any, Error as Asn1Error, FromDer};
use x509_parser::nom;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_ENUMERATED: u8 = 0x0a;
pub const TAG_GENERALIZED_TIME: u8 = 0x18;
pub const TAG_SEQUENCE: u8 = 0x30;

/// Context-specific constructed tag `[n]`.
pub const fn context(n: u8) -> u8 {
    0xa0 | n
}

/// Context-specific primitive tag `[n]` (IMPLICIT over a primitive type).
pub const fn context_primitive(n: u8) -> u8 {
    0x80 | n
}

/// Errors from DER decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DerError {
    #[error("unexpected end of input")]
    Truncated,

    #[error("unsupported multi-byte tag")]
    HighTagNumber,

    #[error("unsupported length encoding")]
    BadLength,

    #[error("expected tag 0x{expected:02x}, found 0x{found:02x}")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("trailing data after {0}")]
    TrailingData(&'static str),

    #[error("malformed element: {0}")]
    Rejected(String),

    #[error("invalid GeneralizedTime '{0}'")]
    BadTime(String),
}

/// One decoded tag-length-value element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

/// Sequential reader over the contents of a constructed value.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.input.first().copied()
    }

    /// Read the next element, whatever its tag.
    pub fn read_any(&mut self) -> Result<Tlv<'a>, DerError> {
        let &first = self.input.first().ok_or(DerError::Truncated)?;
        if first & 0x1f == 0x1f {
            return Err(DerError::HighTagNumber);
        }
        let (rest, any) = Any::from_der(self.input).map_err(|e| match e {
            nom::Err::Incomplete(_) => DerError::Truncated,
            nom::Err::Error(Asn1Error::InvalidLength | Asn1Error::DerConstraintFailed(_))
            | nom::Err::Failure(Asn1Error::InvalidLength | Asn1Error::DerConstraintFailed(_)) => {
                DerError::BadLength
            }
            nom::Err::Error(e) | nom::Err::Failure(e) => DerError::Rejected(e.to_string()),
        })?;
        let header = &any.header;
        let constructed = if header.is_constructed() { 0x20 } else { 0 };
        let tag = ((header.class() as u8) << 6) | constructed | header.tag().0 as u8;
        self.input = rest;
        Ok(Tlv { tag, value: any.data })
    }

    /// Read the next element and require a specific tag.
    pub fn read(&mut self, expected: u8) -> Result<&'a [u8], DerError> {
        let tlv = self.read_any()?;
        if tlv.tag != expected {
            return Err(DerError::UnexpectedTag {
                expected,
                found: tlv.tag,
            });
        }
        Ok(tlv.value)
    }

    /// Read the next element only if it carries `tag`.
    pub fn read_optional(&mut self, tag: u8) -> Result<Option<&'a [u8]>, DerError> {
        if self.peek_tag() == Some(tag) {
            self.read(tag).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read a constructed element and return a reader over its contents.
    pub fn read_nested(&mut self, tag: u8) -> Result<Reader<'a>, DerError> {
        self.read(tag).map(Reader::new)
    }

    pub fn finish(self, what: &'static str) -> Result<(), DerError> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(DerError::TrailingData(what))
        }
    }
}

/// Parse a GeneralizedTime value (`YYYYMMDDHHMMSS[.fff]Z`).
pub fn parse_generalized_time(value: &[u8]) -> Result<SystemTime, DerError> {
    let text = std::str::from_utf8(value)
        .map_err(|_| DerError::BadTime(String::from_utf8_lossy(value).into_owned()))?;
    let bad = || DerError::BadTime(text.to_string());

    let without_zone = text.strip_suffix('Z').ok_or_else(bad)?;
    let whole_seconds = without_zone.split('.').next().ok_or_else(bad)?;
    let parsed = NaiveDateTime::parse_from_str(whole_seconds, "%Y%m%d%H%M%S").map_err(|_| bad())?;
    let secs = u64::try_from(parsed.and_utc().timestamp()).map_err(|_| bad())?;
    Ok(UNIX_EPOCH + Duration::from_secs(secs))
}

/// Encode one element.
pub fn encode(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = (len as u32).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (4 - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Encode a constructed element from already-encoded children.
pub fn constructed(tag: u8, children: &[Vec<u8>]) -> Vec<u8> {
    encode(tag, &children.concat())
}

pub fn sequence(children: &[Vec<u8>]) -> Vec<u8> {
    constructed(TAG_SEQUENCE, children)
}

pub fn octet_string(content: &[u8]) -> Vec<u8> {
    encode(TAG_OCTET_STRING, content)
}

pub fn null() -> Vec<u8> {
    encode(TAG_NULL, &[])
}

/// Encode an INTEGER whose content octets are already in DER form (as
/// certificate serial numbers are).
pub fn integer_raw(content: &[u8]) -> Vec<u8> {
    encode(TAG_INTEGER, content)
}

pub fn generalized_time(time: SystemTime) -> Vec<u8> {
    let datetime: DateTime<Utc> = time.into();
    let text = datetime.format("%Y%m%d%H%M%SZ").to_string();
    encode(TAG_GENERALIZED_TIME, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_lengths() {
        let short = encode(TAG_OCTET_STRING, &[1, 2, 3]);
        assert_eq!(short, vec![0x04, 0x03, 1, 2, 3]);

        let content = vec![0xab; 300];
        let long = encode(TAG_OCTET_STRING, &content);
        assert_eq!(&long[..4], &[0x04, 0x82, 0x01, 0x2c]);

        let mut reader = Reader::new(&long);
        assert_eq!(reader.read(TAG_OCTET_STRING).unwrap(), content.as_slice());
        assert!(reader.is_empty());
    }

    #[test]
    fn test_unexpected_tag() {
        let mut reader = Reader::new(&[0x05, 0x00]);
        assert_eq!(
            reader.read(TAG_SEQUENCE),
            Err(DerError::UnexpectedTag {
                expected: TAG_SEQUENCE,
                found: TAG_NULL
            })
        );
    }

    #[test]
    fn test_truncated_and_indefinite() {
        assert_eq!(Reader::new(&[0x04, 0x05, 1]).read_any(), Err(DerError::Truncated));
        assert_eq!(Reader::new(&[0x30, 0x80]).read_any(), Err(DerError::BadLength));
        assert_eq!(Reader::new(&[0x1f, 0x01]).read_any(), Err(DerError::HighTagNumber));
    }

    #[test]
    fn test_reads_context_tags_and_long_lengths() {
        let body = vec![0x5a; 200];
        let encoded = constructed(context(1), &[octet_string(&body)]);
        let mut reader = Reader::new(&encoded);
        let tlv = reader.read_any().unwrap();
        assert_eq!(tlv.tag, context(1));
        assert!(reader.is_empty());

        let mut inner = Reader::new(tlv.value);
        assert_eq!(inner.read(TAG_OCTET_STRING).unwrap(), body.as_slice());
        inner.finish("context").unwrap();

        let primitive = encode(context_primitive(2), &[]);
        assert_eq!(Reader::new(&primitive).read_any().unwrap().tag, context_primitive(2));

        // Length claims more octets than a usize can carry.
        let huge = [0x04, 0x89, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(Reader::new(&huge).read_any().is_err());
    }

    #[test]
    fn test_optional_and_nested() {
        let encoded = sequence(&[encode(context(0), &null()), octet_string(b"x")]);
        let mut outer = Reader::new(&encoded);
        let mut inner = outer.read_nested(TAG_SEQUENCE).unwrap();
        assert!(inner.read_optional(context(1)).unwrap().is_none());
        assert!(inner.read_optional(context(0)).unwrap().is_some());
        assert_eq!(inner.read(TAG_OCTET_STRING).unwrap(), b"x");
        inner.finish("sequence").unwrap();
    }

    #[test]
    fn test_generalized_time() {
        let t = parse_generalized_time(b"20200101000000Z").unwrap();
        assert_eq!(t, UNIX_EPOCH + Duration::from_secs(1_577_836_800));

        let fractional = parse_generalized_time(b"20200101000000.123Z").unwrap();
        assert_eq!(fractional, t);

        assert!(parse_generalized_time(b"20200101000000").is_err());
        assert!(parse_generalized_time(b"garbage").is_err());

        let encoded = generalized_time(t);
        let mut reader = Reader::new(&encoded);
        let value = reader.read(TAG_GENERALIZED_TIME).unwrap();
        assert_eq!(value, b"20200101000000Z");
    }
}
