//! ILP v4 packets as exchanged with the transport.
//!
//! Every packet is an OER envelope: a one-byte type followed by the
//! length-prefixed contents.

use super::oer;
use crate::error::{PayError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fmt;

const TYPE_PREPARE: u8 = 12;
const TYPE_FULFILL: u8 = 13;
const TYPE_REJECT: u8 = 14;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 17;

/// Three-character ILP error code such as `F08` or `T04`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode([u8; 3]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Final,
    Temporary,
    Relative,
}

impl ErrorCode {
    pub const F00_BAD_REQUEST: Self = Self(*b"F00");
    pub const F02_UNREACHABLE: Self = Self(*b"F02");
    pub const F06_UNEXPECTED_PAYMENT: Self = Self(*b"F06");
    pub const F08_AMOUNT_TOO_LARGE: Self = Self(*b"F08");
    pub const F99_APPLICATION_ERROR: Self = Self(*b"F99");
    pub const T00_INTERNAL_ERROR: Self = Self(*b"T00");
    pub const T04_INSUFFICIENT_LIQUIDITY: Self = Self(*b"T04");
    pub const R00_TRANSFER_TIMED_OUT: Self = Self(*b"R00");

    pub fn new(code: [u8; 3]) -> Self {
        Self(code)
    }

    pub fn class(&self) -> ErrorClass {
        match self.0[0] {
            b'T' => ErrorClass::Temporary,
            b'R' => ErrorClass::Relative,
            _ => ErrorClass::Final,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prepare {
    pub amount: u64,
    pub expires_at: DateTime<Utc>,
    pub execution_condition: [u8; 32],
    pub destination: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fulfill {
    pub fulfillment: [u8; 32],
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reject {
    pub code: ErrorCode,
    pub triggered_by: String,
    pub message: String,
    pub data: Bytes,
}

/// The answer to a [`Prepare`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Fulfill(Fulfill),
    Reject(Reject),
}

/// Data carried by an `F08 Amount Too Large` reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountTooLarge {
    pub received_amount: u64,
    pub maximum_amount: u64,
}

fn put_envelope(packet_type: u8, contents: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(contents.len() + 4);
    buf.put_u8(packet_type);
    oer::put_var_octets(&mut buf, contents);
    buf.freeze()
}

fn read_envelope(bytes: &[u8]) -> Result<(u8, &[u8])> {
    let mut cursor = bytes;
    let packet_type = oer::read_u8(&mut cursor, "packet type")?;
    let contents = oer::read_var_octets(&mut cursor, "packet contents")?;
    Ok((packet_type, contents))
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S%3fZ").to_string()
}

fn parse_timestamp(raw: &[u8]) -> Result<DateTime<Utc>> {
    let invalid = || PayError::Codec(format!("invalid expiry {:?}", String::from_utf8_lossy(raw)));
    let text = std::str::from_utf8(raw).map_err(|_| invalid())?;
    if text.len() != TIMESTAMP_LEN || !text.is_ascii() || !text.ends_with('Z') {
        return Err(invalid());
    }
    let seconds = NaiveDateTime::parse_from_str(&text[..14], TIMESTAMP_FORMAT).map_err(|_| invalid())?;
    let millis: i64 = text[14..TIMESTAMP_LEN - 1].parse().map_err(|_| invalid())?;
    Ok(Utc.from_utc_datetime(&seconds) + chrono::Duration::milliseconds(millis))
}

impl Prepare {
    pub fn encode(&self) -> Bytes {
        let mut contents = BytesMut::new();
        contents.put_u64(self.amount);
        contents.put_slice(format_timestamp(&self.expires_at).as_bytes());
        contents.put_slice(&self.execution_condition);
        oer::put_var_octets(&mut contents, self.destination.as_bytes());
        oer::put_var_octets(&mut contents, &self.data);
        put_envelope(TYPE_PREPARE, &contents)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (packet_type, mut contents) = read_envelope(bytes)?;
        if packet_type != TYPE_PREPARE {
            return Err(PayError::Codec(format!(
                "expected ILP Prepare, got packet type {packet_type}"
            )));
        }
        let amount = oer::read_u64(&mut contents, "amount")?;
        let expires_at = parse_timestamp(&oer::read_array::<TIMESTAMP_LEN>(&mut contents, "expiry")?)?;
        let execution_condition = oer::read_array(&mut contents, "execution condition")?;
        let destination = oer::read_var_string(&mut contents, "destination")?;
        let data = Bytes::copy_from_slice(oer::read_var_octets(&mut contents, "data")?);
        Ok(Self {
            amount,
            expires_at,
            execution_condition,
            destination,
            data,
        })
    }
}

impl Reply {
    pub fn encode(&self) -> Bytes {
        let mut contents = BytesMut::new();
        match self {
            Reply::Fulfill(fulfill) => {
                contents.put_slice(&fulfill.fulfillment);
                oer::put_var_octets(&mut contents, &fulfill.data);
                put_envelope(TYPE_FULFILL, &contents)
            }
            Reply::Reject(reject) => {
                contents.put_slice(&reject.code.0);
                oer::put_var_octets(&mut contents, reject.triggered_by.as_bytes());
                oer::put_var_octets(&mut contents, reject.message.as_bytes());
                oer::put_var_octets(&mut contents, &reject.data);
                put_envelope(TYPE_REJECT, &contents)
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (packet_type, mut contents) = read_envelope(bytes)?;
        match packet_type {
            TYPE_FULFILL => {
                let fulfillment = oer::read_array(&mut contents, "fulfillment")?;
                let data = Bytes::copy_from_slice(oer::read_var_octets(&mut contents, "data")?);
                Ok(Reply::Fulfill(Fulfill { fulfillment, data }))
            }
            TYPE_REJECT => {
                let code = ErrorCode(oer::read_array(&mut contents, "error code")?);
                let triggered_by = oer::read_var_string(&mut contents, "triggered by")?;
                let message = oer::read_var_string(&mut contents, "message")?;
                let data = Bytes::copy_from_slice(oer::read_var_octets(&mut contents, "data")?);
                Ok(Reply::Reject(Reject {
                    code,
                    triggered_by,
                    message,
                    data,
                }))
            }
            other => Err(PayError::Codec(format!(
                "expected ILP Fulfill or Reject, got packet type {other}"
            ))),
        }
    }
}

impl AmountTooLarge {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u64(self.received_amount);
        buf.put_u64(self.maximum_amount);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        Ok(Self {
            received_amount: oer::read_u64(&mut data, "received amount")?,
            maximum_amount: oer::read_u64(&mut data, "maximum amount")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_prepare() -> Prepare {
        Prepare {
            amount: 5000,
            expires_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap()
                + chrono::Duration::milliseconds(250),
            execution_condition: [9u8; 32],
            destination: "g.example.alice".to_string(),
            data: Bytes::from_static(b"hello"),
        }
    }

    #[test]
    fn test_prepare_layout() {
        let encoded = sample_prepare().encode();
        assert_eq!(encoded[0], TYPE_PREPARE);
        // amount follows the one-byte length prefix
        assert_eq!(&encoded[2..10], &5000u64.to_be_bytes());
        assert_eq!(&encoded[10..27], b"20260301123005250Z");

        assert_eq!(Prepare::decode(&encoded).unwrap(), sample_prepare());
    }

    #[test]
    fn test_reject_decode() {
        let reject = Reply::Reject(Reject {
            code: ErrorCode::F08_AMOUNT_TOO_LARGE,
            triggered_by: "g.connector".to_string(),
            message: "too much".to_string(),
            data: AmountTooLarge {
                received_amount: 100,
                maximum_amount: 40,
            }
            .encode(),
        });

        let Reply::Reject(decoded) = Reply::decode(&reject.encode()).unwrap() else {
            panic!("expected reject");
        };
        assert_eq!(decoded.code, ErrorCode::F08_AMOUNT_TOO_LARGE);
        assert_eq!(decoded.code.to_string(), "F08");
        let info = AmountTooLarge::decode(&decoded.data).unwrap();
        assert_eq!(info.maximum_amount, 40);
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(ErrorCode::T04_INSUFFICIENT_LIQUIDITY.class(), ErrorClass::Temporary);
        assert_eq!(ErrorCode::R00_TRANSFER_TIMED_OUT.class(), ErrorClass::Relative);
        assert_eq!(ErrorCode::F02_UNREACHABLE.class(), ErrorClass::Final);
    }

    #[test]
    fn test_non_ascii_expiry_is_a_codec_error() {
        // 17 bytes, but the multibyte character straddles the seconds boundary.
        let raw = "2026030112300é2Z".as_bytes();
        assert_eq!(raw.len(), TIMESTAMP_LEN);
        assert!(matches!(parse_timestamp(raw), Err(PayError::Codec(_))));
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let fulfill = Reply::Fulfill(Fulfill {
            fulfillment: [1u8; 32],
            data: Bytes::new(),
        })
        .encode();
        assert!(Prepare::decode(&fulfill).is_err());
        assert!(Reply::decode(&[TYPE_PREPARE, 0]).is_err());
    }
}
