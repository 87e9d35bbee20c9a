//! STREAM packets: the encrypted payload carried in the `data` field of ILP
//! packets, and the frames they are made of.

use super::oer;
use crate::error::{PayError, Result};
use bytes::{BufMut, Bytes, BytesMut};

const STREAM_VERSION: u8 = 1;

/// Which ILP packet a STREAM packet travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlpPacketType {
    Prepare = 12,
    Fulfill = 13,
    Reject = 14,
}

impl TryFrom<u8> for IlpPacketType {
    type Error = PayError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            12 => Ok(Self::Prepare),
            13 => Ok(Self::Fulfill),
            14 => Ok(Self::Reject),
            other => Err(PayError::Codec(format!("unknown ILP packet type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    NoError = 0x01,
    InternalError = 0x02,
    EndpointBusy = 0x03,
    FlowControlError = 0x04,
    StreamIdError = 0x05,
    StreamStateError = 0x06,
    FrameFormatError = 0x07,
    ProtocolViolation = 0x08,
    ApplicationError = 0x09,
}

impl From<u8> for CloseCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::NoError,
            0x03 => Self::EndpointBusy,
            0x04 => Self::FlowControlError,
            0x05 => Self::StreamIdError,
            0x06 => Self::StreamStateError,
            0x07 => Self::FrameFormatError,
            0x08 => Self::ProtocolViolation,
            0x09 => Self::ApplicationError,
            _ => Self::InternalError,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    ConnectionClose {
        code: CloseCode,
        message: String,
    },
    ConnectionNewAddress {
        address: String,
    },
    ConnectionMaxStreamId {
        max_stream_id: u64,
    },
    ConnectionAssetDetails {
        asset_code: String,
        asset_scale: u8,
    },
    StreamClose {
        stream_id: u64,
        code: CloseCode,
        message: String,
    },
    StreamMoney {
        stream_id: u64,
        shares: u64,
    },
    StreamMaxMoney {
        stream_id: u64,
        receive_max: u64,
        total_received: u64,
    },
}

impl Frame {
    fn type_id(&self) -> u8 {
        match self {
            Frame::ConnectionClose { .. } => 0x01,
            Frame::ConnectionNewAddress { .. } => 0x02,
            Frame::ConnectionMaxStreamId { .. } => 0x05,
            Frame::ConnectionAssetDetails { .. } => 0x07,
            Frame::StreamClose { .. } => 0x10,
            Frame::StreamMoney { .. } => 0x11,
            Frame::StreamMaxMoney { .. } => 0x12,
        }
    }

    /// True for frames that tear down a stream or the whole connection.
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            Frame::ConnectionClose { .. } | Frame::StreamClose { .. }
        )
    }

    fn encode_contents(&self, buf: &mut BytesMut) {
        match self {
            Frame::ConnectionClose { code, message } => {
                buf.put_u8(*code as u8);
                oer::put_var_octets(buf, message.as_bytes());
            }
            Frame::ConnectionNewAddress { address } => {
                oer::put_var_octets(buf, address.as_bytes());
            }
            Frame::ConnectionMaxStreamId { max_stream_id } => {
                oer::put_var_uint(buf, *max_stream_id);
            }
            Frame::ConnectionAssetDetails {
                asset_code,
                asset_scale,
            } => {
                oer::put_var_octets(buf, asset_code.as_bytes());
                buf.put_u8(*asset_scale);
            }
            Frame::StreamClose {
                stream_id,
                code,
                message,
            } => {
                oer::put_var_uint(buf, *stream_id);
                buf.put_u8(*code as u8);
                oer::put_var_octets(buf, message.as_bytes());
            }
            Frame::StreamMoney { stream_id, shares } => {
                oer::put_var_uint(buf, *stream_id);
                oer::put_var_uint(buf, *shares);
            }
            Frame::StreamMaxMoney {
                stream_id,
                receive_max,
                total_received,
            } => {
                oer::put_var_uint(buf, *stream_id);
                oer::put_var_uint(buf, *receive_max);
                oer::put_var_uint(buf, *total_received);
            }
        }
    }

    /// Returns `None` for frame types this client does not understand.
    fn decode(type_id: u8, mut contents: &[u8]) -> Result<Option<Self>> {
        let c = &mut contents;
        let frame = match type_id {
            0x01 => Frame::ConnectionClose {
                code: oer::read_u8(c, "close code")?.into(),
                message: oer::read_var_string(c, "close message")?,
            },
            0x02 => Frame::ConnectionNewAddress {
                address: oer::read_var_string(c, "address")?,
            },
            0x05 => Frame::ConnectionMaxStreamId {
                max_stream_id: oer::read_var_uint(c, "max stream id")?,
            },
            0x07 => Frame::ConnectionAssetDetails {
                asset_code: oer::read_var_string(c, "asset code")?,
                asset_scale: oer::read_u8(c, "asset scale")?,
            },
            0x10 => Frame::StreamClose {
                stream_id: oer::read_var_uint(c, "stream id")?,
                code: oer::read_u8(c, "close code")?.into(),
                message: oer::read_var_string(c, "close message")?,
            },
            0x11 => Frame::StreamMoney {
                stream_id: oer::read_var_uint(c, "stream id")?,
                shares: oer::read_var_uint(c, "shares")?,
            },
            0x12 => Frame::StreamMaxMoney {
                stream_id: oer::read_var_uint(c, "stream id")?,
                receive_max: oer::read_var_uint(c, "receive max")?,
                total_received: oer::read_var_uint(c, "total received")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(frame))
    }
}

/// Plaintext STREAM packet.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPacket {
    pub sequence: u64,
    pub ilp_packet_type: IlpPacketType,
    /// For a Prepare, the minimum amount the receiver should accept; in a
    /// reply, the amount the receiver actually got.
    pub prepare_amount: u64,
    pub frames: Vec<Frame>,
}

impl StreamPacket {
    pub fn new(sequence: u64, ilp_packet_type: IlpPacketType, prepare_amount: u64) -> Self {
        Self {
            sequence,
            ilp_packet_type,
            prepare_amount,
            frames: Vec::new(),
        }
    }

    pub fn with_frames(mut self, frames: impl IntoIterator<Item = Frame>) -> Self {
        self.frames.extend(frames);
        self
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(STREAM_VERSION);
        buf.put_u8(self.ilp_packet_type as u8);
        oer::put_var_uint(&mut buf, self.sequence);
        oer::put_var_uint(&mut buf, self.prepare_amount);
        oer::put_var_uint(&mut buf, self.frames.len() as u64);
        let mut contents = BytesMut::new();
        for frame in &self.frames {
            contents.clear();
            frame.encode_contents(&mut contents);
            buf.put_u8(frame.type_id());
            oer::put_var_octets(&mut buf, &contents);
        }
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let c = &mut cursor;
        let version = oer::read_u8(c, "version")?;
        if version != STREAM_VERSION {
            return Err(PayError::Codec(format!(
                "unsupported STREAM version {version}"
            )));
        }
        let ilp_packet_type = IlpPacketType::try_from(oer::read_u8(c, "ILP packet type")?)?;
        let sequence = oer::read_var_uint(c, "sequence")?;
        let prepare_amount = oer::read_var_uint(c, "prepare amount")?;
        let count = oer::read_var_uint(c, "frame count")?;
        let mut frames = Vec::new();
        for _ in 0..count {
            let type_id = oer::read_u8(c, "frame type")?;
            let contents = oer::read_var_octets(c, "frame contents")?;
            if let Some(frame) = Frame::decode(type_id, contents)? {
                frames.push(frame);
            }
        }
        Ok(Self {
            sequence,
            ilp_packet_type,
            prepare_amount,
            frames,
        })
    }

    pub fn has_close_frame(&self) -> bool {
        self.frames.iter().any(Frame::is_close)
    }

    /// True when the packet closes the connection or the given stream.
    pub fn closes_stream(&self, id: u64) -> bool {
        self.frames.iter().any(|frame| match frame {
            Frame::ConnectionClose { .. } => true,
            Frame::StreamClose { stream_id, .. } => *stream_id == id,
            _ => false,
        })
    }
}
