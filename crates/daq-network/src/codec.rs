//! Wire codec for the network field protocol.
//!
//! # Frame layout
//!
//! All integers are big-endian.
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 2    | magic `0x4451` (`"DQ"`)       |
//! | 2      | 1    | protocol version              |
//! | 3      | 1    | message kind                  |
//! | 4      | 4    | request id                    |
//! | 8      | 4    | body length `n`               |
//! | 12     | n    | body                          |
//! | 12+n   | 4    | CRC-32 (ISO-HDLC) of 0..12+n  |
//!
//! A reply carries the request id of the request it answers.
//!
//! # Values
//!
//! Every value is preceded by its type tag: the scalar tag, with bit 7 set
//! for arrays. Arrays carry a 32-bit element count followed by untagged
//! elements. Strings and record references are a 32-bit length plus UTF-8.
//! Device errors travel as JSON so the receiver gets the exact variant back.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use tracing::trace;

use daq_records::{ArrayValue, DataType, DeviceError, FieldValue, ScalarType};

use crate::error::{NetError, NetResult};

/// Frame magic, `"DQ"`.
pub const MAGIC: u16 = 0x4451;
/// Protocol version spoken by this crate.
pub const VERSION: u8 = 1;
/// Bytes before the body.
pub const HEADER_LEN: usize = 12;
/// Bytes after the body.
pub const TRAILER_LEN: usize = 4;
/// Largest accepted body.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

const ARRAY_FLAG: u8 = 0x80;
const FRAME_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

// =============================================================================
// Messages
// =============================================================================

/// Message kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Client greeting.
    Hello = 1,
    /// Server greeting.
    Welcome = 2,
    /// Field read request.
    Get = 3,
    /// Field write request.
    Put = 4,
    /// Field read reply.
    Value = 5,
    /// Field write reply.
    Ack = 6,
    /// Failure reply.
    Error = 7,
}

impl MessageKind {
    fn from_byte(byte: u8) -> NetResult<Self> {
        Ok(match byte {
            1 => MessageKind::Hello,
            2 => MessageKind::Welcome,
            3 => MessageKind::Get,
            4 => MessageKind::Put,
            5 => MessageKind::Value,
            6 => MessageKind::Ack,
            7 => MessageKind::Error,
            other => return Err(NetError::Protocol(format!("unknown message kind {other}"))),
        })
    }
}

/// Address of a remote field, optionally a single array element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAddress {
    /// Remote record name.
    pub record: String,
    /// Field name within the record.
    pub field: String,
    /// Element index, or the whole field.
    pub index: Option<u32>,
}

impl FieldAddress {
    /// Whole-field address.
    pub fn new(record: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            field: field.into(),
            index: None,
        }
    }

    /// Address of element `index`.
    pub fn element(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// `record.field` form used in error messages.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.record, self.field)
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Client greeting with a client identifier.
    Hello {
        /// Client identifier.
        client: String,
    },
    /// Server greeting with the server's name.
    Welcome {
        /// Server name.
        server: String,
    },
    /// Read a field. `tag` is the type the client expects.
    Get {
        /// Field to read.
        address: FieldAddress,
        /// Expected type.
        tag: DataType,
    },
    /// Write a field. `tag` is the type the client believes the field has.
    Put {
        /// Field to write.
        address: FieldAddress,
        /// Declared type.
        tag: DataType,
        /// New value.
        value: FieldValue,
    },
    /// Reply to `Get`.
    Value(FieldValue),
    /// Reply to `Put`.
    Ack,
    /// Failure reply to any request.
    Error(DeviceError),
}

impl Message {
    /// Kind byte of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello { .. } => MessageKind::Hello,
            Message::Welcome { .. } => MessageKind::Welcome,
            Message::Get { .. } => MessageKind::Get,
            Message::Put { .. } => MessageKind::Put,
            Message::Value(_) => MessageKind::Value,
            Message::Ack => MessageKind::Ack,
            Message::Error(_) => MessageKind::Error,
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Request id the frame belongs to.
    pub request_id: u32,
    /// Payload.
    pub message: Message,
}

// =============================================================================
// Framing
// =============================================================================

/// Encode `message` as one complete frame.
pub fn encode_frame(request_id: u32, message: &Message) -> NetResult<Bytes> {
    let mut body = BytesMut::new();
    encode_body(&mut body, message)?;
    if body.len() > MAX_BODY_LEN {
        return Err(NetError::Protocol(format!(
            "message body of {} bytes exceeds {MAX_BODY_LEN}",
            body.len()
        )));
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len() + TRAILER_LEN);
    frame.put_u16(MAGIC);
    frame.put_u8(VERSION);
    frame.put_u8(message.kind() as u8);
    frame.put_u32(request_id);
    frame.put_u32(len_u32(body.len())?);
    frame.extend_from_slice(&body);
    let crc = FRAME_CRC.checksum(&frame);
    frame.put_u32(crc);

    trace!(request_id, kind = ?message.kind(), len = frame.len(), "encoded frame");
    Ok(frame.freeze())
}

/// Take one complete frame off the front of `buffer`.
///
/// Returns `Ok(None)` while the frame is incomplete. A malformed header or a
/// checksum mismatch is a protocol error; the caller should discard the
/// buffer and resynchronize.
pub fn decode_frame(buffer: &mut BytesMut) -> NetResult<Option<Frame>> {
    if buffer.len() < HEADER_LEN {
        return Ok(None);
    }

    let mut header = &buffer[..HEADER_LEN];
    let magic = header.get_u16();
    if magic != MAGIC {
        return Err(NetError::Protocol(format!("bad frame magic {magic:#06x}")));
    }
    let version = header.get_u8();
    if version != VERSION {
        return Err(NetError::Protocol(format!(
            "unsupported protocol version {version}"
        )));
    }
    let kind = MessageKind::from_byte(header.get_u8())?;
    let request_id = header.get_u32();
    let body_len = header.get_u32() as usize;
    if body_len > MAX_BODY_LEN {
        return Err(NetError::Protocol(format!(
            "frame body of {body_len} bytes exceeds {MAX_BODY_LEN}"
        )));
    }

    let total = HEADER_LEN + body_len + TRAILER_LEN;
    if buffer.len() < total {
        return Ok(None);
    }

    let frame = buffer.split_to(total);
    let (covered, mut trailer) = frame.split_at(HEADER_LEN + body_len);
    let expected = trailer.get_u32();
    let actual = FRAME_CRC.checksum(covered);
    if expected != actual {
        return Err(NetError::Protocol(format!(
            "frame checksum mismatch: expected {expected:#010x}, computed {actual:#010x}"
        )));
    }

    let mut body = &covered[HEADER_LEN..];
    let message = decode_body(kind, &mut body)?;
    if body.has_remaining() {
        return Err(NetError::Protocol(format!(
            "{} trailing bytes in {kind:?} body",
            body.remaining()
        )));
    }
    trace!(request_id, ?kind, "decoded frame");
    Ok(Some(Frame {
        request_id,
        message,
    }))
}

// =============================================================================
// Bodies
// =============================================================================

fn encode_body(buf: &mut BytesMut, message: &Message) -> NetResult<()> {
    match message {
        Message::Hello { client } => put_string(buf, client)?,
        Message::Welcome { server } => put_string(buf, server)?,
        Message::Get { address, tag } => {
            put_address(buf, address)?;
            buf.put_u8(type_tag(*tag));
        }
        Message::Put {
            address,
            tag,
            value,
        } => {
            put_address(buf, address)?;
            buf.put_u8(type_tag(*tag));
            put_value(buf, value)?;
        }
        Message::Value(value) => put_value(buf, value)?,
        Message::Ack => {}
        Message::Error(error) => {
            let json = serde_json::to_vec(error)
                .map_err(|e| NetError::Protocol(format!("cannot encode error: {e}")))?;
            buf.extend_from_slice(&json);
        }
    }
    Ok(())
}

fn decode_body(kind: MessageKind, buf: &mut &[u8]) -> NetResult<Message> {
    Ok(match kind {
        MessageKind::Hello => Message::Hello {
            client: get_string(buf)?,
        },
        MessageKind::Welcome => Message::Welcome {
            server: get_string(buf)?,
        },
        MessageKind::Get => {
            let address = get_address(buf)?;
            let tag = get_type_tag(buf)?;
            Message::Get { address, tag }
        }
        MessageKind::Put => {
            let address = get_address(buf)?;
            let tag = get_type_tag(buf)?;
            let value = get_value(buf)?;
            Message::Put {
                address,
                tag,
                value,
            }
        }
        MessageKind::Value => Message::Value(get_value(buf)?),
        MessageKind::Ack => Message::Ack,
        MessageKind::Error => {
            let error = serde_json::from_slice::<DeviceError>(&buf[..])
                .map_err(|e| NetError::Protocol(format!("cannot decode error: {e}")))?;
            buf.advance(buf.remaining());
            Message::Error(error)
        }
    })
}

fn put_address(buf: &mut BytesMut, address: &FieldAddress) -> NetResult<()> {
    put_string(buf, &address.record)?;
    put_string(buf, &address.field)?;
    match address.index {
        Some(index) => {
            buf.put_u8(1);
            buf.put_u32(index);
        }
        None => buf.put_u8(0),
    }
    Ok(())
}

fn get_address(buf: &mut &[u8]) -> NetResult<FieldAddress> {
    let record = get_string(buf)?;
    let field = get_string(buf)?;
    need(buf, 1)?;
    let index = match buf.get_u8() {
        0 => None,
        1 => {
            need(buf, 4)?;
            Some(buf.get_u32())
        }
        other => return Err(NetError::Protocol(format!("bad index flag {other}"))),
    };
    Ok(FieldAddress {
        record,
        field,
        index,
    })
}

/// Type tag byte of `data_type`.
pub fn type_tag(data_type: DataType) -> u8 {
    match data_type {
        DataType::Scalar(scalar) => scalar.tag(),
        DataType::Array(scalar) => scalar.tag() | ARRAY_FLAG,
    }
}

/// Inverse of [`type_tag`].
pub fn data_type_from_tag(tag: u8) -> NetResult<DataType> {
    let scalar = ScalarType::from_tag(tag & !ARRAY_FLAG)
        .ok_or_else(|| NetError::Protocol(format!("unknown type tag {tag:#04x}")))?;
    Ok(if tag & ARRAY_FLAG != 0 {
        DataType::Array(scalar)
    } else {
        DataType::Scalar(scalar)
    })
}

fn get_type_tag(buf: &mut &[u8]) -> NetResult<DataType> {
    need(buf, 1)?;
    data_type_from_tag(buf.get_u8())
}

fn put_value(buf: &mut BytesMut, value: &FieldValue) -> NetResult<()> {
    buf.put_u8(type_tag(value.data_type()));
    match value {
        FieldValue::Array(array) => {
            buf.put_u32(len_u32(array.len())?);
            for element in array.elements() {
                put_scalar(buf, &element)?;
            }
            Ok(())
        }
        scalar => put_scalar(buf, scalar),
    }
}

fn get_value(buf: &mut &[u8]) -> NetResult<FieldValue> {
    match get_type_tag(buf)? {
        DataType::Scalar(scalar) => get_scalar(buf, scalar),
        DataType::Array(scalar) => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            // Every element takes at least one byte.
            if count > buf.remaining() {
                return Err(NetError::Protocol(format!(
                    "array of {count} elements in {} bytes",
                    buf.remaining()
                )));
            }
            let elements = (0..count)
                .map(|_| get_scalar(buf, scalar))
                .collect::<NetResult<Vec<_>>>()?;
            ArrayValue::from_elements(scalar, elements)
                .map(FieldValue::Array)
                .ok_or_else(|| NetError::Protocol("mixed array elements".to_string()))
        }
    }
}

fn put_scalar(buf: &mut BytesMut, value: &FieldValue) -> NetResult<()> {
    match value {
        FieldValue::Bool(v) => buf.put_u8(u8::from(*v)),
        FieldValue::Int8(v) => buf.put_i8(*v),
        FieldValue::Int16(v) => buf.put_i16(*v),
        FieldValue::Int32(v) => buf.put_i32(*v),
        FieldValue::Int64(v) => buf.put_i64(*v),
        FieldValue::UInt8(v) => buf.put_u8(*v),
        FieldValue::UInt16(v) => buf.put_u16(*v),
        FieldValue::UInt32(v) => buf.put_u32(*v),
        FieldValue::UInt64(v) => buf.put_u64(*v),
        FieldValue::Float(v) => buf.put_f32(*v),
        FieldValue::Double(v) => buf.put_f64(*v),
        FieldValue::String(v) | FieldValue::RecordRef(v) => {
            buf.put_u32(len_u32(v.len())?);
            buf.extend_from_slice(v.as_bytes());
        }
        FieldValue::Array(_) => {
            return Err(NetError::Protocol("nested arrays are not encodable".to_string()))
        }
    }
    Ok(())
}

fn get_scalar(buf: &mut &[u8], scalar: ScalarType) -> NetResult<FieldValue> {
    let width = match scalar {
        ScalarType::Bool | ScalarType::Int8 | ScalarType::UInt8 => 1,
        ScalarType::Int16 | ScalarType::UInt16 => 2,
        ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float => 4,
        ScalarType::Int64 | ScalarType::UInt64 | ScalarType::Double => 8,
        ScalarType::String | ScalarType::RecordRef => 4,
    };
    need(buf, width)?;
    Ok(match scalar {
        ScalarType::Bool => match buf.get_u8() {
            0 => FieldValue::Bool(false),
            1 => FieldValue::Bool(true),
            other => return Err(NetError::Protocol(format!("bad bool byte {other}"))),
        },
        ScalarType::Int8 => FieldValue::Int8(buf.get_i8()),
        ScalarType::Int16 => FieldValue::Int16(buf.get_i16()),
        ScalarType::Int32 => FieldValue::Int32(buf.get_i32()),
        ScalarType::Int64 => FieldValue::Int64(buf.get_i64()),
        ScalarType::UInt8 => FieldValue::UInt8(buf.get_u8()),
        ScalarType::UInt16 => FieldValue::UInt16(buf.get_u16()),
        ScalarType::UInt32 => FieldValue::UInt32(buf.get_u32()),
        ScalarType::UInt64 => FieldValue::UInt64(buf.get_u64()),
        ScalarType::Float => FieldValue::Float(buf.get_f32()),
        ScalarType::Double => FieldValue::Double(buf.get_f64()),
        ScalarType::String => FieldValue::String(get_utf8(buf)?),
        ScalarType::RecordRef => FieldValue::RecordRef(get_utf8(buf)?),
    })
}

fn put_string(buf: &mut BytesMut, value: &str) -> NetResult<()> {
    buf.put_u32(len_u32(value.len())?);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn get_string(buf: &mut &[u8]) -> NetResult<String> {
    need(buf, 4)?;
    get_utf8(buf)
}

/// Read a UTF-8 payload whose 32-bit length is next in `buf`.
fn get_utf8(buf: &mut &[u8]) -> NetResult<String> {
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    let text = std::str::from_utf8(&buf[..len])
        .map_err(|e| NetError::Protocol(format!("invalid UTF-8: {e}")))?
        .to_string();
    buf.advance(len);
    Ok(text)
}

fn need(buf: &&[u8], len: usize) -> NetResult<()> {
    if buf.remaining() < len {
        return Err(NetError::Protocol(format!(
            "body truncated: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn len_u32(len: usize) -> NetResult<u32> {
    u32::try_from(len).map_err(|_| NetError::Protocol(format!("length {len} does not fit")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(message: Message) {
        let bytes = encode_frame(42, &message).unwrap();
        let mut buffer = BytesMut::from(&bytes[..]);
        let frame = decode_frame(&mut buffer).unwrap().unwrap();
        assert_eq!(frame.request_id, 42);
        assert_eq!(frame.message, message);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_request_and_reply_frames() {
        round_trip(Message::Hello {
            client: "beamline".into(),
        });
        round_trip(Message::Get {
            address: FieldAddress::new("theta", "monitor_offset_array").element(3),
            tag: DataType::Scalar(ScalarType::Double),
        });
        round_trip(Message::Put {
            address: FieldAddress::new("det", "framesize"),
            tag: DataType::Array(ScalarType::Int64),
            value: FieldValue::Array(ArrayValue::Int64(vec![1024, 512])),
        });
        round_trip(Message::Value(FieldValue::String("idle".into())));
        round_trip(Message::Ack);
        round_trip(Message::Error(DeviceError::LimitExceeded {
            value: 12.0,
            low: -10.0,
            high: 10.0,
        }));
    }

    #[test]
    fn test_incomplete_frame_waits() {
        let bytes = encode_frame(7, &Message::Ack).unwrap();
        let mut buffer = BytesMut::from(&bytes[..bytes.len() - 1]);
        assert_eq!(decode_frame(&mut buffer).unwrap(), None);
        assert_eq!(buffer.len(), bytes.len() - 1);
    }

    #[test]
    fn test_corrupted_frame_is_rejected() {
        let bytes = encode_frame(7, &Message::Value(FieldValue::Int32(5))).unwrap();
        let mut corrupted = BytesMut::from(&bytes[..]);
        corrupted[HEADER_LEN + 2] ^= 0xFF;
        assert!(matches!(
            decode_frame(&mut corrupted),
            Err(NetError::Protocol(message)) if message.contains("checksum")
        ));

        let mut bad_magic = BytesMut::from(&bytes[..]);
        bad_magic[0] = 0;
        assert!(matches!(decode_frame(&mut bad_magic), Err(NetError::Protocol(_))));
    }

    #[test]
    fn test_type_tags_distinguish_arrays() {
        let scalar = DataType::Scalar(ScalarType::UInt16);
        let array = DataType::Array(ScalarType::UInt16);
        assert_ne!(type_tag(scalar), type_tag(array));
        assert_eq!(data_type_from_tag(type_tag(array)).unwrap(), array);
        assert!(data_type_from_tag(0x7F).is_err());
    }

    proptest! {
        #[test]
        fn prop_stream_split_anywhere_decodes_in_order(
            values in proptest::collection::vec(any::<i64>(), 1..8),
            split in 0usize..256,
        ) {
            let mut stream = Vec::new();
            for (id, value) in values.iter().enumerate() {
                let frame = encode_frame(id as u32, &Message::Value(FieldValue::Int64(*value))).unwrap();
                stream.extend_from_slice(&frame);
            }
            let split = split.min(stream.len());

            let mut buffer = BytesMut::new();
            let mut decoded = Vec::new();
            for chunk in [&stream[..split], &stream[split..]] {
                buffer.extend_from_slice(chunk);
                while let Some(frame) = decode_frame(&mut buffer).unwrap() {
                    decoded.push(frame);
                }
            }

            prop_assert_eq!(decoded.len(), values.len());
            for (id, (frame, value)) in decoded.iter().zip(&values).enumerate() {
                prop_assert_eq!(frame.request_id, id as u32);
                prop_assert_eq!(&frame.message, &Message::Value(FieldValue::Int64(*value)));
            }
        }
    }
}
