//! Server side of the field protocol.
//!
//! A [`Dispatcher`] answers requests against one [`Database`]. Reads and
//! writes go through [`Record::read_field`] / [`Record::write_field`], so
//! process hooks run exactly as they would for a local caller and a remote
//! `Put` of `destination` moves the motor.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use bytes::Bytes;
use daq_records::{DataType, Database, DeviceError, DeviceResult, FieldValue, Record};

use crate::codec::{encode_frame, FieldAddress, Frame, Message};
use crate::error::NetResult;

/// Answers protocol requests from the records of a database.
pub struct Dispatcher {
    name: String,
    database: Arc<Database>,
}

impl Dispatcher {
    /// Dispatcher announcing itself as `name`.
    pub fn new(name: impl Into<String>, database: Arc<Database>) -> Self {
        Self {
            name: name.into(),
            database,
        }
    }

    /// Name sent in `Welcome`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database being served.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Answer one decoded frame with an encoded reply frame.
    ///
    /// A reply too large for one frame is answered with a protocol error
    /// instead, so the link stays up.
    pub fn handle_frame(&self, frame: Frame) -> NetResult<Bytes> {
        let reply = self.handle(frame.message);
        encode_frame(frame.request_id, &reply).or_else(|e| {
            warn!(server = %self.name, error = %e, "reply could not be encoded");
            encode_frame(
                frame.request_id,
                &Message::Error(DeviceError::Protocol(format!("reply not sent: {e}"))),
            )
        })
    }

    /// Answer one request.
    pub fn handle(&self, request: Message) -> Message {
        match request {
            Message::Hello { client } => {
                info!(server = %self.name, %client, "client connected");
                Message::Welcome {
                    server: self.name.clone(),
                }
            }
            Message::Get { address, tag } => match self.get(&address, tag) {
                Ok(value) => Message::Value(value),
                Err(e) => self.failed(&address, e),
            },
            Message::Put {
                address,
                tag,
                value,
            } => match self.put(&address, tag, value) {
                Ok(()) => Message::Ack,
                Err(e) => self.failed(&address, e),
            },
            other => {
                warn!(kind = ?other.kind(), "unexpected message from client");
                Message::Error(DeviceError::Protocol(format!(
                    "{:?} is not a request",
                    other.kind()
                )))
            }
        }
    }

    fn failed(&self, address: &FieldAddress, error: DeviceError) -> Message {
        debug!(field = %address.qualified(), error = %error, "request failed");
        Message::Error(error)
    }

    #[instrument(skip(self), fields(field = %address.qualified()), level = "debug")]
    fn get(&self, address: &FieldAddress, tag: DataType) -> DeviceResult<FieldValue> {
        self.with_record(address, |record| {
            let expected = addressed_type(record, address)?;
            check_tag(address, tag, expected)?;
            match address.index {
                Some(index) => record.read_element(&address.field, index as usize),
                None => record.read_field(&address.field),
            }
        })
    }

    #[instrument(skip(self, value), fields(field = %address.qualified()), level = "debug")]
    fn put(&self, address: &FieldAddress, tag: DataType, value: FieldValue) -> DeviceResult<()> {
        if value.data_type() != tag {
            return Err(DeviceError::Protocol(format!(
                "value of type {} sent with tag {tag}",
                value.data_type()
            )));
        }
        self.with_record(address, |record| {
            let expected = addressed_type(record, address)?;
            check_tag(address, tag, expected)?;
            match address.index {
                Some(index) => record.write_element(&address.field, index as usize, value),
                None => record.write_field(&address.field, value),
            }
        })
    }

    fn with_record<R>(
        &self,
        address: &FieldAddress,
        f: impl FnOnce(&mut Record) -> DeviceResult<R>,
    ) -> DeviceResult<R> {
        let record = self
            .database
            .get(&address.record)
            .ok_or_else(|| DeviceError::NoSuchField {
                field: address.qualified(),
            })?;
        let mut guard = record.lock();
        f(&mut guard)
    }
}

/// Declared type of the addressed field, or of one element of it.
fn addressed_type(record: &Record, address: &FieldAddress) -> DeviceResult<DataType> {
    let declared = record
        .fields()
        .descriptor(&address.field)
        .map_err(|_| DeviceError::NoSuchField {
            field: address.qualified(),
        })?
        .data_type;
    Ok(match address.index {
        Some(_) => DataType::Scalar(declared.element()),
        None => declared,
    })
}

fn check_tag(address: &FieldAddress, requested: DataType, declared: DataType) -> DeviceResult<()> {
    if requested != declared {
        return Err(DeviceError::RemoteTypeMismatch {
            field: address.qualified(),
            expected: requested,
            actual: declared,
        });
    }
    Ok(())
}
