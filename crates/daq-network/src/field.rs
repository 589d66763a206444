//! Remote field bindings.
//!
//! A [`NetworkField`] names one field of one record on a remote server and
//! reaches it through the `NetworkServer` record it was bound to. Proxy
//! drivers hold one per remote field they use, built at initialization.
//!
//! ```rust,ignore
//! let server = ctx.record_ref(database, "server_record")?;
//! let position = NetworkField::new(server, "theta", "position");
//! let raw: f64 = position.get()?;
//!
//! // Slow field: allow longer than the server record's `timeout_ms`.
//! let image = NetworkField::new(server, "ccd", "image").with_timeout(Duration::from_secs(10));
//! ```

use std::time::Duration;

use daq_records::{DataType, DeviceError, DeviceResult, FieldType, FieldValue, RecordClass, RecordRef};

use crate::codec::FieldAddress;
use crate::connection::ServerConnection;
use crate::error::{NetError, NetResult};

/// One field of a remote record.
#[derive(Debug, Clone)]
pub struct NetworkField {
    server: RecordRef,
    record: String,
    field: String,
    timeout: Option<Duration>,
}

impl NetworkField {
    /// Bind `record.field` on the server behind `server`.
    pub fn new(server: RecordRef, record: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            server,
            record: record.into(),
            field: field.into(),
            timeout: None,
        }
    }

    /// Give every request on this field its own deadline instead of the
    /// server record's `timeout_ms`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Per-field deadline, if one was set.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// `record.field` as the server knows it.
    pub fn remote_name(&self) -> String {
        format!("{}.{}", self.record, self.field)
    }

    /// Name of the local server record.
    pub fn server_name(&self) -> &str {
        self.server.name()
    }

    fn address(&self) -> FieldAddress {
        FieldAddress::new(self.record.clone(), self.field.clone())
    }

    /// Run `f` on the server record's connection, holding its lock.
    fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut ServerConnection) -> NetResult<R>,
    ) -> DeviceResult<R> {
        self.server.with(|record| {
            let class = record.class();
            let name = record.name().to_string();
            match record.type_state_mut::<ServerConnection>() {
                Some(connection) => Ok(f(connection)?),
                None => Err(DeviceError::WrongClass {
                    record: name,
                    expected: RecordClass::NetworkServer,
                    actual: class,
                }),
            }
        })
    }

    /// Read the field as `tag`.
    pub fn get_value(&self, tag: DataType) -> DeviceResult<FieldValue> {
        self.with_connection(|connection| connection.get_within(self.address(), tag, self.timeout))
    }

    /// Write the field; the value's own type is the tag.
    pub fn put_value(&self, value: FieldValue) -> DeviceResult<()> {
        self.with_connection(|connection| connection.put_within(self.address(), value, self.timeout))
    }

    /// Read a scalar field.
    pub fn get<T: FieldType>(&self) -> DeviceResult<T> {
        let tag = DataType::Scalar(T::SCALAR);
        let value = self.get_value(tag)?;
        T::from_value(&value).ok_or_else(|| self.mismatch(tag, &value))
    }

    /// Write a scalar field.
    pub fn put<T: FieldType>(&self, value: T) -> DeviceResult<()> {
        self.put_value(value.into_value())
    }

    /// Read a whole array field, which must hold exactly `count` elements.
    pub fn get_array<T: FieldType>(&self, count: usize) -> DeviceResult<Vec<T>> {
        let tag = DataType::Array(T::SCALAR);
        let value = self.get_value(tag)?;
        let items = match &value {
            FieldValue::Array(array) => T::from_array(array),
            _ => None,
        }
        .ok_or_else(|| self.mismatch(tag, &value))?;
        if items.len() != count {
            return Err(NetError::DimensionMismatch {
                field: self.remote_name(),
                expected: count,
                actual: items.len(),
            }
            .into());
        }
        Ok(items)
    }

    /// Replace a whole array field.
    pub fn put_array<T: FieldType>(&self, items: Vec<T>) -> DeviceResult<()> {
        self.put_value(FieldValue::Array(T::into_array(items)))
    }

    /// Read one element of an array field.
    pub fn get_element<T: FieldType>(&self, index: usize) -> DeviceResult<T> {
        let tag = DataType::Scalar(T::SCALAR);
        let address = self.address().element(wire_index(index)?);
        let value =
            self.with_connection(|connection| connection.get_within(address, tag, self.timeout))?;
        T::from_value(&value).ok_or_else(|| self.mismatch(tag, &value))
    }

    /// Write one element of an array field.
    pub fn put_element<T: FieldType>(&self, index: usize, value: T) -> DeviceResult<()> {
        let address = self.address().element(wire_index(index)?);
        self.with_connection(|connection| {
            connection.put_within(address, value.into_value(), self.timeout)
        })
    }

    fn mismatch(&self, expected: DataType, value: &FieldValue) -> DeviceError {
        NetError::RemoteTypeMismatch {
            field: self.remote_name(),
            expected,
            actual: value.data_type(),
        }
        .into()
    }
}

fn wire_index(index: usize) -> DeviceResult<u32> {
    u32::try_from(index)
        .map_err(|_| DeviceError::invalid_parameter("index", format!("{index} does not fit the wire")))
}

/// Length of an array value, for proxies that mirror a remote dimension.
pub fn array_len(value: &FieldValue) -> Option<usize> {
    match value {
        FieldValue::Array(array) => Some(array.len()),
        _ => None,
    }
}
