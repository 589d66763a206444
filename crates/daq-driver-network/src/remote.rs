//! Binding a proxy record to its remote counterpart.
//!
//! Every proxy type carries two fields:
//!
//! - `server_record`: the local `NetworkServer` record to talk through,
//! - `remote_record_name`: the record's name on that server.
//!
//! At initialization the proxy resolves the server record and builds one
//! [`NetworkField`] per remote field it uses. The bindings never change
//! afterwards.

use tracing::debug;

use daq_network::NetworkField;
use daq_records::classes::{ClassParam, ParamValue};
use daq_records::{
    Database, DeviceError, DeviceResult, DriverError, DriverErrorKind, FieldDescriptor,
    FieldStore, RecordContext, RecordRef, ScalarType,
};

/// Field naming the local server record.
pub const SERVER_RECORD: &str = "server_record";
/// Field naming the record on the server.
pub const REMOTE_RECORD_NAME: &str = "remote_record_name";

/// Type fields shared by every proxy.
pub fn proxy_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::scalar(SERVER_RECORD, ScalarType::RecordRef).in_description(),
        FieldDescriptor::scalar(REMOTE_RECORD_NAME, ScalarType::String).in_description(),
    ]
}

/// A record on a remote server.
#[derive(Debug, Clone)]
pub struct RemoteRecord {
    server: RecordRef,
    record: String,
}

impl RemoteRecord {
    /// Binding for `field` of the remote record.
    pub fn field(&self, field: &str) -> NetworkField {
        NetworkField::new(self.server.clone(), self.record.as_str(), field)
    }

    /// Name of the record on the server.
    pub fn name(&self) -> &str {
        &self.record
    }
}

/// The set of remote fields one proxy type uses.
pub trait RemoteFields: Sized {
    /// Build the bindings.
    fn bind(remote: &RemoteRecord) -> Self;
}

/// Remote record name plus the bindings built from it at initialization.
#[derive(Debug)]
pub struct Remote<F> {
    driver_type: &'static str,
    record: String,
    bound: Option<F>,
}

impl<F: RemoteFields> Remote<F> {
    /// Unbound remote, from the proxy fields.
    pub fn from_fields(driver_type: &'static str, fields: &FieldStore) -> Result<Self, DriverError> {
        let field = |e| DriverError::from_field(driver_type, e);
        if fields.get_record_ref(SERVER_RECORD).map_err(field)?.is_empty() {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Configuration,
                "server_record must name a network server record",
            ));
        }
        let record = fields.get_as::<String>(REMOTE_RECORD_NAME).map_err(field)?;
        if record.is_empty() {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Configuration,
                "remote_record_name must not be empty",
            ));
        }
        Ok(Self {
            driver_type,
            record,
            bound: None,
        })
    }

    /// Resolve the server record and build the bindings.
    pub fn bind(&mut self, ctx: &RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        let server = ctx.record_ref(database, SERVER_RECORD)?;
        debug!(
            record = ctx.name,
            server = server.name(),
            remote = %self.record,
            "binding proxy"
        );
        let remote = RemoteRecord {
            server,
            record: self.record.clone(),
        };
        self.bound = Some(F::bind(&remote));
        Ok(())
    }

    /// The bindings; fails before initialization.
    pub fn fields(&self) -> DeviceResult<&F> {
        self.bound.as_ref().ok_or_else(|| {
            DeviceError::Protocol(format!(
                "{} proxy for '{}' used before initialization",
                self.driver_type, self.record
            ))
        })
    }
}

/// Remote fields backing a class's generic parameters.
#[derive(Debug, Clone)]
pub struct RemoteParams<P> {
    fields: Vec<(P, NetworkField)>,
}

impl<P: ClassParam> RemoteParams<P> {
    /// One binding per parameter of the class.
    pub fn bind(remote: &RemoteRecord) -> Self {
        Self {
            fields: P::ALL
                .iter()
                .map(|&param| (param, remote.field(param.field_name())))
                .collect(),
        }
    }

    fn field(&self, param: P) -> DeviceResult<&NetworkField> {
        self.fields
            .iter()
            .find(|(candidate, _)| candidate.field_name() == param.field_name())
            .map(|(_, field)| field)
            .ok_or_else(|| DeviceError::not_supported(param.field_name()))
    }

    /// Read a parameter from the remote record.
    pub fn get(&self, param: P) -> DeviceResult<ParamValue> {
        let field = self.field(param)?;
        let value = field.get_value(param.data_type())?;
        ParamValue::from_field_value(&value).ok_or_else(|| {
            DeviceError::Protocol(format!(
                "{} returned {} which is not a parameter value",
                field.remote_name(),
                value.data_type()
            ))
        })
    }

    /// Write a parameter to the remote record.
    pub fn set(&self, param: P, value: &ParamValue) -> DeviceResult<()> {
        let wire = value.to_field_value(param.field_name(), param.data_type())?;
        self.field(param)?.put_value(wire)
    }
}
