//! Network relay proxy.

use daq_network::NetworkField;
use daq_records::classes::{RelayCommand, RelayDriver, RelayState, RelayStatus};
use daq_records::{
    Database, DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, RecordClass,
    RecordContext, RecordDriver,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteRecord};

const DRIVER_TYPE: &str = "network_relay";

#[derive(Debug)]
struct RelayFields {
    command: NetworkField,
    status: NetworkField,
}

impl RemoteFields for RelayFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            command: remote.field("relay_command"),
            status: remote.field("relay_status"),
        }
    }
}

/// Relay on a remote server.
#[derive(Debug)]
pub struct NetworkRelay {
    remote: Remote<RelayFields>,
}

impl RelayDriver for NetworkRelay {
    fn relay_command(&mut self, _state: &mut RelayState, command: RelayCommand) -> DeviceResult<()> {
        self.remote.fields()?.command.put(command.code())
    }

    fn get_relay_status(&mut self, _state: &mut RelayState) -> DeviceResult<RelayStatus> {
        RelayStatus::from_code(self.remote.fields()?.status.get()?)
    }
}

impl RecordDriver for NetworkRelay {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn as_relay(&mut self) -> Option<&mut dyn RelayDriver> {
        Some(self)
    }
}

/// Factory for `network_relay` records.
pub struct NetworkRelayFactory;

impl DriverFactory for NetworkRelayFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Relay
    }

    fn description(&self) -> &'static str {
        "Relay record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkRelay {
            remote: Remote::from_fields(DRIVER_TYPE, fields)?,
        }))
    }
}
