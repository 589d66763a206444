//! Network digital input and output proxies.

use daq_network::NetworkField;
use daq_records::classes::{
    DigitalInputDriver, DigitalInputState, DigitalOutputDriver, DigitalOutputState,
};
use daq_records::{
    Database, DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, RecordClass,
    RecordContext, RecordDriver,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteRecord};

const INPUT_TYPE: &str = "network_digital_input";
const OUTPUT_TYPE: &str = "network_digital_output";

#[derive(Debug)]
struct InputFields {
    value: NetworkField,
    clear: NetworkField,
}

impl RemoteFields for InputFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            value: remote.field("value"),
            clear: remote.field("clear"),
        }
    }
}

#[derive(Debug)]
struct OutputFields {
    value: NetworkField,
}

impl RemoteFields for OutputFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            value: remote.field("value"),
        }
    }
}

/// Digital input on a remote server.
#[derive(Debug)]
pub struct NetworkDigitalInput {
    remote: Remote<InputFields>,
}

impl DigitalInputDriver for NetworkDigitalInput {
    fn read(&mut self, _state: &mut DigitalInputState) -> DeviceResult<u32> {
        self.remote.fields()?.value.get()
    }

    fn clear(&mut self, _state: &mut DigitalInputState) -> DeviceResult<()> {
        self.remote.fields()?.clear.put(true)
    }
}

impl RecordDriver for NetworkDigitalInput {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn as_digital_input(&mut self) -> Option<&mut dyn DigitalInputDriver> {
        Some(self)
    }
}

/// Digital output on a remote server.
#[derive(Debug)]
pub struct NetworkDigitalOutput {
    remote: Remote<OutputFields>,
}

impl DigitalOutputDriver for NetworkDigitalOutput {
    fn read(&mut self, _state: &mut DigitalOutputState) -> DeviceResult<u32> {
        self.remote.fields()?.value.get()
    }

    fn write(&mut self, _state: &mut DigitalOutputState, value: u32) -> DeviceResult<()> {
        self.remote.fields()?.value.put(value)
    }
}

impl RecordDriver for NetworkDigitalOutput {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn as_digital_output(&mut self) -> Option<&mut dyn DigitalOutputDriver> {
        Some(self)
    }
}

/// Factory for `network_digital_input` records.
pub struct NetworkDigitalInputFactory;

impl DriverFactory for NetworkDigitalInputFactory {
    fn driver_type(&self) -> &'static str {
        INPUT_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::DigitalInput
    }

    fn description(&self) -> &'static str {
        "Digital input record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkDigitalInput {
            remote: Remote::from_fields(INPUT_TYPE, fields)?,
        }))
    }
}

/// Factory for `network_digital_output` records.
pub struct NetworkDigitalOutputFactory;

impl DriverFactory for NetworkDigitalOutputFactory {
    fn driver_type(&self) -> &'static str {
        OUTPUT_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::DigitalOutput
    }

    fn description(&self) -> &'static str {
        "Digital output record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkDigitalOutput {
            remote: Remote::from_fields(OUTPUT_TYPE, fields)?,
        }))
    }
}
