//! Network motor proxy.
//!
//! Positions are exchanged in the remote record's user units; the remote
//! applies its own scale, offset and limits on top of the local ones.
//! Parameters read or written through the proxy are mirrored into the local
//! class state.

use daq_network::NetworkField;
use daq_records::classes::motor::default_set_parameter;
use daq_records::classes::{MotorDriver, MotorParam, MotorState, MotorStatus, ParamValue};
use daq_records::{
    Database, DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, RecordClass,
    RecordContext, RecordDriver,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteParams, RemoteRecord};

const DRIVER_TYPE: &str = "network_motor";

#[derive(Debug)]
struct MotorFields {
    position: NetworkField,
    destination: NetworkField,
    set_position: NetworkField,
    soft_abort: NetworkField,
    immediate_abort: NetworkField,
    status: NetworkField,
    home_search: NetworkField,
    constant_velocity_move: NetworkField,
    params: RemoteParams<MotorParam>,
}

impl RemoteFields for MotorFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            position: remote.field("position"),
            destination: remote.field("destination"),
            set_position: remote.field("set_position"),
            soft_abort: remote.field("soft_abort"),
            immediate_abort: remote.field("immediate_abort"),
            status: remote.field("status"),
            home_search: remote.field("home_search"),
            constant_velocity_move: remote.field("constant_velocity_move"),
            params: RemoteParams::bind(remote),
        }
    }
}

/// Motor on a remote server.
#[derive(Debug)]
pub struct NetworkMotor {
    remote: Remote<MotorFields>,
}

impl MotorDriver for NetworkMotor {
    fn move_absolute(&mut self, _state: &mut MotorState, raw_destination: f64) -> DeviceResult<()> {
        self.remote.fields()?.destination.put(raw_destination)
    }

    fn get_position(&mut self, _state: &mut MotorState) -> DeviceResult<f64> {
        self.remote.fields()?.position.get()
    }

    fn set_position(&mut self, _state: &mut MotorState, raw_position: f64) -> DeviceResult<()> {
        self.remote.fields()?.set_position.put(raw_position)
    }

    fn soft_abort(&mut self, _state: &mut MotorState) -> DeviceResult<()> {
        self.remote.fields()?.soft_abort.put(true)
    }

    fn immediate_abort(&mut self, _state: &mut MotorState) -> DeviceResult<()> {
        self.remote.fields()?.immediate_abort.put(true)
    }

    fn get_status(&mut self, _state: &mut MotorState) -> DeviceResult<MotorStatus> {
        let bits: u32 = self.remote.fields()?.status.get()?;
        Ok(MotorStatus::from_bits(bits))
    }

    fn find_home_position(&mut self, _state: &mut MotorState, direction: i32) -> DeviceResult<()> {
        self.remote.fields()?.home_search.put(direction)
    }

    fn constant_velocity_move(&mut self, _state: &mut MotorState, direction: i32) -> DeviceResult<()> {
        self.remote.fields()?.constant_velocity_move.put(direction)
    }

    fn get_parameter(&mut self, state: &mut MotorState, param: MotorParam) -> DeviceResult<ParamValue> {
        let value = self.remote.fields()?.params.get(param)?;
        default_set_parameter(state, param, &value)?;
        Ok(value)
    }

    fn set_parameter(
        &mut self,
        state: &mut MotorState,
        param: MotorParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        self.remote.fields()?.params.set(param, value)?;
        default_set_parameter(state, param, value)
    }
}

impl RecordDriver for NetworkMotor {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn as_motor(&mut self) -> Option<&mut dyn MotorDriver> {
        Some(self)
    }
}

/// Factory for `network_motor` records.
pub struct NetworkMotorFactory;

impl DriverFactory for NetworkMotorFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Motor
    }

    fn description(&self) -> &'static str {
        "Motor record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkMotor {
            remote: Remote::from_fields(DRIVER_TYPE, fields)?,
        }))
    }
}
