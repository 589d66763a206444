//! Network single channel analyzer proxy.
//!
//! Every setting is a parameter. The proxy pulls all of them at open and
//! copies each value it reads or writes into the local state; the window
//! ordering is checked by the remote record only.

use daq_records::classes::{ClassParam, ParamValue, ScaDriver, ScaParam, ScaState};
use daq_records::{
    ClassState, Database, DeviceError, DeviceResult, DriverError, DriverFactory, FieldDescriptor,
    FieldStore, RecordClass, RecordContext, RecordDriver,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteParams, RemoteRecord};

const DRIVER_TYPE: &str = "network_sca";

#[derive(Debug)]
struct ScaFields {
    params: RemoteParams<ScaParam>,
}

impl RemoteFields for ScaFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            params: RemoteParams::bind(remote),
        }
    }
}

fn mirror(state: &mut ScaState, param: ScaParam, value: &ParamValue) -> DeviceResult<()> {
    let name = param.field_name();
    match param {
        ScaParam::LowerLevel => state.lower_level = value.as_f64(name)?,
        ScaParam::UpperLevel => state.upper_level = value.as_f64(name)?,
        ScaParam::Gain => state.gain = value.as_f64(name)?,
        ScaParam::TimeConstant => state.time_constant = value.as_f64(name)?,
        ScaParam::Mode => state.mode = value.as_i64(name)?,
    }
    Ok(())
}

/// Single channel analyzer on a remote server.
#[derive(Debug)]
pub struct NetworkSca {
    remote: Remote<ScaFields>,
}

impl ScaDriver for NetworkSca {
    fn get_parameter(&mut self, state: &mut ScaState, param: ScaParam) -> DeviceResult<ParamValue> {
        let value = self.remote.fields()?.params.get(param)?;
        mirror(state, param, &value)?;
        Ok(value)
    }

    fn set_parameter(
        &mut self,
        state: &mut ScaState,
        param: ScaParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        self.remote.fields()?.params.set(param, value)?;
        mirror(state, param, value)
    }
}

impl RecordDriver for NetworkSca {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn open(&mut self, ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        let name = ctx.name;
        let actual = ctx.class_state.class();
        let ClassState::Sca(state) = &mut *ctx.class_state else {
            return Err(DeviceError::WrongClass {
                record: name.to_string(),
                expected: RecordClass::Sca,
                actual,
            });
        };
        for &param in ScaParam::ALL {
            self.get_parameter(state, param)?;
        }
        Ok(())
    }

    fn as_sca(&mut self) -> Option<&mut dyn ScaDriver> {
        Some(self)
    }
}

/// Factory for `network_sca` records.
pub struct NetworkScaFactory;

impl DriverFactory for NetworkScaFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Sca
    }

    fn description(&self) -> &'static str {
        "Single channel analyzer record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkSca {
            remote: Remote::from_fields(DRIVER_TYPE, fields)?,
        }))
    }
}
