//! Network scaler proxy.
//!
//! Counts are read raw from the remote; the local record subtracts its own
//! dark current.

use daq_network::NetworkField;
use daq_records::classes::scaler::default_set_parameter;
use daq_records::classes::{ParamValue, ScalerDriver, ScalerParam, ScalerState};
use daq_records::{
    Database, DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, RecordClass,
    RecordContext, RecordDriver,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteParams, RemoteRecord};

const DRIVER_TYPE: &str = "network_scaler";

#[derive(Debug)]
struct ScalerFields {
    raw_value: NetworkField,
    clear: NetworkField,
    overflow_set: NetworkField,
    busy: NetworkField,
    start: NetworkField,
    stop: NetworkField,
    params: RemoteParams<ScalerParam>,
}

impl RemoteFields for ScalerFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            raw_value: remote.field("raw_value"),
            clear: remote.field("clear"),
            overflow_set: remote.field("overflow_set"),
            busy: remote.field("busy"),
            start: remote.field("start"),
            stop: remote.field("stop"),
            params: RemoteParams::bind(remote),
        }
    }
}

/// Scaler on a remote server.
#[derive(Debug)]
pub struct NetworkScaler {
    remote: Remote<ScalerFields>,
}

impl ScalerDriver for NetworkScaler {
    fn clear(&mut self, _state: &mut ScalerState) -> DeviceResult<()> {
        self.remote.fields()?.clear.put(true)
    }

    fn read(&mut self, _state: &mut ScalerState) -> DeviceResult<i64> {
        self.remote.fields()?.raw_value.get()
    }

    fn overflow_set(&mut self, _state: &mut ScalerState) -> DeviceResult<bool> {
        self.remote.fields()?.overflow_set.get()
    }

    fn is_busy(&mut self, _state: &mut ScalerState) -> DeviceResult<bool> {
        self.remote.fields()?.busy.get()
    }

    fn start(&mut self, _state: &mut ScalerState, preset: i64) -> DeviceResult<()> {
        self.remote.fields()?.start.put(preset)
    }

    fn stop(&mut self, _state: &mut ScalerState) -> DeviceResult<i64> {
        let fields = self.remote.fields()?;
        fields.stop.put(true)?;
        fields.raw_value.get()
    }

    fn get_parameter(&mut self, state: &mut ScalerState, param: ScalerParam) -> DeviceResult<ParamValue> {
        let value = self.remote.fields()?.params.get(param)?;
        default_set_parameter(state, param, &value)?;
        Ok(value)
    }

    fn set_parameter(
        &mut self,
        state: &mut ScalerState,
        param: ScalerParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        self.remote.fields()?.params.set(param, value)?;
        default_set_parameter(state, param, value)
    }
}

impl RecordDriver for NetworkScaler {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn as_scaler(&mut self) -> Option<&mut dyn ScalerDriver> {
        Some(self)
    }
}

/// Factory for `network_scaler` records.
pub struct NetworkScalerFactory;

impl DriverFactory for NetworkScalerFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Scaler
    }

    fn description(&self) -> &'static str {
        "Scaler record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkScaler {
            remote: Remote::from_fields(DRIVER_TYPE, fields)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use daq_records::{FieldValue, RecordDescription};

    #[test]
    fn test_counts_and_local_dark_current() {
        let fixture = Fixture::new(
            &[RecordDescription::new("i0", "soft_scaler")],
            &[Fixture::proxy("s", DRIVER_TYPE, "i0")
                .with_field("dark_current", 10.0)
                .with_field("measurement_time", 2.0)],
        );
        fixture
            .served("i0")
            .with(|record| record.write_field("inject_counts", FieldValue::Int64(500)))
            .unwrap();
        fixture
            .client("s")
            .with(|record| {
                let mut scaler = record.scaler()?;
                assert_eq!(scaler.read_raw()?, 500);
                assert_eq!(scaler.read()?, 480);
                scaler.clear()?;
                assert_eq!(scaler.read_raw()?, 0);
                assert!(!scaler.overflow_set()?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_mode_parameter_forwarded() {
        let fixture = Fixture::new(
            &[RecordDescription::new("i0", "soft_scaler")],
            &[Fixture::proxy("s", DRIVER_TYPE, "i0")],
        );
        fixture
            .client("s")
            .with(|record| record.scaler()?.set_parameter(ScalerParam::Mode, &ParamValue::Int(1)))
            .unwrap();
        let mode = fixture
            .served("i0")
            .with(|record| record.scaler()?.get_parameter(ScalerParam::Mode))
            .unwrap();
        assert_eq!(mode, ParamValue::Int(1));
    }
}
