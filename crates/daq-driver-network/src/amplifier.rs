//! Network amplifier proxy.
//!
//! At open the remote gain range is copied into the local record, so an
//! out-of-range gain is refused before any request is sent.

use tracing::debug;

use daq_network::NetworkField;
use daq_records::classes::amplifier::default_set_parameter;
use daq_records::classes::{AmplifierDriver, AmplifierParam, AmplifierState, ParamValue};
use daq_records::{
    ClassState, Database, DeviceError, DeviceResult, DriverError, DriverFactory, FieldDescriptor,
    FieldStore, RecordClass, RecordContext, RecordDriver,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteParams, RemoteRecord};

const DRIVER_TYPE: &str = "network_amplifier";

#[derive(Debug)]
struct AmplifierFields {
    gain: NetworkField,
    offset: NetworkField,
    time_constant: NetworkField,
    params: RemoteParams<AmplifierParam>,
}

impl RemoteFields for AmplifierFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            gain: remote.field("gain"),
            offset: remote.field("offset"),
            time_constant: remote.field("time_constant"),
            params: RemoteParams::bind(remote),
        }
    }
}

/// Amplifier on a remote server.
#[derive(Debug)]
pub struct NetworkAmplifier {
    remote: Remote<AmplifierFields>,
}

impl AmplifierDriver for NetworkAmplifier {
    fn get_gain(&mut self, _state: &mut AmplifierState) -> DeviceResult<f64> {
        self.remote.fields()?.gain.get()
    }

    fn set_gain(&mut self, _state: &mut AmplifierState, gain: f64) -> DeviceResult<()> {
        self.remote.fields()?.gain.put(gain)
    }

    fn get_offset(&mut self, _state: &mut AmplifierState) -> DeviceResult<f64> {
        self.remote.fields()?.offset.get()
    }

    fn set_offset(&mut self, _state: &mut AmplifierState, offset: f64) -> DeviceResult<()> {
        self.remote.fields()?.offset.put(offset)
    }

    fn get_time_constant(&mut self, _state: &mut AmplifierState) -> DeviceResult<f64> {
        self.remote.fields()?.time_constant.get()
    }

    fn set_time_constant(&mut self, _state: &mut AmplifierState, seconds: f64) -> DeviceResult<()> {
        self.remote.fields()?.time_constant.put(seconds)
    }

    fn get_parameter(
        &mut self,
        state: &mut AmplifierState,
        param: AmplifierParam,
    ) -> DeviceResult<ParamValue> {
        let value = self.remote.fields()?.params.get(param)?;
        default_set_parameter(state, param, &value)?;
        Ok(value)
    }

    fn set_parameter(
        &mut self,
        state: &mut AmplifierState,
        param: AmplifierParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        self.remote.fields()?.params.set(param, value)?;
        default_set_parameter(state, param, value)
    }
}

impl RecordDriver for NetworkAmplifier {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn open(&mut self, ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        let name = ctx.name;
        let actual = ctx.class_state.class();
        let ClassState::Amplifier(state) = &mut *ctx.class_state else {
            return Err(DeviceError::WrongClass {
                record: name.to_string(),
                expected: RecordClass::Amplifier,
                actual,
            });
        };
        self.get_parameter(state, AmplifierParam::GainRange)?;
        state.gain = self.get_gain(state)?;
        debug!(record = name, gain_range = ?state.gain_range, gain = state.gain, "amplifier proxy opened");
        ctx.fields.set_array_internal("gain_range", state.gain_range.to_vec())?;
        ctx.fields.set_internal_as("gain", state.gain)?;
        Ok(())
    }

    fn as_amplifier(&mut self) -> Option<&mut dyn AmplifierDriver> {
        Some(self)
    }
}

/// Factory for `network_amplifier` records.
pub struct NetworkAmplifierFactory;

impl DriverFactory for NetworkAmplifierFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Amplifier
    }

    fn description(&self) -> &'static str {
        "Amplifier record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkAmplifier {
            remote: Remote::from_fields(DRIVER_TYPE, fields)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use daq_records::RecordDescription;

    fn fixture() -> Fixture {
        Fixture::new(
            &[RecordDescription::new("amp", "soft_amplifier")
                .with_field("gain", 1e5)
                .with_field("gain_range", vec![1e3, 1e9])],
            &[Fixture::proxy("a", DRIVER_TYPE, "amp")],
        )
    }

    #[test]
    fn test_open_copies_remote_range_and_gain() {
        let fixture = fixture();
        fixture
            .client("a")
            .with(|record| {
                let amplifier = record.amplifier()?;
                assert_eq!(amplifier.state().gain_range, [1e3, 1e9]);
                assert_eq!(amplifier.state().gain, 1e5);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_gain_range_checked_before_sending() {
        let fixture = fixture();
        let before = fixture.control.requests_served();
        let result = fixture
            .client("a")
            .with(|record| record.amplifier()?.set_gain(1e10));
        assert_eq!(
            result,
            Err(DeviceError::LimitExceeded {
                value: 1e10,
                low: 1e3,
                high: 1e9,
            })
        );
        assert_eq!(fixture.control.requests_served(), before);

        fixture
            .client("a")
            .with(|record| {
                let mut amplifier = record.amplifier()?;
                amplifier.set_gain(1e6)?;
                amplifier.set_time_constant(0.1)?;
                Ok(())
            })
            .unwrap();
        let remote = fixture
            .served("amp")
            .with(|record| {
                let mut amplifier = record.amplifier()?;
                Ok((amplifier.get_gain()?, amplifier.get_time_constant()?))
            })
            .unwrap();
        assert_eq!(remote, (1e6, 0.1));
    }
}
