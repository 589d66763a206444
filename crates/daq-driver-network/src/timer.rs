//! Network timer proxy.

use daq_network::NetworkField;
use daq_records::classes::timer::default_set_parameter;
use daq_records::classes::{ParamValue, TimerDriver, TimerMode, TimerParam, TimerState};
use daq_records::{
    Database, DeviceResult, DriverError, DriverFactory, FieldDescriptor, FieldStore, RecordClass,
    RecordContext, RecordDriver,
};

use crate::remote::{proxy_fields, Remote, RemoteFields, RemoteParams, RemoteRecord};

const DRIVER_TYPE: &str = "network_timer";

#[derive(Debug)]
struct TimerFields {
    value: NetworkField,
    start: NetworkField,
    stop: NetworkField,
    clear: NetworkField,
    busy: NetworkField,
    mode: NetworkField,
    params: RemoteParams<TimerParam>,
}

impl RemoteFields for TimerFields {
    fn bind(remote: &RemoteRecord) -> Self {
        Self {
            value: remote.field("value"),
            start: remote.field("start"),
            stop: remote.field("stop"),
            clear: remote.field("clear"),
            busy: remote.field("busy"),
            mode: remote.field("mode"),
            params: RemoteParams::bind(remote),
        }
    }
}

/// Timer on a remote server.
#[derive(Debug)]
pub struct NetworkTimer {
    remote: Remote<TimerFields>,
}

impl TimerDriver for NetworkTimer {
    fn start(&mut self, _state: &mut TimerState, seconds: f64) -> DeviceResult<()> {
        self.remote.fields()?.start.put(seconds)
    }

    fn stop(&mut self, _state: &mut TimerState) -> DeviceResult<f64> {
        let fields = self.remote.fields()?;
        fields.stop.put(true)?;
        fields.value.get()
    }

    fn clear(&mut self, _state: &mut TimerState) -> DeviceResult<()> {
        self.remote.fields()?.clear.put(true)
    }

    fn read(&mut self, _state: &mut TimerState) -> DeviceResult<f64> {
        self.remote.fields()?.value.get()
    }

    fn is_busy(&mut self, _state: &mut TimerState) -> DeviceResult<bool> {
        self.remote.fields()?.busy.get()
    }

    fn get_mode(&mut self, _state: &mut TimerState) -> DeviceResult<TimerMode> {
        TimerMode::from_code(self.remote.fields()?.mode.get()?)
    }

    fn set_mode(&mut self, _state: &mut TimerState, mode: TimerMode) -> DeviceResult<()> {
        self.remote.fields()?.mode.put(mode.code())
    }

    fn get_parameter(&mut self, state: &mut TimerState, param: TimerParam) -> DeviceResult<ParamValue> {
        let value = self.remote.fields()?.params.get(param)?;
        default_set_parameter(state, param, &value)?;
        Ok(value)
    }

    fn set_parameter(
        &mut self,
        state: &mut TimerState,
        param: TimerParam,
        value: &ParamValue,
    ) -> DeviceResult<()> {
        self.remote.fields()?.params.set(param, value)?;
        default_set_parameter(state, param, value)
    }
}

impl RecordDriver for NetworkTimer {
    fn initialize(&mut self, ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.remote.bind(ctx, database)
    }

    fn as_timer(&mut self) -> Option<&mut dyn TimerDriver> {
        Some(self)
    }
}

/// Factory for `network_timer` records.
pub struct NetworkTimerFactory;

impl DriverFactory for NetworkTimerFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Timer
    }

    fn description(&self) -> &'static str {
        "Timer record on a remote server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        proxy_fields()
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(NetworkTimer {
            remote: Remote::from_fields(DRIVER_TYPE, fields)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use daq_records::RecordDescription;

    #[test]
    fn test_run_and_mode_follow_remote_timer() {
        let fixture = Fixture::new(
            &[RecordDescription::new("gate", "soft_timer")],
            &[Fixture::proxy("t", DRIVER_TYPE, "gate")],
        );
        fixture
            .client("t")
            .with(|record| {
                let mut timer = record.timer()?;
                timer.start(1000.0)?;
                assert!(timer.is_busy()?);
                let elapsed = timer.stop()?;
                assert!(elapsed < 1000.0);
                assert!(!timer.is_busy()?);

                timer.set_mode(TimerMode::Counter)?;
                assert_eq!(timer.get_mode()?, TimerMode::Counter);
                Ok(())
            })
            .unwrap();
        let mode = fixture
            .served("gate")
            .with(|record| record.timer()?.get_mode())
            .unwrap();
        assert_eq!(mode, TimerMode::Counter);
    }
}
