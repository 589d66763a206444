//! Gain tracking scaler: counts normalized by an amplifier's gain.
//!
//! `value = counts · gain_scale / gain`, where `counts` is the dark-corrected
//! count of the child scaler and `gain` the current gain of the amplifier in
//! front of it. Everything else goes straight to the child scaler.

use daq_records::classes::{ScalerDriver, ScalerState};
use daq_records::{
    Database, DeviceError, DeviceResult, DriverError, DriverFactory, FieldDescriptor,
    FieldStore, FieldValue, RecordClass, RecordContext, RecordDriver, ScalarType,
};

use super::Child;

const DRIVER_TYPE: &str = "gain_tracking_scaler";

/// Scaler whose counts follow an amplifier's gain.
#[derive(Debug)]
pub struct GainTrackingScaler {
    scaler: Child,
    amplifier: Child,
    gain_scale: f64,
}

impl GainTrackingScaler {
    fn normalize(&self, counts: i64) -> DeviceResult<i64> {
        let gain = self.amplifier.with(|record| record.amplifier()?.get_gain())?;
        if gain == 0.0 {
            return Err(DeviceError::invalid_parameter(
                "gain",
                format!("amplifier '{}' reports zero gain", self.amplifier.name()),
            ));
        }
        Ok((counts as f64 * self.gain_scale / gain).round() as i64)
    }
}

impl ScalerDriver for GainTrackingScaler {
    fn clear(&mut self, _state: &mut ScalerState) -> DeviceResult<()> {
        self.scaler.with(|record| record.scaler()?.clear())
    }

    fn read(&mut self, _state: &mut ScalerState) -> DeviceResult<i64> {
        let counts = self.scaler.with(|record| record.scaler()?.read())?;
        self.normalize(counts)
    }

    fn overflow_set(&mut self, _state: &mut ScalerState) -> DeviceResult<bool> {
        self.scaler.with(|record| record.scaler()?.overflow_set())
    }

    fn is_busy(&mut self, _state: &mut ScalerState) -> DeviceResult<bool> {
        self.scaler.with(|record| record.scaler()?.is_busy())
    }

    /// The preset is passed to the child scaler in its own counts.
    fn start(&mut self, _state: &mut ScalerState, preset: i64) -> DeviceResult<()> {
        self.scaler.with(|record| record.scaler()?.start(preset))
    }

    fn stop(&mut self, _state: &mut ScalerState) -> DeviceResult<i64> {
        let counts = self.scaler.with(|record| record.scaler()?.stop())?;
        self.normalize(counts)
    }
}

impl RecordDriver for GainTrackingScaler {
    fn initialize(&mut self, _ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.scaler.bind(database)?;
        self.amplifier.bind(database)
    }

    fn as_scaler(&mut self) -> Option<&mut dyn ScalerDriver> {
        Some(self)
    }
}

/// Factory for `gain_tracking_scaler` records.
pub struct GainTrackingScalerFactory;

impl DriverFactory for GainTrackingScalerFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Scaler
    }

    fn description(&self) -> &'static str {
        "Scaler counts divided by an amplifier gain"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("scaler", ScalarType::RecordRef).in_description(),
            FieldDescriptor::scalar("amplifier", ScalarType::RecordRef).in_description(),
            FieldDescriptor::scalar("gain_scale", ScalarType::Double)
                .with_default(FieldValue::Double(1.0))
                .in_description(),
        ]
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        let field = |e| DriverError::from_field(DRIVER_TYPE, e);
        Ok(Box::new(GainTrackingScaler {
            scaler: Child::from_field(fields, "scaler").map_err(field)?,
            amplifier: Child::from_field(fields, "amplifier").map_err(field)?,
            gain_scale: fields.get_as("gain_scale").map_err(field)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_database;
    use daq_records::RecordDescription;

    fn database(gain: f64) -> Database {
        open_database(&[
            RecordDescription::new("sc", "soft_scaler"),
            RecordDescription::new("amp", "soft_amplifier").with_field("gain", gain),
            RecordDescription::new("norm", DRIVER_TYPE)
                .with_field("scaler", "sc")
                .with_field("amplifier", "amp")
                .with_field("gain_scale", 1e6),
        ])
    }

    #[test]
    fn test_counts_follow_gain() {
        let database = database(1e8);
        database
            .resolve("sc")
            .unwrap()
            .with(|record| record.write_field("inject_counts", FieldValue::Int64(5000)))
            .unwrap();
        let norm = database.resolve("norm").unwrap();
        assert_eq!(norm.with(|record| record.scaler()?.read()).unwrap(), 50);

        database
            .resolve("amp")
            .unwrap()
            .with(|record| record.amplifier()?.set_gain(1e6))
            .unwrap();
        assert_eq!(norm.with(|record| record.scaler()?.read()).unwrap(), 5000);

        norm.with(|record| record.scaler()?.clear()).unwrap();
        assert_eq!(norm.with(|record| record.scaler()?.read()).unwrap(), 0);
    }

    #[test]
    fn test_zero_gain_rejected() {
        let database = database(0.0);
        let result = database
            .resolve("norm")
            .unwrap()
            .with(|record| record.scaler()?.read());
        assert!(matches!(result, Err(DeviceError::InvalidParameter { .. })));
    }
}
