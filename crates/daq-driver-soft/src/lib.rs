//! Simulated and composite record drivers.
//!
//! Soft drivers implement every device class in memory, with enough timing
//! behaviour (motion profiles, counting rates, exposure sequences) to
//! exercise the class contracts without hardware. Every soft driver carries
//! the fault fields of [`common::faults`], so tests can disconnect a device or
//! make one operation fail through plain field writes.
//!
//! # Available Drivers
//!
//! | driver type | class |
//! |-------------|-------|
//! | `soft_motor` | motor |
//! | `soft_scaler` | scaler |
//! | `soft_timer` | timer |
//! | `soft_amplifier` | amplifier |
//! | `soft_relay` | relay |
//! | `soft_digital_input`, `soft_digital_output` | digital input / output |
//! | `soft_autoscale` | autoscale |
//! | `soft_sca` | single channel analyzer |
//! | `soft_area_detector` | area detector |
//! | `long_variable`, `double_variable`, `string_variable` | variable |
//! | `motor_positioner`, `polynomial_motor` | motor (composite) |
//! | `gain_tracking_scaler` | scaler (composite) |
//! | `amplifier_autoscale` | autoscale (composite) |
//! | `digital_fanin` | digital input (composite) |
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = DriverRegistry::new();
//! daq_driver_soft::register_all(&mut registry)?;
//! let database = settings.build_database(&registry)?;
//! ```

pub mod common;
pub mod composite;
mod soft_amplifier;
mod soft_area_detector;
mod soft_autoscale;
mod soft_digital;
mod soft_motor;
mod soft_relay;
mod soft_sca;
mod soft_scaler;
mod soft_timer;
mod variables;

#[cfg(test)]
mod testing;

pub use common::{FaultInjector, Motion, MotionProfile};
pub use composite::{
    AmplifierAutoscaleFactory, DigitalFaninFactory, FaninOperation, GainTrackingScalerFactory,
    MotorPositionerFactory, PolynomialMotorFactory,
};
pub use soft_amplifier::{SoftAmplifier, SoftAmplifierFactory};
pub use soft_area_detector::{SoftAreaDetector, SoftAreaDetectorFactory};
pub use soft_autoscale::{SoftAutoscale, SoftAutoscaleFactory};
pub use soft_digital::{
    SoftDigitalInput, SoftDigitalInputFactory, SoftDigitalOutput, SoftDigitalOutputFactory,
};
pub use soft_motor::{SoftMotor, SoftMotorFactory};
pub use soft_relay::{SoftRelay, SoftRelayFactory};
pub use soft_sca::{SoftSca, SoftScaFactory};
pub use soft_scaler::{SoftScaler, SoftScalerFactory};
pub use soft_timer::{SoftTimer, SoftTimerFactory};
pub use variables::{Variable, VariableFactory};

use daq_records::{ConfigError, DriverRegistry};

/// Register every soft, variable and composite driver type.
pub fn register_all(registry: &mut DriverRegistry) -> Result<(), ConfigError> {
    registry.register(SoftMotorFactory)?;
    registry.register(SoftScalerFactory)?;
    registry.register(SoftTimerFactory)?;
    registry.register(SoftAmplifierFactory)?;
    registry.register(SoftRelayFactory)?;
    registry.register(SoftDigitalInputFactory)?;
    registry.register(SoftDigitalOutputFactory)?;
    registry.register(SoftAutoscaleFactory)?;
    registry.register(SoftScaFactory)?;
    registry.register(SoftAreaDetectorFactory)?;
    for variable in VariableFactory::ALL {
        registry.register(variable)?;
    }
    registry.register(MotorPositionerFactory)?;
    registry.register(PolynomialMotorFactory)?;
    registry.register(GainTrackingScalerFactory)?;
    registry.register(AmplifierAutoscaleFactory)?;
    registry.register(DigitalFaninFactory)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_records::RecordClass;

    #[test]
    fn test_register_all() {
        let registry = testing::registry();
        assert_eq!(registry.driver_types().len(), 18);
        assert_eq!(registry.class_of("soft_motor"), Some(RecordClass::Motor));
        assert_eq!(registry.class_of("digital_fanin"), Some(RecordClass::DigitalInput));
        assert_eq!(registry.class_of("string_variable"), Some(RecordClass::Variable));

        for driver_type in registry.driver_types() {
            assert!(registry.table(driver_type).is_some(), "{driver_type}");
        }
    }
}
