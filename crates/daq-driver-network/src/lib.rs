//! Proxy record drivers for records served by a remote database.
//!
//! A proxy is a local record of some class whose class operations are
//! carried out by a record of the same class on a server. Each proxy names a
//! local `NetworkServer` record (`server_record`) and the remote record
//! (`remote_record_name`); every class operation becomes a get or put of the
//! matching remote field. Remote failures come back as the same
//! [`DeviceError`](daq_records::DeviceError) the remote driver raised, and
//! link failures as connection-lost or timed-out errors.
//!
//! # Available Drivers
//!
//! | driver type | class |
//! |-------------|-------|
//! | `network_motor` | motor |
//! | `network_scaler` | scaler |
//! | `network_timer` | timer |
//! | `network_amplifier` | amplifier |
//! | `network_relay` | relay |
//! | `network_digital_input`, `network_digital_output` | digital input / output |
//! | `network_autoscale` | autoscale |
//! | `network_sca` | single channel analyzer |
//! | `network_area_detector` | area detector |
//! | `network_long_variable`, `network_double_variable`, `network_string_variable` | variable |
//!
//! # Example
//!
//! ```toml
//! [[records]]
//! name = "srv"
//! driver = "tcp_server"
//! hostname = "beamline-ioc"
//! port = 9727
//!
//! [[records]]
//! name = "theta"
//! driver = "network_motor"
//! server_record = "srv"
//! remote_record_name = "theta"
//! ```

mod amplifier;
mod area_detector;
mod autoscale;
mod digital;
mod motor;
mod relay;
pub mod remote;
mod sca;
mod scaler;
mod timer;
mod variable;

#[cfg(test)]
mod testing;

pub use amplifier::{NetworkAmplifier, NetworkAmplifierFactory};
pub use area_detector::{NetworkAreaDetector, NetworkAreaDetectorFactory};
pub use autoscale::{NetworkAutoscale, NetworkAutoscaleFactory};
pub use digital::{
    NetworkDigitalInput, NetworkDigitalInputFactory, NetworkDigitalOutput,
    NetworkDigitalOutputFactory,
};
pub use motor::{NetworkMotor, NetworkMotorFactory};
pub use relay::{NetworkRelay, NetworkRelayFactory};
pub use sca::{NetworkSca, NetworkScaFactory};
pub use scaler::{NetworkScaler, NetworkScalerFactory};
pub use timer::{NetworkTimer, NetworkTimerFactory};
pub use variable::{NetworkVariable, NetworkVariableFactory};

use daq_records::{ConfigError, DriverRegistry};

/// Register every proxy driver type. Server record types are registered by
/// `daq-network`.
pub fn register_all(registry: &mut DriverRegistry) -> Result<(), ConfigError> {
    registry.register(NetworkMotorFactory)?;
    registry.register(NetworkScalerFactory)?;
    registry.register(NetworkTimerFactory)?;
    registry.register(NetworkAmplifierFactory)?;
    registry.register(NetworkRelayFactory)?;
    registry.register(NetworkDigitalInputFactory)?;
    registry.register(NetworkDigitalOutputFactory)?;
    registry.register(NetworkAutoscaleFactory)?;
    registry.register(NetworkScaFactory)?;
    registry.register(NetworkAreaDetectorFactory)?;
    for variable in NetworkVariableFactory::ALL {
        registry.register(variable)?;
    }
    Ok(())
}
