//! Records: the unit every driver, proxy and server works with.
//!
//! A record pairs a resolved [`FieldStore`] with the class-level state of its
//! class and a type-erased driver. Callers reach the device through borrowed
//! class handles (`record.motor()?`) or by field name (`read_field` /
//! `write_field`); the second path runs the class process hook for fields
//! flagged `process`, which is how a network server drives any record.
//!
//! # Lifecycle
//!
//! ```text
//! Created --initialize--> Initialized --open--> Opened --close--> Closed
//!                                                 ^                  |
//!                                                 +------open--------+
//! ```
//!
//! Initialization resolves record references and performs no I/O. A failed
//! open leaves the record `Closed`. Class operations require `Opened`;
//! unprocessed field reads through [`Record::fields`] are always allowed.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument, warn};

use crate::classes::{
    self, AmplifierHandle, AreaDetectorHandle, AutoscaleHandle, ClassHandle, ClassState,
    DigitalInputHandle, DigitalOutputHandle, MotorHandle, ProcessOp, RelayHandle, ScaHandle,
    ScalerHandle, TimerHandle,
};
use crate::config::RecordDescription;
use crate::database::Database;
use crate::driver::{AsAny, RecordContext, RecordDriver};
use crate::error::{DeviceError, DeviceResult, FieldError};
use crate::fields::{FieldSnapshot, FieldStore};
use crate::value::FieldValue;

// =============================================================================
// Type hierarchy
// =============================================================================

/// Top level of the record type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Superclass {
    /// Hardware or simulated devices.
    Device,
    /// Connections to remote servers.
    Server,
    /// Plain values.
    Variable,
}

/// Record class. Each class has one contract shared by all its driver types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordClass {
    /// Positioner.
    Motor,
    /// Counter.
    Scaler,
    /// Gate timer.
    Timer,
    /// Current or voltage amplifier.
    Amplifier,
    /// Two-position switch.
    Relay,
    /// Digital input register.
    DigitalInput,
    /// Digital output register.
    DigitalOutput,
    /// Range-switching controller.
    Autoscale,
    /// Single channel analyzer.
    Sca,
    /// Imaging detector.
    AreaDetector,
    /// Network server connection.
    NetworkServer,
    /// Plain value.
    Variable,
}

impl RecordClass {
    /// Every class.
    pub const ALL: [RecordClass; 12] = [
        RecordClass::Motor,
        RecordClass::Scaler,
        RecordClass::Timer,
        RecordClass::Amplifier,
        RecordClass::Relay,
        RecordClass::DigitalInput,
        RecordClass::DigitalOutput,
        RecordClass::Autoscale,
        RecordClass::Sca,
        RecordClass::AreaDetector,
        RecordClass::NetworkServer,
        RecordClass::Variable,
    ];

    /// Superclass this class belongs to.
    pub fn superclass(self) -> Superclass {
        match self {
            RecordClass::NetworkServer => Superclass::Server,
            RecordClass::Variable => Superclass::Variable,
            _ => Superclass::Device,
        }
    }

    /// Lowercase name used in logs and descriptions.
    pub fn name(self) -> &'static str {
        match self {
            RecordClass::Motor => "motor",
            RecordClass::Scaler => "scaler",
            RecordClass::Timer => "timer",
            RecordClass::Amplifier => "amplifier",
            RecordClass::Relay => "relay",
            RecordClass::DigitalInput => "digital_input",
            RecordClass::DigitalOutput => "digital_output",
            RecordClass::Autoscale => "autoscale",
            RecordClass::Sca => "sca",
            RecordClass::AreaDetector => "area_detector",
            RecordClass::NetworkServer => "network_server",
            RecordClass::Variable => "variable",
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Record lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Fields resolved, driver constructed.
    #[default]
    Created,
    /// References resolved.
    Initialized,
    /// Device ready for class operations.
    Opened,
    /// Closed after use or after a failed open.
    Closed,
}

// =============================================================================
// Record
// =============================================================================

/// One named device, server connection or variable.
pub struct Record {
    name: String,
    class: RecordClass,
    type_name: String,
    lifecycle: Lifecycle,
    fields: FieldStore,
    class_state: ClassState,
    driver: Box<dyn RecordDriver>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("type_name", &self.type_name)
            .field("lifecycle", &self.lifecycle)
            .field("class_state", &self.class_state)
            .finish_non_exhaustive()
    }
}

macro_rules! class_accessor {
    ($(#[$meta:meta])* $method:ident, $variant:ident, $as_driver:ident, $handle:ident) => {
        $(#[$meta])*
        pub fn $method(&mut self) -> DeviceResult<$handle<'_>> {
            if self.class != RecordClass::$variant {
                return Err(DeviceError::WrongClass {
                    record: self.name.clone(),
                    expected: RecordClass::$variant,
                    actual: self.class,
                });
            }
            self.require_opened(stringify!($method))?;
            let Record {
                name,
                class,
                class_state,
                driver,
                ..
            } = self;
            let ClassState::$variant(state) = class_state else {
                return Err(DeviceError::WrongClass {
                    record: name.clone(),
                    expected: RecordClass::$variant,
                    actual: *class,
                });
            };
            let driver = driver
                .$as_driver()
                .ok_or_else(|| DeviceError::not_supported(stringify!($method)))?;
            Ok(ClassHandle::new(name.as_str(), state, driver))
        }
    };
}

impl Record {
    /// Assemble a record. The class state is read from the resolved fields.
    pub fn new(
        name: impl Into<String>,
        class: RecordClass,
        type_name: impl Into<String>,
        fields: FieldStore,
        driver: Box<dyn RecordDriver>,
    ) -> Result<Self, FieldError> {
        let class_state = ClassState::new(class, &fields)?;
        Ok(Self {
            name: name.into(),
            class,
            type_name: type_name.into(),
            lifecycle: Lifecycle::Created,
            fields,
            class_state,
            driver,
        })
    }

    /// Unique record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record class.
    pub fn class(&self) -> RecordClass {
        self.class
    }

    /// Record superclass.
    pub fn superclass(&self) -> Superclass {
        self.class.superclass()
    }

    /// Driver type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Field values as last stored, without processing.
    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    /// Mutable field access for process hooks and drivers.
    pub fn fields_mut(&mut self) -> &mut FieldStore {
        &mut self.fields
    }

    /// Class-level state.
    pub fn class_state(&self) -> &ClassState {
        &self.class_state
    }

    /// Driver state, downcast to its concrete type.
    pub fn type_state<T: 'static>(&self) -> Option<&T> {
        <dyn RecordDriver as AsAny>::as_any(&*self.driver).downcast_ref::<T>()
    }

    /// Mutable driver state, downcast to its concrete type.
    pub fn type_state_mut<T: 'static>(&mut self) -> Option<&mut T> {
        <dyn RecordDriver as AsAny>::as_any_mut(&mut *self.driver).downcast_mut::<T>()
    }

    fn context(&mut self) -> (RecordContext<'_>, &mut Box<dyn RecordDriver>) {
        let Record {
            name,
            fields,
            class_state,
            driver,
            ..
        } = self;
        (
            RecordContext {
                name: name.as_str(),
                fields,
                class_state,
            },
            driver,
        )
    }

    /// Resolve references and network bindings. Performs no device I/O.
    #[instrument(skip_all, fields(record = %self.name))]
    pub fn initialize(&mut self, database: &Database) -> DeviceResult<()> {
        if self.lifecycle != Lifecycle::Created {
            return Err(self.invalid_state("initialize"));
        }
        let (mut ctx, driver) = self.context();
        driver.initialize(&mut ctx, database)?;
        self.lifecycle = Lifecycle::Initialized;
        debug!("initialized");
        Ok(())
    }

    /// Open the device. A failed open leaves the record `Closed`.
    #[instrument(skip_all, fields(record = %self.name))]
    pub fn open(&mut self) -> DeviceResult<()> {
        if !matches!(self.lifecycle, Lifecycle::Initialized | Lifecycle::Closed) {
            return Err(self.invalid_state("open"));
        }
        let (mut ctx, driver) = self.context();
        match driver.open(&mut ctx) {
            Ok(()) => {
                self.lifecycle = Lifecycle::Opened;
                info!(class = %self.class, driver = %self.type_name, "opened");
                Ok(())
            }
            Err(e) => {
                self.lifecycle = Lifecycle::Closed;
                warn!(error = %e, "open failed");
                Err(e)
            }
        }
    }

    /// Close the device. Closing a record that is not open is a no-op.
    #[instrument(skip_all, fields(record = %self.name))]
    pub fn close(&mut self) -> DeviceResult<()> {
        if self.lifecycle != Lifecycle::Opened {
            if self.lifecycle == Lifecycle::Initialized {
                self.lifecycle = Lifecycle::Closed;
            }
            return Ok(());
        }
        let (mut ctx, driver) = self.context();
        let result = driver.close(&mut ctx);
        self.lifecycle = Lifecycle::Closed;
        match &result {
            Ok(()) => debug!("closed"),
            Err(e) => warn!(error = %e, "close reported an error"),
        }
        result
    }

    fn invalid_state(&self, operation: &str) -> DeviceError {
        DeviceError::InvalidState {
            record: self.name.clone(),
            state: self.lifecycle,
            operation: operation.to_string(),
        }
    }

    fn require_opened(&self, operation: &str) -> DeviceResult<()> {
        if self.lifecycle == Lifecycle::Opened {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    // =========================================================================
    // Field access with processing
    // =========================================================================

    /// Read a field, first running its process hook if it has one.
    pub fn read_field(&mut self, name: &str) -> DeviceResult<FieldValue> {
        if self.fields.descriptor(name)?.flags.process {
            self.process(name, ProcessOp::Get)?;
        }
        Ok(self.fields.get(name)?.clone())
    }

    /// Read one element of a field, first running its process hook.
    pub fn read_element(&mut self, name: &str, index: usize) -> DeviceResult<FieldValue> {
        if self.fields.descriptor(name)?.flags.process {
            self.process(name, ProcessOp::Get)?;
        }
        Ok(self.fields.get_element(name, index)?)
    }

    /// Write a field, then run its process hook. If the hook fails the
    /// field and every array it dimensions are put back and the hook's error
    /// returned.
    pub fn write_field(&mut self, name: &str, value: FieldValue) -> DeviceResult<()> {
        let previous = self.snapshot_for_process(name)?;
        self.fields.set(name, value)?;
        self.after_write(name, previous)
    }

    /// Write one element of a field, then run its process hook.
    pub fn write_element(&mut self, name: &str, index: usize, value: FieldValue) -> DeviceResult<()> {
        let previous = self.snapshot_for_process(name)?;
        self.fields.set_element(name, index, value)?;
        self.after_write(name, previous)
    }

    fn snapshot_for_process(&self, name: &str) -> DeviceResult<Option<FieldSnapshot>> {
        if self.fields.descriptor(name)?.flags.process {
            Ok(Some(self.fields.snapshot(name)?))
        } else {
            Ok(None)
        }
    }

    fn after_write(&mut self, name: &str, previous: Option<FieldSnapshot>) -> DeviceResult<()> {
        let Some(previous) = previous else {
            return Ok(());
        };
        if let Err(e) = self.process(name, ProcessOp::Put) {
            debug!(record = %self.name, field = name, error = %e, "write rolled back");
            self.fields.restore(previous);
            return Err(e);
        }
        Ok(())
    }

    fn process(&mut self, field: &str, op: ProcessOp) -> DeviceResult<()> {
        self.require_opened(field)?;
        if self.driver.process_field(&mut self.fields, field, op)? {
            return Ok(());
        }
        classes::process_class_field(self, field, op)?;
        Ok(())
    }

    /// One-line summary of the in-summary fields as last stored.
    pub fn summary(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .summary()
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!(
            "{} [{}/{}] {}",
            self.name,
            self.class,
            self.type_name,
            fields.join(" ")
        )
    }

    /// Description that reloads to an equivalent record.
    pub fn to_description(&self) -> RecordDescription {
        self.fields.to_description(&self.name, &self.type_name)
    }

    // =========================================================================
    // Class handles
    // =========================================================================

    class_accessor!(
        /// Motor view of this record.
        motor, Motor, as_motor, MotorHandle
    );
    class_accessor!(
        /// Scaler view of this record.
        scaler, Scaler, as_scaler, ScalerHandle
    );
    class_accessor!(
        /// Timer view of this record.
        timer, Timer, as_timer, TimerHandle
    );
    class_accessor!(
        /// Amplifier view of this record.
        amplifier, Amplifier, as_amplifier, AmplifierHandle
    );
    class_accessor!(
        /// Relay view of this record.
        relay, Relay, as_relay, RelayHandle
    );
    class_accessor!(
        /// Digital input view of this record.
        digital_input, DigitalInput, as_digital_input, DigitalInputHandle
    );
    class_accessor!(
        /// Digital output view of this record.
        digital_output, DigitalOutput, as_digital_output, DigitalOutputHandle
    );
    class_accessor!(
        /// Autoscale view of this record.
        autoscale, Autoscale, as_autoscale, AutoscaleHandle
    );
    class_accessor!(
        /// Single channel analyzer view of this record.
        sca, Sca, as_sca, ScaHandle
    );
    class_accessor!(
        /// Area detector view of this record.
        area_detector, AreaDetector, as_area_detector, AreaDetectorHandle
    );
}
