//! Driver contract and driver factory registry.
//!
//! Every record type is backed by a [`DriverFactory`]: it names the driver
//! type and its class, contributes the type's own fields (appended after the
//! class fields) and constructs the driver from the resolved fields. The
//! driver itself implements [`RecordDriver`] for lifecycle and processing
//! plus the class trait it serves, exposed through the matching `as_*`
//! method.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = DriverRegistry::new();
//! registry.register(SoftMotorFactory)?;
//! let database = Database::build(&registry, &settings.records)?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::classes::{
    class_fields, AmplifierDriver, AreaDetectorDriver, AutoscaleDriver, ClassState,
    DigitalInputDriver, DigitalOutputDriver, MotorDriver, ProcessOp, RelayDriver, ScaDriver,
    ScalerDriver, TimerDriver,
};
use crate::config::RecordDescription;
use crate::database::{Database, RecordRef};
use crate::error::{ConfigError, DeviceResult, DriverError, FieldError};
use crate::fields::{FieldDescriptor, FieldRegistry, FieldStore, FieldTable};
use crate::record::{Record, RecordClass};
use crate::value::{ArrayValue, FieldValue};

/// Downcasting support for type-erased drivers.
pub trait AsAny: Any + Send {
    /// Shared `Any` view.
    fn as_any(&self) -> &dyn Any;
    /// Mutable `Any` view.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// =============================================================================
// Record driver
// =============================================================================

/// Mutable view of a record handed to its driver during lifecycle calls.
pub struct RecordContext<'a> {
    /// Record name.
    pub name: &'a str,
    /// Record fields.
    pub fields: &'a mut FieldStore,
    /// Class-level state.
    pub class_state: &'a mut ClassState,
}

impl RecordContext<'_> {
    /// Resolve the record named by a `RecordRef` field.
    pub fn record_ref(&self, database: &Database, field: &str) -> DeviceResult<RecordRef> {
        let target = self.fields.get_record_ref(field)?;
        database.resolve(&target)
    }

    /// Resolve every record named by a `RecordRef` array field, in order.
    pub fn record_ref_array(&self, database: &Database, field: &str) -> DeviceResult<Vec<RecordRef>> {
        match self.fields.get(field)? {
            FieldValue::Array(ArrayValue::RecordRef(names)) => names
                .iter()
                .map(|name| database.resolve(name))
                .collect(),
            other => Err(FieldError::TypeMismatch {
                field: field.to_string(),
                expected: self.fields.descriptor(field)?.data_type,
                actual: other.data_type().to_string(),
            }
            .into()),
        }
    }
}

/// Lifecycle and processing operations every driver provides, plus access to
/// the class trait it implements.
///
/// All methods have defaults; a driver overrides the `as_*` method of its
/// class and whatever lifecycle steps it needs.
pub trait RecordDriver: AsAny {
    /// Resolve references to other records. No device I/O.
    fn initialize(&mut self, _ctx: &mut RecordContext<'_>, _database: &Database) -> DeviceResult<()> {
        Ok(())
    }

    /// Open the device.
    fn open(&mut self, _ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        Ok(())
    }

    /// Close the device.
    fn close(&mut self, _ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        Ok(())
    }

    /// Handle a process field of the driver's own type. Returns false to let
    /// the class hook handle it.
    fn process_field(
        &mut self,
        _fields: &mut FieldStore,
        _field: &str,
        _op: ProcessOp,
    ) -> DeviceResult<bool> {
        Ok(false)
    }

    /// Motor contract.
    fn as_motor(&mut self) -> Option<&mut dyn MotorDriver> {
        None
    }

    /// Scaler contract.
    fn as_scaler(&mut self) -> Option<&mut dyn ScalerDriver> {
        None
    }

    /// Timer contract.
    fn as_timer(&mut self) -> Option<&mut dyn TimerDriver> {
        None
    }

    /// Amplifier contract.
    fn as_amplifier(&mut self) -> Option<&mut dyn AmplifierDriver> {
        None
    }

    /// Relay contract.
    fn as_relay(&mut self) -> Option<&mut dyn RelayDriver> {
        None
    }

    /// Digital input contract.
    fn as_digital_input(&mut self) -> Option<&mut dyn DigitalInputDriver> {
        None
    }

    /// Digital output contract.
    fn as_digital_output(&mut self) -> Option<&mut dyn DigitalOutputDriver> {
        None
    }

    /// Autoscale contract.
    fn as_autoscale(&mut self) -> Option<&mut dyn AutoscaleDriver> {
        None
    }

    /// Single channel analyzer contract.
    fn as_sca(&mut self) -> Option<&mut dyn ScaDriver> {
        None
    }

    /// Area detector contract.
    fn as_area_detector(&mut self) -> Option<&mut dyn AreaDetectorDriver> {
        None
    }
}

// =============================================================================
// Factories
// =============================================================================

/// Constructs drivers of one type.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in record descriptions.
    fn driver_type(&self) -> &'static str;

    /// Class the driver serves.
    fn class(&self) -> RecordClass;

    /// Short human-readable description.
    fn description(&self) -> &'static str {
        ""
    }

    /// Fields of the driver type, appended after the class fields.
    fn fields(&self) -> Vec<FieldDescriptor> {
        Vec::new()
    }

    /// Construct a driver from the record's resolved fields.
    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError>;
}

/// Driver types known to a database builder, with their field tables.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
    fields: FieldRegistry,
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Its table is the class fields followed by the
    /// type fields, validated here.
    pub fn register(&mut self, factory: impl DriverFactory) -> Result<(), ConfigError> {
        self.register_arc(Arc::new(factory))
    }

    /// Register a shared factory.
    pub fn register_arc(&mut self, factory: Arc<dyn DriverFactory>) -> Result<(), ConfigError> {
        let driver = factory.driver_type().to_string();
        let mut descriptors = class_fields(factory.class());
        descriptors.extend(factory.fields());
        let table = FieldTable::new(descriptors).map_err(|source| ConfigError::FieldTable {
            driver: driver.clone(),
            source,
        })?;
        debug!(driver = %driver, class = %factory.class(), fields = table.len(), "registered driver type");
        if self.fields.register(driver.clone(), table).is_some() {
            warn!(driver = %driver, "driver type registered twice, keeping the latest");
        }
        self.factories.insert(driver, factory);
        Ok(())
    }

    /// True when `driver_type` is registered.
    pub fn contains(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// Registered driver type names, sorted.
    pub fn driver_types(&self) -> Vec<&str> {
        self.fields.type_names()
    }

    /// Field table of a driver type.
    pub fn table(&self, driver_type: &str) -> Option<Arc<FieldTable>> {
        self.fields.table(driver_type)
    }

    /// Class served by a driver type.
    pub fn class_of(&self, driver_type: &str) -> Option<RecordClass> {
        self.factories.get(driver_type).map(|factory| factory.class())
    }

    /// Resolve a description's fields and construct its record.
    pub fn create_record(&self, description: &RecordDescription) -> Result<Record, ConfigError> {
        let unknown = || ConfigError::UnknownDriver {
            record: description.name.clone(),
            driver: description.driver.clone(),
        };
        let factory = self.factories.get(&description.driver).ok_or_else(unknown)?;
        let table = self.fields.table(&description.driver).ok_or_else(unknown)?;
        let field_error = |source| ConfigError::Field {
            record: description.name.clone(),
            source,
        };
        let fields = table.resolve(&description.fields).map_err(field_error)?;
        let driver = factory
            .create(&fields)
            .map_err(|source| ConfigError::Driver {
                record: description.name.clone(),
                source,
            })?;
        Record::new(
            description.name.clone(),
            factory.class(),
            description.driver.clone(),
            fields,
            driver,
        )
        .map_err(field_error)
    }
}
