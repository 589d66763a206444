//! Fault injection for soft devices.
//!
//! Every soft driver type carries the same fault fields, so tests can make a
//! simulated device misbehave through ordinary field writes, locally or
//! through a network proxy:
//!
//! - `disconnected`: every operation fails with `HardwareFault`, as a device
//!   that stopped answering would,
//! - `fail_operation`: the named class operation fails with `HardwareFault`,
//! - `fail_after`: the named operation first succeeds this many times.

use std::collections::HashMap;
use tracing::debug;

use daq_records::{
    DeviceError, DeviceResult, DriverError, DriverErrorKind, FieldDescriptor, FieldStore,
    FieldValue, ProcessOp, ScalarType,
};

/// Fault fields shared by every soft driver type.
pub fn fault_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::scalar("disconnected", ScalarType::Bool).process(),
        FieldDescriptor::scalar("fail_operation", ScalarType::String).process(),
        FieldDescriptor::scalar("fail_after", ScalarType::Int32)
            .with_default(FieldValue::Int32(0))
            .process(),
    ]
}

/// Decides which operations of one soft device fail.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    driver_type: &'static str,
    disconnected: bool,
    fail_operation: String,
    fail_after: u32,
    counts: HashMap<&'static str, u32>,
}

impl FaultInjector {
    /// Injector with no faults.
    pub fn none(driver_type: &'static str) -> Self {
        Self {
            driver_type,
            disconnected: false,
            fail_operation: String::new(),
            fail_after: 0,
            counts: HashMap::new(),
        }
    }

    /// Injector configured from the record's fault fields.
    pub fn from_fields(driver_type: &'static str, fields: &FieldStore) -> Result<Self, DriverError> {
        let mut injector = Self::none(driver_type);
        injector.reload(fields).map_err(|e| {
            DriverError::new(driver_type, DriverErrorKind::Configuration, e.to_string())
        })?;
        Ok(injector)
    }

    fn reload(&mut self, fields: &FieldStore) -> DeviceResult<()> {
        self.disconnected = fields.get_as::<bool>("disconnected")?;
        self.fail_operation = fields.get_as::<String>("fail_operation")?;
        let fail_after = fields.get_as::<i32>("fail_after")?;
        self.fail_after = u32::try_from(fail_after)
            .map_err(|_| DeviceError::invalid_parameter("fail_after", "must not be negative"))?;
        self.counts.clear();
        Ok(())
    }

    /// Pick up a write to a fault field. Returns false for other fields.
    pub fn update(&mut self, fields: &FieldStore, field: &str) -> DeviceResult<bool> {
        if !matches!(field, "disconnected" | "fail_operation" | "fail_after") {
            return Ok(false);
        }
        self.reload(fields)?;
        debug!(
            driver = self.driver_type,
            disconnected = self.disconnected,
            fail_operation = %self.fail_operation,
            fail_after = self.fail_after,
            "fault injection changed"
        );
        Ok(true)
    }

    /// Process hook for the fault fields.
    pub fn process(&mut self, fields: &FieldStore, field: &str, op: ProcessOp) -> DeviceResult<bool> {
        match op {
            ProcessOp::Put => self.update(fields, field),
            ProcessOp::Get => Ok(false),
        }
    }

    /// True while the device plays dead.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Fail `operation` if a fault applies to it.
    pub fn check(&mut self, operation: &'static str) -> DeviceResult<()> {
        if self.disconnected {
            return Err(DeviceError::HardwareFault(format!(
                "{}: device disconnected",
                self.driver_type
            )));
        }
        if self.fail_operation == operation {
            let count = self.counts.entry(operation).or_insert(0);
            *count += 1;
            if *count > self.fail_after {
                return Err(DeviceError::HardwareFault(format!(
                    "{}: injected {operation} failure",
                    self.driver_type
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_records::FieldTable;
    use std::sync::Arc;

    fn store(description: &str) -> FieldStore {
        let table = Arc::new(FieldTable::new(fault_fields()).unwrap());
        table.resolve(&toml::from_str(description).unwrap()).unwrap()
    }

    #[test]
    fn test_no_faults_by_default() {
        let mut faults = FaultInjector::from_fields("soft_test", &store("")).unwrap();
        assert!(!faults.is_disconnected());
        for _ in 0..10 {
            faults.check("read").unwrap();
        }
    }

    #[test]
    fn test_disconnected_fails_everything() {
        let mut faults = FaultInjector::from_fields("soft_test", &store("disconnected = true")).unwrap();
        assert_eq!(
            faults.check("read"),
            Err(DeviceError::HardwareFault("soft_test: device disconnected".into()))
        );
    }

    #[test]
    fn test_fail_after_counts_successes() {
        let fields = store("fail_operation = \"soft_abort\"\nfail_after = 2");
        let mut faults = FaultInjector::from_fields("soft_test", &fields).unwrap();
        faults.check("soft_abort").unwrap();
        faults.check("soft_abort").unwrap();
        assert!(faults.check("soft_abort").is_err());
        faults.check("move_absolute").unwrap();
    }

    #[test]
    fn test_update_reloads_and_resets_counts() {
        let mut fields = store("fail_operation = \"read\"");
        let mut faults = FaultInjector::from_fields("soft_test", &fields).unwrap();
        assert!(faults.check("read").is_err());

        fields.set_as("fail_operation", String::new()).unwrap();
        assert!(faults.update(&fields, "fail_operation").unwrap());
        faults.check("read").unwrap();
        assert!(!faults.update(&fields, "value").unwrap());
    }
}
