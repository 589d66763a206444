//! Composite drivers built from other records.
//!
//! A composite names its children in `RecordRef` fields, binds them at
//! initialize and drives them through their class handles. Each composite
//! documents how child failures combine into its own result.
//!
//! - **motor_positioner**: N motors moved together
//! - **polynomial_motor**: pseudo-motor through a polynomial
//! - **gain_tracking_scaler**: counts normalized by an amplifier gain
//! - **amplifier_autoscale**: range switching over a scaler and an amplifier
//! - **digital_fanin**: N digital inputs combined bitwise

pub mod amplifier_autoscale;
pub mod digital_fanin;
pub mod gain_tracking_scaler;
pub mod motor_positioner;
pub mod polynomial_motor;

pub use amplifier_autoscale::{AmplifierAutoscale, AmplifierAutoscaleFactory};
pub use digital_fanin::{DigitalFanin, DigitalFaninFactory, FaninOperation};
pub use gain_tracking_scaler::{GainTrackingScaler, GainTrackingScalerFactory};
pub use motor_positioner::{MotorPositioner, MotorPositionerFactory};
pub use polynomial_motor::{PolynomialMotor, PolynomialMotorFactory};

use tracing::warn;

use daq_records::{
    ArrayValue, Database, DeviceError, DeviceResult, FieldError, FieldStore, FieldValue, Record,
    RecordRef,
};

/// A child record named in a `RecordRef` field, bound at initialize.
#[derive(Debug, Clone)]
pub(crate) struct Child {
    name: String,
    record: Option<RecordRef>,
}

impl Child {
    /// Child named by the scalar `RecordRef` field `field`.
    pub(crate) fn from_field(fields: &FieldStore, field: &str) -> Result<Self, FieldError> {
        Ok(Self {
            name: fields.get_record_ref(field)?,
            record: None,
        })
    }

    /// Children named by the `RecordRef` array field `field`, in order.
    pub(crate) fn list_from_field(fields: &FieldStore, field: &str) -> Result<Vec<Self>, FieldError> {
        match fields.get(field)? {
            FieldValue::Array(ArrayValue::RecordRef(names)) => Ok(names
                .iter()
                .map(|name| Self {
                    name: name.clone(),
                    record: None,
                })
                .collect()),
            other => Err(FieldError::TypeMismatch {
                field: field.to_string(),
                expected: fields.descriptor(field)?.data_type,
                actual: other.data_type().to_string(),
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the child through `database`.
    pub(crate) fn bind(&mut self, database: &Database) -> DeviceResult<()> {
        self.record = Some(database.resolve(&self.name)?);
        Ok(())
    }

    /// Lock the child and run `f` on it.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Record) -> DeviceResult<R>) -> DeviceResult<R> {
        match &self.record {
            Some(record) => record.with(f),
            None => Err(DeviceError::RecordUnavailable {
                record: self.name.clone(),
            }),
        }
    }
}

/// Bind every child in `children`.
pub(crate) fn bind_all(children: &mut [Child], database: &Database) -> DeviceResult<()> {
    children.iter_mut().try_for_each(|child| child.bind(database))
}

/// Run `op` on each child in order, stopping at the first failure.
pub(crate) fn each_until_error(
    children: &[Child],
    mut op: impl FnMut(&mut Record) -> DeviceResult<()>,
) -> DeviceResult<()> {
    children.iter().try_for_each(|child| child.with(&mut op))
}

/// Run `op` on every child and return the first failure, if any.
pub(crate) fn each_first_error(
    children: &[Child],
    mut op: impl FnMut(&mut Record) -> DeviceResult<()>,
) -> DeviceResult<()> {
    let mut first = None;
    for child in children {
        if let Err(error) = child.with(&mut op) {
            warn!(child = child.name(), %error, "child operation failed");
            first.get_or_insert(error);
        }
    }
    first.map_or(Ok(()), Err)
}
