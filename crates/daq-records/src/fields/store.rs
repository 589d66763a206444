//! Per-record field storage with reflective, type-checked access.

use std::sync::Arc;

use crate::config::RecordDescription;
use crate::error::FieldError;
use crate::fields::descriptor::FieldDescriptor;
use crate::fields::table::{fit_array, FieldTable};
use crate::value::{DataType, FieldType, FieldValue, ScalarType};

/// Saved values of one field and its dependent arrays.
#[derive(Debug, Clone)]
pub struct FieldSnapshot {
    values: Vec<(usize, FieldValue)>,
}

/// Resolved field values of one record, laid out by its [`FieldTable`].
///
/// Invariant: every array field's length equals the product of its resolved
/// dimensions. Writing a dimension source re-dimensions its dependents.
#[derive(Debug, Clone)]
pub struct FieldStore {
    table: Arc<FieldTable>,
    values: Vec<FieldValue>,
}

impl FieldStore {
    pub(crate) fn from_parts(table: Arc<FieldTable>, values: Vec<FieldValue>) -> Self {
        Self { table, values }
    }

    /// Table this store is laid out by.
    pub fn table(&self) -> &Arc<FieldTable> {
        &self.table
    }

    /// True when the table has a field of this name.
    pub fn contains(&self, name: &str) -> bool {
        self.table.position(name).is_some()
    }

    /// Descriptor of a field.
    pub fn descriptor(&self, name: &str) -> Result<&FieldDescriptor, FieldError> {
        self.table.get(name).ok_or_else(|| no_such_field(name))
    }

    fn position(&self, name: &str) -> Result<usize, FieldError> {
        self.table.position(name).ok_or_else(|| no_such_field(name))
    }

    /// Current value of a field.
    pub fn get(&self, name: &str) -> Result<&FieldValue, FieldError> {
        let position = self.position(name)?;
        self.values.get(position).ok_or_else(|| no_such_field(name))
    }

    /// Element count of a field: 1 for scalars, the array length otherwise.
    pub fn element_count(&self, name: &str) -> Result<usize, FieldError> {
        Ok(match self.get(name)? {
            FieldValue::Array(array) => array.len(),
            _ => 1,
        })
    }

    /// One element of an array field. Scalars behave as one-element arrays.
    pub fn get_element(&self, name: &str, index: usize) -> Result<FieldValue, FieldError> {
        let value = self.get(name)?;
        let element = match value {
            FieldValue::Array(array) => array.element(index),
            scalar if index == 0 => Some(scalar.clone()),
            _ => None,
        };
        element.ok_or_else(|| FieldError::IndexOutOfRange {
            field: name.to_string(),
            index,
            len: match value {
                FieldValue::Array(array) => array.len(),
                _ => 1,
            },
        })
    }

    /// Write a field, rejecting read-only fields.
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        self.check_writable(name)?;
        self.set_internal(name, value)
    }

    /// Write a field, bypassing the read-only flag. For drivers and class code.
    pub fn set_internal(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        let table = Arc::clone(&self.table);
        let position = self.position(name)?;
        let descriptor = &table.descriptors()[position];

        if value.data_type() != descriptor.data_type {
            return Err(FieldError::TypeMismatch {
                field: name.to_string(),
                expected: descriptor.data_type,
                actual: value.data_type().to_string(),
            });
        }

        if let FieldValue::Array(array) = &value {
            let expected = table.resolved_len(descriptor, &self.values)?;
            if array.len() != expected {
                return Err(FieldError::DimensionMismatch {
                    field: name.to_string(),
                    expected,
                    actual: array.len(),
                });
            }
        }

        let dependents = table.dependents(position);
        if !dependents.is_empty() && value.as_i64().map_or(true, |n| n < 0) {
            return Err(FieldError::InvalidValue {
                field: name.to_string(),
                reason: format!("{value} is not a valid array length"),
            });
        }

        let previous = std::mem::replace(&mut self.values[position], value);

        let mut lens = Vec::with_capacity(dependents.len());
        for &dependent in dependents {
            match table.resolved_len(&table.descriptors()[dependent], &self.values) {
                Ok(len) => lens.push(len),
                Err(e) => {
                    self.values[position] = previous;
                    return Err(e);
                }
            }
        }
        for (&dependent, len) in dependents.iter().zip(lens) {
            if let FieldValue::Array(array) = &mut self.values[dependent] {
                fit_array(array, &table.descriptors()[dependent], len);
            }
        }
        Ok(())
    }

    /// Save a field together with the arrays it dimensions.
    pub fn snapshot(&self, name: &str) -> Result<FieldSnapshot, FieldError> {
        let position = self.position(name)?;
        let values = std::iter::once(position)
            .chain(self.table.dependents(position).iter().copied())
            .filter_map(|p| self.values.get(p).map(|value| (p, value.clone())))
            .collect();
        Ok(FieldSnapshot { values })
    }

    /// Put back everything a [`snapshot`](Self::snapshot) saved.
    pub fn restore(&mut self, snapshot: FieldSnapshot) {
        for (position, value) in snapshot.values {
            if let Some(slot) = self.values.get_mut(position) {
                *slot = value;
            }
        }
    }

    /// Write one element of an array field, rejecting read-only fields.
    pub fn set_element(
        &mut self,
        name: &str,
        index: usize,
        value: FieldValue,
    ) -> Result<(), FieldError> {
        self.check_writable(name)?;
        self.set_element_internal(name, index, value)
    }

    /// Write one element, bypassing the read-only flag.
    pub fn set_element_internal(
        &mut self,
        name: &str,
        index: usize,
        value: FieldValue,
    ) -> Result<(), FieldError> {
        let position = self.position(name)?;
        let data_type = self.table.descriptors()[position].data_type;
        let expected = DataType::Scalar(data_type.element());
        if value.data_type() != expected {
            return Err(FieldError::TypeMismatch {
                field: name.to_string(),
                expected,
                actual: value.data_type().to_string(),
            });
        }

        if let FieldValue::Array(array) = &mut self.values[position] {
            let len = array.len();
            if array.set_element(index, value) {
                return Ok(());
            }
            return Err(FieldError::IndexOutOfRange {
                field: name.to_string(),
                index,
                len,
            });
        }

        if index == 0 {
            self.set_internal(name, value)
        } else {
            Err(FieldError::IndexOutOfRange {
                field: name.to_string(),
                index,
                len: 1,
            })
        }
    }

    /// Typed read of a scalar field.
    pub fn get_as<T: FieldType>(&self, name: &str) -> Result<T, FieldError> {
        let value = self.get(name)?;
        T::from_value(value).ok_or_else(|| FieldError::TypeMismatch {
            field: name.to_string(),
            expected: value.data_type(),
            actual: T::SCALAR.to_string(),
        })
    }

    /// Typed write of a scalar field, rejecting read-only fields.
    pub fn set_as<T: FieldType>(&mut self, name: &str, value: T) -> Result<(), FieldError> {
        self.set(name, value.into_value())
    }

    /// Typed write of a scalar field, bypassing the read-only flag.
    pub fn set_internal_as<T: FieldType>(&mut self, name: &str, value: T) -> Result<(), FieldError> {
        self.set_internal(name, value.into_value())
    }

    /// Typed read of a whole array field.
    pub fn get_array<T: FieldType>(&self, name: &str) -> Result<Vec<T>, FieldError> {
        let value = self.get(name)?;
        let items = match value {
            FieldValue::Array(array) => T::from_array(array),
            _ => None,
        };
        items.ok_or_else(|| FieldError::TypeMismatch {
            field: name.to_string(),
            expected: value.data_type(),
            actual: DataType::Array(T::SCALAR).to_string(),
        })
    }

    /// Typed write of a whole array field, rejecting read-only fields.
    pub fn set_array<T: FieldType>(&mut self, name: &str, items: Vec<T>) -> Result<(), FieldError> {
        self.set(name, FieldValue::Array(T::into_array(items)))
    }

    /// Typed write of a whole array field, bypassing the read-only flag.
    pub fn set_array_internal<T: FieldType>(
        &mut self,
        name: &str,
        items: Vec<T>,
    ) -> Result<(), FieldError> {
        self.set_internal(name, FieldValue::Array(T::into_array(items)))
    }

    /// Record name held by a `RecordRef` scalar field.
    pub fn get_record_ref(&self, name: &str) -> Result<String, FieldError> {
        let value = self.get(name)?;
        value
            .as_record_name()
            .map(str::to_string)
            .ok_or_else(|| FieldError::TypeMismatch {
                field: name.to_string(),
                expected: value.data_type(),
                actual: ScalarType::RecordRef.to_string(),
            })
    }

    /// Names of all records referenced by `RecordRef` fields, scalar or array.
    /// Empty names are unset references and skipped.
    pub fn record_references(&self) -> Vec<String> {
        let mut names = Vec::new();
        for value in &self.values {
            match value {
                FieldValue::RecordRef(name) if !name.is_empty() => names.push(name.clone()),
                FieldValue::Array(array) if array.element_type() == ScalarType::RecordRef => {
                    names.extend(
                        array
                            .elements()
                            .into_iter()
                            .filter_map(|element| match element {
                                FieldValue::RecordRef(name) if !name.is_empty() => Some(name),
                                _ => None,
                            }),
                    );
                }
                _ => {}
            }
        }
        names
    }

    /// Descriptors paired with their current values, in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldDescriptor, &FieldValue)> {
        self.table.descriptors().iter().zip(self.values.iter())
    }

    /// Fields flagged for summaries.
    pub fn summary(&self) -> Vec<(&str, &FieldValue)> {
        self.iter()
            .filter(|(descriptor, _)| descriptor.flags.in_summary)
            .map(|(descriptor, value)| (descriptor.name.as_str(), value))
            .collect()
    }

    /// Description of a record holding these fields; reloading it through the
    /// same driver type reproduces the described fields.
    pub fn to_description(&self, name: &str, driver: &str) -> RecordDescription {
        let fields = self
            .iter()
            .filter(|(descriptor, _)| descriptor.flags.in_description)
            .map(|(descriptor, value)| (descriptor.name.clone(), value.to_toml()))
            .collect();
        RecordDescription {
            name: name.to_string(),
            driver: driver.to_string(),
            fields,
        }
    }

    fn check_writable(&self, name: &str) -> Result<(), FieldError> {
        if self.descriptor(name)?.flags.read_only {
            return Err(FieldError::ReadOnlyField {
                field: name.to_string(),
            });
        }
        Ok(())
    }
}

fn no_such_field(name: &str) -> FieldError {
    FieldError::NoSuchField {
        field: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::descriptor::Dimension;
    use proptest::prelude::*;

    fn store() -> FieldStore {
        let table = Arc::new(
            FieldTable::new(vec![
                FieldDescriptor::scalar("position", ScalarType::Double).in_summary(),
                FieldDescriptor::scalar("status", ScalarType::UInt32).read_only(),
                FieldDescriptor::scalar("count", ScalarType::Int32)
                    .with_default(FieldValue::Int32(2))
                    .in_description(),
                FieldDescriptor::array("values", ScalarType::Int64, Dimension::depends_on("count"))
                    .in_description(),
                FieldDescriptor::scalar("label", ScalarType::String),
                FieldDescriptor::scalar("peer", ScalarType::RecordRef),
            ])
            .unwrap(),
        );
        table.resolve(&toml::Table::new()).unwrap()
    }

    #[test]
    fn test_typed_access_checks_type() {
        let mut store = store();
        store.set_as("position", 1.5f64).unwrap();
        assert_eq!(store.get_as::<f64>("position").unwrap(), 1.5);
        assert!(matches!(
            store.get_as::<i32>("position"),
            Err(FieldError::TypeMismatch { .. })
        ));
        assert!(matches!(
            store.set_as("position", 3i32),
            Err(FieldError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_read_only_and_unknown_fields() {
        let mut store = store();
        assert_eq!(
            store.set_as("status", 1u32),
            Err(FieldError::ReadOnlyField {
                field: "status".into()
            })
        );
        store.set_internal_as("status", 1u32).unwrap();
        assert_eq!(store.get_as::<u32>("status").unwrap(), 1);
        assert!(matches!(
            store.get("nope"),
            Err(FieldError::NoSuchField { .. })
        ));
    }

    #[test]
    fn test_setting_dimension_source_redimensions_dependents() {
        let mut store = store();
        store.set_element("values", 1, FieldValue::Int64(9)).unwrap();

        store.set_as("count", 4i32).unwrap();
        assert_eq!(store.get_array::<i64>("values").unwrap(), vec![0, 9, 0, 0]);

        store.set_as("count", 1i32).unwrap();
        assert_eq!(store.get_array::<i64>("values").unwrap(), vec![0]);

        assert!(matches!(
            store.set_as("count", -3i32),
            Err(FieldError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_oversized_dimension_leaves_store_unchanged() {
        let mut store = store();
        store.set_array("values", vec![3i64, 4]).unwrap();
        assert!(matches!(
            store.set_as("count", i32::MAX),
            Err(FieldError::InvalidValue { .. })
        ));
        assert_eq!(store.get_as::<i32>("count").unwrap(), 2);
        assert_eq!(store.get_array::<i64>("values").unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_restore_puts_back_dependents() {
        let mut store = store();
        store.set_array("values", vec![7i64, 8]).unwrap();
        let saved = store.snapshot("count").unwrap();
        store.set_as("count", 1i32).unwrap();
        assert_eq!(store.get_array::<i64>("values").unwrap(), vec![7]);

        store.restore(saved);
        assert_eq!(store.get_as::<i32>("count").unwrap(), 2);
        assert_eq!(store.get_array::<i64>("values").unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_element_access_bounds() {
        let mut store = store();
        assert_eq!(
            store.get_element("values", 2),
            Err(FieldError::IndexOutOfRange {
                field: "values".into(),
                index: 2,
                len: 2,
            })
        );
        assert!(store.set_element("values", 5, FieldValue::Int64(1)).is_err());
        assert_eq!(store.get_element("position", 0).unwrap(), FieldValue::Double(0.0));
        assert!(store.get_element("position", 1).is_err());
    }

    #[test]
    fn test_whole_array_write_must_match_length() {
        let mut store = store();
        assert!(matches!(
            store.set_array("values", vec![1i64, 2, 3]),
            Err(FieldError::DimensionMismatch { .. })
        ));
        store.set_array("values", vec![5i64, 6]).unwrap();
        assert_eq!(store.get_array::<i64>("values").unwrap(), vec![5, 6]);
    }

    #[test]
    fn test_summary_and_description() {
        let mut store = store();
        store.set_as("position", 2.0f64).unwrap();
        let summary = store.summary();
        assert_eq!(summary, vec![("position", &FieldValue::Double(2.0))]);

        let description = store.to_description("m1", "soft_motor");
        assert_eq!(description.fields.len(), 2);
        let reloaded = store.table().resolve(&description.fields).unwrap();
        assert_eq!(reloaded.get("values").unwrap(), store.get("values").unwrap());
    }

    #[test]
    fn test_record_references_skip_empty() {
        let mut store = store();
        assert!(store.record_references().is_empty());
        store
            .set("peer", FieldValue::RecordRef("server1".into()))
            .unwrap();
        assert_eq!(store.record_references(), vec!["server1".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_scalar_set_get_round_trip(position in -1.0e12f64..1.0e12, count in 0i32..64, label in "[ -~]{0,24}") {
            let mut store = store();
            store.set_as("position", position).unwrap();
            store.set_as("count", count).unwrap();
            store.set_as("label", label.clone()).unwrap();
            prop_assert_eq!(store.get_as::<f64>("position").unwrap(), position);
            prop_assert_eq!(store.get_as::<i32>("count").unwrap(), count);
            prop_assert_eq!(store.get_as::<String>("label").unwrap(), label);
            prop_assert_eq!(store.element_count("values").unwrap(), count as usize);
        }
    }
}
