//! The record database.
//!
//! Records live behind their own `parking_lot::Mutex`; the name map sits
//! behind one `RwLock`. Lookups clone the record's `Arc` and release the map
//! lock before any record is locked, so the map lock is never held across
//! device I/O.
//!
//! Records are initialized and opened in dependency order: a record named by
//! another record's `RecordRef` field comes first. Closing runs in reverse.
//! Reference cycles are rejected when the database is built.

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{info, instrument, warn};

use crate::config::RecordDescription;
use crate::driver::DriverRegistry;
use crate::error::{ConfigError, DeviceError, DeviceResult};
use crate::record::Record;

/// Shared handle to one record.
pub type SharedRecord = Arc<Mutex<Record>>;

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    records: HashMap<String, SharedRecord>,
}

/// Owns every record, keyed by name.
#[derive(Default)]
pub struct Database {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("records", &self.inner.read().order)
            .finish()
    }
}

impl Database {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create every described record and order them by their references.
    ///
    /// Fails on duplicate names, unknown driver types, field errors,
    /// references to records not in `descriptions`, and reference cycles.
    #[instrument(skip_all, fields(records = descriptions.len()))]
    pub fn build(
        registry: &DriverRegistry,
        descriptions: &[RecordDescription],
    ) -> Result<Self, ConfigError> {
        let mut names = HashSet::with_capacity(descriptions.len());
        for description in descriptions {
            if !names.insert(description.name.as_str()) {
                return Err(ConfigError::DuplicateRecord {
                    record: description.name.clone(),
                });
            }
        }

        let mut records = HashMap::with_capacity(descriptions.len());
        let mut pending = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let record = registry.create_record(description)?;
            let references = record.fields().record_references();
            if let Some(missing) = references.iter().find(|name| !names.contains(name.as_str())) {
                return Err(ConfigError::UnknownRecord {
                    record: description.name.clone(),
                    reference: missing.clone(),
                });
            }
            pending.push((description.name.clone(), references));
            records.insert(description.name.clone(), Arc::new(Mutex::new(record)));
        }

        let order = dependency_order(pending)?;
        info!(records = order.len(), "database built");
        Ok(Self {
            inner: RwLock::new(Inner { order, records }),
        })
    }

    /// Add a record at runtime. Its references must already exist.
    pub fn insert(&self, record: Record) -> Result<SharedRecord, ConfigError> {
        let name = record.name().to_string();
        let references = record.fields().record_references();
        let mut inner = self.inner.write();
        if inner.records.contains_key(&name) {
            return Err(ConfigError::DuplicateRecord { record: name });
        }
        if let Some(missing) = references
            .iter()
            .find(|reference| !inner.records.contains_key(*reference))
        {
            return Err(ConfigError::UnknownRecord {
                record: name,
                reference: missing.clone(),
            });
        }
        let shared = Arc::new(Mutex::new(record));
        inner.order.push(name.clone());
        inner.records.insert(name, Arc::clone(&shared));
        Ok(shared)
    }

    /// Remove a record. References to it become unavailable once the
    /// returned handle is dropped.
    pub fn remove(&self, name: &str) -> Option<SharedRecord> {
        let mut inner = self.inner.write();
        let removed = inner.records.remove(name)?;
        inner.order.retain(|entry| entry != name);
        info!(record = name, "record removed");
        Some(removed)
    }

    /// Record by name.
    pub fn get(&self, name: &str) -> Option<SharedRecord> {
        self.inner.read().records.get(name).cloned()
    }

    /// Weak reference to a record by name.
    pub fn resolve(&self, name: &str) -> DeviceResult<RecordRef> {
        let record = self.get(name).ok_or_else(|| DeviceError::RecordUnavailable {
            record: name.to_string(),
        })?;
        Ok(RecordRef {
            name: name.to_string(),
            record: Arc::downgrade(&record),
        })
    }

    /// Record names in dependency order.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// True when the database holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ordered(&self) -> Vec<(String, SharedRecord)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| {
                inner
                    .records
                    .get(name)
                    .map(|record| (name.clone(), Arc::clone(record)))
            })
            .collect()
    }

    /// Initialize every record in dependency order. Stops at the first
    /// failure.
    #[instrument(skip(self))]
    pub fn initialize_all(&self) -> Result<(), ConfigError> {
        for (name, record) in self.ordered() {
            record
                .lock()
                .initialize(self)
                .map_err(|source| ConfigError::Initialization {
                    record: name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Open every record in dependency order. A failed open leaves that
    /// record closed and does not stop the others; failures are returned.
    #[instrument(skip(self))]
    pub fn open_all(&self) -> Vec<(String, DeviceError)> {
        let mut failures = Vec::new();
        for (name, record) in self.ordered() {
            if let Err(e) = record.lock().open() {
                warn!(record = %name, error = %e, "record failed to open");
                failures.push((name, e));
            }
        }
        failures
    }

    /// Close every record in reverse dependency order; failures are returned.
    #[instrument(skip(self))]
    pub fn close_all(&self) -> Vec<(String, DeviceError)> {
        let mut failures = Vec::new();
        for (name, record) in self.ordered().into_iter().rev() {
            if let Err(e) = record.lock().close() {
                failures.push((name, e));
            }
        }
        failures
    }

    /// JSON snapshot of every record: class, driver, lifecycle and the
    /// stored field values.
    pub fn snapshot(&self) -> serde_json::Value {
        let records: Vec<serde_json::Value> = self
            .ordered()
            .into_iter()
            .map(|(name, record)| {
                let record = record.lock();
                let fields: serde_json::Map<String, serde_json::Value> = record
                    .fields()
                    .iter()
                    .map(|(descriptor, value)| {
                        (
                            descriptor.name.clone(),
                            serde_json::to_value(value.to_toml()).unwrap_or_default(),
                        )
                    })
                    .collect();
                json!({
                    "name": name,
                    "class": record.class(),
                    "driver": record.type_name(),
                    "lifecycle": record.lifecycle(),
                    "fields": fields,
                })
            })
            .collect();
        json!({ "records": records })
    }
}

/// Order `(name, references)` pairs so every record follows the records it
/// references. Records left over form or depend on a cycle.
fn dependency_order(mut pending: Vec<(String, Vec<String>)>) -> Result<Vec<String>, ConfigError> {
    let mut placed: HashSet<String> = HashSet::with_capacity(pending.len());
    let mut order = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|(name, references)| {
            if references.iter().all(|reference| placed.contains(reference)) {
                placed.insert(name.clone());
                order.push(name.clone());
                false
            } else {
                true
            }
        });
        if pending.len() == before {
            return Err(ConfigError::DependencyCycle {
                records: pending.into_iter().map(|(name, _)| name).collect(),
            });
        }
    }
    Ok(order)
}

// =============================================================================
// RecordRef
// =============================================================================

/// Reference to another record by name, resolved through the database.
///
/// Holds a weak handle: a removed record reports `RecordUnavailable` instead
/// of being kept alive.
#[derive(Debug, Clone)]
pub struct RecordRef {
    name: String,
    record: Weak<Mutex<Record>>,
}

impl RecordRef {
    /// Name of the referenced record.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the referenced record still exists.
    pub fn is_available(&self) -> bool {
        self.record.strong_count() > 0
    }

    /// Lock the referenced record and run `f` on it.
    pub fn with<R>(&self, f: impl FnOnce(&mut Record) -> DeviceResult<R>) -> DeviceResult<R> {
        let record = self
            .record
            .upgrade()
            .ok_or_else(|| DeviceError::RecordUnavailable {
                record: self.name.clone(),
            })?;
        let mut guard = record.lock();
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Lifecycle, RecordClass};
    use crate::testing::StubFactory;

    fn registry() -> DriverRegistry {
        let mut registry = DriverRegistry::new();
        registry.register(StubFactory::new(RecordClass::Motor)).unwrap();
        registry
    }

    fn motor(name: &str, peer: &str) -> RecordDescription {
        RecordDescription::new(name, "stub_motor").with_field("peer", peer)
    }

    #[test]
    fn test_build_orders_references_first() {
        let database = Database::build(
            &registry(),
            &[motor("c", "b"), motor("b", "a"), motor("a", "")],
        )
        .unwrap();
        assert_eq!(database.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_build_rejects_cycles_and_dangling_references() {
        let err = Database::build(
            &registry(),
            &[motor("a", "b"), motor("b", "a"), motor("c", "")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle { ref records } if records == &["a", "b"]));

        let err = Database::build(&registry(), &[motor("a", "ghost")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRecord { .. }));

        let err = Database::build(&registry(), &[motor("a", ""), motor("a", "")]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRecord { .. }));
    }

    #[test]
    fn test_lifecycle_in_order() {
        let database = Database::build(&registry(), &[motor("b", "a"), motor("a", "")]).unwrap();
        database.initialize_all().unwrap();
        assert!(database.open_all().is_empty());
        assert_eq!(
            database.get("b").unwrap().lock().lifecycle(),
            Lifecycle::Opened
        );
        assert!(database.close_all().is_empty());
        assert_eq!(
            database.get("a").unwrap().lock().lifecycle(),
            Lifecycle::Closed
        );
    }

    #[test]
    fn test_open_failures_are_collected() {
        let descriptions = [
            motor("a", "").with_field("fail_open", true),
            motor("b", ""),
        ];
        let database = Database::build(&registry(), &descriptions).unwrap();
        database.initialize_all().unwrap();
        let failures = database.open_all();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "a");
        assert_eq!(
            database.get("b").unwrap().lock().lifecycle(),
            Lifecycle::Opened
        );
    }

    #[test]
    fn test_removed_record_is_unavailable() {
        let database = Database::build(&registry(), &[motor("a", "")]).unwrap();
        let reference = database.resolve("a").unwrap();
        assert!(reference.is_available());
        drop(database.remove("a"));
        assert!(!reference.is_available());
        assert_eq!(
            reference.with(|record| Ok(record.name().to_string())),
            Err(DeviceError::RecordUnavailable { record: "a".into() })
        );
        assert!(matches!(
            database.resolve("a"),
            Err(DeviceError::RecordUnavailable { .. })
        ));
    }

    #[test]
    fn test_insert_checks_references() {
        let registry = registry();
        let database = Database::new();
        let orphan = registry.create_record(&motor("b", "a")).unwrap();
        assert!(matches!(
            database.insert(orphan),
            Err(ConfigError::UnknownRecord { .. })
        ));
        database
            .insert(registry.create_record(&motor("a", "")).unwrap())
            .unwrap();
        database
            .insert(registry.create_record(&motor("b", "a")).unwrap())
            .unwrap();
        assert_eq!(database.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_snapshot_lists_records() {
        let database = Database::build(&registry(), &[motor("a", "")]).unwrap();
        let snapshot = database.snapshot();
        assert_eq!(snapshot["records"][0]["name"], "a");
        assert_eq!(snapshot["records"][0]["class"], "Motor");
        assert_eq!(snapshot["records"][0]["lifecycle"], "Created");
        assert_eq!(snapshot["records"][0]["fields"]["scale"], 1.0);
    }
}
