//! Test helpers: databases of soft records.

use daq_records::{Database, DriverRegistry, RecordDescription, RecordRef};

/// Registry with every soft driver type.
pub fn registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    crate::register_all(&mut registry).unwrap();
    registry
}

/// Build, initialize and open `descriptions`.
pub fn open_database(descriptions: &[RecordDescription]) -> Database {
    let database = Database::build(&registry(), descriptions).unwrap();
    database.initialize_all().unwrap();
    let failures = database.open_all();
    assert!(failures.is_empty(), "open failed: {failures:?}");
    database
}

/// Open a database holding just `description` and return its record.
pub fn open_single(description: RecordDescription) -> (Database, RecordRef) {
    let name = description.name.clone();
    let database = open_database(&[description]);
    let record = database.resolve(&name).unwrap();
    (database, record)
}
