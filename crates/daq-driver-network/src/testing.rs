//! Test fixture: soft records served over a loopback link to proxies.

use std::sync::Arc;

use daq_network::{Dispatcher, LoopbackControl, LoopbackServerFactory};
use daq_records::{Database, DriverRegistry, RecordDescription, RecordRef};

/// A served database of soft records and a client database of proxies
/// reaching it through the loopback server record `srv`.
pub struct Fixture {
    pub client: Database,
    pub served: Arc<Database>,
    pub control: Arc<LoopbackControl>,
}

impl Fixture {
    pub fn new(served: &[RecordDescription], proxies: &[RecordDescription]) -> Self {
        let mut soft = DriverRegistry::new();
        daq_driver_soft::register_all(&mut soft).unwrap();
        let served = Database::build(&soft, served).unwrap();
        served.initialize_all().unwrap();
        assert!(served.open_all().is_empty());
        let served = Arc::new(served);

        let control = LoopbackControl::new();
        let dispatcher = Arc::new(Dispatcher::new("soft", Arc::clone(&served)));
        let mut registry = DriverRegistry::new();
        registry
            .register(LoopbackServerFactory::new(dispatcher, Arc::clone(&control)))
            .unwrap();
        crate::register_all(&mut registry).unwrap();

        let mut descriptions =
            vec![RecordDescription::new("srv", "loopback_server").with_field("timeout_ms", 50)];
        descriptions.extend_from_slice(proxies);
        let client = Database::build(&registry, &descriptions).unwrap();
        client.initialize_all().unwrap();
        let failures = client.open_all();
        assert!(failures.is_empty(), "open failed: {failures:?}");

        Self {
            client,
            served,
            control,
        }
    }

    /// Proxy description pointing at `remote` through `srv`.
    pub fn proxy(name: &str, driver: &str, remote: &str) -> RecordDescription {
        RecordDescription::new(name, driver)
            .with_field("server_record", "srv")
            .with_field("remote_record_name", remote)
    }

    pub fn client(&self, name: &str) -> RecordRef {
        self.client.resolve(name).unwrap()
    }

    pub fn served(&self, name: &str) -> RecordRef {
        self.served.resolve(name).unwrap()
    }
}
