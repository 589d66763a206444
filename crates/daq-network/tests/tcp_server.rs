//! Client records talking to the tokio record server over real sockets.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use daq_network::{serve_until, Dispatcher, NetworkField, ServerConnection, TcpServerFactory};
use daq_records::config::NetworkSettings;
use daq_records::{
    Database, DeviceError, DeviceResult, DriverError, DriverFactory, DriverRegistry,
    FieldDescriptor, FieldStore, FieldValue, ProcessOp, RecordClass, RecordDescription,
    RecordDriver, ScalarType,
};

struct Gauge;

impl RecordDriver for Gauge {
    fn process_field(
        &mut self,
        fields: &mut FieldStore,
        field: &str,
        op: ProcessOp,
    ) -> DeviceResult<bool> {
        match (field, op) {
            ("reading", ProcessOp::Get) => {
                let reads = fields.get_as::<i32>("reads")? + 1;
                fields.set_internal_as("reads", reads)?;
                fields.set_internal_as("reading", f64::from(reads) * 0.5)?;
                Ok(true)
            }
            ("tripped", ProcessOp::Put) if fields.get_as::<bool>("tripped")? => {
                Err(DeviceError::HardwareFault("gauge tripped".into()))
            }
            _ => Ok(false),
        }
    }
}

struct GaugeFactory;

impl DriverFactory for GaugeFactory {
    fn driver_type(&self) -> &'static str {
        "gauge"
    }

    fn class(&self) -> RecordClass {
        RecordClass::Variable
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("reading", ScalarType::Double).read_only().process(),
            FieldDescriptor::scalar("reads", ScalarType::Int32).read_only(),
            FieldDescriptor::scalar("setpoint", ScalarType::Double),
            FieldDescriptor::scalar("tripped", ScalarType::Bool).process(),
        ]
    }

    fn create(&self, _fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(Gauge))
    }
}

fn served() -> Arc<Database> {
    let mut registry = DriverRegistry::new();
    registry.register(GaugeFactory).unwrap();
    let database = Database::build(&registry, &[RecordDescription::new("gauge", "gauge")]).unwrap();
    database.initialize_all().unwrap();
    assert!(database.open_all().is_empty());
    Arc::new(database)
}

fn client(port: u16) -> Database {
    let mut registry = DriverRegistry::new();
    registry
        .register(TcpServerFactory::new(NetworkSettings::default()))
        .unwrap();
    let description = RecordDescription::new("srv", "tcp_server")
        .with_field("hostname", "127.0.0.1")
        .with_field("port", i64::from(port))
        .with_field("timeout_ms", 2000);
    let database = Database::build(&registry, &[description]).unwrap();
    database.initialize_all().unwrap();
    database
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_fields_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_until(
        listener,
        Arc::new(Dispatcher::new("gauges", served())),
        async {
            let _ = stopped.await;
        },
    ));

    tokio::task::spawn_blocking(move || {
        let database = client(port);
        assert!(database.open_all().is_empty());
        let srv = database.resolve("srv").unwrap();

        srv.with(|record| {
            assert_eq!(record.read_field("connected")?, FieldValue::Bool(true));
            assert_eq!(
                record.read_field("server_name")?,
                FieldValue::String("gauges".into())
            );
            Ok(())
        })
        .unwrap();

        let setpoint = NetworkField::new(srv.clone(), "gauge", "setpoint");
        setpoint.put(12.25).unwrap();
        assert_eq!(setpoint.get::<f64>().unwrap(), 12.25);

        // Every remote read runs the process hook.
        let reading = NetworkField::new(srv.clone(), "gauge", "reading");
        assert_eq!(reading.get::<f64>().unwrap(), 0.5);
        assert_eq!(reading.get::<f64>().unwrap(), 1.0);

        assert_eq!(
            NetworkField::new(srv.clone(), "gauge", "reads").get::<f64>(),
            Err(DeviceError::RemoteTypeMismatch {
                field: "gauge.reads".into(),
                expected: daq_records::DataType::Scalar(ScalarType::Double),
                actual: daq_records::DataType::Scalar(ScalarType::Int32),
            })
        );
        assert_eq!(
            NetworkField::new(srv.clone(), "gauge", "tripped").put(true),
            Err(DeviceError::HardwareFault("gauge tripped".into()))
        );

        srv.with(|record| {
            let connection = record.type_state_mut::<ServerConnection>().unwrap();
            assert!(connection.is_connected());
            Ok(())
        })
        .unwrap();
        assert!(database.close_all().is_empty());
    })
    .await
    .unwrap();

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_gone_is_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_until(
        listener,
        Arc::new(Dispatcher::new("gauges", served())),
        async {
            let _ = stopped.await;
        },
    ));
    stop.send(()).unwrap();
    server.await.unwrap().unwrap();

    tokio::task::spawn_blocking(move || {
        let database = client(port);
        let failures = database.open_all();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].1, DeviceError::ConnectionLost(_)));

        let setpoint = NetworkField::new(database.resolve("srv").unwrap(), "gauge", "setpoint");
        assert!(matches!(
            setpoint.get::<f64>(),
            Err(DeviceError::ConnectionLost(_))
        ));
    })
    .await
    .unwrap();
}
