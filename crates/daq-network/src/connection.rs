//! Server connection records.
//!
//! A record of class `NetworkServer` owns one connection to a remote record
//! server. Its driver, [`ServerConnection`], holds the byte transport, the
//! request id counter, the default timeout and the poll interval, and turns
//! one request into one reply:
//!
//! 1. encode the request with a fresh id and write it,
//! 2. poll `bytes_available`/`read`, sleeping `poll_interval` in between,
//! 3. return the first reply carrying the request's id; replies with other
//!    ids are late answers to timed-out requests and are dropped.
//!
//! A missed deadline is [`NetError::TimedOut`] and leaves the connection up.
//! A transport failure is [`NetError::ConnectionLost`] and drops it; calls
//! keep failing with `ConnectionLost` until [`ServerConnection::reconnect`].
//!
//! # Driver types
//!
//! - `tcp_server`: `hostname`, `port`, `timeout_ms`, `poll_interval_ms`.
//! - `loopback_server`: an in-process dispatcher, registered from code with
//!   [`LoopbackServerFactory`].

use bytes::BytesMut;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use daq_records::config::NetworkSettings;
use daq_records::{
    DataType, DeviceError, DeviceResult, DriverError, DriverErrorKind, DriverFactory, FieldDescriptor,
    FieldStore, FieldValue, ProcessOp, RecordClass, RecordContext, RecordDriver, ScalarType,
};

use crate::codec::{decode_frame, encode_frame, FieldAddress, Message};
use crate::dispatcher::Dispatcher;
use crate::error::{NetError, NetResult};
use crate::loopback::{LoopbackConnector, LoopbackControl};
use crate::transport::{ByteTransport, Connector, TcpConnector};

/// Identifier sent in `Hello`.
pub const CLIENT_NAME: &str = concat!("daq-network/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Connection
// =============================================================================

/// Driver of a `NetworkServer` record.
pub struct ServerConnection {
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn ByteTransport>>,
    inbound: BytesMut,
    next_request_id: u32,
    timeout: Duration,
    poll_interval: Duration,
    server_name: Option<String>,
}

impl ServerConnection {
    /// Unconnected connection using `connector`.
    pub fn new(connector: Box<dyn Connector>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            connector,
            transport: None,
            inbound: BytesMut::new(),
            next_request_id: 1,
            timeout,
            poll_interval,
            server_name: None,
        }
    }

    /// True while a transport is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Name the server gave in `Welcome`.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Peer description.
    pub fn peer(&self) -> String {
        self.connector.peer()
    }

    /// Default call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the default call timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Open a transport and exchange `Hello`/`Welcome`.
    #[instrument(skip(self), fields(peer = %self.connector.peer()))]
    pub fn connect(&mut self) -> NetResult<()> {
        self.disconnect();
        self.transport = Some(self.connector.connect()?);
        let reply = self.call(
            Message::Hello {
                client: CLIENT_NAME.to_string(),
            },
            None,
        );
        match reply {
            Ok(Message::Welcome { server }) => {
                info!(server = %server, "connected");
                self.server_name = Some(server);
                Ok(())
            }
            Ok(other) => {
                self.disconnect();
                Err(NetError::Protocol(format!(
                    "expected Welcome, got {:?}",
                    other.kind()
                )))
            }
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Drop the transport.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            debug!(peer = %self.connector.peer(), "disconnected");
        }
        self.inbound.clear();
        self.server_name = None;
    }

    /// Drop the transport and connect again.
    pub fn reconnect(&mut self) -> NetResult<()> {
        info!(peer = %self.connector.peer(), "reconnecting");
        self.connect()
    }

    /// Discard unread and unwritten bytes, e.g. after a protocol error or a
    /// burst of timeouts.
    pub fn resynchronize(&mut self) -> NetResult<()> {
        self.inbound.clear();
        let transport = self.transport.as_mut().ok_or_else(not_connected)?;
        let result = transport
            .discard_unread()
            .and_then(|()| transport.discard_unwritten());
        if let Err(e) = &result {
            warn!(error = %e, "resynchronize failed, dropping connection");
            self.disconnect();
        }
        result
    }

    /// Send `request` and wait up to `timeout` (default: the connection's)
    /// for its reply.
    pub fn call(&mut self, request: Message, timeout: Option<Duration>) -> NetResult<Message> {
        let timeout = timeout.unwrap_or(self.timeout);
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        let frame = encode_frame(request_id, &request)?;

        let result = self.exchange(request_id, &frame, timeout);
        match &result {
            Err(NetError::ConnectionLost(reason)) => {
                warn!(peer = %self.connector.peer(), %reason, "connection lost");
                self.disconnect();
            }
            Err(NetError::Protocol(reason)) => {
                warn!(peer = %self.connector.peer(), %reason, "protocol error, resynchronizing");
                // A failed resynchronize already dropped the connection.
                let _ = self.resynchronize();
            }
            Err(NetError::TimedOut { timeout }) => {
                debug!(request_id, ?timeout, kind = ?request.kind(), "request timed out");
            }
            _ => {}
        }
        result
    }

    fn exchange(&mut self, request_id: u32, frame: &[u8], timeout: Duration) -> NetResult<Message> {
        let transport = self.transport.as_mut().ok_or_else(not_connected)?;
        transport.write(frame)?;

        let deadline = Instant::now() + timeout;
        loop {
            let available = transport.bytes_available()?;
            if available > 0 {
                let bytes = transport.read(available)?;
                self.inbound.extend_from_slice(&bytes);
            }
            while let Some(reply) = decode_frame(&mut self.inbound)? {
                if reply.request_id == request_id {
                    return Ok(reply.message);
                }
                debug!(
                    expected = request_id,
                    received = reply.request_id,
                    "dropping stale reply"
                );
            }
            if Instant::now() >= deadline {
                return Err(NetError::TimedOut { timeout });
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Read a remote field, expecting type `tag`.
    pub fn get(&mut self, address: FieldAddress, tag: DataType) -> NetResult<FieldValue> {
        self.get_within(address, tag, None)
    }

    /// [`get`](Self::get) with its own deadline instead of the record's
    /// `timeout_ms`.
    pub fn get_within(
        &mut self,
        address: FieldAddress,
        tag: DataType,
        timeout: Option<Duration>,
    ) -> NetResult<FieldValue> {
        let field = address.qualified();
        match self.call(Message::Get { address, tag }, timeout)? {
            Message::Value(value) if value.data_type() == tag => Ok(value),
            Message::Value(value) => Err(NetError::RemoteTypeMismatch {
                field,
                expected: tag,
                actual: value.data_type(),
            }),
            Message::Error(e) => Err(NetError::from_remote(e)),
            other => Err(unexpected_reply("Value", &other)),
        }
    }

    /// Write a remote field.
    pub fn put(&mut self, address: FieldAddress, value: FieldValue) -> NetResult<()> {
        self.put_within(address, value, None)
    }

    /// [`put`](Self::put) with its own deadline.
    pub fn put_within(
        &mut self,
        address: FieldAddress,
        value: FieldValue,
        timeout: Option<Duration>,
    ) -> NetResult<()> {
        let tag = value.data_type();
        match self.call(
            Message::Put {
                address,
                tag,
                value,
            },
            timeout,
        )? {
            Message::Ack => Ok(()),
            Message::Error(e) => Err(NetError::from_remote(e)),
            other => Err(unexpected_reply("Ack", &other)),
        }
    }

    fn publish_state(&self, fields: &mut FieldStore) -> DeviceResult<()> {
        fields.set_internal_as("connected", self.is_connected())?;
        fields.set_internal_as("server_name", self.server_name.clone().unwrap_or_default())?;
        Ok(())
    }
}

fn not_connected() -> NetError {
    NetError::ConnectionLost("not connected".into())
}

fn unexpected_reply(expected: &str, reply: &Message) -> NetError {
    NetError::Protocol(format!("expected {expected}, got {:?}", reply.kind()))
}

impl RecordDriver for ServerConnection {
    fn open(&mut self, ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        let result = self.connect();
        self.publish_state(ctx.fields)?;
        Ok(result?)
    }

    fn close(&mut self, ctx: &mut RecordContext<'_>) -> DeviceResult<()> {
        self.disconnect();
        self.publish_state(ctx.fields)
    }

    fn process_field(
        &mut self,
        fields: &mut FieldStore,
        field: &str,
        op: ProcessOp,
    ) -> DeviceResult<bool> {
        match (field, op) {
            ("connected" | "server_name", ProcessOp::Get) => self.publish_state(fields)?,
            ("reconnect", ProcessOp::Put) => {
                if fields.get_as::<bool>("reconnect")? {
                    let result = self.reconnect();
                    self.publish_state(fields)?;
                    result?;
                }
            }
            ("resynchronize", ProcessOp::Put) => {
                if fields.get_as::<bool>("resynchronize")? {
                    let result = self.resynchronize();
                    self.publish_state(fields)?;
                    result?;
                }
            }
            ("timeout_ms", ProcessOp::Put) => {
                self.timeout = timeout_field(fields)
                    .map_err(|e| DeviceError::invalid_parameter("timeout_ms", e.message))?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

// =============================================================================
// Factories
// =============================================================================

/// Fields every server connection type has.
fn connection_fields(defaults: &NetworkSettings) -> Vec<FieldDescriptor> {
    use ScalarType::{Bool, Int32, String};
    let millis = |ms: u64| FieldValue::Int32(i32::try_from(ms).unwrap_or(i32::MAX));
    vec![
        FieldDescriptor::scalar("timeout_ms", Int32)
            .with_default(millis(defaults.timeout_ms))
            .process()
            .in_description(),
        FieldDescriptor::scalar("poll_interval_ms", Int32)
            .with_default(millis(defaults.poll_interval_ms))
            .in_description(),
        FieldDescriptor::scalar("connected", Bool).read_only().process().in_summary(),
        FieldDescriptor::scalar("server_name", String).read_only().process(),
        FieldDescriptor::scalar("reconnect", Bool).process(),
        FieldDescriptor::scalar("resynchronize", Bool).process(),
    ]
}

/// Positive millisecond field as a duration.
fn duration_field(fields: &FieldStore, name: &str) -> Result<Duration, DriverError> {
    let ms = fields
        .get_as::<i32>(name)
        .map_err(|e| DriverError::from_field("server", e))?;
    let ms = u64::try_from(ms).map_err(|_| {
        DriverError::new(
            "server",
            DriverErrorKind::InvalidParameter,
            format!("{name} must not be negative, got {ms}"),
        )
    })?;
    Ok(Duration::from_millis(ms))
}

/// `timeout_ms`, which must be positive.
fn timeout_field(fields: &FieldStore) -> Result<Duration, DriverError> {
    let timeout = duration_field(fields, "timeout_ms")?;
    if timeout.is_zero() {
        return Err(DriverError::new(
            "server",
            DriverErrorKind::InvalidParameter,
            "timeout_ms must be greater than zero",
        ));
    }
    Ok(timeout)
}

fn timing(driver_type: &str, fields: &FieldStore) -> Result<(Duration, Duration), DriverError> {
    let retag = |e: DriverError| DriverError::new(driver_type, e.kind, e.message);
    let timeout = timeout_field(fields).map_err(retag)?;
    let poll_interval = duration_field(fields, "poll_interval_ms").map_err(retag)?;
    Ok((timeout, poll_interval))
}

/// Factory for `tcp_server` records.
#[derive(Debug, Clone, Default)]
pub struct TcpServerFactory {
    defaults: NetworkSettings,
}

impl TcpServerFactory {
    /// Factory whose timeout and poll interval default to `defaults`.
    pub fn new(defaults: NetworkSettings) -> Self {
        Self { defaults }
    }
}

impl DriverFactory for TcpServerFactory {
    fn driver_type(&self) -> &'static str {
        "tcp_server"
    }

    fn class(&self) -> RecordClass {
        RecordClass::NetworkServer
    }

    fn description(&self) -> &'static str {
        "Record server reached over TCP"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        let mut fields = vec![
            FieldDescriptor::scalar("hostname", ScalarType::String)
                .with_default(FieldValue::String("localhost".to_string()))
                .in_description()
                .in_summary(),
            FieldDescriptor::scalar("port", ScalarType::Int32)
                .in_description()
                .in_summary(),
        ];
        fields.extend(connection_fields(&self.defaults));
        fields
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        let field_error = |e| DriverError::from_field(self.driver_type(), e);
        let hostname = fields.get_as::<String>("hostname").map_err(field_error)?;
        let port = fields.get_as::<i32>("port").map_err(field_error)?;
        let port = u16::try_from(port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| {
                DriverError::new(
                    self.driver_type(),
                    DriverErrorKind::InvalidParameter,
                    format!("port {port} is not a valid TCP port"),
                )
            })?;
        let (timeout, poll_interval) = timing(self.driver_type(), fields)?;
        let connector = TcpConnector::new(hostname, port, timeout);
        Ok(Box::new(ServerConnection::new(
            Box::new(connector),
            timeout,
            poll_interval,
        )))
    }
}

/// Factory for `loopback_server` records, all served by one in-process
/// dispatcher.
pub struct LoopbackServerFactory {
    driver_type: &'static str,
    dispatcher: Arc<Dispatcher>,
    control: Arc<LoopbackControl>,
    defaults: NetworkSettings,
}

impl LoopbackServerFactory {
    /// Factory for `dispatcher`, with faults driven by `control`.
    pub fn new(dispatcher: Arc<Dispatcher>, control: Arc<LoopbackControl>) -> Self {
        Self {
            driver_type: "loopback_server",
            dispatcher,
            control,
            defaults: NetworkSettings::default(),
        }
    }

    /// Register under another driver type name, for several dispatchers in
    /// one registry.
    pub fn with_driver_type(mut self, driver_type: &'static str) -> Self {
        self.driver_type = driver_type;
        self
    }

    /// Default timeout and poll interval.
    pub fn with_defaults(mut self, defaults: NetworkSettings) -> Self {
        self.defaults = defaults;
        self
    }
}

impl DriverFactory for LoopbackServerFactory {
    fn driver_type(&self) -> &'static str {
        self.driver_type
    }

    fn class(&self) -> RecordClass {
        RecordClass::NetworkServer
    }

    fn description(&self) -> &'static str {
        "In-process record server"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        connection_fields(&self.defaults)
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        let (timeout, poll_interval) = timing(self.driver_type, fields)?;
        let connector =
            LoopbackConnector::new(Arc::clone(&self.dispatcher), Arc::clone(&self.control));
        Ok(Box::new(ServerConnection::new(
            Box::new(connector),
            timeout,
            poll_interval,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::served_database;
    use daq_records::{Database, DriverRegistry, Lifecycle, RecordDescription};

    fn loopback() -> (ServerConnection, Arc<LoopbackControl>) {
        let control = LoopbackControl::new();
        let dispatcher = Arc::new(Dispatcher::new("remote", served_database()));
        let connector = LoopbackConnector::new(dispatcher, Arc::clone(&control));
        let connection = ServerConnection::new(
            Box::new(connector),
            Duration::from_millis(50),
            Duration::from_millis(1),
        );
        (connection, control)
    }

    fn value() -> FieldAddress {
        FieldAddress::new("var", "value")
    }

    const DOUBLE: DataType = DataType::Scalar(ScalarType::Double);

    #[test]
    fn test_connect_handshakes() {
        let (mut connection, _control) = loopback();
        assert!(!connection.is_connected());
        connection.connect().unwrap();
        assert!(connection.is_connected());
        assert_eq!(connection.server_name(), Some("remote"));
    }

    #[test]
    fn test_put_then_get() {
        let (mut connection, _control) = loopback();
        connection.connect().unwrap();
        connection.put(value(), FieldValue::Double(4.5)).unwrap();
        assert_eq!(connection.get(value(), DOUBLE).unwrap(), FieldValue::Double(4.5));
    }

    #[test]
    fn test_timeout_keeps_connection_and_drops_stale_reply() {
        let (mut connection, control) = loopback();
        connection.connect().unwrap();
        connection.put(value(), FieldValue::Double(1.0)).unwrap();

        control.set_stalled(true);
        assert_eq!(
            connection.get(value(), DOUBLE),
            Err(NetError::TimedOut {
                timeout: Duration::from_millis(50)
            })
        );
        assert!(connection.is_connected());

        control.set_stalled(false);
        connection.put(value(), FieldValue::Double(2.0)).unwrap();
        assert_eq!(connection.get(value(), DOUBLE).unwrap(), FieldValue::Double(2.0));
    }

    #[test]
    fn test_connection_lost_until_reconnect() {
        let (mut connection, control) = loopback();
        connection.connect().unwrap();

        control.set_disconnected(true);
        assert!(connection.get(value(), DOUBLE).unwrap_err().is_connection_lost());
        assert!(!connection.is_connected());

        control.set_disconnected(false);
        assert!(connection.get(value(), DOUBLE).unwrap_err().is_connection_lost());
        connection.reconnect().unwrap();
        assert!(connection.get(value(), DOUBLE).is_ok());
    }

    #[test]
    fn test_remote_errors_keep_their_variant() {
        let (mut connection, _control) = loopback();
        connection.connect().unwrap();
        assert_eq!(
            connection.get(value(), DataType::Scalar(ScalarType::Int32)),
            Err(NetError::RemoteTypeMismatch {
                field: "var.value".into(),
                expected: DataType::Scalar(ScalarType::Int32),
                actual: DOUBLE,
            })
        );
        assert_eq!(
            connection.put(FieldAddress::new("var", "fault"), FieldValue::Bool(true)),
            Err(NetError::Remote(DeviceError::HardwareFault(
                "injected fault".into()
            )))
        );
    }

    #[test]
    fn test_resynchronize_requires_connection() {
        let (mut connection, _control) = loopback();
        assert!(connection.resynchronize().unwrap_err().is_connection_lost());
        connection.connect().unwrap();
        connection.resynchronize().unwrap();
    }

    #[test]
    fn test_loopback_server_record_lifecycle() {
        let control = LoopbackControl::new();
        let dispatcher = Arc::new(Dispatcher::new("remote", served_database()));
        let mut registry = DriverRegistry::new();
        registry
            .register(LoopbackServerFactory::new(dispatcher, Arc::clone(&control)))
            .unwrap();
        let database = Database::build(
            &registry,
            &[RecordDescription::new("srv", "loopback_server")],
        )
        .unwrap();
        database.initialize_all().unwrap();
        assert!(database.open_all().is_empty());

        let record = database.get("srv").unwrap();
        let mut record = record.lock();
        assert_eq!(record.read_field("connected").unwrap(), FieldValue::Bool(true));
        assert_eq!(
            record.read_field("server_name").unwrap(),
            FieldValue::String("remote".into())
        );

        control.set_disconnected(true);
        let connection = record.type_state_mut::<ServerConnection>().unwrap();
        assert!(connection.get(value(), DOUBLE).is_err());
        assert_eq!(record.read_field("connected").unwrap(), FieldValue::Bool(false));

        control.set_disconnected(false);
        record.write_field("reconnect", FieldValue::Bool(true)).unwrap();
        assert_eq!(record.read_field("connected").unwrap(), FieldValue::Bool(true));

        record.close().unwrap();
        assert_eq!(record.lifecycle(), Lifecycle::Closed);
        assert_eq!(record.fields().get("connected").unwrap(), &FieldValue::Bool(false));
    }

    #[test]
    fn test_runtime_timeout_must_be_positive() {
        let dispatcher = Arc::new(Dispatcher::new("remote", served_database()));
        let mut registry = DriverRegistry::new();
        registry
            .register(LoopbackServerFactory::new(dispatcher, LoopbackControl::new()))
            .unwrap();
        let database = Database::build(
            &registry,
            &[RecordDescription::new("srv", "loopback_server").with_field("timeout_ms", 200)],
        )
        .unwrap();
        database.initialize_all().unwrap();
        assert!(database.open_all().is_empty());

        let record = database.get("srv").unwrap();
        let mut record = record.lock();
        assert!(matches!(
            record.write_field("timeout_ms", FieldValue::Int32(0)),
            Err(DeviceError::InvalidParameter { .. })
        ));
        assert_eq!(record.fields().get_as::<i32>("timeout_ms").unwrap(), 200);

        record.write_field("timeout_ms", FieldValue::Int32(75)).unwrap();
        let connection = record.type_state::<ServerConnection>().unwrap();
        assert_eq!(connection.timeout, Duration::from_millis(75));
    }

    #[test]
    fn test_call_deadline_overrides_record_timeout() {
        let (mut connection, control) = loopback();
        connection.connect().unwrap();
        control.set_stalled(true);
        let deadline = Duration::from_millis(5);
        assert_eq!(
            connection.get_within(value(), DOUBLE, Some(deadline)),
            Err(NetError::TimedOut { timeout: deadline })
        );
        control.set_stalled(false);
        assert!(connection.get(value(), DOUBLE).is_ok());
    }

    #[test]
    fn test_open_fails_when_server_is_down() {
        let control = LoopbackControl::new();
        control.set_disconnected(true);
        let dispatcher = Arc::new(Dispatcher::new("remote", served_database()));
        let mut registry = DriverRegistry::new();
        registry
            .register(LoopbackServerFactory::new(dispatcher, control))
            .unwrap();
        let database = Database::build(
            &registry,
            &[RecordDescription::new("srv", "loopback_server")],
        )
        .unwrap();
        database.initialize_all().unwrap();
        let failures = database.open_all();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].1, DeviceError::ConnectionLost(_)));
        assert_eq!(
            database.get("srv").unwrap().lock().lifecycle(),
            Lifecycle::Closed
        );
    }

    #[test]
    fn test_tcp_factory_validates_port() {
        let factory = TcpServerFactory::default();
        let mut registry = DriverRegistry::new();
        registry.register(factory).unwrap();
        let description = RecordDescription::new("srv", "tcp_server").with_field("port", 70000);
        assert!(Database::build(&registry, &[description]).is_err());

        let description = RecordDescription::new("srv", "tcp_server").with_field("port", 9000);
        let database = Database::build(&registry, &[description]).unwrap();
        let record = database.get("srv").unwrap();
        let record = record.lock();
        assert_eq!(record.fields().get_as::<i32>("timeout_ms").unwrap(), 5000);
        assert!(record.type_state::<ServerConnection>().is_some());
    }
}
