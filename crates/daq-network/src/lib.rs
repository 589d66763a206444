//! # daq-network
//!
//! Field-level RPC between record databases.
//!
//! A client database holds one `NetworkServer` record per remote server. Its
//! driver, [`ServerConnection`], owns a byte transport and turns one request
//! into one reply with a timeout. Proxy drivers reach remote fields through
//! [`NetworkField`] bindings, so a remote motor is driven with the same class
//! operations, and fails with the same [`DeviceError`] variants, as a local
//! one.
//!
//! On the server side a [`Dispatcher`] answers requests from a [`Database`]
//! by reading and writing record fields with their process hooks, and
//! [`serve`] exposes a dispatcher on a tokio TCP listener.
//!
//! ## Wire format
//!
//! ```text
//! +-------+---------+------+------------+----------+------+--------+
//! | magic | version | kind | request id | body len | body | CRC-32 |
//! |  u16  |   u8    |  u8  |    u32     |   u32    |  ..  |  u32   |
//! +-------+---------+------+------------+----------+------+--------+
//! ```
//!
//! All integers are big-endian. Every value carries its type tag, see
//! [`codec`].
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut registry = DriverRegistry::new();
//! registry.register(TcpServerFactory::new(settings.network.clone()))?;
//! daq_driver_network::register_all(&mut registry)?;
//! let database = settings.build_database(&registry)?;
//! database.open_all();
//! ```
//!
//! [`DeviceError`]: daq_records::DeviceError
//! [`Database`]: daq_records::Database

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod field;
pub mod loopback;
pub mod server;
pub mod transport;

#[cfg(test)]
mod testing;

pub use codec::{FieldAddress, Frame, Message, MessageKind};
pub use connection::{LoopbackServerFactory, ServerConnection, TcpServerFactory};
pub use dispatcher::Dispatcher;
pub use error::{NetError, NetResult};
pub use field::NetworkField;
pub use loopback::{LoopbackConnector, LoopbackControl};
pub use server::{serve, serve_until};
pub use transport::{ByteTransport, Connector, TcpConnector, TcpTransport};
