//! Session/request-response correlation and a connect-auth-heartbeat state
//! machine over a framed byte transport.
//!
//! - **Protocol**: a fixed 20-byte header framing every packet, plus a
//!   stateful [`InboundFramer`] for decoding a byte stream into packets
//!   ([`protocol`]).
//! - **Transport**: an opaque asynchronous connect/send/receive contract,
//!   with a blocking TCP implementation and an in-memory stub for tests
//!   ([`transport`]).
//! - **Session**: request/response correlation keyed by sequence id, with
//!   per-request timeouts ([`session`]).
//! - **Access control**: the connect/auth/heartbeat state machine built on
//!   top of a session manager, with weak-reference state/message
//!   subscriptions ([`access`]).
//! - **Snowflake**: the 64-bit sequence-id generator used when a caller
//!   doesn't supply its own id ([`snowflake`]).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use threading::{DiagnosticsRegistry, Executor, WorkerPoolConfig, WorkerPoolExecutor};
//! use nac::access::AccessCtrl;
//! use nac::connect::AccessConfig;
//! use nac::transport::StubTransport;
//!
//! let registry = Arc::new(DiagnosticsRegistry::new());
//! let biz_executor = Arc::new(Executor::WorkerPool(
//!     WorkerPoolExecutor::new(
//!         WorkerPoolConfig { name: "biz".to_string(), num_threads: 1, ..Default::default() },
//!         registry.clone(),
//!     )
//!     .unwrap(),
//! ));
//!
//! let config = AccessConfig::new("127.0.0.1", 9000).connect_timeout(Duration::from_secs(5));
//! let transport = StubTransport::new();
//! let access = AccessCtrl::new(config, transport, biz_executor, registry, 1);
//! assert_eq!(access.state(), nac::connect::ConnectState::Idle);
//! ```

#![warn(missing_docs)]

pub mod access;
pub mod connect;
pub mod error;
pub mod protocol;
pub mod session;
pub mod snowflake;
pub mod transport;

pub use access::{AccessCtrl, Subscription};
pub use connect::{AccessConfig, CertFormat, ConnectState, DisconnectType, SslWay};
pub use error::{NacError, Result};
pub use protocol::{FrameEvent, InboundFramer, Packet, ProtocolAdapter};
pub use session::{ResponseCallback, SessionManager};
pub use snowflake::SnowflakeGenerator;
pub use transport::{ConnectParams, Transport};
