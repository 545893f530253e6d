//! Configuration and state shapes for the connect/auth/heartbeat machine.
//!
//! The machine itself lives in [`crate::access::AccessCtrl`]; this module
//! only holds the config the caller builds and the states/reasons it can
//! observe.

use std::time::Duration;

use crate::error::{NacError, Result};

/// Heuristic slack compensating for the heartbeat timer's 1-second
/// granularity when deciding whether a heartbeat is due. Not load-bearing
/// for correctness — only for not sending a heartbeat a tick early.
pub const HEARTBEAT_TOLERANCE: Duration = Duration::from_millis(500);

/// TLS handshake direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslWay {
    /// Server-authenticated only.
    OneWay = 1,
    /// Mutual TLS.
    TwoWay = 2,
}

/// Certificate encoding on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertFormat {
    /// DER-encoded.
    Der = 1,
    /// PEM-encoded.
    Pem = 2,
}

/// Connection configuration for [`crate::access::AccessCtrl`].
///
/// Build with [`AccessConfig::new`] and the chainable setters, matching the
/// builder idiom used throughout this workspace for multi-field configs.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// `0` lets the OS assign an ephemeral local port.
    pub local_port: u16,
    /// Remote host.
    pub address: String,
    /// Remote port.
    pub port: u16,
    /// Whether to wrap the connection in TLS. Neither shipped transport
    /// implements TLS; a `true` value here fails the connect fast.
    pub ssl_on: bool,
    /// Handshake direction, meaningful only when `ssl_on`.
    pub ssl_way: SslWay,
    /// Certificate encoding, meaningful only when `ssl_on`.
    pub cert_fmt: CertFormat,
    /// Certificate file path, meaningful only when `ssl_on`.
    pub cert_file: String,
    /// Private key file path, meaningful only when `ssl_on`.
    pub pk_file: String,
    /// Private key passphrase, meaningful only when `ssl_on`.
    pub pk_pwd: String,
    /// `Duration::ZERO` uses the OS default connect timeout (no timer armed).
    pub connect_timeout: Duration,
    /// `0` disables the auth handshake.
    pub auth_biz_code: u32,
    /// Required (`>= 1s`) when `auth_biz_code != 0`.
    pub auth_timeout: Duration,
    /// `0` disables heartbeats.
    pub heartbeat_biz_code: u32,
    /// Required (`>= 1s`) when `heartbeat_biz_code != 0`.
    pub heartbeat_interval: Duration,
    /// `true`: send every `heartbeat_interval` regardless of other traffic.
    /// `false`: send only if nothing else has been sent in that window.
    pub heartbeat_fixed_send: bool,
    /// Must exceed `heartbeat_interval` when heartbeats are enabled.
    pub offline_time: Duration,
    /// Reconnect back-off sequence; empty disables automatic reconnect. The
    /// last element is the steady-state retry delay once exhausted.
    pub retry_interval: Vec<Duration>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            local_port: 0,
            address: String::new(),
            port: 0,
            ssl_on: false,
            ssl_way: SslWay::OneWay,
            cert_fmt: CertFormat::Pem,
            cert_file: String::new(),
            pk_file: String::new(),
            pk_pwd: String::new(),
            connect_timeout: Duration::ZERO,
            auth_biz_code: 0,
            auth_timeout: Duration::ZERO,
            heartbeat_biz_code: 0,
            heartbeat_interval: Duration::ZERO,
            heartbeat_fixed_send: false,
            offline_time: Duration::ZERO,
            retry_interval: Vec::new(),
        }
    }
}

impl AccessConfig {
    /// Starts a config targeting `address:port`, everything else at its
    /// feature-disabled default.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self { address: address.into(), port, ..Default::default() }
    }

    /// Sets the local (client-side) port. `0` (the default) lets the OS assign one.
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables the auth handshake with `biz_code`, requiring a response
    /// within `timeout`.
    pub fn auth(mut self, biz_code: u32, timeout: Duration) -> Self {
        self.auth_biz_code = biz_code;
        self.auth_timeout = timeout;
        self
    }

    /// Enables heartbeats tagged `biz_code`, sent per `interval` (subject to
    /// `fixed_send`), with a connection declared offline after `offline_time`
    /// of silence.
    pub fn heartbeat(mut self, biz_code: u32, interval: Duration, fixed_send: bool, offline_time: Duration) -> Self {
        self.heartbeat_biz_code = biz_code;
        self.heartbeat_interval = interval;
        self.heartbeat_fixed_send = fixed_send;
        self.offline_time = offline_time;
        self
    }

    /// Sets the reconnect back-off sequence, in seconds.
    pub fn retry_interval(mut self, seconds: impl IntoIterator<Item = u64>) -> Self {
        self.retry_interval = seconds.into_iter().map(Duration::from_secs).collect();
        self
    }

    /// Enables TLS with the given material.
    pub fn tls(
        mut self,
        way: SslWay,
        fmt: CertFormat,
        cert_file: impl Into<String>,
        pk_file: impl Into<String>,
        pk_pwd: impl Into<String>,
    ) -> Self {
        self.ssl_on = true;
        self.ssl_way = way;
        self.cert_fmt = fmt;
        self.cert_file = cert_file.into();
        self.pk_file = pk_file.into();
        self.pk_pwd = pk_pwd.into();
        self
    }

    /// Validates the documented field constraints, failing fast without
    /// mutating any state machine.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(NacError::InvalidConfig("address must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(NacError::InvalidConfig("port must not be zero".to_string()));
        }
        if self.auth_biz_code != 0 && self.auth_timeout.is_zero() {
            return Err(NacError::InvalidConfig(
                "auth_timeout must be >= 1s when auth is enabled".to_string(),
            ));
        }
        if self.heartbeat_biz_code != 0 {
            if self.heartbeat_interval.is_zero() {
                return Err(NacError::InvalidConfig(
                    "heartbeat_interval must be >= 1s when heartbeat is enabled".to_string(),
                ));
            }
            if self.offline_time <= self.heartbeat_interval {
                return Err(NacError::InvalidConfig(
                    "offline_time must exceed heartbeat_interval".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// The connect/auth/heartbeat machine's externally observable state.
///
/// `Connected` is reachable only through `Connecting`; `disconnect()` from
/// any state terminates in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// Never connected, or returned here via an explicit `disconnect()`.
    Idle,
    /// A connect attempt (and optional auth handshake) is in flight.
    Connecting,
    /// Connected and, if configured, authenticated.
    Connected,
    /// Lost connection; automatic reconnect may be armed.
    Disconnected,
}

/// Why a session left `Connected` (or failed to reach it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectType {
    /// The transport's connect callback reported failure, or the connect
    /// timeout fired first.
    ConnectFailed,
    /// The auth result callback returned `false`, or the auth request timed out.
    AuthFail,
    /// No server-originated bytes arrived within the configured window.
    Offline,
    /// `disconnect()` was called explicitly.
    Explicit,
}
