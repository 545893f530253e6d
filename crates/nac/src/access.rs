//! `AccessCtrl`: the connect/auth/heartbeat state machine wired to a
//! [`SessionManager`] and a weak-reference observer subscription pattern.
//!
//! This is the top-level object an application constructs: one
//! [`AccessCtrl`] owns a dedicated packet-processing [`Executor`] (framing,
//! timers, pending-request bookkeeping) and dispatches every user-facing
//! callback onto a caller-supplied `biz` executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use threading::{DiagnosticsRegistry, Executor, FiberExecutor, FiberExecutorConfig, PostWait, SteadyTimer};

use crate::connect::{AccessConfig, ConnectState, DisconnectType, HEARTBEAT_TOLERANCE};
use crate::error::Result;
use crate::protocol::{FrameEvent, InboundFramer, Packet, ProtocolAdapter};
use crate::session::{ResponseCallback, SessionManager};
use crate::transport::{ConnectParams, Transport};

/// Wire version this client frames with and expects on every inbound header.
pub const PROTOCOL_VERSION: u32 = 1;

/// A live subscription from [`AccessCtrl::subscribe_access_state`] or
/// [`AccessCtrl::subscribe_access_msg`]. `AccessCtrl` holds only a weak
/// reference to the installed closure; dropping this value unregisters it
/// on the next dispatch.
pub struct Subscription {
    _keep_alive: Arc<dyn std::any::Any + Send + Sync>,
}

type StateHandler = dyn Fn(ConnectState, Option<DisconnectType>) + Send + Sync;
type MsgHandler = dyn Fn(u32, &[u8]) + Send + Sync;

enum AbnormalKind {
    Version { expected: u32, actual: u32 },
    Length { limit: usize, actual: u32 },
}

/// The connect/auth/heartbeat state machine and its owned session manager.
pub struct AccessCtrl {
    config: AccessConfig,
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    packet_executor: Arc<Executor>,
    biz_executor: Arc<Executor>,
    state: Mutex<ConnectState>,
    framer: Mutex<InboundFramer>,
    last_recv_at: Mutex<Instant>,
    last_send_at: Mutex<Instant>,
    last_heartbeat_at: Mutex<Option<Instant>>,
    connect_timer: Mutex<Option<Arc<SteadyTimer>>>,
    heartbeat_timer: Mutex<Option<Arc<SteadyTimer>>>,
    offline_timer: Mutex<Option<Arc<SteadyTimer>>>,
    retry_timer: Mutex<Option<Arc<SteadyTimer>>>,
    retry_index: AtomicUsize,
    state_subscribers: Mutex<Vec<Weak<StateHandler>>>,
    msg_subscribers: Mutex<HashMap<u32, Vec<Weak<MsgHandler>>>>,
    auth_data_generator: Mutex<Option<Box<dyn Fn() -> Vec<u8> + Send + Sync>>>,
    auth_result_callback: Mutex<Option<Arc<dyn Fn(&[u8]) -> bool + Send + Sync>>>,
    version_mismatch_callback: Mutex<Option<Arc<dyn Fn(u32, u32) -> bool + Send + Sync>>>,
    length_abnormal_callback: Mutex<Option<Arc<dyn Fn(usize, u32) -> bool + Send + Sync>>>,
}

impl AccessCtrl {
    /// Builds a (disconnected) `AccessCtrl` over `transport`. User-facing
    /// state/message callbacks are dispatched onto `biz_executor`; every
    /// internal timer and framing step runs on a dedicated single-thread
    /// packet executor this object owns. `machine_id` seeds the session
    /// manager's sequence-id generator.
    pub fn new(
        config: AccessConfig,
        transport: Arc<dyn Transport>,
        biz_executor: Arc<Executor>,
        registry: Arc<DiagnosticsRegistry>,
        machine_id: u16,
    ) -> Arc<Self> {
        let packet_executor = Arc::new(Executor::Fiber(FiberExecutor::new(
            FiberExecutorConfig { name: "nac-packet".to_string(), ..Default::default() },
            registry.clone(),
        )));
        let adapter = ProtocolAdapter::new(PROTOCOL_VERSION);
        let session = Arc::new(SessionManager::new(
            adapter,
            transport.clone(),
            packet_executor.clone(),
            registry,
            machine_id,
        ));
        let now = Instant::now();
        Arc::new(Self {
            config,
            transport,
            session,
            packet_executor,
            biz_executor,
            state: Mutex::new(ConnectState::Idle),
            framer: Mutex::new(InboundFramer::new(PROTOCOL_VERSION)),
            last_recv_at: Mutex::new(now),
            last_send_at: Mutex::new(now),
            last_heartbeat_at: Mutex::new(None),
            connect_timer: Mutex::new(None),
            heartbeat_timer: Mutex::new(None),
            offline_timer: Mutex::new(None),
            retry_timer: Mutex::new(None),
            retry_index: AtomicUsize::new(0),
            state_subscribers: Mutex::new(Vec::new()),
            msg_subscribers: Mutex::new(HashMap::new()),
            auth_data_generator: Mutex::new(None),
            auth_result_callback: Mutex::new(None),
            version_mismatch_callback: Mutex::new(None),
            length_abnormal_callback: Mutex::new(None),
        })
    }

    /// Installs the synchronous auth payload generator, run on the packet
    /// executor just before the auth request is sent. Expected to be pure
    /// and cheap; a run exceeding 1ms is logged as a warning.
    pub fn set_auth_data_generator<F>(&self, f: F)
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        *self.auth_data_generator.lock() = Some(Box::new(f));
    }

    /// Installs the callback deciding whether an auth response is accepted.
    pub fn set_auth_result_callback<F>(&self, f: F)
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        *self.auth_result_callback.lock() = Some(Arc::new(f));
    }

    /// Installs the callback invoked on a protocol version mismatch. A
    /// `false` return cancels the auto-reconnect timer.
    pub fn set_version_mismatch_callback<F>(&self, f: F)
    where
        F: Fn(u32, u32) -> bool + Send + Sync + 'static,
    {
        *self.version_mismatch_callback.lock() = Some(Arc::new(f));
    }

    /// Installs the callback invoked when an inbound header declares an
    /// abnormal payload length. A `false` return cancels the auto-reconnect timer.
    pub fn set_length_abnormal_callback<F>(&self, f: F)
    where
        F: Fn(usize, u32) -> bool + Send + Sync + 'static,
    {
        *self.length_abnormal_callback.lock() = Some(Arc::new(f));
    }

    /// The current connect state.
    pub fn state(&self) -> ConnectState {
        *self.state.lock()
    }

    /// Validates the config, then begins connecting. `handle_connect_result`
    /// delivers the transport's connect callback.
    pub fn connect(self: &Arc<Self>) -> Result<()> {
        self.config.validate()?;

        *self.state.lock() = ConnectState::Connecting;
        self.dispatch_state(ConnectState::Connecting, None);

        if !self.config.connect_timeout.is_zero() {
            let this = self.clone();
            let timer = SteadyTimer::once(
                "nac-connect-timeout",
                self.config.connect_timeout,
                self.packet_executor.clone(),
                move |_| this.transition_to_disconnected(DisconnectType::ConnectFailed, true),
            );
            *self.connect_timer.lock() = Some(timer);
        }

        let this_data = self.clone();
        self.transport.set_on_data(Arc::new(move |bytes| this_data.on_transport_data(bytes)));

        let this = self.clone();
        let params = ConnectParams {
            local_port: self.config.local_port,
            address: self.config.address.clone(),
            port: self.config.port,
            ssl_on: self.config.ssl_on,
        };
        self.transport.connect(params, Box::new(move |code| this.handle_connect_result(code)));
        Ok(())
    }

    /// Tears down the connection and every timer, fails all pending
    /// sessions, and returns to `Idle`. Cancels any armed reconnect.
    pub fn disconnect(&self) {
        *self.state.lock() = ConnectState::Idle;
        self.stop_all_timers();
        self.transport.stop();
        self.session.fail_all();
        self.dispatch_state(ConnectState::Idle, Some(DisconnectType::Explicit));
    }

    /// Sends a request through the owned [`SessionManager`]. See
    /// [`SessionManager::send_msg`] for the exact contract.
    pub fn send_msg(&self, biz_code: u32, seq_id: u64, data: &[u8], timeout: Option<Duration>, callback: ResponseCallback) -> i64 {
        let seq_id = self.session.send_msg(biz_code, seq_id, data, timeout, callback);
        if seq_id > 0 {
            *self.last_send_at.lock() = Instant::now();
        }
        seq_id
    }

    /// Subscribes to connect-state transitions. The handler is dropped once
    /// the returned [`Subscription`] is dropped.
    pub fn subscribe_access_state<F>(&self, f: F) -> Subscription
    where
        F: Fn(ConnectState, Option<DisconnectType>) + Send + Sync + 'static,
    {
        let handler: Arc<StateHandler> = Arc::new(f);
        self.state_subscribers.lock().push(Arc::downgrade(&handler));
        Subscription { _keep_alive: handler }
    }

    /// Subscribes to inbound messages tagged `biz_code`. Rejected with
    /// `None` if `biz_code` is the configured auth or heartbeat code — those
    /// are internal to the state machine and not observable by applications.
    pub fn subscribe_access_msg<F>(&self, biz_code: u32, f: F) -> Option<Subscription>
    where
        F: Fn(u32, &[u8]) + Send + Sync + 'static,
    {
        let is_reserved = (self.config.auth_biz_code != 0 && biz_code == self.config.auth_biz_code)
            || (self.config.heartbeat_biz_code != 0 && biz_code == self.config.heartbeat_biz_code);
        if is_reserved {
            return None;
        }
        let handler: Arc<MsgHandler> = Arc::new(f);
        self.msg_subscribers
            .lock()
            .entry(biz_code)
            .or_default()
            .push(Arc::downgrade(&handler));
        Some(Subscription { _keep_alive: handler })
    }

    fn handle_connect_result(self: &Arc<Self>, code: i32) {
        if let Some(t) = self.connect_timer.lock().take() {
            t.stop();
        }
        if code != 0 {
            self.transition_to_disconnected(DisconnectType::ConnectFailed, true);
            return;
        }

        let now = Instant::now();
        *self.last_recv_at.lock() = now;
        *self.last_send_at.lock() = now;

        if self.config.auth_biz_code != 0 {
            self.start_auth();
        } else {
            self.mark_connected();
        }
    }

    fn start_auth(self: &Arc<Self>) {
        let payload = {
            let guard = self.auth_data_generator.lock();
            match guard.as_ref() {
                Some(gen) => {
                    let started = Instant::now();
                    let data = gen();
                    if started.elapsed() > Duration::from_millis(1) {
                        tracing::warn!(target: "nac", "auth data generator took more than 1ms");
                    }
                    data
                }
                None => Vec::new(),
            }
        };

        let this = self.clone();
        let auth_timeout = self.config.auth_timeout;
        self.session.send_msg(
            self.config.auth_biz_code,
            0,
            &payload,
            Some(auth_timeout),
            Box::new(move |sent_ok, _biz_code, _seq_id, payload| {
                let accepted = sent_ok
                    && this
                        .auth_result_callback
                        .lock()
                        .as_ref()
                        .map(|cb| cb(&payload))
                        .unwrap_or(true);
                if accepted {
                    this.mark_connected();
                } else {
                    this.transition_to_disconnected(DisconnectType::AuthFail, true);
                }
            }),
        );
    }

    fn mark_connected(self: &Arc<Self>) {
        *self.state.lock() = ConnectState::Connected;
        self.retry_index.store(0, Ordering::SeqCst);
        self.dispatch_state(ConnectState::Connected, None);
        self.arm_heartbeat_and_offline_timers();
    }

    fn arm_heartbeat_and_offline_timers(self: &Arc<Self>) {
        if self.config.heartbeat_biz_code != 0 {
            let this = self.clone();
            let timer = SteadyTimer::looping("nac-heartbeat", Duration::from_secs(1), self.packet_executor.clone(), move |_| {
                this.heartbeat_tick()
            });
            *self.heartbeat_timer.lock() = Some(timer);

            let this = self.clone();
            let timer = SteadyTimer::looping("nac-offline-check", Duration::from_secs(1), self.packet_executor.clone(), move |_| {
                this.offline_tick()
            });
            *self.offline_timer.lock() = Some(timer);
        }
    }

    fn heartbeat_tick(self: &Arc<Self>) {
        if self.state() != ConnectState::Connected {
            return;
        }
        let now = Instant::now();
        let due = if self.config.heartbeat_fixed_send {
            let last = self.last_heartbeat_at.lock().unwrap_or(now - self.config.heartbeat_interval);
            now.saturating_duration_since(last) + HEARTBEAT_TOLERANCE >= self.config.heartbeat_interval
        } else {
            let last_send = *self.last_send_at.lock();
            now.saturating_duration_since(last_send) + HEARTBEAT_TOLERANCE >= self.config.heartbeat_interval
        };
        if due {
            self.send_heartbeat();
        }
    }

    fn send_heartbeat(&self) {
        let adapter = ProtocolAdapter::new(PROTOCOL_VERSION);
        let Ok(packet) = adapter.create_packet(self.config.heartbeat_biz_code, 0, &[]) else {
            return;
        };
        let now = Instant::now();
        *self.last_send_at.lock() = now;
        *self.last_heartbeat_at.lock() = Some(now);
        self.transport.send(packet, Box::new(|_err, _written| {}));
    }

    fn offline_tick(self: &Arc<Self>) {
        if self.state() != ConnectState::Connected {
            return;
        }
        let now = Instant::now();
        let last_recv = *self.last_recv_at.lock();
        let silent_too_long = now.saturating_duration_since(last_recv) > self.config.offline_time;
        if !self.transport.is_running() || silent_too_long {
            self.transition_to_disconnected(DisconnectType::Offline, true);
        }
    }

    fn on_transport_data(self: &Arc<Self>, bytes: &[u8]) {
        *self.last_recv_at.lock() = Instant::now();
        let events = self.framer.lock().feed(bytes);
        for event in events {
            match event {
                FrameEvent::Packet(packet) => self.handle_packet(packet),
                FrameEvent::VersionMismatch { expected, actual } => {
                    self.handle_protocol_abnormal(AbnormalKind::Version { expected, actual })
                }
                FrameEvent::LengthAbnormal { limit, actual } => {
                    self.handle_protocol_abnormal(AbnormalKind::Length { limit, actual })
                }
            }
        }
    }

    fn handle_packet(&self, packet: Packet) {
        if self.config.heartbeat_biz_code != 0 && packet.biz_code == self.config.heartbeat_biz_code {
            return;
        }
        if self.config.auth_biz_code != 0 && packet.biz_code == self.config.auth_biz_code {
            self.session.on_packet(packet);
            return;
        }
        self.dispatch_msg(packet.biz_code, packet.payload.clone());
        self.session.on_packet(packet);
    }

    fn handle_protocol_abnormal(self: &Arc<Self>, kind: AbnormalKind) {
        let keep_reconnecting = match kind {
            AbnormalKind::Version { expected, actual } => self
                .version_mismatch_callback
                .lock()
                .as_ref()
                .map(|cb| cb(expected, actual))
                .unwrap_or(true),
            AbnormalKind::Length { limit, actual } => self
                .length_abnormal_callback
                .lock()
                .as_ref()
                .map(|cb| cb(limit, actual))
                .unwrap_or(true),
        };
        self.transition_to_disconnected(DisconnectType::Offline, keep_reconnecting);
    }

    fn transition_to_disconnected(self: &Arc<Self>, reason: DisconnectType, allow_retry: bool) {
        {
            let mut state = self.state.lock();
            if *state == ConnectState::Disconnected || *state == ConnectState::Idle {
                return;
            }
            *state = ConnectState::Disconnected;
        }
        self.stop_all_timers();
        self.session.fail_all();
        self.dispatch_state(ConnectState::Disconnected, Some(reason));
        if allow_retry {
            self.arm_retry_timer();
        }
    }

    fn arm_retry_timer(self: &Arc<Self>) {
        if self.config.retry_interval.is_empty() {
            return;
        }
        let idx = self.retry_index.load(Ordering::SeqCst);
        let clamped = idx.min(self.config.retry_interval.len() - 1);
        let delay = self.config.retry_interval[clamped];
        if idx + 1 < self.config.retry_interval.len() {
            self.retry_index.store(idx + 1, Ordering::SeqCst);
        }
        let this = self.clone();
        let timer = SteadyTimer::once("nac-retry", delay, self.packet_executor.clone(), move |_| {
            let _ = this.connect();
        });
        *self.retry_timer.lock() = Some(timer);
    }

    fn stop_all_timers(&self) {
        if let Some(t) = self.connect_timer.lock().take() {
            t.stop();
        }
        if let Some(t) = self.heartbeat_timer.lock().take() {
            t.stop();
        }
        if let Some(t) = self.offline_timer.lock().take() {
            t.stop();
        }
        if let Some(t) = self.retry_timer.lock().take() {
            t.stop();
        }
    }

    fn dispatch_state(&self, state: ConnectState, reason: Option<DisconnectType>) {
        let live: Vec<Arc<StateHandler>> = {
            let mut subs = self.state_subscribers.lock();
            subs.retain(|w| w.strong_count() > 0);
            subs.iter().filter_map(Weak::upgrade).collect()
        };
        for handler in live {
            let executor = self.biz_executor.clone();
            let _ = executor.post_fn("nac-access-state", move || handler(state, reason), PostWait::DontWait);
        }
    }

    fn dispatch_msg(&self, biz_code: u32, payload: Bytes) {
        let live: Vec<Arc<MsgHandler>> = {
            let mut subs = self.msg_subscribers.lock();
            match subs.get_mut(&biz_code) {
                Some(list) => {
                    list.retain(|w| w.strong_count() > 0);
                    list.iter().filter_map(Weak::upgrade).collect()
                }
                None => Vec::new(),
            }
        };
        for handler in live {
            let executor = self.biz_executor.clone();
            let payload = payload.clone();
            let _ = executor.post_fn("nac-access-msg", move || handler(biz_code, &payload), PostWait::DontWait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StubTransport;
    use std::sync::mpsc;
    use threading::WorkerPoolConfig;
    use threading::WorkerPoolExecutor;

    fn biz_executor(registry: Arc<DiagnosticsRegistry>) -> Arc<Executor> {
        Arc::new(Executor::WorkerPool(
            WorkerPoolExecutor::new(
                WorkerPoolConfig { name: "biz".to_string(), num_threads: 1, ..Default::default() },
                registry,
            )
            .unwrap(),
        ))
    }

    #[test]
    fn connect_without_auth_reaches_connected_and_notifies_subscribers() {
        let registry = Arc::new(DiagnosticsRegistry::new());
        let transport = StubTransport::new();
        let config = AccessConfig::new("localhost", 9000);
        let access = AccessCtrl::new(config, transport, biz_executor(registry.clone()), registry, 1);

        let (tx, rx) = mpsc::channel();
        let _sub = access.subscribe_access_state(move |state, _reason| {
            let _ = tx.send(state);
        });

        access.connect().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ConnectState::Connecting);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ConnectState::Connected);
        assert_eq!(access.state(), ConnectState::Connected);
    }

    #[test]
    fn auth_failure_transitions_to_disconnected() {
        let registry = Arc::new(DiagnosticsRegistry::new());
        let transport = StubTransport::new();
        let config = AccessConfig::new("localhost", 9000).auth(42, Duration::from_secs(1));
        let access = AccessCtrl::new(config, transport, biz_executor(registry.clone()), registry, 1);
        access.set_auth_result_callback(|_payload| false);

        let (tx, rx) = mpsc::channel();
        let _sub = access.subscribe_access_state(move |state, reason| {
            if state == ConnectState::Disconnected {
                let _ = tx.send(reason);
            }
        });

        access.connect().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Some(DisconnectType::AuthFail));
    }

    #[test]
    fn explicit_disconnect_fails_pending_requests_and_clears_state() {
        let registry = Arc::new(DiagnosticsRegistry::new());
        let transport = StubTransport::new();
        let config = AccessConfig::new("localhost", 9000);
        let access = AccessCtrl::new(config, transport, biz_executor(registry.clone()), registry, 1);
        access.connect().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let (tx, rx) = mpsc::channel();
        access.send_msg(100, 0, b"ping", None, Box::new(move |ok, _, _, _| tx.send(ok).unwrap()));

        access.disconnect();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), false);
        assert_eq!(access.state(), ConnectState::Idle);
    }

    #[test]
    fn msg_subscription_rejected_for_reserved_biz_codes() {
        let registry = Arc::new(DiagnosticsRegistry::new());
        let transport = StubTransport::new();
        let config = AccessConfig::new("localhost", 9000).heartbeat(7, Duration::from_secs(1), false, Duration::from_secs(3));
        let access = AccessCtrl::new(config, transport, biz_executor(registry.clone()), registry, 1);
        assert!(access.subscribe_access_msg(7, |_, _| {}).is_none());
        assert!(access.subscribe_access_msg(99, |_, _| {}).is_some());
    }
}
