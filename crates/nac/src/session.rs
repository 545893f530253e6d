//! Request/response correlation over a framed transport.
//!
//! [`SessionManager::send_msg`] is the data-plane half of the NAC client:
//! it allocates or accepts a sequence id, records a pending entry keyed by
//! that id, frames and dispatches the request, and arms an optional
//! one-shot timeout. Exactly one of {response, timeout, send failure,
//! disconnect} ever fires a given entry's callback, because only the
//! side that successfully removes the entry from the pending map is
//! allowed to invoke it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use threading::{DiagnosticsRegistry, Executor, SteadyTimer};

use crate::protocol::{Packet, ProtocolAdapter};
use crate::snowflake::SnowflakeGenerator;
use crate::transport::Transport;

/// Invoked exactly once per [`SessionManager::send_msg`] call, with
/// `(sent_ok, biz_code, seq_id, payload)`. `sent_ok=false` carries an empty
/// payload; the caller cannot distinguish a timeout from a transport error
/// or a disconnect without separately inspecting connection state.
pub type ResponseCallback = Box<dyn FnOnce(bool, u32, u64, Bytes) + Send>;

struct PendingEntry {
    callback: Mutex<Option<ResponseCallback>>,
    timer: Mutex<Option<Arc<SteadyTimer>>>,
}

impl PendingEntry {
    fn fire(&self, sent_ok: bool, biz_code: u32, seq_id: u64, payload: Bytes) {
        if let Some(timer) = self.timer.lock().take() {
            timer.stop();
        }
        if let Some(cb) = self.callback.lock().take() {
            cb(sent_ok, biz_code, seq_id, payload);
        }
    }
}

/// Owns the pending-request map and drives its lifecycle against a
/// [`ProtocolAdapter`], a [`Transport`], and a packet-processing
/// [`Executor`] used to host per-request timeout timers.
pub struct SessionManager {
    adapter: ProtocolAdapter,
    transport: Arc<dyn Transport>,
    executor: Arc<Executor>,
    registry: Arc<DiagnosticsRegistry>,
    generator: SnowflakeGenerator,
    pending: Arc<Mutex<HashMap<u64, Arc<PendingEntry>>>>,
}

impl SessionManager {
    /// Builds a session manager over `transport`, framing with `adapter` and
    /// hosting timeout timers on `executor`. `machine_id` seeds the
    /// sequence-id generator used when callers pass `seq_id == 0`.
    pub fn new(
        adapter: ProtocolAdapter,
        transport: Arc<dyn Transport>,
        executor: Arc<Executor>,
        registry: Arc<DiagnosticsRegistry>,
        machine_id: u16,
    ) -> Self {
        Self {
            adapter,
            transport,
            executor,
            registry,
            generator: SnowflakeGenerator::new(machine_id),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Sends `data` tagged `biz_code`. Returns the sequence id used, or `-1`
    /// if the payload could not be framed (oversized) — in the latter case
    /// `callback` is still invoked synchronously with `sent_ok=false` before
    /// this returns.
    ///
    /// `seq_id == 0` allocates a fresh id from the snowflake generator.
    /// `timeout` of `None` (or `Some(Duration::ZERO)`) disables the
    /// per-request timeout; the entry then waits indefinitely for a
    /// response or a disconnect.
    pub fn send_msg(
        &self,
        biz_code: u32,
        seq_id: u64,
        data: &[u8],
        timeout: Option<Duration>,
        callback: ResponseCallback,
    ) -> i64 {
        let seq_id = if seq_id == 0 { self.generator.next_id() } else { seq_id };

        let entry = Arc::new(PendingEntry {
            callback: Mutex::new(Some(callback)),
            timer: Mutex::new(None),
        });
        self.pending.lock().insert(seq_id, entry.clone());

        if let Some(timeout) = timeout {
            if !timeout.is_zero() {
                let pending = self.pending.clone();
                let entry_for_timer = entry.clone();
                let timer = SteadyTimer::once(
                    format!("session-timeout-{seq_id}"),
                    timeout,
                    self.executor.clone(),
                    move |_| {
                        if pending.lock().remove(&seq_id).is_some() {
                            entry_for_timer.fire(false, 0, seq_id, Bytes::new());
                        }
                    },
                );
                *entry.timer.lock() = Some(timer);
            }
        }

        let packet = match self.adapter.create_packet(biz_code, seq_id, data) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::debug!(target: "nac", %seq_id, %err, "send_msg framing failed");
                if self.pending.lock().remove(&seq_id).is_some() {
                    entry.fire(false, 0, seq_id, Bytes::new());
                }
                return -1;
            }
        };

        let pending = self.pending.clone();
        let entry_for_send = entry.clone();
        self.transport.send(
            packet,
            Box::new(move |err, _written| {
                if err.is_some() && pending.lock().remove(&seq_id).is_some() {
                    entry_for_send.fire(false, 0, seq_id, Bytes::new());
                }
            }),
        );

        seq_id as i64
    }

    /// Delivers an inbound packet, completing the matching pending entry if
    /// one exists. A seq_id with no match is dropped silently — it may
    /// already have timed out, or be an unsolicited push.
    pub fn on_packet(&self, packet: Packet) {
        let entry = self.pending.lock().remove(&packet.seq_id);
        match entry {
            Some(entry) => entry.fire(true, packet.biz_code, packet.seq_id, packet.payload),
            None => tracing::trace!(target: "nac", seq_id = packet.seq_id, "unsolicited packet, dropped"),
        }
    }

    /// Fails every currently pending entry with `sent_ok=false` and clears
    /// the map, as on a transport disconnect.
    pub fn fail_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (seq_id, entry) in drained {
            entry.fire(false, 0, seq_id, Bytes::new());
        }
    }

    /// The number of requests currently awaiting a response or timeout.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// The registry this manager's executor reports diagnostics into.
    pub fn registry(&self) -> &Arc<DiagnosticsRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_PAYLOAD_SIZE;
    use crate::transport::{ConnectParams, StubTransport};
    use std::sync::mpsc;
    use std::sync::Arc as StdArc;
    use threading::{DiagnosticsRegistry, Executor, FiberExecutor, FiberExecutorConfig};

    fn manager(transport: StdArc<StubTransport>) -> SessionManager {
        let registry = Arc::new(DiagnosticsRegistry::new());
        let executor = Arc::new(Executor::Fiber(FiberExecutor::new(
            FiberExecutorConfig { name: "packet".to_string(), ..Default::default() },
            registry.clone(),
        )));
        SessionManager::new(ProtocolAdapter::new(1), transport, executor, registry, 1)
    }

    #[test]
    fn response_completes_the_pending_entry_exactly_once() {
        let transport = StubTransport::new();
        let (tx, rx) = mpsc::channel();
        transport.connect(ConnectParams::default(), Box::new(move |code| tx.send(code).unwrap()));
        rx.recv().unwrap();

        let mgr = manager(transport.clone());
        let (result_tx, result_rx) = mpsc::channel();
        let seq_id = mgr.send_msg(100, 0, b"ping", Some(Duration::from_secs(5)), Box::new(move |ok, biz, seq, data| {
            result_tx.send((ok, biz, seq, data)).unwrap();
        }));
        assert!(seq_id > 0);

        mgr.on_packet(Packet { version: 1, biz_code: 200, seq_id: seq_id as u64, payload: Bytes::from_static(b"pong") });
        let (ok, biz, seq, data) = result_rx.recv().unwrap();
        assert!(ok);
        assert_eq!(biz, 200);
        assert_eq!(seq, seq_id as u64);
        assert_eq!(&data[..], b"pong");
        assert_eq!(mgr.pending_count(), 0);
    }

    #[test]
    fn timeout_fires_with_sent_ok_false() {
        let transport = StubTransport::new();
        let (tx, rx) = mpsc::channel();
        transport.connect(ConnectParams::default(), Box::new(move |code| tx.send(code).unwrap()));
        rx.recv().unwrap();

        let mgr = manager(transport);
        let (result_tx, result_rx) = mpsc::channel();
        mgr.send_msg(100, 0, b"ping", Some(Duration::from_millis(30)), Box::new(move |ok, _biz, _seq, data| {
            result_tx.send((ok, data)).unwrap();
        }));

        let (ok, data) = result_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!ok);
        assert!(data.is_empty());
    }

    #[test]
    fn disconnect_fails_every_pending_entry_immediately() {
        let transport = StubTransport::new();
        let (tx, rx) = mpsc::channel();
        transport.connect(ConnectParams::default(), Box::new(move |code| tx.send(code).unwrap()));
        rx.recv().unwrap();

        let mgr = manager(transport);
        let (tx1, rx1) = mpsc::channel();
        let (tx2, rx2) = mpsc::channel();
        mgr.send_msg(1, 0, b"a", None, Box::new(move |ok, _, _, _| tx1.send(ok).unwrap()));
        mgr.send_msg(2, 0, b"b", None, Box::new(move |ok, _, _, _| tx2.send(ok).unwrap()));

        mgr.fail_all();
        assert_eq!(rx1.recv().unwrap(), false);
        assert_eq!(rx2.recv().unwrap(), false);
        assert_eq!(mgr.pending_count(), 0);
    }

    #[test]
    fn oversized_payload_fails_synchronously_with_seq_id_negative_one() {
        let transport = StubTransport::new();
        let (tx, rx) = mpsc::channel();
        transport.connect(ConnectParams::default(), Box::new(move |code| tx.send(code).unwrap()));
        rx.recv().unwrap();

        let mgr = manager(transport);
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let (result_tx, result_rx) = mpsc::channel();
        let seq_id = mgr.send_msg(1, 0, &payload, None, Box::new(move |ok, _, _, _| result_tx.send(ok).unwrap()));
        assert_eq!(seq_id, -1);
        assert_eq!(result_rx.recv().unwrap(), false);
    }

    #[test]
    fn unsolicited_response_produces_no_callback() {
        let transport = StubTransport::new();
        let (tx, rx) = mpsc::channel();
        transport.connect(ConnectParams::default(), Box::new(move |code| tx.send(code).unwrap()));
        rx.recv().unwrap();

        let mgr = manager(transport);
        // No panic, no callback invoked — nothing to assert beyond "it returns".
        mgr.on_packet(Packet { version: 1, biz_code: 1, seq_id: 999, payload: Bytes::new() });
    }
}
