//! The byte-oriented transport contract and two implementations: a blocking
//! [`TcpTransport`] and an in-memory [`StubTransport`] for tests.
//!
//! A transport is an opaque asynchronous connect/send/receive channel; it
//! knows nothing about framing or sessions. [`crate::access::AccessCtrl`]
//! is the only consumer.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;

/// Parameters for [`Transport::connect`], matching the public NAC config's
/// connection-related fields.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    /// `0` lets the OS assign an ephemeral local port.
    pub local_port: u16,
    /// Remote host to connect to.
    pub address: String,
    /// Remote port to connect to.
    pub port: u16,
    /// Whether the connection should be wrapped in TLS.
    ///
    /// Neither shipped transport implements TLS; a request with `ssl_on =
    /// true` fails fast with a non-zero connect code rather than silently
    /// connecting in the clear.
    pub ssl_on: bool,
}

/// The callback a data-producing transport invokes whenever a chunk of bytes
/// arrives. Installed once via [`Transport::set_on_data`].
pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// An opaque, asynchronous byte transport.
///
/// `connect` and `send` are asynchronous: completion is always delivered
/// through the supplied callback, never by blocking the caller.
pub trait Transport: Send + Sync {
    /// Begins connecting. `on_connect` is invoked exactly once with `0` on
    /// success or a non-zero platform error code on failure.
    fn connect(&self, params: ConnectParams, on_connect: Box<dyn FnOnce(i32) + Send>);

    /// Queues `bytes` for sending. `on_done` is invoked exactly once with
    /// `None` and the number of bytes written on success, or `Some(err)` on
    /// failure.
    fn send(&self, bytes: Bytes, on_done: Box<dyn FnOnce(Option<std::io::Error>, usize) + Send>);

    /// Installs the callback invoked for every chunk of bytes received.
    /// Replaces any previously installed callback.
    fn set_on_data(&self, callback: DataCallback);

    /// Closes the connection. Idempotent.
    fn stop(&self);

    /// Whether the transport currently believes it is connected.
    fn is_running(&self) -> bool;

    /// The local address bound after a successful connect, if known.
    fn local_endpoint(&self) -> Option<SocketAddr>;
}

#[derive(Default)]
struct Inner {
    stream: Mutex<Option<TcpStream>>,
    on_data: Mutex<Option<DataCallback>>,
    running: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
    local_endpoint: Mutex<Option<SocketAddr>>,
}

/// A blocking `std::net::TcpStream`-backed transport.
///
/// `connect` and the reader loop run on dedicated background threads so the
/// public methods never block the caller; `send` still performs a blocking
/// write on the calling thread, matching the teacher crate's preference for
/// simple synchronous I/O over a bespoke async reactor for a single socket.
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    /// Creates a transport with no active connection.
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: Arc::new(Inner::default()) })
    }
}

impl Transport for TcpTransport {
    fn connect(&self, params: ConnectParams, on_connect: Box<dyn FnOnce(i32) + Send>) {
        if params.ssl_on {
            on_connect(-1);
            return;
        }
        let inner = self.inner.clone();
        let addr = format!("{}:{}", params.address, params.port);

        std::thread::spawn(move || {
            match TcpStream::connect(&addr) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    let local = stream.local_addr().ok();
                    let reader_stream = stream.try_clone().expect("tcp stream clone");
                    inner.running.store(true, Ordering::SeqCst);
                    *inner.local_endpoint.lock().unwrap() = local;
                    *inner.stream.lock().unwrap() = Some(stream);

                    let reader_inner = inner.clone();
                    let handle = std::thread::spawn(move || {
                        reader_loop(reader_stream, reader_inner);
                    });
                    *inner.reader.lock().unwrap() = Some(handle);

                    on_connect(0);
                }
                Err(_) => {
                    inner.running.store(false, Ordering::SeqCst);
                    on_connect(-1);
                }
            }
        });
    }

    fn send(&self, bytes: Bytes, on_done: Box<dyn FnOnce(Option<std::io::Error>, usize) + Send>) {
        let mut guard = self.inner.stream.lock().unwrap();
        let Some(stream) = guard.as_mut() else {
            on_done(Some(std::io::Error::new(std::io::ErrorKind::NotConnected, "not connected")), 0);
            return;
        };
        match stream.write_all(&bytes) {
            Ok(()) => on_done(None, bytes.len()),
            Err(err) => on_done(Some(err), 0),
        }
    }

    fn set_on_data(&self, callback: DataCallback) {
        *self.inner.on_data.lock().unwrap() = Some(callback);
    }

    fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(stream) = self.inner.stream.lock().unwrap().take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        if let Some(handle) = self.inner.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        *self.inner.local_endpoint.lock().unwrap()
    }
}

fn reader_loop(mut stream: TcpStream, inner: Arc<Inner>) {
    let mut buf = [0u8; 8192];
    while inner.running.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let cb = inner.on_data.lock().unwrap().clone();
                if let Some(cb) = cb {
                    cb(&buf[..n]);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    inner.running.store(false, Ordering::SeqCst);
}

/// An in-memory transport for tests: `connect` succeeds immediately (after
/// an optional simulated delay), `send` records frames instead of writing to
/// a socket, and [`StubTransport::inject_inbound`] drives the installed
/// on-data callback as if bytes had arrived from the peer.
pub struct StubTransport {
    sent: Mutex<Vec<Bytes>>,
    on_data: Mutex<Option<DataCallback>>,
    running: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    fail_connect: AtomicBool,
}

impl StubTransport {
    /// Creates a stub that connects successfully and accepts sends.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            on_data: Mutex::new(None),
            running: AtomicBool::new(false),
            connect_delay: Mutex::new(None),
            fail_connect: AtomicBool::new(false),
        })
    }

    /// Every frame passed to [`Transport::send`] so far, in order.
    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// Feeds `bytes` to the installed on-data callback, as if received from
    /// the peer.
    pub fn inject_inbound(&self, bytes: &[u8]) {
        let cb = self.on_data.lock().unwrap().clone();
        if let Some(cb) = cb {
            cb(bytes);
        }
    }

    /// Makes the next [`Transport::connect`] call fail with code `-1`.
    pub fn fail_next_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }
}

impl Default for StubTransport {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            on_data: Mutex::new(None),
            running: AtomicBool::new(false),
            connect_delay: Mutex::new(None),
            fail_connect: AtomicBool::new(false),
        }
    }
}

impl Transport for StubTransport {
    fn connect(&self, _params: ConnectParams, on_connect: Box<dyn FnOnce(i32) + Send>) {
        if self.fail_connect.swap(false, Ordering::SeqCst) {
            on_connect(-1);
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        if let Some(delay) = *self.connect_delay.lock().unwrap() {
            std::thread::sleep(delay);
        }
        on_connect(0);
    }

    fn send(&self, bytes: Bytes, on_done: Box<dyn FnOnce(Option<std::io::Error>, usize) + Send>) {
        if !self.running.load(Ordering::SeqCst) {
            on_done(Some(std::io::Error::new(std::io::ErrorKind::NotConnected, "not connected")), 0);
            return;
        }
        let len = bytes.len();
        self.sent.lock().unwrap().push(bytes);
        on_done(None, len);
    }

    fn set_on_data(&self, callback: DataCallback) {
        *self.on_data.lock().unwrap() = Some(callback);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_transport_records_sent_frames() {
        let stub = StubTransport::new();
        let (tx, rx) = std::sync::mpsc::channel();
        stub.connect(ConnectParams::default(), Box::new(move |code| tx.send(code).unwrap()));
        assert_eq!(rx.recv().unwrap(), 0);

        let (tx2, rx2) = std::sync::mpsc::channel();
        stub.send(Bytes::from_static(b"hi"), Box::new(move |err, n| tx2.send((err.is_none(), n)).unwrap()));
        assert_eq!(rx2.recv().unwrap(), (true, 2));
        assert_eq!(stub.sent_frames(), vec![Bytes::from_static(b"hi")]);
    }

    #[test]
    fn stub_transport_fail_next_connect() {
        let stub = StubTransport::new();
        stub.fail_next_connect();
        let (tx, rx) = std::sync::mpsc::channel();
        stub.connect(ConnectParams::default(), Box::new(move |code| tx.send(code).unwrap()));
        assert_eq!(rx.recv().unwrap(), -1);
        assert!(!stub.is_running());
    }

    #[test]
    fn stub_transport_inject_inbound_drives_on_data() {
        let stub = StubTransport::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r2 = received.clone();
        stub.set_on_data(Arc::new(move |bytes| r2.lock().unwrap().extend_from_slice(bytes)));
        stub.inject_inbound(b"hello");
        assert_eq!(*received.lock().unwrap(), b"hello");
    }
}
