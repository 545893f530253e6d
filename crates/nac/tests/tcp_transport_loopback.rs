//! Smoke test exercising [`TcpTransport`] against a real loopback socket,
//! rather than the in-memory [`StubTransport`] used everywhere else.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nac::transport::{ConnectParams, TcpTransport, Transport};

#[test]
fn connects_sends_and_receives_over_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        stream.write_all(b"world").unwrap();
    });

    let transport = TcpTransport::new();
    let (connect_tx, connect_rx) = mpsc::channel();
    transport.connect(
        ConnectParams { address: addr.ip().to_string(), port: addr.port(), ..Default::default() },
        Box::new(move |code| connect_tx.send(code).unwrap()),
    );
    assert_eq!(connect_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);

    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();
    let (data_tx, data_rx) = mpsc::channel();
    transport.set_on_data(Arc::new(move |bytes| {
        received2.lock().unwrap().extend_from_slice(bytes);
        let _ = data_tx.send(());
    }));

    let (send_tx, send_rx) = mpsc::channel();
    transport.send(
        bytes::Bytes::from_static(b"hello"),
        Box::new(move |err, n| send_tx.send((err.is_none(), n)).unwrap()),
    );
    assert_eq!(send_rx.recv_timeout(Duration::from_secs(2)).unwrap(), (true, 5));

    data_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(&received.lock().unwrap()[..], b"world");

    transport.stop();
    assert!(!transport.is_running());
    server.join().unwrap();
}
