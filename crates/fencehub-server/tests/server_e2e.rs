use std::{
    io::{Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use fencehub_server::{Server, ServerError, backend::FenceBackend, state::ServerShared};

/// Compiled-in back-end standing in for a fence module: records every
/// call and returns a scripted verdict.
struct TestBackend {
    result: AtomicBool,
    calls: Mutex<Vec<(&'static str, Vec<u8>)>>,
}

impl TestBackend {
    fn new(result: bool) -> Arc<Self> {
        Arc::new(Self { result: AtomicBool::new(result), calls: Mutex::new(Vec::new()) })
    }

    fn record(&self, op: &'static str, nodename: &[u8]) -> bool {
        self.calls.lock().unwrap().push((op, nodename.to_vec()));
        self.result.load(Ordering::SeqCst)
    }

    fn calls(&self) -> Vec<(&'static str, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FenceBackend for TestBackend {
    fn power_off(&self, nodename: &[u8]) -> bool {
        self.record("off", nodename)
    }

    fn power_on(&self, nodename: &[u8]) -> bool {
        self.record("on", nodename)
    }

    fn reboot(&self, nodename: &[u8]) -> bool {
        self.record("reboot", nodename)
    }
}

struct TestServer {
    addr: SocketAddr,
    shared: Arc<ServerShared>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    fn boot(backend: Arc<TestBackend>) -> Self {
        let server =
            Server::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), backend).unwrap();
        let addr = server.local_addr().unwrap();
        let shared = server.shared();
        let handle = thread::spawn(move || server.run());
        Self { addr, shared, handle }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream
    }

    fn shutdown(self) {
        self.shared.request_stop();
        self.handle.join().unwrap().unwrap();
    }
}

fn read_reply(stream: &mut TcpStream) -> [u8; 4] {
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).unwrap();
    reply
}

fn read_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => panic!("expected clean close, got {err}"),
        }
    }
}

/// Header 0x0081, length 35, NODENAME=node7, SECRET=s3cret.
const FENCE_OFF_REQUEST: [u8; 35] = [
    0x00, 0x81, 0x00, 0x23, //
    0x00, 0x0E, 0x4E, 0x4F, 0x44, 0x45, 0x4E, 0x41, 0x4D, 0x45, 0x3D, 0x6E, 0x6F, 0x64, 0x65,
    0x37, //
    0x00, 0x0D, 0x53, 0x45, 0x43, 0x52, 0x45, 0x54, 0x3D, 0x73, 0x33, 0x63, 0x72, 0x65, 0x74,
];

#[test]
fn echo_keeps_the_connection_open() {
    let server = TestServer::boot(TestBackend::new(true));
    let mut client = server.connect();

    client.write_all(&[0x00, 0x00, 0x00, 0x04]).unwrap();
    assert_eq!(read_reply(&mut client), [0x00, 0x01, 0x00, 0x04]);

    // The connection must survive for another request.
    client.write_all(&[0x00, 0x00, 0x00, 0x04]).unwrap();
    assert_eq!(read_reply(&mut client), [0x00, 0x01, 0x00, 0x04]);

    server.shutdown();
}

#[test]
fn fence_off_success_replies_and_disconnects() {
    let backend = TestBackend::new(true);
    let server = TestServer::boot(Arc::clone(&backend));
    let mut client = server.connect();

    client.write_all(&FENCE_OFF_REQUEST).unwrap();
    assert_eq!(read_reply(&mut client), [0x00, 0xA0, 0x00, 0x04]);
    read_eof(&mut client);

    assert_eq!(backend.calls(), vec![("off", b"node7".to_vec())]);
    server.shutdown();
}

#[test]
fn fence_failure_is_reported() {
    let backend = TestBackend::new(false);
    let server = TestServer::boot(Arc::clone(&backend));
    let mut client = server.connect();

    client.write_all(&FENCE_OFF_REQUEST).unwrap();
    assert_eq!(read_reply(&mut client), [0x00, 0xA1, 0x00, 0x04]);
    read_eof(&mut client);

    server.shutdown();
}

#[test]
fn fence_on_and_reboot_route_to_the_backend() {
    let backend = TestBackend::new(true);
    let server = TestServer::boot(Arc::clone(&backend));

    for (code, _op) in [(0x82u8, "on"), (0x83u8, "reboot")] {
        let mut request = FENCE_OFF_REQUEST;
        request[1] = code;
        let mut client = server.connect();
        client.write_all(&request).unwrap();
        assert_eq!(read_reply(&mut client), [0x00, 0xA0, 0x00, 0x04]);
        read_eof(&mut client);
    }

    assert_eq!(
        backend.calls(),
        vec![("on", b"node7".to_vec()), ("reboot", b"node7".to_vec())]
    );
    server.shutdown();
}

#[test]
fn undersized_frame_closes_without_reply() {
    let backend = TestBackend::new(true);
    let server = TestServer::boot(Arc::clone(&backend));
    let mut client = server.connect();

    // length = 3 is below the header size.
    client.write_all(&[0x00, 0x00, 0x00, 0x03]).unwrap();
    read_eof(&mut client);

    assert!(backend.calls().is_empty());
    server.shutdown();
}

#[test]
fn oversized_frame_is_clamped_then_rejected() {
    let backend = TestBackend::new(true);
    let server = TestServer::boot(Arc::clone(&backend));
    let mut client = server.connect();

    // Claims 1280 bytes; the server clamps to 1024, then rejects the
    // server-direction message type. Padding fills the clamped frame.
    let mut frame = vec![0u8; 1024];
    frame[..4].copy_from_slice(&[0x00, 0xA0, 0x05, 0x00]);
    client.write_all(&frame).unwrap();
    read_eof(&mut client);

    assert!(backend.calls().is_empty());
    server.shutdown();
}

#[test]
fn unknown_message_type_closes_the_connection() {
    let server = TestServer::boot(TestBackend::new(true));
    let mut client = server.connect();

    client.write_all(&[0x7F, 0x7F, 0x00, 0x04]).unwrap();
    read_eof(&mut client);

    server.shutdown();
}

#[test]
fn a_bad_client_does_not_disturb_a_good_one() {
    let server = TestServer::boot(TestBackend::new(true));
    let mut good = server.connect();
    let mut bad = server.connect();

    bad.write_all(&[0x00, 0xA1, 0x00, 0x04]).unwrap();
    good.write_all(&[0x00, 0x00, 0x00, 0x04]).unwrap();

    assert_eq!(read_reply(&mut good), [0x00, 0x01, 0x00, 0x04]);
    read_eof(&mut bad);

    server.shutdown();
}

#[test]
fn split_frame_delivery_is_reassembled() {
    let server = TestServer::boot(TestBackend::new(true));
    let mut client = server.connect();

    // Drip-feed the fence request a few bytes at a time.
    for chunk in FENCE_OFF_REQUEST.chunks(3) {
        client.write_all(chunk).unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(read_reply(&mut client), [0x00, 0xA0, 0x00, 0x04]);
    read_eof(&mut client);

    server.shutdown();
}

#[test]
fn many_clients_churn_through_the_connection_cap() {
    let server = TestServer::boot(TestBackend::new(true));
    let addr = server.addr;

    let clients: Vec<_> = (0..40)
        .map(|_| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
                stream.write_all(&[0x00, 0x00, 0x00, 0x04]).unwrap();
                let mut reply = [0u8; 4];
                stream.read_exact(&mut reply).unwrap();
                assert_eq!(reply, [0x00, 0x01, 0x00, 0x04]);
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }

    server.shutdown();
}

#[test]
fn shutdown_closes_idle_connections() {
    let server = TestServer::boot(TestBackend::new(true));
    let mut idle = server.connect();

    // Prove the connection is established and serviced first.
    idle.write_all(&[0x00, 0x00, 0x00, 0x04]).unwrap();
    assert_eq!(read_reply(&mut idle), [0x00, 0x01, 0x00, 0x04]);

    server.shutdown();
    read_eof(&mut idle);
}

#[test]
fn agent_probe_and_fence_round_trip() {
    let backend = TestBackend::new(true);
    let server = TestServer::boot(Arc::clone(&backend));
    let port = server.addr.port().to_string();

    let connector =
        fencehub_agent::connector::Connector::new("IPV4", "127.0.0.1", &port).unwrap();
    assert!(connector.connect().unwrap().check_connection().unwrap());

    let verdict = connector
        .connect()
        .unwrap()
        .fence_action(fencehub_agent::params::Action::Reboot, "node7", "s3cret")
        .unwrap();
    assert!(verdict);
    assert_eq!(backend.calls(), vec![("reboot", b"node7".to_vec())]);

    server.shutdown();
}
