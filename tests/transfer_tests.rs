//! End-to-end transfer tests over real loopback sockets.
//!
//! Each test pairs the windowed client engine with an echo peer running on
//! its own thread. Peers are detached; they live on loopback ephemeral
//! ports for the duration of the test process.

use std::io::{Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::path::{Path, PathBuf};
use std::thread;

use echo_probe::addr::Address;
use echo_probe::server;
use echo_probe::socket::{StreamTransport, UdpTransport, XferError};
use echo_probe::transfer::{copy_path, transfer_file, TransferConfig};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_source(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn v4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(sa) => sa,
        SocketAddr::V6(_) => panic!("expected an IPv4 loopback address"),
    }
}

// ---------------------------------------------------------------------------
// Test 1: datagram byte-exact echo (2 full windows + tail)
// ---------------------------------------------------------------------------

#[test]
fn udp_byte_exact_echo() {
    let server_sock = UdpSocket::bind("127.0.0.1:0").expect("bind");
    let server_addr = v4(server_sock.local_addr().unwrap());
    thread::spawn(move || {
        let _ = server::run_udp_echo(&server_sock);
    });

    let dir = tempfile::tempdir().unwrap();
    let data = patterned(10 * 1024);
    let path = write_source(&dir, "data.bin", &data);

    let expected = Address::Fixed(server_addr);
    let socket = UdpTransport::client_socket().unwrap();
    let mut transport = UdpTransport::new(socket, server_addr).unwrap();

    let cfg = TransferConfig::new(512, 4).unwrap();
    let stats = transfer_file(
        &mut transport,
        &expected,
        &path,
        cfg,
        Some(UdpTransport::send_flush),
    )
    .expect("transfer");

    // 10 KiB at 512 x 4: windows of 2048, 2048, and a partial tail.
    assert_eq!(stats.bytes_sent, data.len() as u64);
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.batches_lost, 0);
    assert_eq!(std::fs::read(copy_path(&path)).unwrap(), data);
}

// ---------------------------------------------------------------------------
// Test 2: stream byte-exact echo
// ---------------------------------------------------------------------------

#[test]
fn tcp_byte_exact_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let server_addr = v4(listener.local_addr().unwrap());
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = server::serve_stream(&mut stream);
    });

    let dir = tempfile::tempdir().unwrap();
    let data = patterned(10 * 1024);
    let path = write_source(&dir, "data.bin", &data);

    let expected = Address::Fixed(server_addr);
    let stream = TcpStream::connect(server_addr).expect("connect");
    let mut transport = StreamTransport::new(stream);

    let cfg = TransferConfig::new(512, 4).unwrap();
    let stats = transfer_file::<_, fn(&mut StreamTransport) -> Result<(), XferError>>(
        &mut transport,
        &expected,
        &path,
        cfg,
        None,
    )
    .expect("transfer");

    assert_eq!(stats.bytes_sent, data.len() as u64);
    assert_eq!(stats.batches_lost, 0);
    assert_eq!(std::fs::read(copy_path(&path)).unwrap(), data);
}

// ---------------------------------------------------------------------------
// Test 3: datagram loss — one window times out, order survives
// ---------------------------------------------------------------------------

/// A reflector that obeys the flush-command protocol but deliberately
/// drops the batch at `drop_index` (zero-based).
fn lossy_udp_reflector(socket: UdpSocket, drop_index: usize) {
    let mut pending: Vec<u8> = Vec::new();
    let mut batch_index = 0usize;
    let mut buf = vec![0u8; 65_535];
    loop {
        let (n, src) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(_) => return,
        };
        if n == 0 {
            let batch = std::mem::take(&mut pending);
            if batch_index != drop_index {
                let _ = socket.send_to(&batch, src);
            }
            batch_index += 1;
        } else {
            pending.extend_from_slice(&buf[..n]);
        }
    }
}

#[test]
fn udp_lost_window_leaves_gap_in_order() {
    let server_sock = UdpSocket::bind("127.0.0.1:0").expect("bind");
    let server_addr = v4(server_sock.local_addr().unwrap());
    thread::spawn(move || lossy_udp_reflector(server_sock, 1));

    let dir = tempfile::tempdir().unwrap();
    // Exactly 3 full windows of 4 x 512.
    let data = patterned(3 * 2048);
    let path = write_source(&dir, "data.bin", &data);

    let expected = Address::Fixed(server_addr);
    let socket = UdpTransport::client_socket().unwrap();
    let mut transport = UdpTransport::new(socket, server_addr).unwrap();

    let cfg = TransferConfig::new(512, 4).unwrap();
    let stats = transfer_file(
        &mut transport,
        &expected,
        &path,
        cfg,
        Some(UdpTransport::send_flush),
    )
    .expect("transfer");

    assert_eq!(stats.batches, 3);
    assert_eq!(stats.batches_lost, 1);

    // Window 2's bytes are absent; windows 1 and 3 are intact and ordered.
    let copy = std::fs::read(copy_path(&path)).unwrap();
    let mut want = data[..2048].to_vec();
    want.extend_from_slice(&data[2 * 2048..]);
    assert_eq!(copy, want);
}

// ---------------------------------------------------------------------------
// Test 4: stream peer closes mid-transfer — batch-scoped, not fatal
// ---------------------------------------------------------------------------

/// Echo the first `echo_limit` bytes, silently drain `drain` more, close.
fn truncating_stream_peer(listener: TcpListener, echo_limit: usize, drain: usize) {
    let (mut stream, _) = listener.accept().expect("accept");
    let mut buf = [0u8; 2048];
    let mut echoed = 0usize;
    while echoed < echo_limit {
        let n = stream.read(&mut buf).expect("peer read");
        stream.write_all(&buf[..n]).expect("peer write");
        echoed += n;
    }
    let mut drained = 0usize;
    while drained < drain {
        let n = stream.read(&mut buf).expect("peer drain");
        if n == 0 {
            break;
        }
        drained += n;
    }
    // Dropping the stream closes the connection with the tail unechoed.
}

#[test]
fn tcp_peer_close_truncates_copy_without_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let server_addr = v4(listener.local_addr().unwrap());
    // Echo two full windows (4096 bytes), swallow the 1024-byte tail.
    thread::spawn(move || truncating_stream_peer(listener, 4096, 1024));

    let dir = tempfile::tempdir().unwrap();
    let data = patterned(4096 + 1024);
    let path = write_source(&dir, "data.bin", &data);

    let expected = Address::Fixed(server_addr);
    let stream = TcpStream::connect(server_addr).expect("connect");
    let mut transport = StreamTransport::new(stream);

    let cfg = TransferConfig::new(512, 4).unwrap();
    let stats = transfer_file::<_, fn(&mut StreamTransport) -> Result<(), XferError>>(
        &mut transport,
        &expected,
        &path,
        cfg,
        None,
    )
    .expect("a terminated batch must not abort the transfer");

    assert_eq!(stats.bytes_sent, data.len() as u64);
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.batches_lost, 1);
    assert_eq!(std::fs::read(copy_path(&path)).unwrap(), &data[..4096]);
}

// ---------------------------------------------------------------------------
// Test 5: datagram sender verification against the real socket address
// ---------------------------------------------------------------------------

#[test]
fn udp_reply_from_unexpected_peer_is_fatal() {
    let server_sock = UdpSocket::bind("127.0.0.1:0").expect("bind");
    let server_addr = v4(server_sock.local_addr().unwrap());
    thread::spawn(move || {
        let _ = server::run_udp_echo(&server_sock);
    });

    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "data.bin", &patterned(1024));

    // Expect a peer that is not the one actually echoing.
    let wrong_port = server_addr.port().wrapping_add(1).max(1);
    let expected = Address::parse_fixed(Some("127.0.0.1"), wrong_port).unwrap();
    let socket = UdpTransport::client_socket().unwrap();
    let mut transport = UdpTransport::new(socket, server_addr).unwrap();

    let cfg = TransferConfig::new(512, 4).unwrap();
    let err = transfer_file(
        &mut transport,
        &expected,
        &path,
        cfg,
        Some(UdpTransport::send_flush),
    )
    .expect_err("mismatched sender must be an integrity violation");
    assert!(matches!(err, XferError::SourceMismatch { .. }));
}

// ---------------------------------------------------------------------------
// Helpers shared with nothing; keep Path in scope for copy_path assertions
// ---------------------------------------------------------------------------

#[test]
fn copy_name_convention() {
    assert_eq!(
        copy_path(Path::new("report.txt")),
        PathBuf::from("report.txt_echo")
    );
}
