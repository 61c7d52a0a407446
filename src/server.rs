//! Echo peers: the counterpart the exerciser talks to.
//!
//! Two single-threaded loops, one per transport mode:
//!
//! - [`run_udp_echo`] accumulates a sender's datagrams and reflects them
//!   back **as one datagram** when the sender issues a flush command (an
//!   empty datagram — data chunks are never empty). The exerciser's batch
//!   receive reads exactly one reply per window, so the peer must coalesce;
//!   the client's synchronization hook is what sends the command.
//! - [`run_tcp_echo`] accepts one connection at a time and echoes its byte
//!   stream until the client closes ([`serve_stream`] is the per-connection
//!   copy loop). Streams preserve order and boundaries are irrelevant, so
//!   no command is needed there.
//!
//! Neither loop interprets the payload bytes themselves.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};

/// Largest datagram the reflector accepts in one read.
const MAX_DATAGRAM: usize = 65_535;

/// Buffer size for the stream copy loop.
const COPY_BUF: usize = 2048;

/// Accumulate datagrams per sender and reflect the batch on each flush
/// command, until the socket fails.
///
/// One batch buffer per sender; the protocol assumes a single client per
/// transfer, but interleaved clients stay separated by source address.
pub fn run_udp_echo(socket: &UdpSocket) -> std::io::Result<()> {
    use std::collections::HashMap;
    use std::net::SocketAddr;

    let mut pending: HashMap<SocketAddr, Vec<u8>> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, src) = socket.recv_from(&mut buf)?;
        if n == 0 {
            // Flush command: echo the accumulated batch as one unit.
            let batch = pending.remove(&src).unwrap_or_default();
            log::debug!("flushing {} bytes back to {src}", batch.len());
            socket.send_to(&batch, src)?;
        } else {
            pending.entry(src).or_default().extend_from_slice(&buf[..n]);
        }
    }
}

/// Copy a connection's bytes back to it until EOF.
pub fn serve_stream(stream: &mut TcpStream) -> std::io::Result<()> {
    let mut buf = [0u8; COPY_BUF];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n])?;
    }
}

/// Accept connections one at a time and echo each until its client closes.
///
/// A failed connection ends that client's session, not the server.
pub fn run_tcp_echo(listener: &TcpListener) -> std::io::Result<()> {
    loop {
        let (mut stream, peer) = listener.accept()?;
        log::info!("stream peer connected: {peer}");
        if let Err(e) = serve_stream(&mut stream) {
            log::warn!("stream peer {peer} dropped: {e}");
        }
    }
}
