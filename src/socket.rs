//! Blocking transports and the per-transport loss/termination policies.
//!
//! The transfer engine speaks to the network through the [`Transport`]
//! trait: send one chunk, then (at a window boundary) receive one batch
//! sized to everything sent since the previous batch. Two real transports
//! implement it:
//!
//! - [`UdpTransport`] — connectionless, loss-prone. A batch that does not
//!   become readable within [`BATCH_TIMEOUT`] is declared **lost**, not an
//!   error: the transfer continues with the next window.
//! - [`StreamTransport`] — connection-oriented, order-preserving. A batch
//!   read loops on short reads; EOF before the expected count means the
//!   connection **terminated**, again batch-scoped rather than fatal.
//!
//! Both policies signal "nothing to persist this round" via
//! [`BatchOutcome`] and emit the single-character diagnostic marker on
//! stderr. Genuine I/O failures (send errors, unexpected recv errors) are
//! fatal and surface as [`XferError`].

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream, UdpSocket};
use std::time::Duration;

use thiserror::Error;

use crate::addr::Address;

/// How long the datagram policy waits for a batch before declaring it lost.
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal transfer-layer errors. Batch loss and connection termination are
/// *not* errors; they are [`BatchOutcome`] variants.
#[derive(Debug, Error)]
pub enum XferError {
    /// A chunk could not be sent.
    #[error("send failed: {0}")]
    Send(std::io::Error),
    /// An unexpected receive-side failure (not a timeout).
    #[error("receive failed: {0}")]
    Recv(std::io::Error),
    /// Source or output file I/O failed.
    #[error("file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A verified batch arrived from the wrong peer. Integrity violation;
    /// never downgraded to a warning.
    #[error("batch received from {got}, expected {expected}")]
    SourceMismatch {
        /// Captured sender of the offending batch.
        got: Address,
        /// The peer the transfer was set up against.
        expected: Address,
    },
    /// Invalid caller-supplied configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Batch outcome
// ---------------------------------------------------------------------------

/// Result of one batched receive.
#[derive(Debug)]
pub enum BatchOutcome {
    /// The full batch arrived.
    Received {
        /// Exactly the echoed bytes of this window.
        data: Vec<u8>,
        /// Captured sender address (datagram transports); `None` for stream
        /// transports, where the connected peer was validated at connect
        /// time and no independent check is needed.
        source: Option<Address>,
    },
    /// Datagram policy: nothing became readable within [`BATCH_TIMEOUT`].
    Lost,
    /// Stream policy: EOF before the expected byte count.
    Closed,
}

/// Emit the single-character liveness marker for a dropped batch or a
/// closed connection. Deliberately unstructured (see the diagnostic-channel
/// contract); structured detail goes to the logger.
fn mark_dropped() {
    eprint!(".");
    let _ = std::io::stderr().flush();
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// One chunk out, one batch back. Implementations own the loss policy for
/// their transport; the engine owns windowing and verification.
pub trait Transport {
    /// Send one chunk as a unit. Any failure is fatal.
    fn send_chunk(&mut self, buf: &[u8]) -> Result<(), XferError>;

    /// Receive one batch of exactly `n_sent` bytes, or report it lost /
    /// the connection closed.
    fn recv_batch(&mut self, n_sent: usize) -> Result<BatchOutcome, XferError>;
}

// ---------------------------------------------------------------------------
// UDP (datagram) transport
// ---------------------------------------------------------------------------

/// Datagram transport: one datagram per chunk, one datagram per batch back.
pub struct UdpTransport {
    socket: UdpSocket,
    dst: SocketAddrV4,
}

impl UdpTransport {
    /// Wrap an already-bound socket targeting `dst`.
    ///
    /// The socket's read timeout is set to [`BATCH_TIMEOUT`]; that timeout
    /// *is* the loss detector for this family.
    pub fn new(socket: UdpSocket, dst: SocketAddrV4) -> Result<Self, XferError> {
        socket.set_read_timeout(Some(BATCH_TIMEOUT)).map_err(XferError::Recv)?;
        Ok(UdpTransport { socket, dst })
    }

    /// Bind a client socket on an ephemeral port, ready for [`UdpTransport::new`].
    pub fn client_socket() -> std::io::Result<UdpSocket> {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
    }

    /// Send the peer's flush command: an empty datagram.
    ///
    /// The datagram echo peer coalesces chunks until it sees this command,
    /// then reflects the whole batch as one datagram. Install this as the
    /// transfer's synchronization hook when talking to such a peer. Data
    /// chunks are never empty, so the command cannot collide with payload.
    pub fn send_flush(&mut self) -> Result<(), XferError> {
        self.socket.send_to(&[], self.dst).map_err(XferError::Send)?;
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn send_chunk(&mut self, buf: &[u8]) -> Result<(), XferError> {
        let n = self.socket.send_to(buf, self.dst).map_err(XferError::Send)?;
        if n != buf.len() {
            return Err(XferError::Send(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short datagram send: {n} of {} bytes", buf.len()),
            )));
        }
        Ok(())
    }

    fn recv_batch(&mut self, n_sent: usize) -> Result<BatchOutcome, XferError> {
        let mut data = vec![0u8; n_sent];
        match self.socket.recv_from(&mut data) {
            Ok((n_read, src)) => {
                data.truncate(n_read);
                let source = match src {
                    std::net::SocketAddr::V4(sa) => Address::Fixed(sa),
                    std::net::SocketAddr::V6(sa) => {
                        return Err(XferError::Recv(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("unexpected IPv6 sender {sa}"),
                        )))
                    }
                };
                Ok(BatchOutcome::Received { data, source: Some(source) })
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // The echoed batch was dropped somewhere; not an error.
                log::debug!("batch of {n_sent} bytes timed out, treating as lost");
                mark_dropped();
                Ok(BatchOutcome::Lost)
            }
            Err(e) => Err(XferError::Recv(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// TCP (stream) transport
// ---------------------------------------------------------------------------

/// Stream transport: blocking ordered writes, exact-count batch reads.
pub struct StreamTransport {
    stream: TcpStream,
}

impl StreamTransport {
    /// Wrap a connected stream. The peer is fixed by the connection, so
    /// batches carry no independent source address.
    pub fn new(stream: TcpStream) -> Self {
        StreamTransport { stream }
    }
}

impl Transport for StreamTransport {
    fn send_chunk(&mut self, buf: &[u8]) -> Result<(), XferError> {
        self.stream.write_all(buf).map_err(XferError::Send)
    }

    fn recv_batch(&mut self, n_sent: usize) -> Result<BatchOutcome, XferError> {
        let mut data = vec![0u8; n_sent];
        let mut n_read = 0;
        while n_read < n_sent {
            match self.stream.read(&mut data[n_read..]) {
                Ok(0) => {
                    // Peer closed mid-batch; abandon the batch, keep going.
                    log::debug!(
                        "connection closed after {n_read} of {n_sent} batch bytes"
                    );
                    mark_dropped();
                    return Ok(BatchOutcome::Closed);
                }
                Ok(n) => n_read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // A failed read on a stream means the connection is gone;
                    // batch-scoped, same as EOF.
                    log::debug!("read error after {n_read} of {n_sent} batch bytes: {e}");
                    mark_dropped();
                    return Ok(BatchOutcome::Closed);
                }
            }
        }
        Ok(BatchOutcome::Received { data, source: None })
    }
}
