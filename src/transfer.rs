//! Windowed echo-transfer engine and receive-side verification.
//!
//! One invocation streams a source file through a [`Transport`] in bounded
//! bursts and persists the verified echo to a sibling output file. Per
//! invocation the engine moves through four states:
//!
//! ```text
//!               chunk sent, window not full
//!                  ┌──────────┐
//!                  ▼          │
//!  ┌───────────────────────────┐  chunks == times   ┌──────────────┐
//!  │         STREAMING         │───────────────────▶│  BATCH_SYNC  │
//!  └─────────────┬─────────────┘                    └──────┬───────┘
//!                │ source exhausted,                       │ counters reset
//!                │ leftover chunks          ◀──────────────┘
//!                ▼
//!  ┌───────────────────────────┐                    ┌──────────────┐
//!  │       DRAINING_TAIL       │───────────────────▶│     DONE     │
//!  └───────────────────────────┘   tail verified    └──────────────┘
//! ```
//!
//! `BATCH_SYNC` runs the optional synchronization hook, performs one
//! combined receive sized to the cumulative bytes of the window, verifies
//! the sender (datagram only), and appends the payload to the copy. A lost
//! or terminated batch skips the append and the transfer continues; a
//! batch from the wrong peer is a fatal integrity violation.
//!
//! The engine never owns the socket; it owns the two file handles for
//! exactly the duration of the call.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::addr::Address;
use crate::socket::{BatchOutcome, Transport, XferError};

/// Suffix appended to the source file's name to form the echo copy's name.
pub const FILE_APPENDIX: &str = "_echo";

// ---------------------------------------------------------------------------
// Configuration and stats
// ---------------------------------------------------------------------------

/// Caller-supplied windowing parameters.
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Bytes read from the source per chunk (one datagram in datagram mode).
    pub chunk_size: usize,
    /// Chunks per window; the batch receive covers this many chunks.
    pub times: usize,
}

impl TransferConfig {
    /// Validate the windowing parameters. Both must be at least 1.
    pub fn new(chunk_size: usize, times: usize) -> Result<Self, XferError> {
        if chunk_size == 0 {
            return Err(XferError::Config("chunk_size must be positive".into()));
        }
        if times == 0 {
            return Err(XferError::Config("times must be positive".into()));
        }
        Ok(TransferConfig { chunk_size, times })
    }
}

/// Counters for one completed transfer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Total bytes read from the source and sent.
    pub bytes_sent: u64,
    /// Batch receives performed (full windows plus the tail, if any).
    pub batches: u32,
    /// Batches that came back lost or found the connection closed.
    pub batches_lost: u32,
}

// ---------------------------------------------------------------------------
// Output naming
// ---------------------------------------------------------------------------

/// The echo copy's path: the source path with [`FILE_APPENDIX`] appended
/// to its file name (`data.bin` → `data.bin_echo`).
pub fn copy_path(orig: &Path) -> PathBuf {
    let mut name = orig
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(FILE_APPENDIX);
    orig.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Ephemeral per-transfer state. Created by [`transfer_file`], dropped when
/// the transfer completes or fails.
struct Session<'a, T: Transport> {
    transport: &'a mut T,
    /// Peer every datagram batch must originate from.
    expected: &'a Address,
    copy: BufWriter<File>,
    /// Chunks sent since the last verified batch.
    chunks_in_window: usize,
    /// Bytes sent since the last verified batch.
    bytes_in_window: usize,
    stats: TransferStats,
}

impl<T: Transport> Session<'_, T> {
    /// One `BATCH_SYNC` step: hook, combined receive, verify, persist,
    /// reset the window counters.
    fn batch_sync<F>(&mut self, hook: &mut Option<F>) -> Result<(), XferError>
    where
        F: FnMut(&mut T) -> Result<(), XferError>,
    {
        if let Some(f) = hook.as_mut() {
            f(self.transport)?;
        }

        self.stats.batches += 1;
        match self.transport.recv_batch(self.bytes_in_window)? {
            BatchOutcome::Received { data, source } => {
                // Datagram transports label each batch with its sender;
                // anything but the expected peer crossed the trust boundary.
                if let Some(src) = source {
                    if !src.matches(self.expected) {
                        return Err(XferError::SourceMismatch {
                            got: src,
                            expected: self.expected.clone(),
                        });
                    }
                }
                self.copy.write_all(&data)?;
            }
            BatchOutcome::Lost | BatchOutcome::Closed => {
                // Batch-scoped: nothing to persist this round.
                self.stats.batches_lost += 1;
            }
        }

        self.chunks_in_window = 0;
        self.bytes_in_window = 0;
        Ok(())
    }
}

/// Stream `path` through `transport` in `cfg.times`-chunk windows,
/// verifying and persisting the echo to [`copy_path`]`(path)`.
///
/// `hook`, when present, runs immediately before every batch receive
/// (including the tail) to trigger the peer's echo out of band.
///
/// The transport outlives the call; both files are closed on every exit
/// path. Returns the transfer counters on success.
pub fn transfer_file<T, F>(
    transport: &mut T,
    expected: &Address,
    path: &Path,
    cfg: TransferConfig,
    mut hook: Option<F>,
) -> Result<TransferStats, XferError>
where
    T: Transport,
    F: FnMut(&mut T) -> Result<(), XferError>,
{
    let mut orig = File::open(path)?;
    let copy = File::create(copy_path(path))?;

    let mut session = Session {
        transport,
        expected,
        copy: BufWriter::new(copy),
        chunks_in_window: 0,
        bytes_in_window: 0,
        stats: TransferStats::default(),
    };

    // STREAMING: read-send until the source is exhausted, syncing at every
    // window boundary.
    let mut buf = vec![0u8; cfg.chunk_size];
    loop {
        let bytes_read = orig.read(&mut buf)?;
        if bytes_read == 0 {
            break;
        }
        session.transport.send_chunk(&buf[..bytes_read])?;
        session.chunks_in_window += 1;
        session.bytes_in_window += bytes_read;
        session.stats.bytes_sent += bytes_read as u64;

        if session.chunks_in_window == cfg.times {
            session.batch_sync(&mut hook)?;
        }
    }

    // DRAINING_TAIL: flush the final partial window.
    if session.chunks_in_window > 0 {
        session.batch_sync(&mut hook)?;
    }

    // DONE.
    session.copy.flush()?;
    log::info!(
        "transferred {} ({} bytes, {} batches, {} lost)",
        path.display(),
        session.stats.bytes_sent,
        session.stats.batches,
        session.stats.batches_lost
    );
    Ok(session.stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
