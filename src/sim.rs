//! In-memory echo link with deterministic fault injection.
//!
//! Real sockets only exist for the fixed address family; the hierarchical
//! family has no kernel transport here. [`SimLink`] closes that gap: it is
//! a [`Transport`] whose peer is a perfect in-process echo reflector, with
//! replies labeled by a configurable source [`Address`] of either family.
//!
//! Faults are injected per **batch**, matching the protocol's loss
//! granularity (whole-batch replies are lost, individual chunks never
//! are):
//!
//! | Fault           | Description                                        |
//! |-----------------|----------------------------------------------------|
//! | Planned drop    | Batches whose index is in `drop_batches` are lost. |
//! | Random loss     | Each batch is dropped with probability             |
//! |                 | `loss_rate`, from a seeded RNG for reproducible    |
//! |                 | failures.                                          |
//! | Wrong source    | Replies labeled with an impostor address.          |
//!
//! Batch indices are zero-based and count every `recv_batch` call,
//! including the final partial window.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::addr::Address;
use crate::socket::{BatchOutcome, Transport, XferError};

/// An in-process echo peer implementing [`Transport`].
pub struct SimLink {
    /// Address stamped on every echoed batch.
    source: Address,
    /// Zero-based indices of batches to drop.
    drop_batches: HashSet<usize>,
    /// Random per-batch loss, if configured.
    random_loss: Option<(f64, StdRng)>,
    /// Bytes sent since the last batch receive.
    pending: Vec<u8>,
    /// Number of `recv_batch` calls so far.
    batch_index: usize,
    /// Everything ever sent, in order (for assertions).
    sent_log: Vec<u8>,
}

impl SimLink {
    /// A fault-free link whose replies come from `source`.
    pub fn new(source: Address) -> Self {
        SimLink {
            source,
            drop_batches: HashSet::new(),
            random_loss: None,
            pending: Vec::new(),
            batch_index: 0,
            sent_log: Vec::new(),
        }
    }

    /// Drop the batches at the given zero-based indices.
    pub fn drop_batches<I: IntoIterator<Item = usize>>(mut self, idx: I) -> Self {
        self.drop_batches = idx.into_iter().collect();
        self
    }

    /// Drop each batch with probability `rate`, drawn from a seeded RNG so
    /// a failing run can be replayed.
    pub fn loss_rate(mut self, rate: f64, seed: u64) -> Self {
        assert!((0.0..=1.0).contains(&rate), "loss rate must be in [0, 1]");
        self.random_loss = Some((rate, StdRng::seed_from_u64(seed)));
        self
    }

    /// Relabel replies with a different source address.
    pub fn with_source(mut self, source: Address) -> Self {
        self.source = source;
        self
    }

    /// Every byte sent over this link so far, in order.
    pub fn sent_log(&self) -> &[u8] {
        &self.sent_log
    }
}

impl Transport for SimLink {
    fn send_chunk(&mut self, buf: &[u8]) -> Result<(), XferError> {
        self.pending.extend_from_slice(buf);
        self.sent_log.extend_from_slice(buf);
        Ok(())
    }

    fn recv_batch(&mut self, n_sent: usize) -> Result<BatchOutcome, XferError> {
        debug_assert_eq!(
            self.pending.len(),
            n_sent,
            "engine asked for a batch that does not match what was sent"
        );
        let index = self.batch_index;
        self.batch_index += 1;

        // A dropped batch still clears the queue: those bytes went out and
        // the echo for them is gone for good.
        let data = std::mem::take(&mut self.pending);
        if self.drop_batches.contains(&index) {
            return Ok(BatchOutcome::Lost);
        }
        if let Some((rate, rng)) = self.random_loss.as_mut() {
            if rng.gen_bool(*rate) {
                return Ok(BatchOutcome::Lost);
            }
        }
        Ok(BatchOutcome::Received {
            data,
            source: Some(self.source.clone()),
        })
    }
}
