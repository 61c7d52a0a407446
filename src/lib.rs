//! `echo-probe` — a windowed echo-transfer exerciser for two address
//! families.
//!
//! The probe streams a file to an echo peer in bounded bursts ("windows"),
//! reads each window's echo back as one batch, verifies the batch came from
//! the expected peer, and persists it to a `<name>_echo` copy. It runs the
//! same discipline over a connectionless, loss-prone transport (datagrams)
//! and a connection-oriented, order-preserving one (streams), and over two
//! structurally different peer-address representations (fixed host+port and
//! hierarchical typed-row lists).
//!
//! Each module has a single responsibility:
//! - [`addr`]     — address model: parsing, validation, family-specific
//!                  equality
//! - [`socket`]   — blocking UDP/TCP transports with per-transport loss
//!                  policies
//! - [`sim`]      — in-memory echo link with fault injection (hierarchical
//!                  family, deterministic loss tests)
//! - [`transfer`] — the windowed engine and receive verification
//! - [`server`]   — echo peers (datagram reflector, stream copy loop)

pub mod addr;
pub mod server;
pub mod sim;
pub mod socket;
pub mod transfer;

pub use addr::{init_principal_map, Address};
pub use socket::{BatchOutcome, StreamTransport, Transport, UdpTransport, XferError};
pub use transfer::{transfer_file, TransferConfig, TransferStats};
