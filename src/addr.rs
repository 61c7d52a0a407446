//! Address model: fixed (host + port) and hierarchical (row-list) families.
//!
//! Every peer identity in the exerciser is an [`Address`], a tagged union
//! over two structurally different families:
//!
//! - [`Address::Fixed`] — conventional constant-size encoding: an IPv4 host
//!   and a port. Equality is exact over the whole encoding.
//! - [`Address::Hierarchical`] — a variable-length ordered sequence of typed
//!   identifier rows. The rows name a path through intermediate
//!   identifiers, but the distinguishing endpoint is always the **last**
//!   row, so equality compares only that row.
//!
//! This module is pure data: parsing, validation, formatting, and the
//! family-specific equality rule. No I/O happens here.
//!
//! # Textual hierarchical form
//!
//! Rows are separated by `:` or newlines; each row is
//! `<principal>-<40 hex digits>` where `<principal>` is a registered
//! principal name (see [`init_principal_map`]) or a literal `0x…` type
//! number. Anything after the identifier in a row (an optional `-edge,…`
//! list) is routing metadata and is ignored for identity purposes. A
//! leading `!` marks the whole address as explicitly invalid: it still
//! parses, but validation rejects it with a dedicated error distinct from
//! a syntax error.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use thiserror::Error;

/// Byte length of one row identifier.
pub const XID_LEN: usize = 20;

/// Maximum number of rows in a hierarchical address.
pub const ROWS_MAX: usize = 9;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while parsing or validating an address.
#[derive(Debug, Error)]
pub enum AddrError {
    /// The text does not parse as an address of the requested family.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// The address parsed but carries the explicit invalid marker flag.
    #[error("address is marked invalid")]
    MarkedInvalid,
    /// The address file could not be read.
    #[error("cannot read address file: {0}")]
    File(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Principal-type map
// ---------------------------------------------------------------------------

/// Numeric type tag of one row identifier.
///
/// `XidType::NAT` ("not-a-type") is reserved: it never appears in a valid
/// row and terminates row sequences in fixed-capacity encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XidType(pub u32);

impl XidType {
    /// The reserved not-a-type sentinel.
    pub const NAT: XidType = XidType(0);
}

impl fmt::Display for XidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

static PRINCIPAL_MAP: OnceCell<HashMap<&'static str, XidType>> = OnceCell::new();

fn builtin_principal_map() -> HashMap<&'static str, XidType> {
    let mut map = HashMap::new();
    map.insert("ad", XidType(0x10));
    map.insert("hid", XidType(0x11));
    map.insert("cid", XidType(0x12));
    map.insert("sid", XidType(0x13));
    map.insert("fid", XidType(0x14));
    map.insert("xdp", XidType(0x15));
    map.insert("serval", XidType(0x16));
    map
}

/// Build the process-wide principal-name-to-type table.
///
/// Call once during setup, before any hierarchical address is parsed.
/// Idempotent; the table is read-only afterwards.
pub fn init_principal_map() {
    PRINCIPAL_MAP.get_or_init(builtin_principal_map);
}

/// Look up the numeric type for a principal name.
pub fn principal_type(name: &str) -> Option<XidType> {
    PRINCIPAL_MAP
        .get_or_init(builtin_principal_map)
        .get(name)
        .copied()
}

/// Reverse lookup: the registered name for a numeric type, if any.
pub fn principal_name(ty: XidType) -> Option<&'static str> {
    PRINCIPAL_MAP
        .get_or_init(builtin_principal_map)
        .iter()
        .find(|(_, v)| **v == ty)
        .map(|(k, _)| *k)
}

// ---------------------------------------------------------------------------
// Rows and hierarchical addresses
// ---------------------------------------------------------------------------

/// One typed identifier row of a hierarchical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    /// Principal type tag; never [`XidType::NAT`] in a constructed row.
    pub xid_type: XidType,
    /// Fixed-width opaque identifier.
    pub xid: [u8; XID_LEN],
}

impl Row {
    fn parse(text: &str) -> Result<Row, AddrError> {
        // <principal>-<hex id>[-<edges>]
        let (ppal, rest) = text
            .split_once('-')
            .ok_or_else(|| AddrError::Syntax(format!("row has no type separator: {text:?}")))?;

        let xid_type = if let Some(num) = ppal.strip_prefix("0x") {
            let v = u32::from_str_radix(num, 16)
                .map_err(|_| AddrError::Syntax(format!("bad numeric principal: {ppal:?}")))?;
            XidType(v)
        } else {
            principal_type(ppal)
                .ok_or_else(|| AddrError::Syntax(format!("unknown principal: {ppal:?}")))?
        };
        if xid_type == XidType::NAT {
            return Err(AddrError::Syntax("row uses the reserved sentinel type".into()));
        }

        // Edge lists after the identifier are ignored for identity.
        let id_text = match rest.split_once('-') {
            Some((id, _edges)) => id,
            None => rest,
        };
        if id_text.len() != XID_LEN * 2 {
            return Err(AddrError::Syntax(format!(
                "identifier must be {} hex digits, got {}",
                XID_LEN * 2,
                id_text.len()
            )));
        }
        let mut xid = [0u8; XID_LEN];
        hex::decode_to_slice(id_text, &mut xid)
            .map_err(|e| AddrError::Syntax(format!("bad identifier hex: {e}")))?;

        Ok(Row { xid_type, xid })
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match principal_name(self.xid_type) {
            Some(name) => write!(f, "{}-{}", name, hex::encode(self.xid)),
            None => write!(f, "{}-{}", self.xid_type, hex::encode(self.xid)),
        }
    }
}

/// A validated hierarchical address: 1..=[`ROWS_MAX`] non-sentinel rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierAddr {
    rows: Vec<Row>,
}

impl HierAddr {
    /// Construct from rows, enforcing the non-empty and capacity bounds.
    pub fn new(rows: Vec<Row>) -> Result<HierAddr, AddrError> {
        if rows.is_empty() {
            return Err(AddrError::Syntax("address has no rows".into()));
        }
        if rows.len() > ROWS_MAX {
            return Err(AddrError::Syntax(format!(
                "address has {} rows, maximum is {ROWS_MAX}",
                rows.len()
            )));
        }
        Ok(HierAddr { rows })
    }

    /// All rows, in path order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// The destination identifier: the last row.
    ///
    /// Always present; construction rejects empty addresses.
    pub fn last_row(&self) -> &Row {
        self.rows.last().expect("HierAddr is never empty")
    }
}

impl FromStr for HierAddr {
    type Err = AddrError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let (marked_invalid, text) = match text.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, text),
        };

        let rows = text
            .split(|c| c == ':' || c == '\n')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Row::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let addr = HierAddr::new(rows)?;

        // Checked after syntax so a flagged-but-broken address still reports
        // the more actionable syntax error.
        if marked_invalid {
            return Err(AddrError::MarkedInvalid);
        }
        Ok(addr)
    }
}

impl fmt::Display for HierAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{row}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A peer identity in either address family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Constant-size host + port.
    Fixed(SocketAddrV4),
    /// Variable-length typed row list.
    Hierarchical(HierAddr),
}

impl Address {
    /// Parse a fixed address from an optional host string and a port.
    ///
    /// `None` is the "any" sentinel (0.0.0.0), used for local binds.
    pub fn parse_fixed(host: Option<&str>, port: u16) -> Result<Address, AddrError> {
        let ip = match host {
            Some(text) => text
                .parse::<Ipv4Addr>()
                .map_err(|e| AddrError::Syntax(format!("bad host {text:?}: {e}")))?,
            None => Ipv4Addr::UNSPECIFIED,
        };
        Ok(Address::Fixed(SocketAddrV4::new(ip, port)))
    }

    /// Parse a hierarchical address from its textual form.
    pub fn parse_hier(text: &str) -> Result<Address, AddrError> {
        Ok(Address::Hierarchical(text.parse()?))
    }

    /// Read and parse a hierarchical address from a file.
    ///
    /// Any failure here is a setup-time failure; callers treat it as fatal
    /// before any transfer begins.
    pub fn parse_hier_file(path: &Path) -> Result<Address, AddrError> {
        let text = std::fs::read_to_string(path)?;
        Address::parse_hier(&text)
    }

    /// Family-specific equality against an expected peer.
    ///
    /// Fixed addresses match byte for byte (host + port). Hierarchical
    /// addresses match when their **last rows** agree; differing earlier
    /// rows are a routing detail, not a different endpoint.
    ///
    /// # Panics
    ///
    /// Comparing addresses of different families is a programming error,
    /// not a runtime case, and panics.
    pub fn matches(&self, expected: &Address) -> bool {
        match (self, expected) {
            (Address::Fixed(a), Address::Fixed(b)) => a == b,
            (Address::Hierarchical(a), Address::Hierarchical(b)) => {
                a.last_row() == b.last_row()
            }
            _ => panic!(
                "address family mismatch in comparison: {} vs {}",
                self, expected
            ),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Fixed(sa) => write!(f, "{sa}"),
            Address::Hierarchical(h) => write!(f, "{h}"),
        }
    }
}

impl From<SocketAddrV4> for Address {
    fn from(sa: SocketAddrV4) -> Self {
        Address::Fixed(sa)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
