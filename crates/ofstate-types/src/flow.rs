//! Flow identity and classification primitives.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of logical tables tracked by the flow table.
pub const MAX_TABLES: usize = 32;

/// Client-assigned 64-bit flow cookie. Not unique.
pub type Cookie = u64;

/// Length in bits of the cookie prefix used for cookie bucketing.
pub const COOKIE_PREFIX_LEN: u32 = 8;

/// Mask selecting the cookie prefix bits.
pub const COOKIE_PREFIX_MASK: Cookie = !0u64 << (64 - COOKIE_PREFIX_LEN);

/// Returns the cookie bucket index (the high-order prefix bits) for a cookie.
pub const fn cookie_prefix(cookie: Cookie) -> usize {
    (cookie >> (64 - COOKIE_PREFIX_LEN)) as usize
}

/// Externally-assigned flow identifier.
///
/// The flow table is logically a database keyed on this value; the client
/// chooses it and guarantees uniqueness among live entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(u64);

impl FlowId {
    pub const fn new(id: u64) -> Self {
        FlowId(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FlowId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(FlowId)
            .map_err(|_| ParseError::InvalidFlowId(s.to_string()))
    }
}

impl From<u64> for FlowId {
    fn from(id: u64) -> Self {
        FlowId(id)
    }
}

/// Logical table identifier (0..MAX_TABLES).
///
/// # Examples
///
/// ```
/// use ofstate_types::TableId;
///
/// let table = TableId::new(3).unwrap();
/// assert_eq!(table.as_u8(), 3);
///
/// assert!(TableId::new(32).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct TableId(u8);

impl TableId {
    /// Table 0, the first table of the pipeline.
    pub const FIRST: TableId = TableId(0);

    /// Creates a new table id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is not below [`MAX_TABLES`].
    pub const fn new(id: u8) -> Result<Self, ParseError> {
        if (id as usize) < MAX_TABLES {
            Ok(TableId(id))
        } else {
            Err(ParseError::InvalidTableId(id as u32))
        }
    }

    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// Iterates over every valid table id in ascending order.
    pub fn all() -> impl Iterator<Item = TableId> {
        (0..MAX_TABLES as u8).map(TableId)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TableId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u32 = s.parse().map_err(|_| ParseError::InvalidTableId(u32::MAX))?;
        let id = u8::try_from(id).map_err(|_| ParseError::InvalidTableId(id))?;
        TableId::new(id)
    }
}

impl TryFrom<u8> for TableId {
    type Error = ParseError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        TableId::new(id)
    }
}

impl From<TableId> for u8 {
    fn from(table: TableId) -> u8 {
        table.0
    }
}

/// OpenFlow flow-mod flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowModFlags(u16);

impl FlowModFlags {
    pub const NONE: FlowModFlags = FlowModFlags(0);
    pub const SEND_FLOW_REM: FlowModFlags = FlowModFlags(1 << 0);
    pub const CHECK_OVERLAP: FlowModFlags = FlowModFlags(1 << 1);
    pub const RESET_COUNTS: FlowModFlags = FlowModFlags(1 << 2);
    pub const NO_PKT_COUNTS: FlowModFlags = FlowModFlags(1 << 3);
    pub const NO_BYT_COUNTS: FlowModFlags = FlowModFlags(1 << 4);

    pub const fn from_bits(bits: u16) -> Self {
        FlowModFlags(bits)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn contains(&self, other: FlowModFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: FlowModFlags) -> Self {
        FlowModFlags(self.0 | other.0)
    }
}
