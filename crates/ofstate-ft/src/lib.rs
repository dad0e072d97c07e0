//! OFStateManager flow table.
//!
//! This crate keeps the set of OpenFlow flow entries installed on a switch,
//! indexed three ways:
//!
//! - **Strict match**: (table id, normalized match) to entry, with at most one
//!   entry per key, plus flow id to entry.
//! - **Cookie buckets**: entries grouped by the top
//!   [`COOKIE_PREFIX_LEN`](ofstate_types::COOKIE_PREFIX_LEN) bits of their
//!   cookie, so cookie-masked queries walk one bucket.
//! - **Checksums**: per logical table, the XOR of all member cookies and a
//!   resizable array of partial sums, for controller state verification.
//!
//! Iteration is safe against interleaved adds and deletes. Long scans run as
//! cooperative tasks on an [`IterTaskScheduler`].
//!
//! # Architecture
//!
//! ```text
//!   add / delete / overwrite / modify_effects
//!                   |
//!                   v
//!   +---------------------------------------------+
//!   | FlowTable                                   |
//!   |   slab arena ---- master list (insertion)   |
//!   |        |    \---- cookie buckets [256]      |
//!   |        |                                    |
//!   |   strict index    flow id index             |
//!   |   table checksums [32]                      |
//!   +---------------------------------------------+
//!          ^                         ^
//!    FlowIterator              IterTaskScheduler
//! ```

pub mod checksum;
pub mod config;
pub mod entry;
pub mod error;
pub mod iter;
mod list;
pub mod metrics;
pub mod table;
pub mod task;

pub use checksum::TableChecksum;
pub use config::{ConfigError, FlowTableConfig};
pub use entry::{FlowEntry, FlowHandle};
pub use error::{AddError, FtError, Result};
pub use iter::FlowIterator;
pub use metrics::{gather_text, FlowTableCounters};
pub use table::{FlowTable, COOKIE_BUCKETS};
pub use task::{IterCallback, IterTaskId, IterTaskScheduler};

pub use ofstate_types;
