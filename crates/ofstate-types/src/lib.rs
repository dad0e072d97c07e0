//! OpenFlow value types for the OFStateManager flow table.
//!
//! The flow table core treats these as opaque, already-validated values.
//! Protocol parsing of flow-mod messages happens elsewhere; this crate only
//! provides type-safe representations of the pieces the table stores and
//! compares:
//!
//! - [`FlowId`]: externally-assigned flow identifier
//! - [`TableId`]: logical table id (`0..MAX_TABLES`)
//! - [`Cookie`]: client-assigned 64-bit tag, with prefix helpers
//! - [`Minimatch`]: compact match criteria with strict/non-strict comparison
//! - [`Instructions`]: the action/instruction set of a flow
//! - [`FlowAdd`], [`FlowModify`]: inputs to add/overwrite and modify
//! - [`FlowQuery`]: the filter used by lookups, iterators and iteration tasks

mod action;
mod flow;
mod flow_mod;
mod minimatch;
mod query;

pub use action::{Action, Instruction, Instructions, OFPP_ANY};
pub use flow::{
    cookie_prefix, Cookie, FlowId, FlowModFlags, TableId, COOKIE_PREFIX_LEN, COOKIE_PREFIX_MASK,
    MAX_TABLES,
};
pub use flow_mod::{FlowAdd, FlowModify};
pub use minimatch::{MaskedValue, MatchField, Minimatch};
pub use query::{FlowQuery, FlowView, QueryMode};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid table id: {0} (must be 0-31)")]
    InvalidTableId(u32),

    #[error("invalid flow id: {0}")]
    InvalidFlowId(String),

    #[error("invalid match field: {0}")]
    InvalidMatchField(String),

    #[error("invalid masked value: {0}")]
    InvalidMaskedValue(String),
}
