//! Already-validated flow-mod inputs.

use crate::{Cookie, FlowModFlags, Instructions, TableId};
use serde::{Deserialize, Serialize};

/// The fields of a flow add that the flow table stores.
///
/// Also the input of an overwrite, which replaces the cookie, flags,
/// timeouts and instructions of an existing entry (OpenFlow 1.3.3 §6.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowAdd {
    pub table_id: TableId,
    #[serde(default)]
    pub cookie: Cookie,
    #[serde(default)]
    pub flags: FlowModFlags,
    #[serde(default)]
    pub idle_timeout: u16,
    #[serde(default)]
    pub hard_timeout: u16,
    #[serde(default)]
    pub instructions: Instructions,
}

impl FlowAdd {
    /// Creates a flow add for `table_id` with zero cookie, no flags, no
    /// timeouts and an empty (drop) instruction set.
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            cookie: 0,
            flags: FlowModFlags::NONE,
            idle_timeout: 0,
            hard_timeout: 0,
            instructions: Instructions::new(),
        }
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_flags(mut self, flags: FlowModFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_timeouts(mut self, idle_timeout: u16, hard_timeout: u16) -> Self {
        self.idle_timeout = idle_timeout;
        self.hard_timeout = hard_timeout;
        self
    }

    pub fn with_instructions(mut self, instructions: Instructions) -> Self {
        self.instructions = instructions;
        self
    }
}

/// A flow modify: only the effects of the flow change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowModify {
    pub instructions: Instructions,
}

impl FlowModify {
    pub fn new(instructions: Instructions) -> Self {
        Self { instructions }
    }
}
