//! Flow entry records.

use chrono::{DateTime, Utc};
use ofstate_types::{
    Cookie, FlowAdd, FlowId, FlowModFlags, FlowView, Instructions, Minimatch, TableId,
};
use std::fmt;

/// Non-owning reference to a live flow entry.
///
/// A handle names a slot in the table's arena together with the generation
/// of the entry that occupied it. Once the entry is deleted the handle no
/// longer resolves, even if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowHandle {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

impl fmt::Display for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// One installed forwarding rule.
///
/// Owned by the flow table from a successful add until deletion. Callers see
/// it only through shared references.
#[derive(Debug, Clone)]
pub struct FlowEntry {
    handle: FlowHandle,
    id: FlowId,
    table_id: TableId,
    minimatch: Minimatch,
    cookie: Cookie,
    flags: FlowModFlags,
    idle_timeout: u16,
    hard_timeout: u16,
    instructions: Instructions,
    created_at: DateTime<Utc>,
}

impl FlowEntry {
    pub(crate) fn new(handle: FlowHandle, id: FlowId, flow_add: &FlowAdd, minimatch: Minimatch) -> Self {
        Self {
            handle,
            id,
            table_id: flow_add.table_id,
            minimatch,
            cookie: flow_add.cookie,
            flags: flow_add.flags,
            idle_timeout: flow_add.idle_timeout,
            hard_timeout: flow_add.hard_timeout,
            instructions: flow_add.instructions.clone(),
            created_at: Utc::now(),
        }
    }

    /// Replaces cookie, flags, timeouts, instructions and creation time.
    /// Identity, table and match are kept.
    pub(crate) fn overwrite(&mut self, flow_add: &FlowAdd) {
        self.cookie = flow_add.cookie;
        self.flags = flow_add.flags;
        self.idle_timeout = flow_add.idle_timeout;
        self.hard_timeout = flow_add.hard_timeout;
        self.instructions = flow_add.instructions.clone();
        self.created_at = Utc::now();
    }

    pub(crate) fn set_instructions(&mut self, instructions: Instructions) {
        self.instructions = instructions;
    }

    pub fn handle(&self) -> FlowHandle {
        self.handle
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn minimatch(&self) -> &Minimatch {
        &self.minimatch
    }

    pub fn priority(&self) -> u16 {
        self.minimatch.priority()
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    pub fn flags(&self) -> FlowModFlags {
        self.flags
    }

    pub fn idle_timeout(&self) -> u16 {
        self.idle_timeout
    }

    pub fn hard_timeout(&self) -> u16 {
        self.hard_timeout
    }

    pub fn instructions(&self) -> &Instructions {
        &self.instructions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl FlowView for FlowEntry {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn cookie(&self) -> Cookie {
        self.cookie
    }

    fn minimatch(&self) -> &Minimatch {
        &self.minimatch
    }

    fn instructions(&self) -> &Instructions {
        &self.instructions
    }
}

impl fmt::Display for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flow {} table={} cookie={:#018x} {}",
            self.id, self.table_id, self.cookie, self.minimatch
        )
    }
}
