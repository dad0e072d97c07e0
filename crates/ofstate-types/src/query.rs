//! Flow queries ("meta match").
//!
//! A [`FlowQuery`] selects a subset of the flow table. It is used for strict
//! lookups, for filtering safe iterators, and by background iteration tasks.

use crate::{cookie_prefix, Cookie, Instructions, Minimatch, TableId, COOKIE_PREFIX_MASK, OFPP_ANY};
use serde::{Deserialize, Serialize};

/// How the query's match is compared with an entry's match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Match criteria and priority must be identical.
    Strict,
    /// The entry's match must be at least as specific as the query's.
    NonStrict,
}

/// Read-only view of the fields a query filters on.
pub trait FlowView {
    fn table_id(&self) -> TableId;
    fn cookie(&self) -> Cookie;
    fn minimatch(&self) -> &Minimatch;
    fn instructions(&self) -> &Instructions;
}

/// Query over the flow table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowQuery {
    pub mode: QueryMode,
    /// `None` selects every table.
    pub table_id: Option<TableId>,
    pub cookie: Cookie,
    pub cookie_mask: Cookie,
    /// `None` (or `OFPP_ANY`) does not filter on output port.
    pub out_port: Option<u32>,
    /// In non-strict mode, also require an identical priority.
    pub check_priority: bool,
    pub minimatch: Minimatch,
}

impl FlowQuery {
    /// Non-strict query matching every entry of every table.
    pub fn all() -> Self {
        Self {
            mode: QueryMode::NonStrict,
            table_id: None,
            cookie: 0,
            cookie_mask: 0,
            out_port: None,
            check_priority: false,
            minimatch: Minimatch::default(),
        }
    }

    /// Non-strict query with the given match.
    pub fn non_strict(minimatch: Minimatch) -> Self {
        Self {
            minimatch,
            ..Self::all()
        }
    }

    /// Strict query for `minimatch` in `table_id`.
    pub fn strict(table_id: TableId, minimatch: Minimatch) -> Self {
        Self {
            mode: QueryMode::Strict,
            table_id: Some(table_id),
            minimatch,
            ..Self::all()
        }
    }

    pub fn with_table(mut self, table_id: TableId) -> Self {
        self.table_id = Some(table_id);
        self
    }

    pub fn with_cookie(mut self, cookie: Cookie, cookie_mask: Cookie) -> Self {
        self.cookie = cookie;
        self.cookie_mask = cookie_mask;
        self
    }

    pub fn with_out_port(mut self, port: u32) -> Self {
        self.out_port = Some(port);
        self
    }

    pub fn with_check_priority(mut self, check_priority: bool) -> Self {
        self.check_priority = check_priority;
        self
    }

    /// Normalizes the query's match so that it compares equal to the stored
    /// match of an entry added with the same criteria.
    pub fn normalize(&mut self) {
        self.minimatch.normalize();
    }

    /// Returns the cookie bucket that holds every matching entry, if the
    /// cookie mask pins down the whole cookie prefix.
    pub fn cookie_bucket(&self) -> Option<usize> {
        (self.cookie_mask & COOKIE_PREFIX_MASK == COOKIE_PREFIX_MASK)
            .then(|| cookie_prefix(self.cookie))
    }

    /// Checks only the cookie and output port constraints.
    pub fn matches_cookie_and_out_port<V: FlowView + ?Sized>(&self, entry: &V) -> bool {
        if (entry.cookie() ^ self.cookie) & self.cookie_mask != 0 {
            return false;
        }

        match self.out_port.filter(|port| *port != OFPP_ANY) {
            Some(port) => entry.instructions().outputs_to(port),
            None => true,
        }
    }

    /// Returns true if `entry` is selected by this query.
    ///
    /// The query's match is compared as is; call [`FlowQuery::normalize`]
    /// first if it was deserialized.
    pub fn matches<V: FlowView + ?Sized>(&self, entry: &V) -> bool {
        if self.table_id.is_some_and(|table| table != entry.table_id()) {
            return false;
        }

        if !self.matches_cookie_and_out_port(entry) {
            return false;
        }

        match self.mode {
            QueryMode::Strict => *entry.minimatch() == self.minimatch,
            QueryMode::NonStrict => {
                (!self.check_priority || entry.minimatch().priority() == self.minimatch.priority())
                    && entry.minimatch().is_subsumed_by(&self.minimatch)
            }
        }
    }
}

impl Default for FlowQuery {
    fn default() -> Self {
        Self::all()
    }
}
