//! The flow table.
//!
//! Entries live in a slab arena. Each slot is threaded onto the master list
//! and onto the cookie bucket for its cookie prefix, and is reachable through
//! two hash indices: the strict (table, match) key and the flow id. Every
//! logical table keeps a cookie checksum that is updated on each mutation.

use crate::checksum::TableChecksum;
use crate::config::FlowTableConfig;
use crate::entry::{FlowEntry, FlowHandle};
use crate::error::{AddError, FtError, Result};
use crate::iter::IterState;
use crate::list::{Linked, Links, ListHead, ListKind};
use crate::metrics::FlowTableCounters;
use log::{debug, info, warn};
use ofstate_types::{
    cookie_prefix, FlowAdd, FlowId, FlowModify, FlowQuery, Minimatch, TableId,
    COOKIE_PREFIX_LEN, MAX_TABLES,
};
use slab::Slab;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of cookie buckets, one per cookie prefix value.
pub const COOKIE_BUCKETS: usize = 1 << COOKIE_PREFIX_LEN;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StrictKey {
    table_id: TableId,
    minimatch: Minimatch,
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) entry: FlowEntry,
    all: Links,
    cookie: Links,
    /// Registered iterators whose next entry is this one.
    pub(crate) iterators: Vec<usize>,
}

impl Linked for Slot {
    fn links(&self, kind: ListKind) -> &Links {
        match kind {
            ListKind::All => &self.all,
            ListKind::Cookie => &self.cookie,
        }
    }

    fn links_mut(&mut self, kind: ListKind) -> &mut Links {
        match kind {
            ListKind::All => &mut self.all,
            ListKind::Cookie => &mut self.cookie,
        }
    }
}

/// Multiply-indexed store of installed flow entries.
pub struct FlowTable {
    pub(crate) instance: u64,
    config: FlowTableConfig,
    counters: FlowTableCounters,
    pub(crate) slots: Slab<Slot>,
    pub(crate) all_list: ListHead,
    pub(crate) cookie_buckets: Vec<ListHead>,
    strict_index: HashMap<StrictKey, usize>,
    id_index: HashMap<FlowId, usize>,
    tables: Vec<TableChecksum>,
    pub(crate) iterators: Slab<IterState>,
    next_generation: u64,
    pub(crate) next_iter_generation: u64,
}

impl FlowTable {
    /// Creates an empty table. Counters are injected so that several tables,
    /// or a table and its owner, can share one registry.
    pub fn new(config: FlowTableConfig, counters: FlowTableCounters) -> Result<Self> {
        config.validate()?;

        let tables = (0..MAX_TABLES)
            .map(|_| TableChecksum::new(config.default_checksum_buckets))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Creating flow table: {} checksum buckets per table, capacity {}",
            config.default_checksum_buckets, config.initial_capacity
        );

        Ok(Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            slots: Slab::with_capacity(config.initial_capacity),
            all_list: ListHead::default(),
            cookie_buckets: vec![ListHead::default(); COOKIE_BUCKETS],
            strict_index: HashMap::with_capacity(config.initial_capacity),
            id_index: HashMap::with_capacity(config.initial_capacity),
            tables,
            iterators: Slab::new(),
            next_generation: 1,
            next_iter_generation: 1,
            config,
            counters,
        })
    }

    /// Creates an empty table with default configuration and private
    /// counters.
    pub fn create() -> Result<Self> {
        let counters = FlowTableCounters::new().map_err(|err| FtError::Metrics(err.to_string()))?;
        Self::new(FlowTableConfig::default(), counters)
    }

    /// Tears the table down, ending any registered iterators.
    pub fn destroy(mut self) {
        info!("Destroying flow table with {} flows", self.len());
        self.clear();
    }

    /// Removes every entry. Registered iterators are exhausted and checksums
    /// return to zero. Not counted as deletions.
    pub fn clear(&mut self) {
        let released = self.slots.len();
        for (_, state) in self.iterators.iter_mut() {
            state.next = None;
        }
        self.slots.clear();
        self.all_list.clear();
        self.cookie_buckets.iter_mut().for_each(ListHead::clear);
        self.strict_index.clear();
        self.id_index.clear();
        self.tables.iter_mut().for_each(TableChecksum::reset);
        self.counters.flows.sub(released as i64);
        debug!("Cleared {} flows", released);
    }

    /// Adds a flow.
    ///
    /// Fails with `AlreadyExists` if the flow id is taken or an entry with the
    /// same table and match is installed, and with `ResourceExhausted` if the
    /// table already holds `max_flows` entries or a hash index cannot grow.
    /// Growth of the entry arena itself is infallible. On failure the match
    /// is handed back and the table is unchanged.
    pub fn add(
        &mut self,
        id: FlowId,
        flow_add: &FlowAdd,
        mut minimatch: Minimatch,
    ) -> std::result::Result<&FlowEntry, AddError> {
        minimatch.normalize();
        let key = StrictKey {
            table_id: flow_add.table_id,
            minimatch,
        };

        let existing = self
            .id_index
            .get(&id)
            .or_else(|| self.strict_index.get(&key))
            .copied();
        if let Some(existing) = existing {
            let existing_id = self.slots[existing].entry.id();
            warn!(
                "Rejecting flow {} in table {}: conflicts with flow {}",
                id, key.table_id, existing_id
            );
            return Err(AddError::new(FtError::AlreadyExists(existing_id), key.minimatch));
        }

        if let Err(err) = self.reserve_one() {
            warn!("Rejecting flow {}: {}", id, err);
            return Err(AddError::new(err, key.minimatch));
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let vacant = self.slots.vacant_entry();
        let index = vacant.key();
        let handle = FlowHandle { index, generation };
        vacant.insert(Slot {
            entry: FlowEntry::new(handle, id, flow_add, key.minimatch.clone()),
            all: Links::default(),
            cookie: Links::default(),
            iterators: Vec::new(),
        });

        self.strict_index.insert(key, index);
        self.id_index.insert(id, index);
        self.all_list.push_back(&mut self.slots, index, ListKind::All);
        self.cookie_buckets[cookie_prefix(flow_add.cookie)].push_back(
            &mut self.slots,
            index,
            ListKind::Cookie,
        );
        self.tables[flow_add.table_id.index()].toggle(flow_add.cookie);

        self.counters.adds.inc();
        self.counters.flows.inc();

        let entry = &self.slots[index].entry;
        debug!("Added {}", entry);
        Ok(entry)
    }

    fn reserve_one(&mut self) -> Result<()> {
        if let Some(max_flows) = self.config.max_flows {
            if self.slots.len() >= max_flows {
                return Err(FtError::ResourceExhausted(format!(
                    "flow table is full ({} flows)",
                    max_flows
                )));
            }
        }
        self.strict_index
            .try_reserve(1)
            .map_err(|err| FtError::ResourceExhausted(format!("strict match index: {}", err)))?;
        self.id_index
            .try_reserve(1)
            .map_err(|err| FtError::ResourceExhausted(format!("flow id index: {}", err)))?;
        Ok(())
    }

    /// Removes a flow and returns it. Iterators positioned on it move on to
    /// its successor.
    pub fn delete(&mut self, handle: FlowHandle) -> Result<FlowEntry> {
        let index = self.resolve(handle)?;
        self.evict_iterators(index, None);

        let (table_id, cookie) = {
            let entry = &self.slots[index].entry;
            (entry.table_id(), entry.cookie())
        };
        self.all_list.unlink(&mut self.slots, index, ListKind::All);
        self.cookie_buckets[cookie_prefix(cookie)].unlink(&mut self.slots, index, ListKind::Cookie);
        self.tables[table_id.index()].toggle(cookie);

        let slot = self.slots.remove(index);
        self.strict_index.remove(&StrictKey {
            table_id,
            minimatch: slot.entry.minimatch().clone(),
        });
        self.id_index.remove(&slot.entry.id());

        self.counters.deletes.inc();
        self.counters.flows.dec();

        debug!("Deleted {}", slot.entry);
        Ok(slot.entry)
    }

    /// Replaces the cookie, flags, timeouts and instructions of a flow.
    ///
    /// The flow keeps its id, table and match; `flow_add.table_id` is
    /// ignored. A cookie change is folded into the table checksum, and a
    /// change of cookie prefix moves the entry to its new cookie bucket.
    pub fn overwrite(&mut self, handle: FlowHandle, flow_add: &FlowAdd) -> Result<&FlowEntry> {
        let index = self.resolve(handle)?;
        let (table_id, old_cookie) = {
            let entry = &self.slots[index].entry;
            (entry.table_id(), entry.cookie())
        };
        let new_cookie = flow_add.cookie;

        if old_cookie != new_cookie {
            let checksum = &mut self.tables[table_id.index()];
            checksum.toggle(old_cookie);
            checksum.toggle(new_cookie);

            let (old_bucket, new_bucket) = (cookie_prefix(old_cookie), cookie_prefix(new_cookie));
            if old_bucket != new_bucket {
                self.evict_iterators(index, Some(ListKind::Cookie));
                self.cookie_buckets[old_bucket].unlink(&mut self.slots, index, ListKind::Cookie);
                self.cookie_buckets[new_bucket].push_back(
                    &mut self.slots,
                    index,
                    ListKind::Cookie,
                );
            }
        }

        self.slots[index].entry.overwrite(flow_add);
        self.counters.modifies.inc();

        let entry = &self.slots[index].entry;
        debug!("Overwrote {}", entry);
        Ok(entry)
    }

    /// Replaces the instructions of a flow. Indices and checksums are not
    /// affected.
    pub fn modify_effects(&mut self, handle: FlowHandle, flow_modify: &FlowModify) -> Result<&FlowEntry> {
        let index = self.resolve(handle)?;
        let entry = &mut self.slots[index].entry;
        entry.set_instructions(flow_modify.instructions.clone());
        self.counters.modifies.inc();
        debug!("Modified instructions of flow {}", entry.id());
        Ok(&*entry)
    }

    /// Resizes the checksum bucket array of one table and recomputes it from
    /// the current entries.
    pub fn set_checksum_buckets_size(&mut self, table_id: u8, size: u32) -> Result<()> {
        let table = TableId::new(table_id).map_err(|_| FtError::InvalidTableId(table_id))?;
        self.config.check_buckets_size(size)?;

        let cookies = self
            .slots
            .iter()
            .map(|(_, slot)| &slot.entry)
            .filter(|entry| entry.table_id() == table)
            .map(FlowEntry::cookie);
        let rebuilt = TableChecksum::rebuild(size, cookies)?;

        let current = &mut self.tables[table.index()];
        debug_assert_eq!(rebuilt.checksum(), current.checksum());
        *current = rebuilt;

        info!("Table {} now has {} checksum buckets", table, size);
        Ok(())
    }

    /// Finds the entry with exactly the query's table and match.
    ///
    /// Without a table the strict index is probed for every table. Cookie and
    /// output port constraints are then applied to the candidate.
    pub fn strict_match(&self, query: &FlowQuery) -> Result<&FlowEntry> {
        let mut key = StrictKey {
            table_id: TableId::FIRST,
            minimatch: query.minimatch.normalized(),
        };
        let candidates: Box<dyn Iterator<Item = TableId>> = match query.table_id {
            Some(table) => Box::new(std::iter::once(table)),
            None => Box::new(TableId::all()),
        };

        for table_id in candidates {
            key.table_id = table_id;
            if let Some(&index) = self.strict_index.get(&key) {
                let entry = &self.slots[index].entry;
                if query.matches_cookie_and_out_port(entry) {
                    return Ok(entry);
                }
            }
        }
        Err(FtError::NotFound)
    }

    /// Resolves a handle, failing if its entry has been deleted.
    pub fn get(&self, handle: FlowHandle) -> Result<&FlowEntry> {
        let index = self.resolve(handle)?;
        Ok(&self.slots[index].entry)
    }

    /// Finds an entry by flow id.
    pub fn lookup(&self, id: FlowId) -> Option<&FlowEntry> {
        self.id_index.get(&id).map(|&index| &self.slots[index].entry)
    }

    pub(crate) fn resolve(&self, handle: FlowHandle) -> Result<usize> {
        match self.slots.get(handle.index) {
            Some(slot) if slot.entry.handle().generation == handle.generation => Ok(handle.index),
            _ => Err(FtError::NotFound),
        }
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &FlowEntry> + '_ {
        self.all_list
            .keys(&self.slots, ListKind::All)
            .map(move |index| &self.slots[index].entry)
    }

    /// Entries whose cookie prefix is `prefix`, in bucket order. Empty for an
    /// out of range prefix.
    pub fn cookie_bucket(&self, prefix: usize) -> impl Iterator<Item = &FlowEntry> + '_ {
        self.cookie_buckets
            .get(prefix)
            .into_iter()
            .flat_map(move |bucket| bucket.keys(&self.slots, ListKind::Cookie))
            .map(move |index| &self.slots[index].entry)
    }

    /// Number of installed flows.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// XOR of the cookies of every flow in `table`.
    pub fn checksum(&self, table: TableId) -> u64 {
        self.tables[table.index()].checksum()
    }

    /// Per-bucket cookie checksums of `table`.
    pub fn checksum_buckets(&self, table: TableId) -> &[u64] {
        self.tables[table.index()].buckets()
    }

    pub fn table_checksum(&self, table: TableId) -> &TableChecksum {
        &self.tables[table.index()]
    }

    pub fn config(&self) -> &FlowTableConfig {
        &self.config
    }

    pub fn counters(&self) -> &FlowTableCounters {
        &self.counters
    }

    /// Number of iterators registered with the table, including dropped ones
    /// that have not been reaped yet.
    pub fn registered_iterators(&self) -> usize {
        self.iterators.len()
    }

    /// Verifies that lists, indices, checksums and iterator links agree.
    pub fn check_invariants(&self) -> Result<()> {
        fn inconsistent(message: String) -> Result<()> {
            Err(FtError::Inconsistent(message))
        }

        let count = self.slots.len();
        let walked = self.all_list.keys(&self.slots, ListKind::All).count();
        if self.all_list.len() != count || walked != count {
            return inconsistent(format!(
                "master list has {} entries ({} walked), arena has {}",
                self.all_list.len(),
                walked,
                count
            ));
        }

        if self.strict_index.len() != count || self.id_index.len() != count {
            return inconsistent(format!(
                "index sizes strict={} id={}, expected {}",
                self.strict_index.len(),
                self.id_index.len(),
                count
            ));
        }

        for (key, &index) in &self.strict_index {
            match self.slots.get(index) {
                Some(slot)
                    if slot.entry.table_id() == key.table_id
                        && *slot.entry.minimatch() == key.minimatch => {}
                _ => {
                    return inconsistent(format!(
                        "strict index entry for table {} {} is stale",
                        key.table_id, key.minimatch
                    ))
                }
            }
        }

        for (&id, &index) in &self.id_index {
            match self.slots.get(index) {
                Some(slot) if slot.entry.id() == id => {}
                _ => return inconsistent(format!("flow id index entry for {} is stale", id)),
            }
        }

        let mut bucketed = 0;
        for (prefix, bucket) in self.cookie_buckets.iter().enumerate() {
            let mut walked = 0;
            for index in bucket.keys(&self.slots, ListKind::Cookie) {
                let cookie = self.slots[index].entry.cookie();
                if cookie_prefix(cookie) != prefix {
                    return inconsistent(format!(
                        "cookie {:#x} found in bucket {:#04x}",
                        cookie, prefix
                    ));
                }
                walked += 1;
            }
            if walked != bucket.len() {
                return inconsistent(format!(
                    "cookie bucket {:#04x} has length {} but {} entries",
                    prefix,
                    bucket.len(),
                    walked
                ));
            }
            bucketed += walked;
        }
        if bucketed != count {
            return inconsistent(format!("{} entries in cookie buckets, expected {}", bucketed, count));
        }

        for (table, state) in TableId::all().zip(&self.tables) {
            let cookies = self
                .slots
                .iter()
                .map(|(_, slot)| &slot.entry)
                .filter(|entry| entry.table_id() == table)
                .map(FlowEntry::cookie);
            let expected = TableChecksum::rebuild(state.bucket_count() as u32, cookies)?;
            if !state.is_consistent() || expected != *state {
                return inconsistent(format!(
                    "table {} checksum {:#x} does not match its flows ({:#x})",
                    table,
                    state.checksum(),
                    expected.checksum()
                ));
            }
        }

        for (key, state) in &self.iterators {
            if let Some(next) = state.next {
                match self.slots.get(next) {
                    Some(slot) if slot.iterators.contains(&key) => {}
                    _ => return inconsistent(format!("iterator {} points at a stale entry", key)),
                }
            }
        }

        Ok(())
    }
}

impl Drop for FlowTable {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            self.counters.flows.sub(self.slots.len() as i64);
        }
    }
}

impl fmt::Debug for FlowTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTable")
            .field("instance", &self.instance)
            .field("flows", &self.slots.len())
            .field("iterators", &self.iterators.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
