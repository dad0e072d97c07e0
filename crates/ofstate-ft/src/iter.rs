//! Iteration that tolerates concurrent modification of the table.
//!
//! An iterator is registered with the table and linked to the entry it will
//! return next. Deleting that entry moves the iterator to the successor, so
//! an iterator never observes a freed entry and never skips a live one that
//! was present when it started. Entries added later may or may not be seen.
//!
//! A `FlowIterator` that is dropped without [`FlowTable::iterator_cleanup`]
//! is detected through its liveness token and reaped the next time the table
//! touches it.

use crate::entry::FlowEntry;
use crate::list::{Linked, ListKind};
use crate::table::FlowTable;
use log::{trace, warn};
use ofstate_types::FlowQuery;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterSource {
    All,
    CookieBucket(usize),
}

/// Table-side state of a registered iterator.
#[derive(Debug)]
pub(crate) struct IterState {
    pub(crate) next: Option<usize>,
    generation: u64,
    source: IterSource,
    query: Option<FlowQuery>,
    alive: Weak<()>,
}

impl IterState {
    pub(crate) fn kind(&self) -> ListKind {
        match self.source {
            IterSource::All => ListKind::All,
            IterSource::CookieBucket(_) => ListKind::Cookie,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

/// Cursor over the entries of one flow table.
///
/// Only meaningful for the table that created it; other tables treat it as
/// exhausted.
#[derive(Debug)]
pub struct FlowIterator {
    table: u64,
    key: usize,
    generation: u64,
    _token: Arc<()>,
}

/// Outcome of a bounded iteration step.
#[derive(Debug)]
pub(crate) enum IterStep<'a> {
    Entry(&'a FlowEntry),
    /// The scan budget ran out before a match was found.
    Pending,
    Done,
}

impl FlowTable {
    /// Starts an iteration over the entries selected by `query`, or over every
    /// entry if there is none.
    ///
    /// A query whose cookie mask covers the whole cookie prefix walks only the
    /// matching cookie bucket.
    pub fn iterator_init(&mut self, query: Option<FlowQuery>) -> FlowIterator {
        let source = match query.as_ref().and_then(FlowQuery::cookie_bucket) {
            Some(prefix) => IterSource::CookieBucket(prefix),
            None => IterSource::All,
        };
        self.register_iterator(query, source)
    }

    /// Starts an iteration that always walks the master list.
    pub(crate) fn iterator_init_unindexed(&mut self, query: Option<FlowQuery>) -> FlowIterator {
        self.register_iterator(query, IterSource::All)
    }

    fn register_iterator(&mut self, mut query: Option<FlowQuery>, source: IterSource) -> FlowIterator {
        self.reap_iterators();
        if let Some(query) = query.as_mut() {
            query.normalize();
        }

        let head = match source {
            IterSource::All => self.all_list.head(),
            IterSource::CookieBucket(prefix) => self.cookie_buckets[prefix].head(),
        };
        let token = Arc::new(());
        let generation = self.next_iter_generation;
        self.next_iter_generation += 1;

        let key = self.iterators.insert(IterState {
            next: head,
            generation,
            source,
            query,
            alive: Arc::downgrade(&token),
        });
        if let Some(head) = head {
            self.slots[head].iterators.push(key);
        }
        trace!("Registered iterator {} over {:?}", key, source);

        FlowIterator {
            table: self.instance,
            key,
            generation,
            _token: token,
        }
    }

    /// Returns the next matching entry, or `None` once the iteration is
    /// exhausted.
    pub fn iterator_next(&mut self, iter: &mut FlowIterator) -> Option<&FlowEntry> {
        match self.iterator_step(iter, usize::MAX) {
            IterStep::Entry(entry) => Some(entry),
            IterStep::Pending | IterStep::Done => None,
        }
    }

    /// Advances `iter`, examining at most `budget` entries.
    pub(crate) fn iterator_step(&mut self, iter: &mut FlowIterator, budget: usize) -> IterStep<'_> {
        if !self.owns_iterator(iter) {
            return IterStep::Done;
        }
        let key = iter.key;
        match self.iterators.get(key) {
            Some(state) if state.generation == iter.generation => {}
            _ => return IterStep::Done,
        }

        let mut scanned = 0;
        loop {
            if scanned == budget {
                return IterStep::Pending;
            }

            let state = &self.iterators[key];
            let Some(current) = state.next else {
                return IterStep::Done;
            };
            let kind = state.kind();
            let next = self.slots[current].links(kind).next;

            self.detach_iterator(current, key);
            self.iterators[key].next = next;
            if let Some(next) = next {
                self.slots[next].iterators.push(key);
            }
            scanned += 1;

            let matched = self.iterators[key]
                .query
                .as_ref()
                .map_or(true, |query| query.matches(&self.slots[current].entry));
            if matched {
                return IterStep::Entry(&self.slots[current].entry);
            }
        }
    }

    /// Unregisters an iterator. Dropping a `FlowIterator` has the same effect
    /// eventually.
    pub fn iterator_cleanup(&mut self, iter: FlowIterator) {
        if !self.owns_iterator(&iter) {
            return;
        }
        let next = match self.iterators.get(iter.key) {
            Some(state) if state.generation == iter.generation => state.next,
            _ => return,
        };
        if let Some(next) = next {
            self.detach_iterator(next, iter.key);
        }
        self.iterators.remove(iter.key);
        trace!("Cleaned up iterator {}", iter.key);
    }

    fn owns_iterator(&self, iter: &FlowIterator) -> bool {
        if iter.table == self.instance {
            return true;
        }
        warn!(
            "Ignoring iterator {} of flow table {} passed to flow table {}",
            iter.key, iter.table, self.instance
        );
        false
    }

    /// Unregisters iterators whose `FlowIterator` has been dropped.
    pub(crate) fn reap_iterators(&mut self) {
        let dead: Vec<usize> = self
            .iterators
            .iter()
            .filter(|(_, state)| !state.is_alive())
            .map(|(key, _)| key)
            .collect();

        for key in dead {
            let state = self.iterators.remove(key);
            if let Some(next) = state.next {
                self.detach_iterator(next, key);
            }
            trace!("Reaped dropped iterator {}", key);
        }
    }

    /// Moves the iterators positioned on `index` to their successor. With
    /// `only`, just the iterators walking that kind of list are moved.
    pub(crate) fn evict_iterators(&mut self, index: usize, only: Option<ListKind>) {
        let linked = std::mem::take(&mut self.slots[index].iterators);
        let mut kept = Vec::new();

        for key in linked {
            let Some(state) = self.iterators.get_mut(key) else {
                continue;
            };
            if !state.is_alive() {
                self.iterators.remove(key);
                continue;
            }
            let kind = state.kind();
            if only.is_some_and(|only| only != kind) {
                kept.push(key);
                continue;
            }

            let next = self.slots[index].links(kind).next;
            state.next = next;
            if let Some(next) = next {
                self.slots[next].iterators.push(key);
            }
        }

        self.slots[index].iterators = kept;
    }

    fn detach_iterator(&mut self, index: usize, key: usize) {
        let linked = &mut self.slots[index].iterators;
        if let Some(position) = linked.iter().position(|&linked_key| linked_key == key) {
            linked.swap_remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::table::FlowTable;
    use ofstate_types::{
        FlowAdd, FlowId, FlowQuery, MaskedValue, MatchField, Minimatch, QueryMode, TableId,
    };
    use pretty_assertions::assert_eq;

    fn populated(cookies: &[u64]) -> FlowTable {
        let mut ft = FlowTable::create().unwrap();
        for (i, &cookie) in cookies.iter().enumerate() {
            let minimatch = Minimatch::new(1)
                .with_field(MatchField::InPort, MaskedValue::exact(i as u128 + 1));
            ft.add(
                FlowId::new(i as u64),
                &FlowAdd::new(TableId::FIRST).with_cookie(cookie),
                minimatch,
            )
            .unwrap();
        }
        ft
    }

    fn drain(ft: &mut FlowTable, query: Option<FlowQuery>) -> Vec<u64> {
        let mut it = ft.iterator_init(query);
        let mut ids = Vec::new();
        while let Some(entry) = ft.iterator_next(&mut it) {
            ids.push(entry.id().as_u64());
        }
        ft.iterator_cleanup(it);
        ids
    }

    #[test]
    fn test_iterates_all_in_order() {
        let mut ft = populated(&[1, 2, 3, 4]);
        assert_eq!(drain(&mut ft, None), vec![0, 1, 2, 3]);
        assert_eq!(ft.registered_iterators(), 0);
    }

    #[test]
    fn test_empty_table() {
        let mut ft = FlowTable::create().unwrap();
        let mut it = ft.iterator_init(None);
        assert!(ft.iterator_next(&mut it).is_none());
        assert!(ft.iterator_next(&mut it).is_none());
        ft.iterator_cleanup(it);
    }

    #[test]
    fn test_cookie_query_walks_bucket() {
        let mut ft = populated(&[
            0x0100_0000_0000_0001,
            0x0200_0000_0000_0001,
            0x0100_0000_0000_0002,
        ]);
        let query = FlowQuery::all().with_cookie(0x0100_0000_0000_0000, 0xFF00_0000_0000_0000);
        assert_eq!(drain(&mut ft, Some(query)), vec![0, 2]);

        let exact = FlowQuery::all().with_cookie(0x0100_0000_0000_0002, u64::MAX);
        assert_eq!(drain(&mut ft, Some(exact)), vec![2]);
    }

    #[test]
    fn test_delete_next_entry_skips_to_successor() {
        let mut ft = populated(&[1, 2, 3]);
        let second = ft.lookup(FlowId::new(1)).unwrap().handle();

        let mut it = ft.iterator_init(None);
        assert_eq!(ft.iterator_next(&mut it).unwrap().id(), FlowId::new(0));
        ft.delete(second).unwrap();
        ft.check_invariants().unwrap();
        assert_eq!(ft.iterator_next(&mut it).unwrap().id(), FlowId::new(2));
        assert!(ft.iterator_next(&mut it).is_none());
        ft.iterator_cleanup(it);
    }

    #[test]
    fn test_delete_returned_entry_is_safe() {
        let mut ft = populated(&[1, 2, 3]);
        let mut it = ft.iterator_init(None);
        let mut seen = Vec::new();
        while let Some(entry) = ft.iterator_next(&mut it) {
            let handle = entry.handle();
            seen.push(entry.id().as_u64());
            ft.delete(handle).unwrap();
        }
        ft.iterator_cleanup(it);
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(ft.is_empty());
    }

    #[test]
    fn test_overwrite_moves_bucket_iterator_along() {
        let mut ft = populated(&[0x0100_0000_0000_0000, 0x0100_0000_0000_0001]);
        let first = ft.lookup(FlowId::new(0)).unwrap().handle();

        let query = FlowQuery::all().with_cookie(0x0100_0000_0000_0000, 0xFF00_0000_0000_0000);
        let mut it = ft.iterator_init(Some(query));
        ft.overwrite(first, &FlowAdd::new(TableId::FIRST).with_cookie(0x0500_0000_0000_0000))
            .unwrap();
        ft.check_invariants().unwrap();

        assert_eq!(ft.iterator_next(&mut it).unwrap().id(), FlowId::new(1));
        assert!(ft.iterator_next(&mut it).is_none());
        ft.iterator_cleanup(it);
    }

    #[test]
    fn test_dropped_iterator_is_reaped() {
        let mut ft = populated(&[1, 2]);
        let it = ft.iterator_init(None);
        drop(it);
        assert_eq!(ft.registered_iterators(), 1);

        let it = ft.iterator_init(None);
        assert_eq!(ft.registered_iterators(), 1);
        ft.iterator_cleanup(it);
        assert_eq!(ft.registered_iterators(), 0);
        ft.check_invariants().unwrap();
    }

    #[test]
    fn test_dropped_iterator_reaped_on_delete() {
        let mut ft = populated(&[1, 2]);
        let first = ft.lookup(FlowId::new(0)).unwrap().handle();
        drop(ft.iterator_init(None));

        ft.delete(first).unwrap();
        assert_eq!(ft.registered_iterators(), 0);
        ft.check_invariants().unwrap();
    }

    #[test]
    fn test_clear_exhausts_iterators() {
        let mut ft = populated(&[1, 2]);
        let mut it = ft.iterator_init(None);
        ft.clear();
        assert!(ft.iterator_next(&mut it).is_none());
        ft.iterator_cleanup(it);
        assert_eq!(ft.registered_iterators(), 0);
    }

    #[test]
    fn test_stale_iterator_is_done() {
        let mut ft = populated(&[1]);
        let it = ft.iterator_init(None);
        let key = it.key;
        ft.iterator_cleanup(it);

        let mut forged = super::FlowIterator {
            table: ft.instance,
            key,
            generation: 0,
            _token: std::sync::Arc::new(()),
        };
        assert!(ft.iterator_next(&mut forged).is_none());
        assert!(matches!(ft.get(ft.iter().next().unwrap().handle()), Ok(_)));
    }

    #[test]
    fn test_iterator_of_other_table_is_ignored() {
        let mut first = populated(&[1, 2]);
        let mut second = populated(&[3, 4]);
        let mut own = second.iterator_init(None);
        let mut foreign = first.iterator_init(None);
        assert_eq!(first.registered_iterators(), 1);
        assert_eq!(second.registered_iterators(), 1);

        assert!(second.iterator_next(&mut foreign).is_none());
        second.iterator_cleanup(foreign);
        assert_eq!(second.registered_iterators(), 1);
        second.check_invariants().unwrap();

        assert_eq!(second.iterator_next(&mut own).unwrap().id(), FlowId::new(0));
        assert_eq!(second.iterator_next(&mut own).unwrap().id(), FlowId::new(1));
        second.iterator_cleanup(own);

        // Still registered with its own table until reaped.
        assert_eq!(first.registered_iterators(), 1);
        first.reap_iterators();
        assert_eq!(first.registered_iterators(), 0);
    }

    #[test]
    fn test_deserialized_query_is_normalized() {
        let mut ft = FlowTable::create().unwrap();
        let minimatch =
            Minimatch::new(10).with_field(MatchField::EthType, MaskedValue::exact(0x0800));
        ft.add(FlowId::new(1), &FlowAdd::new(TableId::FIRST), minimatch)
            .unwrap();

        let json = format!(
            r#"{{"mode":"strict","table_id":0,"cookie":0,"cookie_mask":0,"out_port":null,
                "check_priority":false,"minimatch":{{"priority":10,"fields":{{
                "eth_type":{{"value":{},"mask":{}}}}}}}}}"#,
            0x1_0800u32,
            u128::MAX
        );
        let query: FlowQuery = serde_json::from_str(&json).unwrap();
        assert_eq!(query.mode, QueryMode::Strict);

        assert_eq!(ft.strict_match(&query).unwrap().id(), FlowId::new(1));
        assert_eq!(drain(&mut ft, Some(query.clone())), vec![1]);

        let non_strict = FlowQuery {
            mode: QueryMode::NonStrict,
            ..query
        };
        assert_eq!(drain(&mut ft, Some(non_strict)), vec![1]);
    }
}
