//! Cooperative background iteration tasks.
//!
//! A task walks the whole master list with its own iterator, handing every
//! match to a callback, and finishes with a single `callback(None)`. The
//! scheduler advances one task by a bounded number of entries per turn so
//! that table mutations can interleave with long scans. Tasks see no
//! snapshot: entries deleted before they are reached are skipped, entries
//! added meanwhile may or may not be visited.
//!
//! Priorities follow the orchestration convention: lower values run first,
//! tasks of equal priority take turns.

use crate::config::FlowTableConfig;
use crate::entry::FlowEntry;
use crate::error::{FtError, Result};
use crate::iter::{FlowIterator, IterStep};
use crate::table::FlowTable;
use log::{debug, info};
use ofstate_types::FlowQuery;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Per-match callback of an iteration task. `None` marks completion.
pub type IterCallback = Box<dyn FnMut(Option<&FlowEntry>) + Send>;

/// Identifies a spawned iteration task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IterTaskId(u64);

impl fmt::Display for IterTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iter-task-{}", self.0)
    }
}

struct IterTask {
    id: IterTaskId,
    iter: FlowIterator,
    callback: IterCallback,
    visited: usize,
    matched: usize,
}

impl IterTask {
    fn finish(mut self, table: &mut FlowTable) {
        (self.callback)(None);
        table.iterator_cleanup(self.iter);
    }
}

/// Runs iteration tasks against a flow table in priority order.
pub struct IterTaskScheduler {
    queues: BTreeMap<i32, VecDeque<IterTask>>,
    batch: usize,
    next_id: u64,
}

impl IterTaskScheduler {
    /// Creates a scheduler that visits at most `batch` entries per turn.
    pub fn new(batch: usize) -> Self {
        Self {
            queues: BTreeMap::new(),
            batch: batch.max(1),
            next_id: 1,
        }
    }

    pub fn from_config(config: &FlowTableConfig) -> Self {
        Self::new(config.iter_task_batch)
    }

    /// Schedules a scan of `table` for entries matching `query`.
    ///
    /// The scan always walks the master list, even when the query could be
    /// served from a cookie bucket.
    pub fn spawn<F>(
        &mut self,
        table: &mut FlowTable,
        query: Option<FlowQuery>,
        callback: F,
        priority: i32,
    ) -> Result<IterTaskId>
    where
        F: FnMut(Option<&FlowEntry>) + Send + 'static,
    {
        let queue = self.queues.entry(priority).or_default();
        queue.try_reserve(1).map_err(|err| {
            FtError::ResourceExhausted(format!("iteration task queue: {}", err))
        })?;

        let id = IterTaskId(self.next_id);
        self.next_id += 1;
        queue.push_back(IterTask {
            id,
            iter: table.iterator_init_unindexed(query),
            callback: Box::new(callback),
            visited: 0,
            matched: 0,
        });

        debug!("Spawned {} at priority {}", id, priority);
        Ok(id)
    }

    /// Advances the highest-priority task by up to one batch of entries.
    ///
    /// Returns true while tasks remain.
    pub fn run_once(&mut self, table: &mut FlowTable) -> bool {
        let Some(mut queue_entry) = self.queues.first_entry() else {
            return false;
        };
        let Some(mut task) = queue_entry.get_mut().pop_front() else {
            queue_entry.remove();
            return !self.queues.is_empty();
        };

        let mut done = false;
        for _ in 0..self.batch {
            match table.iterator_step(&mut task.iter, 1) {
                IterStep::Entry(entry) => {
                    task.visited += 1;
                    task.matched += 1;
                    (task.callback)(Some(entry));
                }
                IterStep::Pending => task.visited += 1,
                IterStep::Done => {
                    done = true;
                    break;
                }
            }
        }

        if done {
            info!(
                "{} finished: visited {} entries, {} matched",
                task.id, task.visited, task.matched
            );
            task.finish(table);
        } else {
            queue_entry.get_mut().push_back(task);
        }

        if queue_entry.get().is_empty() {
            queue_entry.remove();
        }
        !self.queues.is_empty()
    }

    /// Runs tasks until none remain. Returns the number of turns taken.
    pub fn run_until_idle(&mut self, table: &mut FlowTable) -> usize {
        let mut turns = 0;
        while !self.is_idle() {
            self.run_once(table);
            turns += 1;
        }
        turns
    }

    /// Runs tasks until none remain, releasing the table and yielding to the
    /// runtime between turns so that other users of the table can interleave.
    pub async fn drive(&mut self, table: &tokio::sync::Mutex<FlowTable>) {
        while !self.is_idle() {
            {
                let mut table = table.lock().await;
                self.run_once(&mut table);
            }
            tokio::task::yield_now().await;
        }
    }

    /// Stops a task. Its callback receives the terminating `None`.
    pub fn cancel(&mut self, id: IterTaskId, table: &mut FlowTable) -> Result<()> {
        let (priority, position) = self
            .queues
            .iter()
            .find_map(|(priority, queue)| {
                queue
                    .iter()
                    .position(|task| task.id == id)
                    .map(|position| (*priority, position))
            })
            .ok_or(FtError::NotFound)?;

        let queue = self.queues.get_mut(&priority).ok_or(FtError::NotFound)?;
        let task = queue.remove(position).ok_or(FtError::NotFound)?;
        if queue.is_empty() {
            self.queues.remove(&priority);
        }

        info!("Cancelled {} after {} entries", id, task.visited);
        task.finish(table);
        Ok(())
    }

    /// Number of tasks not yet finished.
    pub fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }
}

impl Default for IterTaskScheduler {
    fn default() -> Self {
        Self::from_config(&FlowTableConfig::default())
    }
}

impl Drop for IterTaskScheduler {
    fn drop(&mut self) {
        // Without the table the iterators cannot be unregistered here; the
        // table reaps them once their tokens are gone.
        for (_, queue) in std::mem::take(&mut self.queues) {
            for mut task in queue {
                debug!("Dropping unfinished {}", task.id);
                (task.callback)(None);
            }
        }
    }
}

impl fmt::Debug for IterTaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterTaskScheduler")
            .field("pending", &self.pending())
            .field("batch", &self.batch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofstate_types::{FlowAdd, FlowId, MaskedValue, MatchField, Minimatch, TableId};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<Option<u64>>>>;

    fn recorder() -> (Seen, impl FnMut(Option<&FlowEntry>) + Send + 'static) {
        let seen: Seen = Arc::default();
        let sink = Arc::clone(&seen);
        let callback = move |entry: Option<&FlowEntry>| {
            sink.lock().unwrap().push(entry.map(|entry| entry.id().as_u64()));
        };
        (seen, callback)
    }

    fn populated(count: u64) -> FlowTable {
        let mut ft = FlowTable::create().unwrap();
        for i in 0..count {
            let minimatch = Minimatch::new(1)
                .with_field(MatchField::InPort, MaskedValue::exact(u128::from(i)));
            ft.add(
                FlowId::new(i),
                &FlowAdd::new(TableId::FIRST).with_cookie(i % 2),
                minimatch,
            )
            .unwrap();
        }
        ft
    }

    #[test]
    fn test_task_visits_matches_then_finishes() {
        let mut ft = populated(5);
        let mut scheduler = IterTaskScheduler::new(2);
        let (seen, callback) = recorder();
        let query = FlowQuery::all().with_cookie(1, u64::MAX);

        scheduler.spawn(&mut ft, Some(query), callback, 0).unwrap();
        let turns = scheduler.run_until_idle(&mut ft);

        assert_eq!(turns, 3);
        assert_eq!(*seen.lock().unwrap(), vec![Some(1), Some(3), None]);
        assert_eq!(ft.registered_iterators(), 0);
    }

    #[test]
    fn test_no_match_gets_single_completion() {
        let mut ft = populated(3);
        let mut scheduler = IterTaskScheduler::default();
        let (seen, callback) = recorder();

        scheduler
            .spawn(&mut ft, Some(FlowQuery::all().with_cookie(7, u64::MAX)), callback, 0)
            .unwrap();
        scheduler.run_until_idle(&mut ft);
        assert_eq!(*seen.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_lower_priority_value_runs_first() {
        let mut ft = populated(2);
        let mut scheduler = IterTaskScheduler::new(10);
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();

        for (name, priority) in [("late", 5), ("early", -1)] {
            let order = Arc::clone(&order);
            scheduler
                .spawn(
                    &mut ft,
                    None,
                    move |entry| {
                        if entry.is_none() {
                            order.lock().unwrap().push(name);
                        }
                    },
                    priority,
                )
                .unwrap();
        }

        scheduler.run_until_idle(&mut ft);
        assert_eq!(*order.lock().unwrap(), vec!["early", "late"]);
    }

    #[test]
    fn test_equal_priority_round_robin() {
        let mut ft = populated(4);
        let mut scheduler = IterTaskScheduler::new(1);
        let log: Arc<Mutex<Vec<(char, Option<u64>)>>> = Arc::default();

        for name in ['a', 'b'] {
            let log = Arc::clone(&log);
            scheduler
                .spawn(
                    &mut ft,
                    None,
                    move |entry| log.lock().unwrap().push((name, entry.map(|e| e.id().as_u64()))),
                    0,
                )
                .unwrap();
        }

        scheduler.run_once(&mut ft);
        scheduler.run_once(&mut ft);
        scheduler.run_once(&mut ft);
        assert_eq!(
            *log.lock().unwrap(),
            vec![('a', Some(0)), ('b', Some(0)), ('a', Some(1))]
        );
    }

    #[test]
    fn test_deletes_between_turns_are_skipped() {
        let mut ft = populated(4);
        let mut scheduler = IterTaskScheduler::new(1);
        let (seen, callback) = recorder();
        scheduler.spawn(&mut ft, None, callback, 0).unwrap();

        scheduler.run_once(&mut ft);
        let handle = ft.lookup(FlowId::new(1)).unwrap().handle();
        ft.delete(handle).unwrap();
        scheduler.run_until_idle(&mut ft);

        assert_eq!(*seen.lock().unwrap(), vec![Some(0), Some(2), Some(3), None]);
    }

    #[test]
    fn test_cancel_delivers_completion() {
        let mut ft = populated(4);
        let mut scheduler = IterTaskScheduler::new(1);
        let (seen, callback) = recorder();
        let id = scheduler.spawn(&mut ft, None, callback, 0).unwrap();

        scheduler.run_once(&mut ft);
        scheduler.cancel(id, &mut ft).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Some(0), None]);
        assert!(scheduler.is_idle());
        assert_eq!(ft.registered_iterators(), 0);
        assert_eq!(scheduler.cancel(id, &mut ft).unwrap_err(), FtError::NotFound);
    }

    #[test]
    fn test_drop_delivers_completion() {
        let mut ft = populated(2);
        let (seen, callback) = recorder();
        {
            let mut scheduler = IterTaskScheduler::new(1);
            scheduler.spawn(&mut ft, None, callback, 0).unwrap();
            assert_eq!(scheduler.pending(), 1);
        }
        assert_eq!(*seen.lock().unwrap(), vec![None]);

        // The orphaned iterator is reaped by the next registration.
        let it = ft.iterator_init(None);
        assert_eq!(ft.registered_iterators(), 1);
        ft.iterator_cleanup(it);
    }

    #[tokio::test]
    async fn test_drive_interleaves_with_mutation() {
        let table = Arc::new(tokio::sync::Mutex::new(populated(50)));
        let (seen, callback) = recorder();
        let mut scheduler = IterTaskScheduler::new(4);
        scheduler
            .spawn(&mut *table.lock().await, None, callback, 0)
            .unwrap();

        let mutator = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                for id in (10..50).step_by(2) {
                    let mut table = table.lock().await;
                    if let Some(handle) = table.lookup(FlowId::new(id)).map(FlowEntry::handle) {
                        table.delete(handle).unwrap();
                    }
                    drop(table);
                    tokio::task::yield_now().await;
                }
            })
        };

        scheduler.drive(&table).await;
        mutator.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&None));
        assert_eq!(seen.iter().filter(|entry| entry.is_none()).count(), 1);
        let ids: Vec<u64> = seen.iter().flatten().copied().collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(&ids[..10], &(0..10).collect::<Vec<u64>>()[..]);
        table.lock().await.check_invariants().unwrap();
    }
}
