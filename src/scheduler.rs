//! # Procedure Scheduler
//!
//! Routes procedures to the queue of their resource and hands them out, together with the
//! locks they need, once their queue admits them.
//!
//! ## Lock Protocol
//!
//! | Procedure | Locks taken, in order |
//! |-----------|-----------------------|
//! | table     | `S` on the namespace, then `X` or `S` on the table |
//! | namespace | `S` on [`TableName::DUMMY_NAMESPACE_TABLE`], then `X` or `S` on the namespace |
//!
//! `X` or `S` is decided by the queue through [`ProcedureQueue::require_exclusive_lock`]. A
//! procedure whose locks cannot all be taken stays at the head of its queue and is retried on a
//! later poll. Because table procedures hold a shared namespace lock, a namespace procedure
//! waits for all running table procedures of its namespace, and while it runs the namespace's
//! [`TableQueue`]s report themselves unavailable.

use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;
use tracing::{debug, error, instrument, trace, warn};

use crate::{
    config::SchedulerConfig,
    errors::{SchedError, SchedResult},
    lock::{LockMode, ResourceLock},
    procedure::{ProcId, Procedure},
    queue::{NamespaceQueue, ProcedureQueue, TableQueue},
    registry::LockRegistry,
    resource::{NamespaceName, TableName},
};

#[derive(Debug)]
struct HeldLock {
    lock: Arc<ResourceLock>,
    mode: LockMode,
}

/// Holds the locks of a dispatched procedure. Releases them on drop and wakes up the workers
/// waiting in [`ProcedureScheduler::next`].
#[derive(Debug)]
pub struct LockGuard {
    proc_id: ProcId,
    held: Vec<HeldLock>,
    is_released: bool,
    #[debug(skip)]
    wakeup: Arc<Notify>,
}

impl LockGuard {
    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    /// Releases all locks now, reporting protocol violations instead of only logging them.
    pub fn release(mut self) -> SchedResult<()> {
        self.release_held()
    }

    fn release_held(&mut self) -> SchedResult<()> {
        // prevent double free
        if self.is_released {
            return Ok(());
        }
        self.is_released = true;

        let mut result = Ok(());
        // release in reverse order of acquisition
        while let Some(held) = self.held.pop() {
            if let Err(err) = held.lock.release(held.mode, self.proc_id) {
                error!(proc_id = %self.proc_id, resource = %held.lock.resource(), "Could not release lock: {}", err);
                result = Err(err);
            }
        }
        debug!(proc_id = %self.proc_id, "Released procedure locks");

        // signal to the workers that the resources can be accessed again
        self.wakeup.notify_waiters();
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.release_held();
    }
}

/// A procedure handed out by the scheduler, holding the locks it was admitted with.
#[derive(Debug)]
pub struct Dispatch {
    pub proc: Arc<dyn Procedure>,
    /// Whether the procedure holds the exclusive lock on its resource.
    pub exclusive: bool,
    pub guard: LockGuard,
}

type QueueMap<K, Q> = RwLock<BTreeMap<K, Arc<Mutex<Q>>>>;

/// Manages the queues of all namespaces and tables.
///
/// Queues are created on demand. Every queue has its own mutex, so polling one queue never waits
/// on another one.
pub struct ProcedureScheduler {
    config: SchedulerConfig,
    locks: LockRegistry,
    namespace_queues: QueueMap<NamespaceName, NamespaceQueue>,
    table_queues: QueueMap<TableName, TableQueue>,
    /// The namespace queue tried last. The next scan starts right after it.
    namespace_cursor: Mutex<Option<NamespaceName>>,
    /// The table queue tried last. The next scan starts right after it.
    table_cursor: Mutex<Option<TableName>>,
    wakeup: Arc<Notify>,
}

impl ProcedureScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            locks: LockRegistry::new(),
            namespace_queues: RwLock::new(BTreeMap::new()),
            table_queues: RwLock::new(BTreeMap::new()),
            namespace_cursor: Mutex::new(None),
            table_cursor: Mutex::new(None),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// The locks of all resources, as seen by the scheduler.
    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Queues `proc` behind the procedures of the same priority on its resource.
    pub fn add(&self, proc: Arc<dyn Procedure>) -> SchedResult<()> {
        self.push(proc, false)
    }

    /// Queues `proc` ahead of the procedures of the same priority on its resource, e.g. to resume
    /// a procedure that yielded.
    pub fn add_front(&self, proc: Arc<dyn Procedure>) -> SchedResult<()> {
        self.push(proc, true)
    }

    fn push(&self, proc: Arc<dyn Procedure>, front: bool) -> SchedResult<()> {
        if let Some(table_proc) = proc.as_table_procedure() {
            let table = table_proc.table_name().clone();
            // NB: the map guard is held while adding, so eviction cannot drop the queue in between
            let queues = self.table_queue_map_with(&table);
            let mut queue = queues
                .get(&table)
                .expect("table queue was just inserted")
                .lock();
            if front {
                queue.add_front(proc);
            } else {
                queue.add(proc);
            }
        } else if let Some(namespace_proc) = proc.as_namespace_procedure() {
            let namespace = namespace_proc.namespace_name().clone();
            let queues = self.namespace_queue_map_with(&namespace);
            let mut queue = queues
                .get(&namespace)
                .expect("namespace queue was just inserted")
                .lock();
            if front {
                queue.add_front(proc);
            } else {
                queue.add(proc);
            }
        } else {
            warn!(proc_id = %proc.proc_id(), "procedure has neither a table nor a namespace");
            return Err(SchedError::InvalidProcedure {
                proc_id: proc.proc_id(),
                queue: "scheduler",
                capability: "TableProcedure or NamespaceProcedure",
            });
        }
        self.wakeup.notify_waiters();
        Ok(())
    }

    /// Returns a read guard of the table queues that contains a queue for `table`.
    fn table_queue_map_with(
        &self,
        table: &TableName,
    ) -> RwLockReadGuard<'_, BTreeMap<TableName, Arc<Mutex<TableQueue>>>> {
        {
            let queues = self.table_queues.read();
            if queues.contains_key(table) {
                return queues;
            }
        }
        let mut queues = self.table_queues.write();
        queues.entry(table.clone()).or_insert_with(|| {
            debug!(%table, "Creating table queue");
            Arc::new(Mutex::new(TableQueue::new(
                table.clone(),
                self.locks.table_lock(table),
                self.locks.namespace_lock(table.namespace()),
                self.config.queue.initial_capacity,
            )))
        });
        RwLockWriteGuard::downgrade(queues)
    }

    /// Returns a read guard of the namespace queues that contains a queue for `namespace`.
    fn namespace_queue_map_with(
        &self,
        namespace: &NamespaceName,
    ) -> RwLockReadGuard<'_, BTreeMap<NamespaceName, Arc<Mutex<NamespaceQueue>>>> {
        {
            let queues = self.namespace_queues.read();
            if queues.contains_key(namespace) {
                return queues;
            }
        }
        let mut queues = self.namespace_queues.write();
        queues.entry(namespace.clone()).or_insert_with(|| {
            debug!(%namespace, "Creating namespace queue");
            Arc::new(Mutex::new(NamespaceQueue::new(
                namespace.clone(),
                self.locks.namespace_lock(namespace),
                self.config.queue.initial_capacity,
            )))
        });
        RwLockWriteGuard::downgrade(queues)
    }

    /// Hands out the next procedure that can take its locks, if any.
    ///
    /// Namespace queues are tried before table queues. Each level is scanned in key order,
    /// starting right after the queue that was tried last, so a queue whose locks are taken
    /// cannot use up the scan budget of every poll.
    #[instrument(skip_all, level = "debug")]
    pub fn poll(&self) -> SchedResult<Option<Dispatch>> {
        let mut scan_budget = self.config.dispatch.max_queue_scan;

        let dispatch = self.scan(
            &self.namespace_queues,
            &self.namespace_cursor,
            &mut scan_budget,
            |queue: &NamespaceQueue, mode| {
                vec![
                    (
                        self.locks.table_lock(&TableName::DUMMY_NAMESPACE_TABLE),
                        LockMode::Shared,
                    ),
                    (queue.queue().lock().clone(), mode),
                ]
            },
        )?;
        if dispatch.is_some() {
            return Ok(dispatch);
        }

        let dispatch = self.scan(
            &self.table_queues,
            &self.table_cursor,
            &mut scan_budget,
            |queue: &TableQueue, mode| {
                vec![
                    (queue.namespace_resource_lock().clone(), LockMode::Shared),
                    (queue.queue().lock().clone(), mode),
                ]
            },
        )?;
        if dispatch.is_some() {
            return Ok(dispatch);
        }

        if self.config.dispatch.evict_drained_queues {
            self.evict_drained();
        }
        Ok(None)
    }

    /// Waits until a procedure can be handed out.
    ///
    /// Wakes up whenever a procedure is added or a [`LockGuard`] is released. Lock changes made
    /// outside of the scheduler have to be announced through [`wake`].
    ///
    /// [`wake`]: Self::wake
    pub async fn next(&self) -> SchedResult<Dispatch> {
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            // register before polling, so a wakeup in between is not lost
            notified.as_mut().enable();

            if let Some(dispatch) = self.poll()? {
                return Ok(dispatch);
            }
            notified.await;
        }
    }

    /// Wakes up all workers waiting in [`next`].
    ///
    /// [`next`]: Self::next
    pub fn wake(&self) {
        self.wakeup.notify_waiters();
    }

    fn scan<Q, F>(
        &self,
        queues: &QueueMap<Q::Key, Q>,
        cursor: &Mutex<Option<Q::Key>>,
        scan_budget: &mut usize,
        plan_locks: F,
    ) -> SchedResult<Option<Dispatch>>
    where
        Q: ProcedureQueue,
        Q::Key: Ord + Clone,
        F: Fn(&Q, LockMode) -> Vec<(Arc<ResourceLock>, LockMode)>,
    {
        for (key, queue) in scan_order(queues, cursor) {
            if *scan_budget == 0 {
                break;
            }
            let budget = *scan_budget;
            let dispatch = self.try_dispatch(&queue, scan_budget, &plan_locks)?;
            if *scan_budget < budget {
                *cursor.lock() = Some(key);
            }
            if dispatch.is_some() {
                return Ok(dispatch);
            }
        }
        Ok(None)
    }

    fn try_dispatch<Q, F>(
        &self,
        queue: &Mutex<Q>,
        scan_budget: &mut usize,
        plan_locks: F,
    ) -> SchedResult<Option<Dispatch>>
    where
        Q: ProcedureQueue,
        F: FnOnce(&Q, LockMode) -> Vec<(Arc<ResourceLock>, LockMode)>,
    {
        let mut queue = queue.lock();
        if !queue.is_available() {
            return Ok(None);
        }
        *scan_budget -= 1;

        let Some(proc) = queue.peek().cloned() else {
            return Ok(None);
        };
        let exclusive = match queue.require_exclusive_lock(proc.as_ref()) {
            Ok(exclusive) => exclusive,
            Err(err) => {
                // never leave a procedure at the head, that can never be dispatched
                queue.poll();
                return Err(err);
            }
        };
        let mode = if exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };

        let proc_id = proc.proc_id();
        let Some(held) = try_lock_all(proc_id, plan_locks(&*queue, mode)) else {
            trace!(queue = %queue.key(), %proc_id, ?mode, "Locks not available, retrying later");
            return Ok(None);
        };
        queue.poll();
        debug!(queue = %queue.key(), %proc_id, exclusive, "Dispatching procedure");

        Ok(Some(Dispatch {
            proc,
            exclusive,
            guard: LockGuard {
                proc_id,
                held,
                is_released: false,
                wakeup: self.wakeup.clone(),
            },
        }))
    }

    /// Drops empty queues whose locks are free, together with their lock entries.
    fn evict_drained(&self) {
        fn is_drained<Q: ProcedureQueue>(queue: &Mutex<Q>) -> bool {
            use crate::lock::LockStatus;

            queue
                .try_lock()
                .is_some_and(|queue| queue.is_empty() && !queue.queue().lock().is_locked())
        }

        let mut evicted = 0;
        {
            let mut queues = self.table_queues.write();
            let before = queues.len();
            queues.retain(|_, queue| !is_drained(queue));
            evicted += before - queues.len();
        }
        {
            let mut queues = self.namespace_queues.write();
            let before = queues.len();
            queues.retain(|_, queue| !is_drained(queue));
            evicted += before - queues.len();
        }
        if evicted > 0 {
            let locks = self.locks.evict_unused();
            trace!(queues = evicted, locks, "Evicted drained queues");
        }
    }

    /// Returns the queue of `table`, if one exists.
    pub fn table_queue(&self, table: &TableName) -> Option<Arc<Mutex<TableQueue>>> {
        self.table_queues.read().get(table).cloned()
    }

    /// Returns the queue of `namespace`, if one exists.
    pub fn namespace_queue(&self, namespace: &NamespaceName) -> Option<Arc<Mutex<NamespaceQueue>>> {
        self.namespace_queues.read().get(namespace).cloned()
    }

    /// Number of queued procedures across all queues.
    pub fn len(&self) -> usize {
        let namespaces: usize = self
            .namespace_queues
            .read()
            .values()
            .map(|queue| queue.lock().len())
            .sum();
        let tables: usize = self
            .table_queues
            .read()
            .values()
            .map(|queue| queue.lock().len())
            .sum();
        namespaces + tables
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Describes every queue, namespaces first, for diagnostics.
    pub fn dump(&self) -> Vec<String> {
        let namespaces = self.namespace_queues.read();
        let tables = self.table_queues.read();
        namespaces
            .values()
            .map(|queue| queue.lock().to_string())
            .chain(tables.values().map(|queue| queue.lock().to_string()))
            .collect()
    }
}

impl Default for ProcedureScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// Returns the queues in key order, starting right after `cursor` and wrapping around.
fn scan_order<K: Ord + Clone, Q>(
    queues: &QueueMap<K, Q>,
    cursor: &Mutex<Option<K>>,
) -> Vec<(K, Arc<Mutex<Q>>)> {
    let queues = queues.read();
    let cursor = cursor.lock();
    let ordered: Vec<_> = match cursor.as_ref() {
        Some(last) => queues
            .range((Bound::Excluded(last), Bound::Unbounded))
            .chain(queues.range(..=last))
            .collect(),
        None => queues.iter().collect(),
    };
    ordered
        .into_iter()
        .map(|(key, queue)| (key.clone(), queue.clone()))
        .collect()
}

/// Takes all `locks` for `proc_id`, or none of them.
fn try_lock_all(
    proc_id: ProcId,
    locks: Vec<(Arc<ResourceLock>, LockMode)>,
) -> Option<Vec<HeldLock>> {
    let mut held: Vec<HeldLock> = Vec::with_capacity(locks.len());
    for (lock, mode) in locks {
        if !lock.try_lock(mode, proc_id) {
            // roll back in reverse order
            while let Some(taken) = held.pop() {
                if let Err(err) = taken.lock.release(taken.mode, proc_id) {
                    error!(%proc_id, "Could not roll back lock: {}", err);
                }
            }
            return None;
        }
        held.push(HeldLock { lock, mode });
    }
    Some(held)
}
