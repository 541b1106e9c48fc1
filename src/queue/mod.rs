//! Per-resource queues of pending procedures.
//!
//! Every lockable resource has one queue, holding the procedures waiting for that resource
//! together with the resource's own lock. The levels of the resource hierarchy share the queue
//! mechanics in [`Queue`] and provide their own admission rules by implementing
//! [`ProcedureQueue`]:
//!
//! - [`NamespaceQueue`]: available whenever non-empty.
//! - [`TableQueue`]: additionally blocked while its namespace is exclusively locked.

use std::{cmp, collections::BinaryHeap, fmt, sync::Arc};

use tracing::trace;

use crate::{
    errors::SchedResult,
    lock::{LockStatus, ResourceLock},
    procedure::{Priority, Procedure},
};

mod namespace;
mod table;

pub use namespace::NamespaceQueue;
pub use table::TableQueue;

/// The capabilities the scheduler needs from a queue of one resource level.
pub trait ProcedureQueue: fmt::Display + Send {
    type Key: fmt::Display;

    fn queue(&self) -> &Queue<Self::Key>;

    fn queue_mut(&mut self) -> &mut Queue<Self::Key>;

    /// Returns `true` if the next procedure may be handed out right now.
    ///
    /// This reads the current lock state on every call. The answer can be outdated as soon as it
    /// is returned, so callers have to treat a failed lock acquisition afterwards as a retry.
    fn is_available(&self) -> bool {
        !self.is_empty()
    }

    /// Returns `true` if `proc` needs the exclusive lock on this queue's resource, `false` if a
    /// shared lock is enough.
    fn require_exclusive_lock(&self, proc: &dyn Procedure) -> SchedResult<bool>;

    fn key(&self) -> &Self::Key {
        self.queue().key()
    }

    fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    fn len(&self) -> usize {
        self.queue().len()
    }

    fn add(&mut self, proc: Arc<dyn Procedure>) {
        self.queue_mut().add(proc);
    }

    fn add_front(&mut self, proc: Arc<dyn Procedure>) {
        self.queue_mut().add_front(proc);
    }

    fn peek(&self) -> Option<&Arc<dyn Procedure>> {
        self.queue().peek()
    }

    fn poll(&mut self) -> Option<Arc<dyn Procedure>> {
        self.queue_mut().poll()
    }
}

/// A queued procedure. Ordered by priority first, then by insertion order.
struct QueuedProcedure {
    priority: Priority,
    /// Increases for every [`Queue::add`], decreases for every [`Queue::add_front`].
    order: i64,
    proc: Arc<dyn Procedure>,
}

impl PartialEq for QueuedProcedure {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl Eq for QueuedProcedure {}

impl PartialOrd for QueuedProcedure {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedProcedure {
    // NB: `BinaryHeap` pops the greatest element, so a lower `order` has to compare greater
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// The state every queue level shares: the key of its resource, the lock of that resource, and
/// the pending procedures.
pub struct Queue<K> {
    key: K,
    lock: Arc<ResourceLock>,
    run_queue: BinaryHeap<QueuedProcedure>,
    next_back: i64,
    next_front: i64,
}

impl<K: fmt::Display> Queue<K> {
    pub fn new(key: K, lock: Arc<ResourceLock>, initial_capacity: usize) -> Self {
        Self {
            key,
            lock,
            run_queue: BinaryHeap::with_capacity(initial_capacity),
            next_back: 0,
            next_front: -1,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// The lock of this queue's own resource.
    pub fn lock(&self) -> &Arc<ResourceLock> {
        &self.lock
    }

    pub fn is_empty(&self) -> bool {
        self.run_queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.run_queue.len()
    }

    /// Adds `proc` behind every procedure of the same priority.
    pub fn add(&mut self, proc: Arc<dyn Procedure>) {
        let order = self.next_back;
        self.next_back += 1;
        self.push(proc, order);
    }

    /// Adds `proc` ahead of every procedure of the same priority.
    pub fn add_front(&mut self, proc: Arc<dyn Procedure>) {
        let order = self.next_front;
        self.next_front -= 1;
        self.push(proc, order);
    }

    fn push(&mut self, proc: Arc<dyn Procedure>, order: i64) {
        trace!(queue = %self.key, proc_id = %proc.proc_id(), order, "Queueing procedure");
        self.run_queue.push(QueuedProcedure {
            priority: proc.priority(),
            order,
            proc,
        });
    }

    pub fn peek(&self) -> Option<&Arc<dyn Procedure>> {
        self.run_queue.peek().map(|queued| &queued.proc)
    }

    pub fn poll(&mut self) -> Option<Arc<dyn Procedure>> {
        self.run_queue.pop().map(|queued| queued.proc)
    }
}

impl<K: fmt::Display> fmt::Display for Queue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, xlock=", self.key)?;
        match self.lock.exclusive_lock_owner() {
            Some(owner) => write!(f, "true ({})", owner.get())?,
            None => write!(f, "false")?,
        }
        write!(
            f,
            ", sharedLock={}, size={}",
            self.lock.shared_lock_count(),
            self.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        procedure::{Priority, ProcId},
        resource::{NamespaceName, Resource},
        tests::OpaqueProc,
    };

    use super::*;

    fn queue() -> Queue<NamespaceName> {
        let lock = Arc::new(ResourceLock::new(Resource::Namespace(NamespaceName::DEFAULT)));
        Queue::new(NamespaceName::DEFAULT, lock, 4)
    }

    fn drain(queue: &mut Queue<NamespaceName>) -> Vec<u64> {
        std::iter::from_fn(|| queue.poll())
            .map(|proc| proc.proc_id().get())
            .collect()
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = queue();
        assert!(queue.is_empty());
        assert!(queue.poll().is_none());

        for id in 1..=5 {
            queue.add(OpaqueProc::arc(id, Priority::NORMAL));
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.peek().map(|p| p.proc_id()), ProcId::new(1));
        assert_eq!(drain(&mut queue), vec![1, 2, 3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_priority_before_arrival() {
        let mut queue = queue();
        queue.add(OpaqueProc::arc(1, Priority::LOW));
        queue.add(OpaqueProc::arc(2, Priority::NORMAL));
        queue.add(OpaqueProc::arc(3, Priority::HIGH));
        queue.add(OpaqueProc::arc(4, Priority::NORMAL));
        queue.add(OpaqueProc::arc(5, Priority::HIGH));
        assert_eq!(drain(&mut queue), vec![3, 5, 2, 4, 1]);
    }

    #[test]
    fn test_add_front() {
        let mut queue = queue();
        queue.add(OpaqueProc::arc(1, Priority::NORMAL));
        queue.add(OpaqueProc::arc(2, Priority::NORMAL));
        queue.add_front(OpaqueProc::arc(3, Priority::NORMAL));
        queue.add_front(OpaqueProc::arc(4, Priority::NORMAL));
        // front insertion never jumps a higher priority
        queue.add(OpaqueProc::arc(5, Priority::HIGH));
        assert_eq!(drain(&mut queue), vec![5, 4, 3, 1, 2]);
    }

    #[test]
    fn test_display() {
        let mut queue = queue();
        queue.add(OpaqueProc::arc(1, Priority::NORMAL));
        assert_eq!(
            queue.to_string(),
            "default, xlock=false, sharedLock=0, size=1"
        );
        assert!(queue.lock().try_exclusive_lock(ProcId::new(9).unwrap()));
        assert_eq!(
            queue.to_string(),
            "default, xlock=true (9), sharedLock=0, size=1"
        );
    }
}
