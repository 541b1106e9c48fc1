//! # Lock State
//!
//! ## X (Exclusive)
//!
//! The resource is owned by a single procedure. Blocks all `S` and other `X` locks.
//!
//! ## S (Shared)
//!
//! The resource is in use by any number of procedures. Allows other `S` locks, but blocks `X`.
//!
//! # Compatability Between Lock States
//!
//! | Requested \ Held |  S  | X  |
//! |------------------|-----|----|
//! |        S         | Yes | No |
//! |        X         | No  | No |
//!
//! A procedure that already owns the `X` lock may request it again.
//!
//! Reads of a [`ResourceLock`] never take a lock, so queues can observe it from any thread. What
//! they see is a point-in-time value that may be outdated right after the read.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::{
    errors::{SchedError, SchedResult},
    procedure::ProcId,
    resource::Resource,
};

/// Marks the exclusive owner word as "not owned". [`ProcId`]s can never take this value.
const NO_OWNER: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Exclusive,
    Shared,
}

/// Read-only view on the lock state of one resource.
pub trait LockStatus: Send + Sync {
    fn has_exclusive_lock(&self) -> bool;

    fn exclusive_lock_owner(&self) -> Option<ProcId>;

    fn shared_lock_count(&self) -> u32;

    fn is_locked(&self) -> bool {
        self.has_exclusive_lock() || self.shared_lock_count() > 0
    }

    fn has_lock_access(&self, proc_id: ProcId) -> bool {
        self.exclusive_lock_owner() == Some(proc_id)
    }

    /// Human-readable description of the current lock state.
    fn describe_lock_status(&self) -> String {
        if let Some(owner) = self.exclusive_lock_owner() {
            format!("exclusiveLockOwner={}", owner.get())
        } else if self.shared_lock_count() > 0 {
            format!("sharedLockCount={}", self.shared_lock_count())
        } else {
            "unlocked".to_owned()
        }
    }
}

/// The lock of a single resource.
#[derive(Debug)]
pub struct ResourceLock {
    resource: Resource,
    exclusive_owner: AtomicU64,
    shared_count: AtomicU32,
    /// Serializes the acquire/release protocol. Readers never touch it.
    write: Mutex<()>,
}

impl ResourceLock {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            exclusive_owner: AtomicU64::new(NO_OWNER),
            shared_count: AtomicU32::new(0),
            write: Mutex::new(()),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Tries to take the exclusive lock for `proc_id`. Returns `true` when `proc_id` owns the lock
    /// afterwards.
    pub fn try_exclusive_lock(&self, proc_id: ProcId) -> bool {
        let _write = self.write.lock();
        let owner = self.exclusive_owner.load(Ordering::Acquire);
        if owner != NO_OWNER {
            return owner == proc_id.get();
        }
        if self.shared_count.load(Ordering::Acquire) > 0 {
            return false;
        }
        self.exclusive_owner.store(proc_id.get(), Ordering::Release);
        trace!(resource = %self.resource, %proc_id, "exclusive lock acquired");
        true
    }

    pub fn release_exclusive_lock(&self, proc_id: ProcId) -> SchedResult<()> {
        let _write = self.write.lock();
        if self.exclusive_owner.load(Ordering::Acquire) != proc_id.get() {
            return Err(SchedError::NotLockOwner(proc_id));
        }
        self.exclusive_owner.store(NO_OWNER, Ordering::Release);
        trace!(resource = %self.resource, %proc_id, "exclusive lock released");
        Ok(())
    }

    /// Tries to take one shared lock. Fails while the exclusive lock is held.
    pub fn try_shared_lock(&self) -> bool {
        let _write = self.write.lock();
        if self.exclusive_owner.load(Ordering::Acquire) != NO_OWNER {
            return false;
        }
        self.shared_count.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Releases one shared lock. Returns `true` if it was the last one.
    pub fn release_shared_lock(&self) -> SchedResult<bool> {
        let _write = self.write.lock();
        let previous = self.shared_count.load(Ordering::Acquire);
        if previous == 0 {
            return Err(SchedError::SharedLockNotHeld(self.resource.clone()));
        }
        self.shared_count.store(previous - 1, Ordering::Release);
        Ok(previous == 1)
    }

    /// Takes the lock in the given mode.
    pub fn try_lock(&self, mode: LockMode, proc_id: ProcId) -> bool {
        match mode {
            LockMode::Exclusive => self.try_exclusive_lock(proc_id),
            LockMode::Shared => self.try_shared_lock(),
        }
    }

    /// Releases a lock that was taken through [`try_lock`].
    ///
    /// [`try_lock`]: Self::try_lock
    pub fn release(&self, mode: LockMode, proc_id: ProcId) -> SchedResult<()> {
        match mode {
            LockMode::Exclusive => self.release_exclusive_lock(proc_id),
            LockMode::Shared => self.release_shared_lock().map(|_| ()),
        }
    }
}

impl LockStatus for ResourceLock {
    #[inline]
    fn has_exclusive_lock(&self) -> bool {
        self.exclusive_owner.load(Ordering::Acquire) != NO_OWNER
    }

    fn exclusive_lock_owner(&self) -> Option<ProcId> {
        ProcId::new(self.exclusive_owner.load(Ordering::Acquire))
    }

    #[inline]
    fn shared_lock_count(&self) -> u32 {
        self.shared_count.load(Ordering::Acquire)
    }
}
