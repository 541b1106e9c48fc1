use std::{fmt, sync::Arc};

use tracing::warn;

use crate::{
    classify::require_table_exclusive_lock,
    errors::{SchedError, SchedResult},
    lock::{LockStatus, ResourceLock},
    procedure::Procedure,
    queue::{ProcedureQueue, Queue},
    resource::TableName,
};

/// Queue of the procedures of one table.
///
/// Besides its own table lock, it observes the lock of the table's namespace: while the namespace
/// is exclusively locked (e.g. by a namespace edit), none of its tables hand out procedures.
pub struct TableQueue {
    queue: Queue<TableName>,
    /// Owned by the namespace's queue. Only ever read here.
    namespace_lock: Arc<ResourceLock>,
}

impl TableQueue {
    pub fn new(
        table: TableName,
        table_lock: Arc<ResourceLock>,
        namespace_lock: Arc<ResourceLock>,
        initial_capacity: usize,
    ) -> Self {
        Self {
            queue: Queue::new(table, table_lock, initial_capacity),
            namespace_lock,
        }
    }

    pub fn namespace_lock(&self) -> &dyn LockStatus {
        self.namespace_lock.as_ref()
    }

    pub(crate) fn namespace_resource_lock(&self) -> &Arc<ResourceLock> {
        &self.namespace_lock
    }
}

impl ProcedureQueue for TableQueue {
    type Key = TableName;

    fn queue(&self) -> &Queue<TableName> {
        &self.queue
    }

    fn queue_mut(&mut self) -> &mut Queue<TableName> {
        &mut self.queue
    }

    fn is_available(&self) -> bool {
        !self.is_empty() && !self.namespace_lock.has_exclusive_lock()
    }

    fn require_exclusive_lock(&self, proc: &dyn Procedure) -> SchedResult<bool> {
        let Some(table_proc) = proc.as_table_procedure() else {
            warn!(proc_id = %proc.proc_id(), queue = %self.key(), "procedure is not a table procedure");
            return Err(SchedError::InvalidProcedure {
                proc_id: proc.proc_id(),
                queue: "table",
                capability: "TableProcedure",
            });
        };
        Ok(require_table_exclusive_lock(
            table_proc.table_operation(),
            table_proc.table_name(),
        ))
    }
}

impl fmt::Display for TableQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TableQueue({}, namespaceLockStatus={})",
            self.queue,
            self.namespace_lock.describe_lock_status()
        )
    }
}
