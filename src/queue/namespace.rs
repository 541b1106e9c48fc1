use std::{fmt, sync::Arc};

use tracing::warn;

use crate::{
    classify::require_namespace_exclusive_lock,
    errors::{SchedError, SchedResult},
    lock::ResourceLock,
    procedure::Procedure,
    queue::{ProcedureQueue, Queue},
    resource::NamespaceName,
};

/// Queue of the procedures of one namespace. Its lock is the one the namespace's
/// [`TableQueue`]s observe.
///
/// [`TableQueue`]: super::TableQueue
pub struct NamespaceQueue {
    queue: Queue<NamespaceName>,
}

impl NamespaceQueue {
    pub fn new(
        namespace: NamespaceName,
        namespace_lock: Arc<ResourceLock>,
        initial_capacity: usize,
    ) -> Self {
        Self {
            queue: Queue::new(namespace, namespace_lock, initial_capacity),
        }
    }
}

impl ProcedureQueue for NamespaceQueue {
    type Key = NamespaceName;

    fn queue(&self) -> &Queue<NamespaceName> {
        &self.queue
    }

    fn queue_mut(&mut self) -> &mut Queue<NamespaceName> {
        &mut self.queue
    }

    fn require_exclusive_lock(&self, proc: &dyn Procedure) -> SchedResult<bool> {
        let Some(namespace_proc) = proc.as_namespace_procedure() else {
            warn!(proc_id = %proc.proc_id(), queue = %self.key(), "procedure is not a namespace procedure");
            return Err(SchedError::InvalidProcedure {
                proc_id: proc.proc_id(),
                queue: "namespace",
                capability: "NamespaceProcedure",
            });
        };
        Ok(require_namespace_exclusive_lock(
            namespace_proc.namespace_operation(),
        ))
    }
}

impl fmt::Display for NamespaceQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamespaceQueue({})", self.queue)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        procedure::{NamespaceOperation, Priority, ProcId, TableOperation},
        resource::{Resource, TableName},
        tests::{OpaqueProc, TestNamespaceProc, TestTableProc},
    };

    use super::*;

    fn namespace_queue() -> NamespaceQueue {
        let namespace = NamespaceName::new("sales").unwrap();
        let lock = Arc::new(ResourceLock::new(Resource::Namespace(namespace.clone())));
        NamespaceQueue::new(namespace, lock, 4)
    }

    #[test]
    fn test_available_when_non_empty() {
        let mut queue = namespace_queue();
        assert!(!queue.is_available());
        let namespace = queue.key().clone();
        queue.add(TestNamespaceProc::arc(1, namespace, NamespaceOperation::Edit));
        assert!(queue.is_available());
        // its own lock does not gate availability, acquisition does
        assert!(queue.queue().lock().try_exclusive_lock(ProcId::new(5).unwrap()));
        assert!(queue.is_available());
    }

    #[test]
    fn test_every_namespace_operation_is_exclusive() {
        let queue = namespace_queue();
        for operation in [
            NamespaceOperation::Create,
            NamespaceOperation::Edit,
            NamespaceOperation::Delete,
        ] {
            let proc = TestNamespaceProc::arc(1, queue.key().clone(), operation);
            assert!(queue.require_exclusive_lock(proc.as_ref()).unwrap());
        }
    }

    #[test]
    fn test_wrong_capability_is_rejected() {
        let queue = namespace_queue();
        let table_proc = TestTableProc::arc(
            2,
            TableName::parse("sales:orders").unwrap(),
            TableOperation::Create,
        );
        assert!(matches!(
            queue.require_exclusive_lock(table_proc.as_ref()),
            Err(SchedError::InvalidProcedure { queue: "namespace", .. })
        ));
        let opaque = OpaqueProc::arc(3, Priority::NORMAL);
        assert!(queue.require_exclusive_lock(opaque.as_ref()).is_err());
    }
}
