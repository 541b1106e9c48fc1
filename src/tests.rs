use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use tracing_subscriber::EnvFilter;

use crate::{
    LockStatus, NamespaceName, NamespaceOperation, NamespaceProcedure, Priority, ProcId,
    Procedure, ProcedureQueue, ProcedureScheduler, SchedulerConfig, TableName, TableOperation,
    TableProcedure,
};

pub(crate) fn setup_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .init();
    });
}

#[derive(Debug)]
pub(crate) struct TestTableProc {
    id: ProcId,
    priority: Priority,
    table: TableName,
    operation: TableOperation,
}

impl TestTableProc {
    pub(crate) fn arc(id: u64, table: TableName, operation: TableOperation) -> Arc<dyn Procedure> {
        Self::with_priority(id, table, operation, Priority::NORMAL)
    }

    pub(crate) fn with_priority(
        id: u64,
        table: TableName,
        operation: TableOperation,
        priority: Priority,
    ) -> Arc<dyn Procedure> {
        Arc::new(Self {
            id: ProcId::new(id).unwrap(),
            priority,
            table,
            operation,
        })
    }
}

impl Procedure for TestTableProc {
    fn proc_id(&self) -> ProcId {
        self.id
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn as_table_procedure(&self) -> Option<&dyn TableProcedure> {
        Some(self)
    }
}

impl TableProcedure for TestTableProc {
    fn table_name(&self) -> &TableName {
        &self.table
    }

    fn table_operation(&self) -> TableOperation {
        self.operation
    }
}

#[derive(Debug)]
pub(crate) struct TestNamespaceProc {
    id: ProcId,
    namespace: NamespaceName,
    operation: NamespaceOperation,
}

impl TestNamespaceProc {
    pub(crate) fn arc(
        id: u64,
        namespace: NamespaceName,
        operation: NamespaceOperation,
    ) -> Arc<dyn Procedure> {
        Arc::new(Self {
            id: ProcId::new(id).unwrap(),
            namespace,
            operation,
        })
    }
}

impl Procedure for TestNamespaceProc {
    fn proc_id(&self) -> ProcId {
        self.id
    }

    fn as_namespace_procedure(&self) -> Option<&dyn NamespaceProcedure> {
        Some(self)
    }
}

impl NamespaceProcedure for TestNamespaceProc {
    fn namespace_name(&self) -> &NamespaceName {
        &self.namespace
    }

    fn namespace_operation(&self) -> NamespaceOperation {
        self.operation
    }
}

/// A procedure without any resource capability.
#[derive(Debug)]
pub(crate) struct OpaqueProc {
    id: ProcId,
    priority: Priority,
}

impl OpaqueProc {
    pub(crate) fn arc(id: u64, priority: Priority) -> Arc<dyn Procedure> {
        Arc::new(Self {
            id: ProcId::new(id).unwrap(),
            priority,
        })
    }
}

impl Procedure for OpaqueProc {
    fn proc_id(&self) -> ProcId {
        self.id
    }

    fn priority(&self) -> Priority {
        self.priority
    }
}

/// Walks through the admission of a single create procedure while its namespace lock flips.
#[test]
fn test_table_queue_admission_scenario() {
    setup_tracing();
    let sched = ProcedureScheduler::new(SchedulerConfig::for_testing());
    let table = TableName::parse("sales:orders").unwrap();
    let namespace_lock = sched.locks().namespace_lock(table.namespace());

    sched
        .add(TestTableProc::arc(1, table.clone(), TableOperation::Create))
        .unwrap();
    let queue = sched.table_queue(&table).unwrap();
    {
        let queue = queue.lock();
        assert!(queue.is_available());
        let head = queue.peek().unwrap();
        assert!(queue.require_exclusive_lock(&**head).unwrap());
    }

    // an outside namespace owner blocks the queue without touching its contents
    let ns_owner = ProcId::new(1_000).unwrap();
    assert!(namespace_lock.try_exclusive_lock(ns_owner));
    assert!(!queue.lock().is_available());
    assert_eq!(queue.lock().len(), 1);
    assert!(sched.poll().unwrap().is_none());

    namespace_lock.release_exclusive_lock(ns_owner).unwrap();
    assert!(queue.lock().is_available());

    let dispatch = sched.poll().unwrap().unwrap();
    assert!(dispatch.exclusive);
    assert!(!queue.lock().is_available());
    assert_eq!(
        sched.locks().table_lock(&table).exclusive_lock_owner(),
        Some(dispatch.proc.proc_id())
    );
}

/// Many workers draining a mix of table procedures never violate the lock invariants.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers() {
    setup_tracing();
    let sched = Arc::new(ProcedureScheduler::default());
    let tables: Vec<_> = ["sales:orders", "sales:users", "hr:people"]
        .into_iter()
        .map(|name| TableName::parse(name).unwrap())
        .collect();
    let operations = [
        TableOperation::Read,
        TableOperation::Edit,
        TableOperation::RegionAssign,
        TableOperation::Flush,
        TableOperation::Disable,
    ];

    let total = 150;
    for id in 0..total {
        let table = tables[id as usize % tables.len()].clone();
        let operation = operations[id as usize % operations.len()];
        sched.add(TestTableProc::arc(id, table, operation)).unwrap();
    }

    let done = Arc::new(AtomicU32::new(0));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let sched = sched.clone();
            let done = done.clone();
            tokio::spawn(async move {
                while done.load(Ordering::Acquire) < total as u32 {
                    let next = tokio::time::timeout(Duration::from_millis(50), sched.next()).await;
                    let Ok(dispatch) = next else {
                        continue;
                    };
                    let dispatch = dispatch.unwrap();
                    let table = dispatch
                        .proc
                        .as_table_procedure()
                        .unwrap()
                        .table_name()
                        .clone();
                    let table_lock = sched.locks().table_lock(&table);
                    if dispatch.exclusive {
                        assert_eq!(
                            table_lock.exclusive_lock_owner(),
                            Some(dispatch.proc.proc_id())
                        );
                        assert_eq!(table_lock.shared_lock_count(), 0);
                    } else {
                        assert!(!table_lock.has_exclusive_lock());
                        assert!(table_lock.shared_lock_count() > 0);
                    }
                    tokio::task::yield_now().await;
                    drop(dispatch);
                    done.fetch_add(1, Ordering::AcqRel);
                }
            })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(10), futures::future::join_all(workers))
        .await
        .expect("workers should drain all procedures")
        .into_iter()
        .for_each(|res| res.unwrap());

    assert!(sched.is_empty());
    // all locks are free again, so the next idle poll evicts every queue
    assert!(sched.poll().unwrap().is_none());
    assert!(sched.dump().is_empty());
    assert!(sched.locks().is_empty());
}
