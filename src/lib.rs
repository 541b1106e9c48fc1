#[macro_use]
extern crate derive_more;

pub mod classify;
pub mod config;
pub mod errors;
pub mod lock;
pub mod procedure;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use config::SchedulerConfig;
pub use errors::{SchedError, SchedResult};
pub use lock::{LockMode, LockStatus, ResourceLock};
pub use procedure::{
    NamespaceOperation, NamespaceProcedure, Priority, ProcId, Procedure, TableOperation,
    TableProcedure,
};
pub use queue::{NamespaceQueue, ProcedureQueue, TableQueue};
pub use resource::{NamespaceName, TableName};
pub use scheduler::{Dispatch, LockGuard, ProcedureScheduler};
