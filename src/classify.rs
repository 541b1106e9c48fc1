//! Lock requirements per operation.
//!
//! | Operation                                       | Lock on its resource |
//! |-------------------------------------------------|----------------------|
//! | table create, delete, disable, enable, snapshot | X                    |
//! | table edit                                      | X, but S on [`TableName::DUMMY_NAMESPACE_TABLE`] |
//! | table read, flush                               | S                    |
//! | region operations                               | S                    |
//! | namespace create, edit, delete                  | X                    |
//!
//! Region operations additionally take an exclusive lock on their region, which is not handled
//! by the queues.

use tracing::warn;

use crate::{
    errors::SchedResult,
    procedure::{NamespaceOperation, TableOperation},
    resource::TableName,
};

/// Returns `true` if `operation` on `table` needs the exclusive table lock.
pub fn require_table_exclusive_lock(operation: TableOperation, table: &TableName) -> bool {
    match operation {
        TableOperation::Create
        | TableOperation::Delete
        | TableOperation::Disable
        | TableOperation::Enable
        | TableOperation::Snapshot => true,
        // edits on the namespace-record table touch disjoint rows, one per namespace
        TableOperation::Edit => !table.is_dummy_namespace_table(),
        TableOperation::Read | TableOperation::Flush => false,
        // region operations take the shared table lock and an exclusive lock on the region
        TableOperation::RegionSplit
        | TableOperation::RegionMerge
        | TableOperation::RegionAssign
        | TableOperation::RegionUnassign
        | TableOperation::RegionEdit
        | TableOperation::RegionGc
        | TableOperation::MergedRegionsGc
        | TableOperation::RegionSnapshot
        | TableOperation::RegionTruncate => false,
    }
}

/// Like [`require_table_exclusive_lock`], for an operation given by its wire code.
///
/// Fails with [`SchedError::UnknownTableOperation`] for a code outside [`TableOperation`].
///
/// [`SchedError::UnknownTableOperation`]: crate::SchedError::UnknownTableOperation
pub fn require_table_exclusive_lock_raw(code: u8, table: &TableName) -> SchedResult<bool> {
    let operation = TableOperation::try_from(code).inspect_err(|err| {
        warn!(code = err.number, %table, "unknown table operation reached the classifier");
    })?;
    Ok(require_table_exclusive_lock(operation, table))
}

/// Returns `true` if `operation` needs the exclusive namespace lock.
pub fn require_namespace_exclusive_lock(operation: NamespaceOperation) -> bool {
    match operation {
        NamespaceOperation::Create | NamespaceOperation::Edit | NamespaceOperation::Delete => true,
    }
}

/// Like [`require_namespace_exclusive_lock`], for an operation given by its wire code.
pub fn require_namespace_exclusive_lock_raw(code: u8) -> SchedResult<bool> {
    let operation = NamespaceOperation::try_from(code).inspect_err(|err| {
        warn!(code = err.number, "unknown namespace operation reached the classifier");
    })?;
    Ok(require_namespace_exclusive_lock(operation))
}
