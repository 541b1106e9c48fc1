use num_enum::TryFromPrimitiveError;

use crate::{
    procedure::{NamespaceOperation, ProcId, TableOperation},
    resource::Resource,
};

#[derive(Debug, Display, Error, From)]
pub enum SchedError {
    // -- Classification Errors --
    #[display("Unknown table operation code: {}", _0.number)]
    UnknownTableOperation(TryFromPrimitiveError<TableOperation>),
    #[display("Unknown namespace operation code: {}", _0.number)]
    UnknownNamespaceOperation(TryFromPrimitiveError<NamespaceOperation>),

    // -- Procedure Contract Errors --
    #[from(skip)]
    #[display(
        "Invalid procedure {}: a {} queue requires the {} capability",
        proc_id, queue, capability
    )]
    InvalidProcedure {
        proc_id: ProcId,
        queue: &'static str,
        capability: &'static str,
    },

    // -- Naming Errors --
    #[from(skip)]
    #[display("Invalid resource name '{}': {}", name, reason)]
    InvalidName { name: String, reason: &'static str },

    // -- Lock Protocol Errors --
    #[from(skip)]
    #[display("Procedure {} does not own the exclusive lock it tried to release", _0)]
    NotLockOwner(#[error(not(source))] ProcId),
    #[from(skip)]
    #[display("Released a shared lock on {} that was not held", _0)]
    SharedLockNotHeld(#[error(not(source))] Resource),
}

pub type SchedResult<T> = Result<T, SchedError>;
