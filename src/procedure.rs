//! The procedure side of the queue contract.
//!
//! A [`Procedure`] is a unit of scheduled work. Which queue it lands in, and which locks it
//! needs, is decided by the capabilities it exposes: a procedure working on a table implements
//! [`TableProcedure`], one working on a namespace implements [`NamespaceProcedure`].

use std::fmt;

use nonmax::NonMaxU64;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::EnumIter;

use crate::resource::{NamespaceName, TableName};

/// Unique ID of a procedure. Never `u64::MAX`, which lock words use for "no owner".
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("pid={_0}")]
pub struct ProcId(NonMaxU64);

impl ProcId {
    pub fn new(id: u64) -> Option<Self> {
        NonMaxU64::new(id).map(Self)
    }

    #[inline]
    pub const fn get(&self) -> u64 {
        self.0.get()
    }
}

/// Dispatch priority of a procedure within its queue. Higher runs first.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOW: Self = Self(0);
    pub const NORMAL: Self = Self(1);
    pub const HIGH: Self = Self(2);
}

/// A unit of scheduled work.
pub trait Procedure: fmt::Debug + Send + Sync {
    fn proc_id(&self) -> ProcId;

    fn priority(&self) -> Priority {
        Priority::NORMAL
    }

    /// Returns the table capability, if this procedure operates on a table.
    fn as_table_procedure(&self) -> Option<&dyn TableProcedure> {
        None
    }

    /// Returns the namespace capability, if this procedure operates on a namespace.
    fn as_namespace_procedure(&self) -> Option<&dyn NamespaceProcedure> {
        None
    }
}

/// Capability of procedures that operate on a single table.
pub trait TableProcedure {
    fn table_name(&self) -> &TableName;
    fn table_operation(&self) -> TableOperation;
}

/// Capability of procedures that operate on a namespace.
pub trait NamespaceProcedure {
    fn namespace_name(&self) -> &NamespaceName;
    fn namespace_operation(&self) -> NamespaceOperation;
}

/// Operations a table procedure can declare.
///
/// The `u8` codes are stable and may be exchanged with other processes, so they shall never be
/// changed or reused.
#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    EnumIter,
)]
#[repr(u8)]
pub enum TableOperation {
    // -- whole table --
    Create = 0,
    Delete = 1,
    Disable = 2,
    Enable = 3,
    Snapshot = 4,
    Edit = 5,
    Read = 6,
    Flush = 7,

    // -- single region of the table --
    RegionSplit = 8,
    RegionMerge = 9,
    RegionAssign = 10,
    RegionUnassign = 11,
    RegionEdit = 12,
    RegionGc = 13,
    MergedRegionsGc = 14,
    RegionSnapshot = 15,
    RegionTruncate = 16,
}

impl TableOperation {
    /// Returns `true` for operations scoped to a single region of the table.
    pub const fn is_region_operation(&self) -> bool {
        matches!(
            self,
            Self::RegionSplit
                | Self::RegionMerge
                | Self::RegionAssign
                | Self::RegionUnassign
                | Self::RegionEdit
                | Self::RegionGc
                | Self::MergedRegionsGc
                | Self::RegionSnapshot
                | Self::RegionTruncate
        )
    }
}

/// Operations a namespace procedure can declare. Codes are stable, like [`TableOperation`].
#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    EnumIter,
)]
#[repr(u8)]
pub enum NamespaceOperation {
    Create = 0,
    Edit = 1,
    Delete = 2,
}
