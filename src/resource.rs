//! Names of the lockable resources.
//!
//! ## Resource Hierarchy
//!
//! - `Namespace(ns)`
//!   - `Table(ns, qualifier)`
//!     - regions of the table (locked by region procedures themselves, not by these queues)

use std::borrow::Cow;

use crate::errors::{SchedError, SchedResult};

/// Separates the namespace from the qualifier in the textual form of a [`TableName`].
pub const NAMESPACE_DELIMITER: char = ':';

/// A validated namespace name. Must be non-empty and must not contain `\0` or the
/// [`NAMESPACE_DELIMITER`].
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deref)]
pub struct NamespaceName(Cow<'static, str>);

impl NamespaceName {
    /// The namespace that user tables land in, when no namespace is given.
    pub const DEFAULT: Self = Self(Cow::Borrowed("default"));
    /// The namespace of the system tables.
    pub const SYSTEM: Self = Self(Cow::Borrowed("system"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> SchedResult<Self> {
        let name = name.into();
        validate(&name)?;
        if name.contains(NAMESPACE_DELIMITER) {
            return Err(SchedError::InvalidName {
                name: name.into_owned(),
                reason: "namespace must not contain the namespace delimiter",
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A validated, namespace-qualified table name. Rendered as `namespace:qualifier`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName {
    namespace: NamespaceName,
    qualifier: Cow<'static, str>,
}

impl TableName {
    /// The table that stores the namespace records themselves.
    ///
    /// Every namespace procedure takes a shared lock on it, and metadata edits against it may
    /// run concurrently, since each writer only touches the rows of its own namespace.
    pub const DUMMY_NAMESPACE_TABLE: Self = Self {
        namespace: NamespaceName::SYSTEM,
        qualifier: Cow::Borrowed("namespace"),
    };

    pub fn new(
        namespace: NamespaceName,
        qualifier: impl Into<Cow<'static, str>>,
    ) -> SchedResult<Self> {
        let qualifier = qualifier.into();
        validate(&qualifier)?;
        Ok(Self {
            namespace,
            qualifier,
        })
    }

    /// Parses `namespace:qualifier`. A name without delimiter lives in
    /// [`NamespaceName::DEFAULT`].
    pub fn parse(name: &str) -> SchedResult<Self> {
        match name.split_once(NAMESPACE_DELIMITER) {
            Some((namespace, qualifier)) => Self::new(
                NamespaceName::new(namespace.to_owned())?,
                qualifier.to_owned(),
            ),
            None => Self::new(NamespaceName::DEFAULT, name.to_owned()),
        }
    }

    pub fn namespace(&self) -> &NamespaceName {
        &self.namespace
    }

    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    pub fn is_dummy_namespace_table(&self) -> bool {
        *self == Self::DUMMY_NAMESPACE_TABLE
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.namespace, NAMESPACE_DELIMITER, self.qualifier)
    }
}

fn validate(name: &str) -> SchedResult<()> {
    if name.is_empty() {
        return Err(SchedError::InvalidName {
            name: name.to_owned(),
            reason: "name must not be empty",
        });
    }
    if name.contains('\0') {
        return Err(SchedError::InvalidName {
            name: name.to_owned(),
            reason: "name must not contain any null-byte",
        });
    }
    Ok(())
}

/// A resource that a procedure can hold a lock on.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    #[display("namespace {_0}")]
    Namespace(NamespaceName),
    #[display("table {_0}")]
    Table(TableName),
}
