//! Entity keys.
//!
//! A key is a partition plus a non-empty path of `(kind, id-or-name)`
//! elements. The derived ordering compares the partition namespace first and
//! then the path element by element, so an ancestor always sorts directly
//! before its descendants.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition a key lives in.
///
/// An empty namespace means "the default partition" and is normalised by the
/// engine before anything is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    /// Namespace name.
    #[serde(default)]
    pub namespace: String,
}

impl PartitionId {
    /// Creates a partition id for a namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Returns true if this refers to the default partition.
    pub fn is_default(&self) -> bool {
        self.namespace.is_empty()
    }
}

/// Identifier of one path element.
///
/// Numeric ids sort before names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathId {
    /// Numeric id.
    Id(i64),
    /// String name.
    Name(String),
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathId::Id(id) => write!(f, "{id}"),
            PathId::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// One element of a key path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathElement {
    /// Kind name of this element.
    pub kind: String,
    /// Id or name; `None` marks an incomplete element awaiting allocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PathId>,
}

impl PathElement {
    /// Creates an element with a numeric id.
    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: Some(PathId::Id(id)),
        }
    }

    /// Creates an element with a string name.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(PathId::Name(name.into())),
        }
    }

    /// Creates an incomplete element.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    /// Returns true if the element carries an id or name.
    pub fn is_complete(&self) -> bool {
        self.id.is_some()
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}:?", self.kind),
        }
    }
}

/// A key addressing one entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Partition of the key.
    #[serde(default)]
    pub partition_id: PartitionId,
    /// Path from the root ancestor down to the entity itself.
    pub path: Vec<PathElement>,
}

impl Key {
    /// Creates a key, rejecting an empty path.
    pub fn new(partition_id: PartitionId, path: Vec<PathElement>) -> CodecResult<Self> {
        if path.is_empty() {
            return Err(CodecError::invalid_key("key path must not be empty"));
        }
        Ok(Self { partition_id, path })
    }

    /// Creates a single-element key.
    pub fn top_level(partition_id: PartitionId, element: PathElement) -> Self {
        Self {
            partition_id,
            path: vec![element],
        }
    }

    /// Returns a new key with `element` appended below this one.
    #[must_use]
    pub fn child(&self, element: PathElement) -> Self {
        let mut path = self.path.clone();
        path.push(element);
        Self {
            partition_id: self.partition_id.clone(),
            path,
        }
    }

    /// Returns the parent key, or `None` for a top-level key.
    pub fn parent(&self) -> Option<Self> {
        if self.path.len() <= 1 {
            return None;
        }
        Some(Self {
            partition_id: self.partition_id.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Returns the last path element.
    pub fn leaf(&self) -> Option<&PathElement> {
        self.path.last()
    }

    /// Returns the kind of the entity this key addresses.
    pub fn kind(&self) -> &str {
        self.path.last().map(|e| e.kind.as_str()).unwrap_or("")
    }

    /// Returns true if every path element has an id or name.
    pub fn is_complete(&self) -> bool {
        !self.path.is_empty() && self.path.iter().all(PathElement::is_complete)
    }

    /// Returns true if only the last element is incomplete.
    pub fn is_allocatable(&self) -> bool {
        match self.path.split_last() {
            Some((last, ancestors)) => {
                !last.is_complete() && ancestors.iter().all(PathElement::is_complete)
            }
            None => false,
        }
    }

    /// Returns true if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        self.partition_id == other.partition_id
            && self.path.len() < other.path.len()
            && other.path.starts_with(&self.path)
    }

    /// Returns a copy with the partition replaced.
    #[must_use]
    pub fn with_partition(mut self, partition_id: PartitionId) -> Self {
        self.partition_id = partition_id;
        self
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.partition_id.namespace.is_empty() {
            write!(f, "{}/", self.partition_id.namespace)?;
        }
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}
