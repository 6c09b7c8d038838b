//! Core type definitions for Configstore.

use std::fmt;

/// Position of a committed transaction in the log.
///
/// Sequence numbers start at 1 and increase by one per committed,
/// non-empty transaction. `0` means "before the first transaction".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The position before any transaction.
    pub const ZERO: Self = Self(0);

    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Identifier of a watch subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

impl SubscriberId {
    /// Creates a subscriber id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Builds the externally visible transaction id.
///
/// The id is the zero-padded hex sequence followed by the store instance id,
/// so ids sort in commit order and never repeat across restarts.
pub(crate) fn transaction_id_string(seq: SequenceNumber, instance: &uuid::Uuid) -> String {
    format!("{:016x}-{}", seq.as_u64(), instance.simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_ordering() {
        let s1 = SequenceNumber::new(1);
        assert!(s1.next() > s1);
        assert_eq!(SequenceNumber::ZERO.next(), s1);
    }

    #[test]
    fn display() {
        assert_eq!(SequenceNumber::new(9).to_string(), "seq:9");
        assert_eq!(SubscriberId::new(3).to_string(), "sub:3");
    }

    #[test]
    fn transaction_ids_sort_by_sequence() {
        let instance = uuid::Uuid::new_v4();
        let a = transaction_id_string(SequenceNumber::new(9), &instance);
        let b = transaction_id_string(SequenceNumber::new(10), &instance);
        assert!(a < b);
        assert!(a.starts_with("0000000000000009-"));
    }
}
