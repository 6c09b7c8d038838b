//! Transaction log.
//!
//! Every committed transaction that changed the store is appended with a
//! sequence number one higher than the previous entry. The log keeps two
//! retention windows:
//!
//! - the newest `max_retained_batches` entries keep their broadcast batch,
//!   which is what watch replays read
//! - the newest `max_retained_records` entries keep their record at all
//!
//! A replay that needs a batch outside the window fails with
//! [`CoreError::CursorExpired`] so the subscriber can start over from a fresh
//! snapshot.

use crate::error::{CoreError, CoreResult};
use crate::messages::{MetaTransactionBatch, MetaTransactionRecord};
use crate::types::SequenceNumber;
use std::collections::VecDeque;
use std::sync::Arc;

/// One logged transaction.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Commit sequence.
    pub sequence: SequenceNumber,
    /// Retained metadata.
    pub record: MetaTransactionRecord,
    /// Broadcast body; `None` once it has aged out of the batch window.
    pub batch: Option<Arc<MetaTransactionBatch>>,
}

/// Append-only, bounded log of committed transactions.
#[derive(Debug)]
pub struct TransactionLog {
    entries: VecDeque<LogEntry>,
    head: SequenceNumber,
    retained_batches: usize,
    max_batches: usize,
    max_records: usize,
}

impl TransactionLog {
    /// Creates an empty log with the given retention limits.
    pub fn new(max_batches: usize, max_records: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            head: SequenceNumber::ZERO,
            retained_batches: 0,
            max_batches,
            max_records: max_records.max(max_batches),
        }
    }

    /// Sequence of the newest entry; zero when nothing was ever logged.
    pub fn head(&self) -> SequenceNumber {
        self.head
    }

    /// Sequence the next append will receive.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.head.next()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no record is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries that still carry their batch.
    pub fn retained_batches(&self) -> usize {
        self.retained_batches
    }

    /// Appends a committed transaction and returns its sequence.
    pub fn append(
        &mut self,
        record: MetaTransactionRecord,
        batch: Arc<MetaTransactionBatch>,
    ) -> SequenceNumber {
        let sequence = self.head.next();
        self.head = sequence;
        self.entries.push_back(LogEntry {
            sequence,
            record,
            batch: Some(batch),
        });
        self.retained_batches += 1;
        self.trim();
        sequence
    }

    fn trim(&mut self) {
        while self.entries.len() > self.max_records {
            if let Some(dropped) = self.entries.pop_front() {
                if dropped.batch.is_some() {
                    self.retained_batches -= 1;
                }
            }
        }
        if self.retained_batches > self.max_batches {
            let mut excess = self.retained_batches - self.max_batches;
            for entry in self.entries.iter_mut() {
                if excess == 0 {
                    break;
                }
                if entry.batch.take().is_some() {
                    excess -= 1;
                    self.retained_batches -= 1;
                }
            }
        }
    }

    /// Sequence of the oldest entry that still carries its batch.
    pub fn oldest_batch(&self) -> Option<SequenceNumber> {
        if self.retained_batches == 0 {
            return None;
        }
        // Batches are dropped oldest first, so the ones left are the tail.
        self.entries
            .get(self.entries.len() - self.retained_batches)
            .map(|e| e.sequence)
    }

    /// Returns true if [`batches_since`](Self::batches_since) would succeed
    /// for `cursor`.
    pub fn can_replay_from(&self, cursor: SequenceNumber) -> bool {
        if cursor >= self.head {
            return cursor == self.head;
        }
        self.oldest_batch()
            .is_some_and(|oldest| oldest <= cursor.next())
    }

    fn first_after(&self, cursor: SequenceNumber) -> usize {
        self.entries.partition_point(|e| e.sequence <= cursor)
    }

    /// Returns every batch committed after `cursor`, oldest first.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::CursorExpired`] if any batch after `cursor`
    /// is no longer retained, or if `cursor` is ahead of the head.
    pub fn batches_since(
        &self,
        cursor: SequenceNumber,
    ) -> CoreResult<Vec<(SequenceNumber, Arc<MetaTransactionBatch>)>> {
        let expired = || CoreError::CursorExpired {
            cursor: cursor.as_u64(),
        };
        if cursor > self.head {
            return Err(expired());
        }
        let mut expected = cursor.next();
        let mut batches = Vec::new();
        for entry in self.entries.range(self.first_after(cursor)..) {
            let batch = entry.batch.as_ref().ok_or_else(expired)?;
            if entry.sequence != expected {
                return Err(expired());
            }
            batches.push((entry.sequence, Arc::clone(batch)));
            expected = expected.next();
        }
        if expected != self.head.next() {
            return Err(expired());
        }
        Ok(batches)
    }

    /// Returns the retained records committed after `cursor`, oldest first.
    pub fn records_since(&self, cursor: SequenceNumber) -> Vec<MetaTransactionRecord> {
        self.entries
            .range(self.first_after(cursor)..)
            .map(|e| e.record.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configstore_codec::Timestamp;

    fn append(log: &mut TransactionLog, description: &str) -> SequenceNumber {
        let record = MetaTransactionRecord {
            id: description.to_string(),
            date_submitted: Timestamp::default(),
            date_created: Timestamp::default(),
            description: description.to_string(),
            mutated_keys: vec![],
            deleted_keys: vec![],
        };
        let batch = MetaTransactionBatch {
            id: description.to_string(),
            description: description.to_string(),
            mutated_entities: vec![],
            deleted_keys: vec![],
        };
        log.append(record, Arc::new(batch))
    }

    #[test]
    fn sequences_start_at_one() {
        let mut log = TransactionLog::new(10, 10);
        assert_eq!(log.head(), SequenceNumber::ZERO);
        assert_eq!(append(&mut log, "a"), SequenceNumber::new(1));
        assert_eq!(append(&mut log, "b"), SequenceNumber::new(2));
        assert_eq!(log.next_sequence(), SequenceNumber::new(3));
    }

    #[test]
    fn batches_since_returns_the_tail() {
        let mut log = TransactionLog::new(10, 10);
        for d in ["a", "b", "c"] {
            append(&mut log, d);
        }
        let tail = log.batches_since(SequenceNumber::new(1)).unwrap();
        let ids: Vec<_> = tail.iter().map(|(_, b)| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(log.batches_since(SequenceNumber::new(3)).unwrap().is_empty());
        assert_eq!(log.batches_since(SequenceNumber::ZERO).unwrap().len(), 3);
    }

    #[test]
    fn replay_window_follows_batch_retention() {
        let mut log = TransactionLog::new(2, 4);
        assert!(log.can_replay_from(SequenceNumber::ZERO));
        assert_eq!(log.oldest_batch(), None);
        for d in ["a", "b", "c"] {
            append(&mut log, d);
        }
        assert_eq!(log.oldest_batch(), Some(SequenceNumber::new(2)));
        assert!(!log.can_replay_from(SequenceNumber::ZERO));
        assert!(log.can_replay_from(SequenceNumber::new(1)));
        assert!(log.can_replay_from(SequenceNumber::new(3)));
        assert!(!log.can_replay_from(SequenceNumber::new(4)));
        for cursor in 0..5 {
            let cursor = SequenceNumber::new(cursor);
            assert_eq!(log.can_replay_from(cursor), log.batches_since(cursor).is_ok());
        }
    }

    #[test]
    fn cursor_ahead_of_head_is_expired() {
        let mut log = TransactionLog::new(10, 10);
        append(&mut log, "a");
        assert!(matches!(
            log.batches_since(SequenceNumber::new(5)),
            Err(CoreError::CursorExpired { cursor: 5 })
        ));
    }

    #[test]
    fn aged_batches_expire_cursors_but_keep_records() {
        let mut log = TransactionLog::new(2, 4);
        for d in ["a", "b", "c", "d"] {
            append(&mut log, d);
        }
        assert_eq!(log.retained_batches(), 2);
        assert_eq!(log.len(), 4);
        assert!(log.batches_since(SequenceNumber::new(1)).is_err());
        assert_eq!(log.batches_since(SequenceNumber::new(2)).unwrap().len(), 2);
        assert_eq!(log.records_since(SequenceNumber::ZERO).len(), 4);

        append(&mut log, "e");
        assert_eq!(log.len(), 4);
        let records = log.records_since(SequenceNumber::ZERO);
        assert_eq!(records[0].id, "b");
    }
}
