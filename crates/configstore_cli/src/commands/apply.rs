//! Apply command implementation.

use super::CliError;
use configstore_core::schema::Schema;
use configstore_core::{Config, CoreError, Configstore, MetaTransaction, MetaTransactionResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of one transaction file.
#[derive(Debug, Serialize)]
pub struct AppliedTransaction {
    /// Source file.
    pub file: String,
    /// Result returned by the store.
    pub result: MetaTransactionResult,
}

/// Result of the apply command.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    /// One entry per transaction file, in order.
    pub transactions: Vec<AppliedTransaction>,
    /// Number of committed transactions.
    pub committed: usize,
    /// Number of rolled back transactions.
    pub rolled_back: usize,
    /// Entities in the store afterwards.
    pub entity_count: usize,
    /// Sequence of the last committed transaction.
    pub head_sequence: u64,
}

/// Reads a JSON transaction file.
pub fn load_transaction(path: &Path) -> Result<MetaTransaction, CoreError> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Applies the transaction files in order to a fresh store.
pub fn apply(schema_path: &Path, transactions: &[PathBuf]) -> Result<ApplyReport, CliError> {
    let store = Configstore::open(Schema::load(schema_path)?, Config::default())?;

    let mut applied = Vec::with_capacity(transactions.len());
    for path in transactions {
        let transaction = load_transaction(path)?;
        let result = store.apply_transaction(transaction)?;
        if result.committed {
            info!(file = %path.display(), id = ?result.transaction_id, "transaction committed");
        } else {
            warn!(file = %path.display(), "transaction rolled back");
        }
        applied.push(AppliedTransaction {
            file: path.display().to_string(),
            result,
        });
    }

    let committed = applied.iter().filter(|t| t.result.committed).count();
    Ok(ApplyReport {
        rolled_back: applied.len() - committed,
        committed,
        transactions: applied,
        entity_count: store.len(),
        head_sequence: store.head_sequence().as_u64(),
    })
}

/// Runs the apply command.
pub fn run(schema_path: &Path, transactions: &[PathBuf]) -> Result<(), CliError> {
    let report = apply(schema_path, transactions)?;
    for t in &report.transactions {
        println!("{}", serde_json::to_string_pretty(&t.result)?);
    }
    println!(
        "{} committed, {} rolled back, {} entities, head {}",
        report.committed, report.rolled_back, report.entity_count, report.head_sequence
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use configstore_testkit::{
        create_op, sample_schema, transaction, update_op, user, JsonFiles,
    };

    #[test]
    fn applies_files_in_order() {
        let files = JsonFiles::new();
        let schema = files.write("schema.json", &sample_schema());
        let first = files.write(
            "1.json",
            &transaction(vec![create_op(user("alice")), create_op(user("bob"))]),
        );
        let failing = files.write("2.json", &transaction(vec![update_op(user("carol"))]));
        let last = files.write("3.json", &transaction(vec![update_op(user("alice"))]));

        let report = apply(&schema, &[first, failing, last]).unwrap();
        assert_eq!(report.committed, 2);
        assert_eq!(report.rolled_back, 1);
        assert_eq!(report.entity_count, 2);
        assert_eq!(report.head_sequence, 2);
        assert_eq!(report.transactions[1].result.operation_results.len(), 1);
    }

    #[test]
    fn malformed_transaction_file_is_an_error() {
        let files = JsonFiles::new();
        let schema = files.write("schema.json", &sample_schema());
        let bad = files.write_raw("bad.json", "{\"operations\": 3}");
        assert!(matches!(
            apply(&schema, &[bad]),
            Err(CliError::Core(CoreError::Json(_)))
        ));
    }
}
