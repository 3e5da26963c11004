//! Verify command implementation.

use shelfdb_core::{BlobSnapshotStore, Journal, SnapshotStore};
use std::path::Path;
use std::sync::Arc;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of blobs checked.
    pub checked: usize,
    /// Number of blobs that decoded.
    pub valid: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying database at {path:?}");
    println!();

    let backend = super::open_backend(path)?;

    println!("Checking snapshots...");
    let snapshots = verify_snapshots(&BlobSnapshotStore::new(Arc::clone(&backend)))?;
    print_result("Snapshots", &snapshots);

    println!("Checking journal...");
    let journal = verify_journal(&Journal::new(backend))?;
    print_result("Journal", &journal);

    println!();
    if snapshots.is_ok() && journal.is_ok() {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err("Verification failed".into())
    }
}

fn verify_snapshots(snapshots: &dyn SnapshotStore) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    for name in snapshots.tables()? {
        result.checked += 1;
        match snapshots.load(&name) {
            Ok(Some(snapshot)) if snapshot.table == name => result.valid += 1,
            Ok(Some(snapshot)) => result
                .errors
                .push(format!("{name}: snapshot names table {}", snapshot.table)),
            Ok(None) => result.errors.push(format!("{name}: vanished while verifying")),
            Err(e) => result.errors.push(format!("{name}: {e}")),
        }
    }
    Ok(result)
}

fn verify_journal(journal: &Journal) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let scan = journal.scan()?;
    let mut result = VerifyResult {
        checked: scan.entries.len() + scan.corrupt.len(),
        valid: scan.entries.len(),
        errors: Vec::new(),
    };
    for name in scan.corrupt {
        result.errors.push(format!("{name}: undecodable journal entry"));
    }
    Ok(result)
}

fn print_result(name: &str, result: &VerifyResult) {
    println!("  {name}: {} checked, {} valid", result.checked, result.valid);
    for error in &result.errors {
        println!("    ✗ {error}");
    }
}
