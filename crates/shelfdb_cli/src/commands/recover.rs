//! Recover command implementation.

use shelfdb_core::Database;
use std::path::Path;
use tracing::info;

/// Opens the database, which reverts every commit left in the journal,
/// then closes it so the reverted state is flushed.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No database found at {path:?}").into());
    }
    info!("Recovering {:?}", path);

    let db = Database::open(path)?;
    let report = db.recovery().clone();
    db.close()?;

    println!("✓ Recovery complete");
    println!("  Reverted commits:  {}", report.reverted);
    println!("  Discarded entries: {}", report.discarded);
    Ok(())
}
