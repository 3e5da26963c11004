//! Inspect command implementation.

use crate::Format;
use serde::Serialize;
use shelfdb_core::{BlobSnapshotStore, Journal, SnapshotStore};
use std::path::Path;
use std::sync::Arc;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Persisted tables and shards.
    pub tables: Vec<TableInfo>,
    /// Total persisted rows.
    pub total_rows: usize,
    /// Journal entries left by interrupted commits.
    pub journal_entries: usize,
}

/// Statistics for a single persisted store.
#[derive(Debug, Serialize)]
pub struct TableInfo {
    /// Store name; shards appear as `table@begin`.
    pub name: String,
    /// Persisted rows.
    pub rows: usize,
    /// Highest transaction or commit id in the snapshot.
    pub high_water: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let backend = super::open_backend(path)?;
    let snapshots = BlobSnapshotStore::new(Arc::clone(&backend));
    let journal = Journal::new(backend);

    let mut tables = Vec::new();
    for name in snapshots.tables()? {
        let Some(snapshot) = snapshots.load(&name)? else {
            continue;
        };
        tables.push(TableInfo {
            rows: snapshot.rows.len(),
            high_water: snapshot.high_water(),
            name,
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        total_rows: tables.iter().map(|t| t.rows).sum(),
        tables,
        journal_entries: journal.len()?,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("ShelfDB Database Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Tables:");
    if result.tables.is_empty() {
        println!("  (none)");
    }
    for table in &result.tables {
        println!(
            "  {:<24} {:>8} rows  (high water {})",
            table.name, table.rows, table.high_water
        );
    }
    println!();
    println!("Total rows:      {}", result.total_rows);
    println!("Journal entries: {}", result.journal_entries);
    if result.journal_entries > 0 {
        println!();
        println!("Interrupted commits are reverted on the next open (or run `shelfdb recover`).");
    }
}
