//! Dump journal command implementation.

use crate::Format;
use serde::Serialize;
use shelfdb_core::{Journal, JournalEntry};
use std::path::Path;

/// Journal contents for output.
#[derive(Debug, Serialize)]
pub struct JournalDump {
    /// Decodable entries in transaction order.
    pub entries: Vec<JournalEntry>,
    /// Blob names of undecodable entries.
    pub corrupt: Vec<String>,
}

/// Runs the dump-journal command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let scan = Journal::new(super::open_backend(path)?).scan()?;
    let dump = JournalDump {
        entries: scan.entries,
        corrupt: scan.corrupt,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&dump)?),
        Format::Text => print_text_output(&dump),
    }
    Ok(())
}

fn print_text_output(dump: &JournalDump) {
    if dump.entries.is_empty() && dump.corrupt.is_empty() {
        println!("Journal is empty");
        return;
    }
    println!("{:<12} {:<12} TABLES", "TXID", "COMMIT");
    for entry in &dump.entries {
        println!(
            "{:<12} {:<12} {}",
            entry.transaction_id.as_u64(),
            entry.commit_id.as_u64(),
            entry.tables.join(", ")
        );
    }
    for name in &dump.corrupt {
        println!("{name:<25} <corrupt>");
    }
}
