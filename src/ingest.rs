use std::io;
use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use crate::models::ClientRecord;

/// Outcome of one load, handed back to the caller with the records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

pub fn load_csv(path: &Path) -> anyhow::Result<(Vec<ClientRecord>, LoadReport)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open client export {}", path.display()))?;
    let (records, report) = read_clients(file);
    info!(
        loaded = report.loaded,
        skipped = report.skipped,
        "loaded clients from {}",
        path.display()
    );
    Ok((records, report))
}

/// Rows that cannot be read at all are skipped; bad numbers inside an
/// otherwise readable row just become empty values.
pub fn read_clients<R: io::Read>(input: R) -> (Vec<ClientRecord>, LoadReport) {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let mut records = Vec::new();
    let mut report = LoadReport::default();

    for (line, result) in reader.deserialize::<ClientRecord>().enumerate() {
        match result {
            Ok(record) => {
                records.push(record);
                report.loaded += 1;
            }
            Err(err) => {
                warn!(row = line + 1, error = %err, "skipping unreadable client row");
                report.skipped += 1;
            }
        }
    }

    (records, report)
}
