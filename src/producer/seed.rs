use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to open seed file {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read seed record")]
    Read(#[from] csv::Error),
    #[error("seed record {record} has no column {column}")]
    MissingColumn { record: u64, column: usize },
}

/// One row of the seed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRecord {
    pub target: String,
}

/// Reads targets from column `column` of a header-less CSV source.
pub fn read_seeds<R: Read>(
    reader: R,
    column: usize,
) -> impl Iterator<Item = Result<SeedRecord, SeedError>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader)
        .into_records()
        .zip(1u64..)
        .map(move |(row, record)| -> Result<SeedRecord, SeedError> {
            let row = row?;
            let target = row
                .get(column)
                .ok_or(SeedError::MissingColumn { record, column })?;
            Ok(SeedRecord {
                target: target.trim().to_string(),
            })
        })
}

pub fn open_seed_file(
    path: &Path,
    column: usize,
) -> Result<impl Iterator<Item = Result<SeedRecord, SeedError>>, SeedError> {
    let file = File::open(path).map_err(|source| SeedError::Open {
        path: path.display().to_string(),
        source,
    })?;
    Ok(read_seeds(BufReader::new(file), column))
}
