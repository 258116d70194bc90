use std::fs;
use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};
use silverline_core::{DatasetHandle, RecordBatch};

use crate::error::{InputError, Result};

/// Read a CSV source into a handle and its record batch.
pub fn load_dataset(path: &Path) -> Result<(DatasetHandle, RecordBatch)> {
    let bytes = read_source(path)?;
    let batch = parse_csv(path, &bytes)?;
    let canonical = fs::canonicalize(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let handle = DatasetHandle {
        dataset_id: dataset_id_for(&canonical),
        source_path: canonical,
        fingerprint: fingerprint_bytes(&bytes),
        schema: batch.infer_schema(),
        row_count: batch.len() as u64,
        created_at: Utc::now(),
    };
    tracing::debug!(
        event = "dataset_loaded",
        dataset_id = %handle.dataset_id,
        rows = handle.row_count,
        columns = handle.schema.len()
    );
    Ok((handle, batch))
}

/// Re-read the source behind `handle`, refusing it if its bytes changed.
pub fn reload_dataset(handle: &DatasetHandle) -> Result<RecordBatch> {
    let bytes = read_source(&handle.source_path)?;
    let found = fingerprint_bytes(&bytes);
    if found != handle.fingerprint {
        return Err(InputError::FingerprintMismatch {
            expected: handle.fingerprint.clone(),
            found,
        });
    }
    parse_csv(&handle.source_path, &bytes)
}

/// SHA-256 hex digest of the source bytes.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stable dataset id: sanitized file stem plus a short digest of the path.
pub fn dataset_id_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut slug: String = stem
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if slug.is_empty() {
        slug.push_str("dataset");
    }
    let digest = hex::encode(Sha256::digest(path.to_string_lossy().as_bytes()));
    format!("{slug}-{}", &digest[..8])
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_csv(path: &Path, bytes: &[u8]) -> Result<RecordBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    if columns.is_empty() || columns.iter().all(|column| column.is_empty()) {
        return Err(InputError::MissingHeader {
            path: path.to_path_buf(),
        });
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != columns.len() {
            return Err(InputError::RaggedRow {
                row: idx as u64 + 1,
                expected: columns.len(),
                found: record.len(),
            });
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RecordBatch::from_rows(columns, rows)?)
}
