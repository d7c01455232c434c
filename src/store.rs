use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use csv::StringRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, thiserror::Error)]
pub enum TaskListError {
    #[error("task list not found: {0}")]
    NotFound(PathBuf),
    #[error("task list {path} has no `{column}` column")]
    MissingColumn { path: PathBuf, column: String },
    #[error("reading spreadsheet {path}: {reason}")]
    Sheet { path: PathBuf, reason: String },
    #[error("reading task list {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Open a CSV reader whose headers have the BOM and surrounding whitespace removed.
fn open_reader(path: &Path) -> csv::Result<csv::Reader<File>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: StringRecord = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim())
        .collect();
    rdr.set_headers(headers);
    Ok(rdr)
}

fn column_index(headers: &StringRecord, column: &str) -> Option<usize> {
    headers.iter().position(|h| h == column)
}

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SPREADSHEET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Read the `column` values of a task list, in file order.
///
/// Spreadsheets (first sheet, header in the first row) and CSV files are
/// accepted. Blank cells are dropped and repeated values keep their first
/// position.
pub fn load_tasks(path: &Path, column: &str) -> Result<Vec<String>, TaskListError> {
    if !path.exists() {
        return Err(TaskListError::NotFound(path.to_path_buf()));
    }
    let values = if is_spreadsheet(path) {
        sheet_column(path, column)?
    } else {
        csv_column(path, column)?
    };

    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    for value in values {
        let value = value.trim();
        if value.is_empty() || !seen.insert(value.to_string()) {
            continue;
        }
        tasks.push(value.to_string());
    }
    Ok(tasks)
}

fn csv_column(path: &Path, column: &str) -> Result<Vec<String>, TaskListError> {
    let csv_err = |source| TaskListError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = open_reader(path).map_err(csv_err)?;
    let idx = column_index(rdr.headers().map_err(csv_err)?, column).ok_or_else(|| {
        TaskListError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        }
    })?;

    let mut values = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(csv_err)?;
        values.push(record.get(idx).unwrap_or("").to_string());
    }
    Ok(values)
}

fn sheet_column(path: &Path, column: &str) -> Result<Vec<String>, TaskListError> {
    let sheet_err = |reason: String| TaskListError::Sheet {
        path: path.to_path_buf(),
        reason,
    };
    let mut workbook = open_workbook_auto(path).map_err(|e| sheet_err(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| sheet_err("workbook has no sheets".into()))?
        .map_err(|e| sheet_err(e.to_string()))?;

    let mut rows = range.rows();
    let idx = rows
        .next()
        .and_then(|header| {
            header
                .iter()
                .position(|cell| cell.to_string().trim_start_matches('\u{feff}').trim() == column)
        })
        .ok_or_else(|| TaskListError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })?;

    Ok(rows
        .map(|row| row.get(idx).map(Data::to_string).unwrap_or_default())
        .collect())
}

/// Deserialize every row of a task list, after checking `required` columns exist.
/// Rows that fail to deserialize are logged and dropped.
pub fn load_rows<T: DeserializeOwned>(path: &Path, required: &[&str]) -> Result<Vec<T>, TaskListError> {
    if !path.exists() {
        return Err(TaskListError::NotFound(path.to_path_buf()));
    }
    let csv_err = |source| TaskListError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = open_reader(path).map_err(csv_err)?;
    let headers = rdr.headers().map_err(csv_err)?.clone();
    if let Some(missing) = required.iter().find(|c| column_index(&headers, c).is_none()) {
        return Err(TaskListError::MissingColumn {
            path: path.to_path_buf(),
            column: missing.to_string(),
        });
    }

    let mut rows = Vec::new();
    for (line, record) in rdr.deserialize::<T>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => warn!(path = %path.display(), row = line + 1, error = %e, "skipping unreadable row"),
        }
    }
    Ok(rows)
}

/// Values of `column` in an existing store.
pub fn read_keys(path: &Path, column: &str) -> Result<HashSet<String>> {
    let mut rdr = open_reader(path)?;
    let idx = column_index(rdr.headers()?, column)
        .with_context(|| format!("{} has no `{}` column", path.display(), column))?;
    let mut keys = HashSet::new();
    for record in rdr.records() {
        let record = record?;
        if let Some(key) = record.get(idx).map(str::trim).filter(|k| !k.is_empty()) {
            keys.insert(key.to_string());
        }
    }
    Ok(keys)
}

/// Append-only CSV output whose key column doubles as the resume checkpoint.
pub struct CheckpointStore {
    path: PathBuf,
    keys: HashSet<String>,
    writer: csv::Writer<File>,
}

impl CheckpointStore {
    /// Load the checkpoint from an existing store, then open it for append.
    ///
    /// A store that cannot be read is treated as empty. BOM and header are
    /// written only when the file is new (or zero-length).
    pub fn open(path: &Path, headers: &[&str], key_column: &str) -> Result<Self> {
        let existed = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let keys = if existed {
            match read_keys(path, key_column) {
                Ok(keys) => {
                    info!(path = %path.display(), done = keys.len(), "resuming from existing output");
                    keys
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not read checkpoint, starting fresh");
                    HashSet::new()
                }
            }
        } else {
            HashSet::new()
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening output {}", path.display()))?;

        if !existed {
            file.write_all(UTF8_BOM)?;
        }
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if !existed {
            writer.write_record(headers)?;
            writer.flush()?;
        }

        Ok(CheckpointStore {
            path: path.to_path_buf(),
            keys,
            writer,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn checkpointed(&self) -> usize {
        self.keys.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `rows` and push them to disk before returning.
    pub fn append<R: Serialize>(&mut self, rows: &[R]) -> Result<usize> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(rows.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub path: PathBuf,
    pub rows: usize,
    pub distinct_keys: usize,
    pub duplicate_keys: usize,
}

/// Row and key counts of an output store.
pub fn store_stats(path: &Path, key_column: &str) -> Result<StoreStats> {
    let mut rdr = open_reader(path).with_context(|| format!("opening {}", path.display()))?;
    let idx = column_index(rdr.headers()?, key_column)
        .with_context(|| format!("{} has no `{}` column", path.display(), key_column))?;
    let mut rows = 0;
    let mut keys = HashSet::new();
    let mut duplicates = HashSet::new();
    for record in rdr.records() {
        let record = record?;
        rows += 1;
        let key = record.get(idx).unwrap_or("").trim().to_string();
        if !keys.insert(key.clone()) {
            duplicates.insert(key);
        }
    }
    Ok(StoreStats {
        path: path.to_path_buf(),
        rows,
        distinct_keys: keys.len(),
        duplicate_keys: duplicates.len(),
    })
}
