//! Tabular bulk transfer format: one CSV document per table, bundled into a
//! single ZIP archive with one `<table>.csv` entry each.

use std::io::{Cursor, Read, Write};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid CSV in '{entry}': {source}")]
    Csv {
        entry: String,
        #[source]
        source: csv::Error,
    },

    #[error("'{0}' is not valid UTF-8")]
    NotUtf8(String),

    #[error("entry '{entry}' exceeds the decompressed size limit of {limit} bytes")]
    EntryTooLarge { entry: String, limit: u64 },

    #[error("archive exceeds the total decompressed size limit of {limit} bytes")]
    ArchiveTooLarge { limit: u64 },

    #[error("transfer IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One table of text cells with a header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.rows
            .push(values.into_iter().map(|v| v.to_string()).collect());
    }

    /// Position of a header, compared case-insensitively.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    pub fn entry_name(&self) -> String {
        format!("{}.csv", self.name)
    }
}

/// Decompression bounds applied while reading an uploaded archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entry_size: u64,
    pub max_total_size: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entry_size: 16 * 1024 * 1024,
            max_total_size: 64 * 1024 * 1024,
        }
    }
}

/// Serialize a table as CSV (header row first).
pub fn write_csv(table: &Table) -> Result<Vec<u8>, TransferError> {
    let csv_err = |source| TransferError::Csv {
        entry: table.entry_name(),
        source,
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.columns).map_err(csv_err)?;
    for row in &table.rows {
        writer.write_record(row).map_err(csv_err)?;
    }
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| TransferError::Io(std::io::Error::other(e.to_string())))
}

/// Bundle the tables into one deflated ZIP archive, in the given order.
pub fn write_archive(tables: &[Table]) -> Result<Vec<u8>, TransferError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for table in tables {
        let body = write_csv(table)?;
        zip.start_file(table.entry_name(), options)?;
        zip.write_all(&body)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Parse a CSV document. The table is named after `name` without its extension.
pub fn read_csv(name: &str, data: &[u8]) -> Result<Table, TransferError> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    let csv_err = |source| TransferError::Csv {
        entry: name.to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let columns = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table {
        name: table_name(name).to_string(),
        columns,
        rows,
    })
}

/// Read every `.csv` entry of an archive. Directory prefixes are dropped from
/// table names; other entries and unsafe paths are skipped.
pub fn read_archive(data: &[u8], limits: ArchiveLimits) -> Result<Vec<Table>, TransferError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut tables = Vec::new();
    let mut total: u64 = 0;

    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(path) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };
        let name = path.to_string_lossy().to_string();
        if !has_csv_extension(&name) {
            continue;
        }

        let mut buf = Vec::new();
        entry
            .take(limits.max_entry_size + 1)
            .read_to_end(&mut buf)?;
        if buf.len() as u64 > limits.max_entry_size {
            return Err(TransferError::EntryTooLarge {
                entry: name,
                limit: limits.max_entry_size,
            });
        }
        total += buf.len() as u64;
        if total > limits.max_total_size {
            return Err(TransferError::ArchiveTooLarge {
                limit: limits.max_total_size,
            });
        }
        if std::str::from_utf8(&buf).is_err() {
            return Err(TransferError::NotUtf8(name));
        }

        tables.push(read_csv(&name, &buf)?);
    }

    Ok(tables)
}

/// ZIP local file header magic.
pub fn is_zip(data: &[u8]) -> bool {
    data.starts_with(b"PK\x03\x04") || data.starts_with(b"PK\x05\x06")
}

fn has_csv_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("csv"))
}

fn table_name(path: &str) -> &str {
    let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file,
    }
}
