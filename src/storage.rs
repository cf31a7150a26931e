//! Append-only bet storage.
//!
//! The server only needs one operation, storing a batch of records, so the
//! store sits behind the [`BetStore`] trait. [`CsvStore`] appends one row per
//! bet to a CSV file, opening the file in append mode on every call. It can
//! also read the file back to find the winning bets.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::bet::BetRecord;
use crate::protocol::parser::FIELD_COUNT;

/// Storage failure. Always recoverable from the server's point of view.
#[derive(Debug)]
pub enum StoreError {
    Io(PathBuf, io::Error),
    /// A stored row cannot be read back as a bet
    Corrupt {
        path: PathBuf,
        row: usize,
        reason: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(path, e) => write!(f, "I/O error on '{}': {}", path.display(), e),
            StoreError::Corrupt { path, row, reason } => {
                write!(f, "row {} of '{}' is corrupt: {}", row, path.display(), reason)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(_, e) => Some(e),
            StoreError::Corrupt { .. } => None,
        }
    }
}

/// Persistence collaborator of the server.
pub trait BetStore: Send + Sync {
    /// Persist every record in `bets`, in order.
    fn store(&self, bets: &[BetRecord]) -> Result<(), StoreError>;
}

/// Stores bets as CSV rows appended to a file.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(path = %path.display(), "Using CSV bet store");
        CsvStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every stored bet back, in file order.
    ///
    /// A file that does not exist yet holds no bets.
    pub fn load(&self) -> Result<Vec<BetRecord>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(self.path.clone(), e)),
        };

        let corrupt = |row, reason: String| StoreError::Corrupt {
            path: self.path.clone(),
            row,
            reason,
        };

        let rows = split_rows(&contents).map_err(|row| corrupt(row, "unterminated quote".into()))?;

        let mut bets = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            let fields: [String; FIELD_COUNT] = row.try_into().map_err(|row: Vec<String>| {
                corrupt(i + 1, format!("expected {} fields, got {}", FIELD_COUNT, row.len()))
            })?;
            let [agency, first_name, last_name, document, birth_date, number] = fields;
            bets.push(BetRecord {
                agency,
                first_name,
                last_name,
                document,
                birth_date,
                number,
            });
        }

        debug!(count = bets.len(), path = %self.path.display(), "Loaded bets");
        Ok(bets)
    }

    /// Stored bets holding the winning number.
    pub fn winners(&self) -> Result<Vec<BetRecord>, StoreError> {
        Ok(self.load()?.into_iter().filter(BetRecord::has_won).collect())
    }
}

impl BetStore for CsvStore {
    fn store(&self, bets: &[BetRecord]) -> Result<(), StoreError> {
        let io_err = |e| StoreError::Io(self.path.clone(), e);

        let mut rows = String::new();
        for bet in bets {
            push_row(&mut rows, &bet.fields());
        }

        // One write per batch keeps a batch's rows contiguous in the file
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(rows.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        trace!(count = bets.len(), path = %self.path.display(), "Appended bets");
        Ok(())
    }
}

/// Append one CSV row (RFC 4180 quoting) terminated by `\n`.
fn push_row(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\r', '\n']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Split CSV text into rows of unquoted fields.
///
/// Quoted fields may hold commas, doubled quotes and line breaks. Blank
/// lines are skipped. On an unterminated quote, returns the 1-based number
/// of the row it starts in.
fn split_rows(text: &str) -> Result<Vec<Vec<String>>, usize> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if !row.is_empty() || !field.is_empty() {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(rows.len() + 1);
    }
    if !row.is_empty() || !field.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}
