//! # Fixed-Width Record Layouts
//!
//! A `RecordLayout` fixes the binary shape of every record in a table: an
//! ordered list of typed fields packed back to back, little-endian, with no
//! padding and no per-record header. Because every record has the same width,
//! record `i` lives at byte `i * width` of the record array and any field is
//! reachable with one offset addition.
//!
//! ## Required Fields
//!
//! Every layout carries the primary key and a modification timestamp:
//!
//! | Field       | Type        | Role                                   |
//! |-------------|-------------|----------------------------------------|
//! | `date`      | `Date`      | primary key, day granularity           |
//! | `symbol`    | `Bytes(n)`  | primary key, zero-padded               |
//! | `portfolio` | `Bytes(n)`  | primary key, zero-padded               |
//! | `mtime`     | `Timestamp` | last modification, `0.0` means unset   |
//!
//! All other fields are payload. Field order is the declaration order and is
//! part of the table's identity: the layout fingerprint stored in the file
//! header is an xxh3 hash over names, types and widths, so a process can only
//! open a table with the layout it was created with.
//!
//! ## Field Types
//!
//! | Type        | Width | Encoding                              |
//! |-------------|-------|---------------------------------------|
//! | `Bool`      | 1     | 0 or 1                                |
//! | `Int32`     | 4     | i32 LE                                |
//! | `Int64`     | 8     | i64 LE                                |
//! | `Float32`   | 4     | f32 LE                                |
//! | `Float64`   | 8     | f64 LE                                |
//! | `Date`      | 4     | i32 LE days since 1970-01-01          |
//! | `Timestamp` | 8     | f64 LE seconds since the Unix epoch   |
//! | `Bytes(n)`  | n     | raw bytes, zero-padded to n           |
//!
//! Byte strings are compared after trailing zero padding is removed, so a
//! symbol can never end in a NUL byte.

mod convert;
mod record;

use eyre::{bail, ensure, Result};
use xxhash_rust::xxh3::Xxh3;

use crate::config::MAX_BYTES_FIELD_WIDTH;
use crate::error::TableError;

pub use convert::{Conversion, FieldValue};
pub use record::{Record, RecordBuilder, RecordRef};

pub const DATE_FIELD: &str = "date";
pub const SYMBOL_FIELD: &str = "symbol";
pub const PORTFOLIO_FIELD: &str = "portfolio";
pub const MTIME_FIELD: &str = "mtime";

pub const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    Date,
    Timestamp,
    Bytes(u8),
}

impl FieldType {
    pub fn width(self) -> usize {
        match self {
            FieldType::Bool => 1,
            FieldType::Int32 | FieldType::Float32 | FieldType::Date => 4,
            FieldType::Int64 | FieldType::Float64 | FieldType::Timestamp => 8,
            FieldType::Bytes(n) => n as usize,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Float32 => "float32",
            FieldType::Float64 => "float64",
            FieldType::Date => "date",
            FieldType::Timestamp => "timestamp",
            FieldType::Bytes(_) => "bytes",
        }
    }

    fn tag(self) -> u8 {
        match self {
            FieldType::Bool => 1,
            FieldType::Int32 => 2,
            FieldType::Int64 => 3,
            FieldType::Float32 => 4,
            FieldType::Float64 => 5,
            FieldType::Date => 6,
            FieldType::Timestamp => 7,
            FieldType::Bytes(_) => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    name: String,
    field_type: FieldType,
    offset: usize,
}

impl FieldDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn width(&self) -> usize {
        self.field_type.width()
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.width()
    }
}

/// Primary key of a record. Byte strings are stored without padding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub date: i32,
    pub symbol: Vec<u8>,
    pub portfolio: Vec<u8>,
}

impl RecordKey {
    pub fn new(date: i32, symbol: impl AsRef<[u8]>, portfolio: impl AsRef<[u8]>) -> Self {
        Self {
            date,
            symbol: trim_padding(symbol.as_ref()).to_vec(),
            portfolio: trim_padding(portfolio.as_ref()).to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    fields: Vec<FieldDef>,
    width: usize,
    date: usize,
    symbol: usize,
    portfolio: usize,
    mtime: usize,
    fingerprint: u64,
}

impl RecordLayout {
    pub fn new<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        let mut defs: Vec<FieldDef> = Vec::new();
        let mut offset = 0;

        for (name, field_type) in fields {
            let name = name.into();
            ensure!(!name.is_empty(), "field names must not be empty");
            ensure!(
                defs.iter().all(|d| d.name != name),
                "duplicate field '{}'",
                name
            );
            if let FieldType::Bytes(n) = field_type {
                ensure!(
                    n > 0 && (n as usize) <= MAX_BYTES_FIELD_WIDTH,
                    "field '{}' has invalid byte width {}",
                    name,
                    n
                );
            }
            defs.push(FieldDef {
                name,
                field_type,
                offset,
            });
            offset += field_type.width();
        }

        let date = required_field(&defs, DATE_FIELD, |t| t == FieldType::Date)?;
        let symbol = required_field(&defs, SYMBOL_FIELD, |t| matches!(t, FieldType::Bytes(_)))?;
        let portfolio =
            required_field(&defs, PORTFOLIO_FIELD, |t| matches!(t, FieldType::Bytes(_)))?;
        let mtime = required_field(&defs, MTIME_FIELD, |t| t == FieldType::Timestamp)?;

        let fingerprint = fingerprint(&defs);

        Ok(Self {
            fields: defs,
            width: offset,
            date,
            symbol,
            portfolio,
            mtime,
            fingerprint,
        })
    }

    /// Layout with the key fields first, then `payload`, then `mtime`.
    pub fn keyed<I, S>(symbol_width: u8, portfolio_width: u8, payload: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        let mut fields: Vec<(String, FieldType)> = vec![
            (DATE_FIELD.to_string(), FieldType::Date),
            (SYMBOL_FIELD.to_string(), FieldType::Bytes(symbol_width)),
            (PORTFOLIO_FIELD.to_string(), FieldType::Bytes(portfolio_width)),
        ];
        fields.extend(payload.into_iter().map(|(n, t)| (n.into(), t)));
        fields.push((MTIME_FIELD.to_string(), FieldType::Timestamp));
        Self::new(fields)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> Option<&FieldDef> {
        self.fields.get(idx)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn date_of(&self, record: &[u8]) -> i32 {
        read_i32(record, self.fields[self.date].offset)
    }

    pub fn symbol_of<'r>(&self, record: &'r [u8]) -> &'r [u8] {
        trim_padding(&record[self.fields[self.symbol].range()])
    }

    pub fn portfolio_of<'r>(&self, record: &'r [u8]) -> &'r [u8] {
        trim_padding(&record[self.fields[self.portfolio].range()])
    }

    pub fn mtime_of(&self, record: &[u8]) -> f64 {
        read_f64(record, self.fields[self.mtime].offset)
    }

    pub(crate) fn set_mtime(&self, record: &mut [u8], mtime: f64) {
        let offset = self.fields[self.mtime].offset;
        record[offset..offset + 8].copy_from_slice(&mtime.to_le_bytes());
    }

    pub fn key_of(&self, record: &[u8]) -> RecordKey {
        RecordKey {
            date: self.date_of(record),
            symbol: self.symbol_of(record).to_vec(),
            portfolio: self.portfolio_of(record).to_vec(),
        }
    }

    /// Full primary-key equality between a stored record and `key`.
    pub fn key_matches(&self, record: &[u8], key: &RecordKey) -> bool {
        self.date_of(record) == key.date
            && self.symbol_of(record) == key.symbol.as_slice()
            && self.portfolio_of(record) == key.portfolio.as_slice()
    }

    /// Per-record validation applied to every write.
    pub fn validate(&self, record: &[u8]) -> std::result::Result<(), TableError> {
        if record.len() != self.width {
            return Err(TableError::MalformedRecord(format!(
                "record is {} bytes, layout width is {}",
                record.len(),
                self.width
            )));
        }
        if self.symbol_of(record).is_empty() {
            return Err(TableError::MalformedRecord("symbol is empty".to_string()));
        }
        let date = self.date_of(record);
        if date < 0 {
            return Err(TableError::MalformedRecord(format!(
                "date {} is before 1970-01-01",
                date
            )));
        }
        let mtime = self.mtime_of(record);
        if !mtime.is_finite() || mtime < 0.0 {
            return Err(TableError::MalformedRecord(format!(
                "mtime {} is not a valid timestamp",
                mtime
            )));
        }
        Ok(())
    }
}

fn required_field(
    defs: &[FieldDef],
    name: &str,
    accepts: impl Fn(FieldType) -> bool,
) -> Result<usize> {
    let Some(idx) = defs.iter().position(|d| d.name == name) else {
        bail!("layout is missing required field '{}'", name);
    };
    ensure!(
        accepts(defs[idx].field_type),
        "field '{}' has unsupported type {}",
        name,
        defs[idx].field_type.name()
    );
    Ok(idx)
}

fn fingerprint(defs: &[FieldDef]) -> u64 {
    let mut hasher = Xxh3::new();
    for def in defs {
        hasher.update(def.name.as_bytes());
        hasher.update(&[0, def.field_type.tag(), def.field_type.width() as u8]);
    }
    hasher.digest()
}

/// Strips the zero padding of a `Bytes(n)` field.
pub fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    &bytes[..end]
}

pub(crate) fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_le_bytes(buf)
}

pub(crate) fn read_i64(bytes: &[u8], offset: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_le_bytes(buf)
}

pub(crate) fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    f32::from_le_bytes(buf)
}

pub(crate) fn read_f64(bytes: &[u8], offset: usize) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_le_bytes(buf)
}
