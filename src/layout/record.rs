//! # Record Construction and Zero-Copy Views
//!
//! `RecordBuilder` assembles one fixed-width record with typed setters, and
//! `RecordRef` reads fields straight out of a borrowed slice (usually a slot
//! in the mapped record array).
//!
//! ## Usage
//!
//! ```ignore
//! let mut builder = RecordBuilder::new(&layout);
//! builder.set_key(19_700, b"AAPL", b"GROWTH")?;
//! builder.set_float64(price_idx, 187.5)?;
//! let record = builder.build();
//!
//! builder.reset();
//! ```

use eyre::{ensure, Result};

use super::convert::{read_value, write_value, FieldValue};
use super::{RecordKey, RecordLayout};

/// One owned record, exactly `layout.width()` bytes when well formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record(Vec<u8>);

impl Record {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Record {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub struct RecordBuilder<'a> {
    layout: &'a RecordLayout,
    data: Vec<u8>,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(layout: &'a RecordLayout) -> Self {
        Self {
            layout,
            data: vec![0u8; layout.width()],
        }
    }

    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    pub fn set(&mut self, col_idx: usize, value: FieldValue<'_>) -> Result<()> {
        let Some(def) = self.layout.field(col_idx) else {
            eyre::bail!(
                "field index {} out of range ({} fields)",
                col_idx,
                self.layout.fields().len()
            );
        };
        write_value(def, &mut self.data, value)
    }

    pub fn set_by_name(&mut self, name: &str, value: FieldValue<'_>) -> Result<()> {
        let Some(idx) = self.layout.field_index(name) else {
            eyre::bail!("layout has no field '{}'", name);
        };
        self.set(idx, value)
    }

    pub fn set_bool(&mut self, col_idx: usize, value: bool) -> Result<()> {
        self.set(col_idx, FieldValue::Bool(value))
    }

    pub fn set_int32(&mut self, col_idx: usize, value: i32) -> Result<()> {
        self.set(col_idx, FieldValue::Int32(value))
    }

    pub fn set_int64(&mut self, col_idx: usize, value: i64) -> Result<()> {
        self.set(col_idx, FieldValue::Int64(value))
    }

    pub fn set_float32(&mut self, col_idx: usize, value: f32) -> Result<()> {
        self.set(col_idx, FieldValue::Float32(value))
    }

    pub fn set_float64(&mut self, col_idx: usize, value: f64) -> Result<()> {
        self.set(col_idx, FieldValue::Float64(value))
    }

    pub fn set_date(&mut self, col_idx: usize, days: i32) -> Result<()> {
        self.set(col_idx, FieldValue::Date(days))
    }

    pub fn set_timestamp(&mut self, col_idx: usize, seconds: f64) -> Result<()> {
        self.set(col_idx, FieldValue::Timestamp(seconds))
    }

    pub fn set_bytes(&mut self, col_idx: usize, bytes: &[u8]) -> Result<()> {
        self.set(col_idx, FieldValue::Bytes(bytes))
    }

    /// Sets the three primary-key fields at once.
    pub fn set_key(&mut self, date: i32, symbol: &[u8], portfolio: &[u8]) -> Result<()> {
        self.set_by_name(super::DATE_FIELD, FieldValue::Date(date))?;
        self.set_by_name(super::SYMBOL_FIELD, FieldValue::Bytes(symbol))?;
        self.set_by_name(super::PORTFOLIO_FIELD, FieldValue::Bytes(portfolio))
    }

    pub fn set_mtime(&mut self, seconds: f64) {
        self.layout.set_mtime(&mut self.data, seconds);
    }

    pub fn build(&self) -> Record {
        Record(self.data.clone())
    }
}

/// Borrowed view over one stored record.
#[derive(Clone, Copy)]
pub struct RecordRef<'a> {
    data: &'a [u8],
    layout: &'a RecordLayout,
}

impl<'a> RecordRef<'a> {
    pub fn new(data: &'a [u8], layout: &'a RecordLayout) -> Result<Self> {
        ensure!(
            data.len() == layout.width(),
            "record slice is {} bytes, layout width is {}",
            data.len(),
            layout.width()
        );
        Ok(Self { data, layout })
    }

    pub(crate) fn new_unchecked(data: &'a [u8], layout: &'a RecordLayout) -> Self {
        debug_assert_eq!(data.len(), layout.width());
        Self { data, layout }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn to_record(&self) -> Record {
        Record(self.data.to_vec())
    }

    pub fn get(&self, col_idx: usize) -> Option<FieldValue<'a>> {
        self.layout
            .field(col_idx)
            .map(|def| read_value(def, self.data))
    }

    pub fn get_by_name(&self, name: &str) -> Option<FieldValue<'a>> {
        self.layout
            .field_index(name)
            .and_then(|idx| self.get(idx))
    }

    pub fn date(&self) -> i32 {
        self.layout.date_of(self.data)
    }

    pub fn symbol(&self) -> &'a [u8] {
        self.layout.symbol_of(self.data)
    }

    pub fn portfolio(&self) -> &'a [u8] {
        self.layout.portfolio_of(self.data)
    }

    pub fn mtime(&self) -> f64 {
        self.layout.mtime_of(self.data)
    }

    pub fn key(&self) -> RecordKey {
        self.layout.key_of(self.data)
    }
}

impl std::fmt::Debug for RecordRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (idx, def) in self.layout.fields().iter().enumerate() {
            if let Some(value) = self.get(idx) {
                map.entry(&def.name(), &value);
            }
        }
        map.finish()
    }
}
