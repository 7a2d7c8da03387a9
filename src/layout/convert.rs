//! # Conversion Between Record Layouts
//!
//! Tables written by different producers rarely agree on every field. A
//! `Conversion` is a precomputed plan that maps records of a source layout
//! onto a target layout, matching fields by name.
//!
//! ## Conversion Rules
//!
//! | Source → Target                          | Rule                                   |
//! |------------------------------------------|----------------------------------------|
//! | same type and width                      | byte copy                              |
//! | `Bytes(a)` → `Bytes(b)`                  | copy `min(a, b)` bytes, zero-fill rest |
//! | `Bool` / `Int32` / `Int64` among each other | integer value, narrowing saturates  |
//! | `Float32` / `Float64` / `Timestamp`      | float value (`f64` → `f32` rounds)     |
//! | integer ↔ float                          | numeric cast, float → int saturates    |
//! | `Date` ↔ `Int32` / `Int64`               | day number, narrowing saturates        |
//! | `Date` → `Timestamp`                     | midnight UTC of that day               |
//! | `Timestamp` → `Date`                     | day containing the instant (floor)     |
//! | field missing from the source            | zero (an `mtime` of 0 means unset)     |
//! | `Bytes` ↔ any non-`Bytes` type           | rejected when the plan is built        |
//!
//! Integer targets receive `0` for NaN sources, following Rust's saturating
//! float-to-int casts.

use eyre::{bail, ensure, Result};

use super::{read_f32, read_f64, read_i32, read_i64, FieldDef, FieldType, Record, RecordLayout};
use super::SECONDS_PER_DAY;
use crate::error::TableError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Date(i32),
    Timestamp(f64),
    Bytes(&'a [u8]),
}

impl FieldValue<'_> {
    fn matches(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (FieldValue::Bool(_), FieldType::Bool)
                | (FieldValue::Int32(_), FieldType::Int32)
                | (FieldValue::Int64(_), FieldType::Int64)
                | (FieldValue::Float32(_), FieldType::Float32)
                | (FieldValue::Float64(_), FieldType::Float64)
                | (FieldValue::Date(_), FieldType::Date)
                | (FieldValue::Timestamp(_), FieldType::Timestamp)
                | (FieldValue::Bytes(_), FieldType::Bytes(_))
        )
    }
}

pub(crate) fn read_value<'a>(def: &FieldDef, record: &'a [u8]) -> FieldValue<'a> {
    let offset = def.offset();
    match def.field_type() {
        FieldType::Bool => FieldValue::Bool(record[offset] != 0),
        FieldType::Int32 => FieldValue::Int32(read_i32(record, offset)),
        FieldType::Int64 => FieldValue::Int64(read_i64(record, offset)),
        FieldType::Float32 => FieldValue::Float32(read_f32(record, offset)),
        FieldType::Float64 => FieldValue::Float64(read_f64(record, offset)),
        FieldType::Date => FieldValue::Date(read_i32(record, offset)),
        FieldType::Timestamp => FieldValue::Timestamp(read_f64(record, offset)),
        FieldType::Bytes(_) => FieldValue::Bytes(super::trim_padding(&record[def.range()])),
    }
}

pub(crate) fn write_value(def: &FieldDef, record: &mut [u8], value: FieldValue<'_>) -> Result<()> {
    ensure!(
        value.matches(def.field_type()),
        "field '{}' is {}, got {:?}",
        def.name(),
        def.field_type().name(),
        value
    );

    let slot = &mut record[def.range()];
    match value {
        FieldValue::Bool(v) => slot[0] = u8::from(v),
        FieldValue::Int32(v) | FieldValue::Date(v) => slot.copy_from_slice(&v.to_le_bytes()),
        FieldValue::Int64(v) => slot.copy_from_slice(&v.to_le_bytes()),
        FieldValue::Float32(v) => slot.copy_from_slice(&v.to_le_bytes()),
        FieldValue::Float64(v) | FieldValue::Timestamp(v) => {
            slot.copy_from_slice(&v.to_le_bytes())
        }
        FieldValue::Bytes(bytes) => {
            ensure!(
                bytes.len() <= slot.len(),
                "field '{}' holds at most {} bytes, got {}",
                def.name(),
                slot.len(),
                bytes.len()
            );
            slot[..bytes.len()].copy_from_slice(bytes);
            slot[bytes.len()..].fill(0);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

fn to_number(value: FieldValue<'_>) -> Option<Number> {
    match value {
        FieldValue::Bool(v) => Some(Number::Int(i64::from(v))),
        FieldValue::Int32(v) | FieldValue::Date(v) => Some(Number::Int(i64::from(v))),
        FieldValue::Int64(v) => Some(Number::Int(v)),
        FieldValue::Float32(v) => Some(Number::Float(f64::from(v))),
        FieldValue::Float64(v) | FieldValue::Timestamp(v) => Some(Number::Float(v)),
        FieldValue::Bytes(_) => None,
    }
}

fn saturate_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn from_number(number: Number, target: FieldType) -> Option<FieldValue<'static>> {
    let value = match (number, target) {
        (Number::Int(v), FieldType::Bool) => FieldValue::Bool(v != 0),
        (Number::Float(v), FieldType::Bool) => FieldValue::Bool(v != 0.0),
        (Number::Int(v), FieldType::Int32) => FieldValue::Int32(saturate_i32(v)),
        (Number::Float(v), FieldType::Int32) => FieldValue::Int32(v as i32),
        (Number::Int(v), FieldType::Int64) => FieldValue::Int64(v),
        (Number::Float(v), FieldType::Int64) => FieldValue::Int64(v as i64),
        (Number::Int(v), FieldType::Float32) => FieldValue::Float32(v as f32),
        (Number::Float(v), FieldType::Float32) => FieldValue::Float32(v as f32),
        (Number::Int(v), FieldType::Float64) => FieldValue::Float64(v as f64),
        (Number::Float(v), FieldType::Float64) => FieldValue::Float64(v),
        (Number::Int(v), FieldType::Timestamp) => FieldValue::Timestamp(v as f64),
        (Number::Float(v), FieldType::Timestamp) => FieldValue::Timestamp(v),
        (Number::Int(v), FieldType::Date) => FieldValue::Date(saturate_i32(v)),
        (Number::Float(v), FieldType::Date) => FieldValue::Date(v as i32),
        (_, FieldType::Bytes(_)) => return None,
    };
    Some(value)
}

fn coerce(value: FieldValue<'_>, target: FieldType) -> Option<FieldValue<'static>> {
    match (value, target) {
        (FieldValue::Date(days), FieldType::Timestamp) => {
            Some(FieldValue::Timestamp(f64::from(days) * SECONDS_PER_DAY))
        }
        (FieldValue::Timestamp(secs), FieldType::Date) => {
            Some(FieldValue::Date((secs / SECONDS_PER_DAY).floor() as i32))
        }
        _ => from_number(to_number(value)?, target),
    }
}

fn convertible(source: FieldType, target: FieldType) -> bool {
    match (source, target) {
        (FieldType::Bytes(_), FieldType::Bytes(_)) => true,
        (FieldType::Bytes(_), _) | (_, FieldType::Bytes(_)) => false,
        _ => true,
    }
}

#[derive(Debug, Clone)]
enum Step {
    Copy { src: usize, dst: usize, len: usize },
    Coerce { src: usize, dst: usize },
}

/// Precomputed mapping from a source layout onto a target layout.
#[derive(Debug, Clone)]
pub struct Conversion {
    source: RecordLayout,
    target: RecordLayout,
    steps: Vec<Step>,
}

impl Conversion {
    pub fn source(&self) -> &RecordLayout {
        &self.source
    }

    pub fn target(&self) -> &RecordLayout {
        &self.target
    }

    /// Converts one source record. Wrong-width input is a `MalformedRecord`.
    pub fn apply(&self, record: &[u8]) -> Result<Record> {
        if record.len() != self.source.width() {
            return Err(TableError::MalformedRecord(format!(
                "source record is {} bytes, source layout width is {}",
                record.len(),
                self.source.width()
            ))
            .into());
        }

        let mut out = vec![0u8; self.target.width()];
        for step in &self.steps {
            match *step {
                Step::Copy { src, dst, len } => {
                    let s = &self.source.fields()[src];
                    let d = &self.target.fields()[dst];
                    out[d.offset()..d.offset() + len]
                        .copy_from_slice(&record[s.offset()..s.offset() + len]);
                }
                Step::Coerce { src, dst } => {
                    let s = &self.source.fields()[src];
                    let d = &self.target.fields()[dst];
                    let Some(value) = coerce(read_value(s, record), d.field_type()) else {
                        bail!("cannot convert '{}' to {}", s.name(), d.field_type().name());
                    };
                    write_value(d, &mut out, value)?;
                }
            }
        }
        Ok(Record::from_bytes(out))
    }
}

impl RecordLayout {
    /// Builds the plan that maps records of `source` onto this layout.
    pub fn conversion_from(&self, source: &RecordLayout) -> Result<Conversion> {
        let mut steps = Vec::with_capacity(self.fields().len());

        for (dst, target_def) in self.fields().iter().enumerate() {
            let Some(src) = source.field_index(target_def.name()) else {
                continue;
            };
            let source_def = &source.fields()[src];
            let (from, to) = (source_def.field_type(), target_def.field_type());

            ensure!(
                convertible(from, to),
                "field '{}' cannot be converted from {} to {}",
                target_def.name(),
                from.name(),
                to.name()
            );

            let step = match (from, to) {
                (FieldType::Bytes(a), FieldType::Bytes(b)) => Step::Copy {
                    src,
                    dst,
                    len: a.min(b) as usize,
                },
                _ if from == to => Step::Copy {
                    src,
                    dst,
                    len: to.width(),
                },
                _ => Step::Coerce { src, dst },
            };
            steps.push(step);
        }

        Ok(Conversion {
            source: source.clone(),
            target: self.clone(),
            steps,
        })
    }

    /// One-off conversion of a single record from `source`.
    pub fn convert_from(&self, source: &RecordLayout, record: &[u8]) -> Result<Record> {
        self.conversion_from(source)?.apply(record)
    }
}
