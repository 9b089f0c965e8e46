//! Typed database values.
//!
//! A [`Value`] holds exactly one of the scalar shapes a column or a bound
//! parameter can take. Numeric accessors follow the widening chain
//! `UInt8 -> Int32 -> Int64 -> Double` silently; anything else that still
//! makes sense numerically (narrowing, bool) is performed but logged as a
//! lossy conversion, and conversions that make no sense (text, dates, NULL
//! to a number) log an error and return the type's zero.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Shared NULL returned by lookups that miss.
pub static NULL: Value = Value::Null;

/// Tag of the active [`Value`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueType {
    Null,
    Bool,
    UInt8,
    Int32,
    Int64,
    Double,
    String,
    Timestamp,
    Date,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::UInt8 => "uint8",
            ValueType::Int32 => "int32",
            ValueType::Int64 => "int64",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Timestamp => "timestamp",
            ValueType::Date => "date",
        };
        f.write_str(name)
    }
}

/// Calendar date without a time part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Date {
    pub year: i32,
    /// 1..=12
    pub month: u8,
    /// 1..=31
    pub day: u8,
}

impl Date {
    pub fn new(year: i32, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// Today in local time.
    pub fn now() -> Self {
        chrono::Local::now().date_naive().into()
    }

    /// Whether the fields name a real calendar day.
    pub fn is_valid(&self) -> bool {
        self.to_naive().is_some()
    }

    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, u32::from(self.month), u32::from(self.day))
    }
}

impl From<NaiveDate> for Date {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month() as u8,
            day: date.day() as u8,
        }
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for Date {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map(Date::from)
    }
}

/// Date and time of day with a sub-second fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    /// 0..=23
    pub hour: u8,
    /// 0..=59
    pub minute: u8,
    /// 0..=59
    pub second: u8,
    /// Nanoseconds. Not part of the canonical string form.
    pub fraction: u32,
}

impl Timestamp {
    pub fn new(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            fraction: 0,
        }
    }

    pub fn with_fraction(mut self, nanos: u32) -> Self {
        self.fraction = nanos;
        self
    }

    /// Current local time.
    pub fn now() -> Self {
        chrono::Local::now().naive_local().into()
    }

    pub fn date(&self) -> Date {
        Date::new(self.year, self.month, self.day)
    }

    pub fn is_valid(&self) -> bool {
        self.to_naive().is_some()
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        self.date().to_naive()?.and_hms_nano_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
            self.fraction,
        )
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(ts: NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            month: ts.month() as u8,
            day: ts.day() as u8,
            hour: ts.hour() as u8,
            minute: ts.minute() as u8,
            second: ts.second() as u8,
            fraction: ts.nanosecond(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    /// Accepts `YYYY-MM-DD HH:MM:SS` with an optional fraction, or the `T`
    /// separated ISO form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
            .map(Timestamp::from)
    }
}

/// A single database value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    UInt8(u8),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Timestamp(Timestamp),
    Date(Date),
}

impl Value {
    pub fn null() -> Self {
        Value::Null
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::UInt8(_) => ValueType::UInt8,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Date(_) => ValueType::Date,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn lossy(&self, target: &str) {
        tracing::warn!(
            "Converted a database value from {} to {}.",
            self.value_type(),
            target
        );
    }

    fn not_convertible(&self, target: &str) {
        tracing::error!(
            "Converted a database value to {} but the type {} isn't convertible.",
            target,
            self.value_type()
        );
    }

    // ==================== Lenient accessors ====================

    pub fn as_bool(&self) -> bool {
        match *self {
            Value::Bool(b) => b,
            Value::UInt8(v) => {
                self.lossy("bool");
                v != 0
            }
            Value::Int32(v) => {
                self.lossy("bool");
                v != 0
            }
            Value::Int64(v) => {
                self.lossy("bool");
                v != 0
            }
            Value::Double(v) => {
                self.lossy("bool");
                v != 0.0
            }
            _ => {
                self.not_convertible("bool");
                false
            }
        }
    }

    pub fn as_u8(&self) -> u8 {
        match *self {
            Value::UInt8(v) => v,
            Value::Bool(b) => {
                self.lossy("uint8");
                u8::from(b)
            }
            Value::Int32(v) => {
                self.lossy("uint8");
                v as u8
            }
            Value::Int64(v) => {
                self.lossy("uint8");
                v as u8
            }
            Value::Double(v) => {
                self.lossy("uint8");
                v as u8
            }
            _ => {
                self.not_convertible("uint8");
                0
            }
        }
    }

    pub fn as_i32(&self) -> i32 {
        match *self {
            Value::UInt8(v) => i32::from(v),
            Value::Int32(v) => v,
            Value::Bool(b) => {
                self.lossy("int32");
                i32::from(b)
            }
            Value::Int64(v) => {
                self.lossy("int32");
                v as i32
            }
            Value::Double(v) => {
                self.lossy("int32");
                v as i32
            }
            _ => {
                self.not_convertible("int32");
                0
            }
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            Value::UInt8(v) => i64::from(v),
            Value::Int32(v) => i64::from(v),
            Value::Int64(v) => v,
            Value::Bool(b) => {
                self.lossy("int64");
                i64::from(b)
            }
            Value::Double(v) => {
                self.lossy("int64");
                v as i64
            }
            _ => {
                self.not_convertible("int64");
                0
            }
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::UInt8(v) => f64::from(v),
            Value::Int32(v) => f64::from(v),
            Value::Int64(v) => v as f64,
            Value::Double(v) => v,
            Value::Bool(b) => {
                self.lossy("double");
                if b { 1.0 } else { 0.0 }
            }
            _ => {
                self.not_convertible("double");
                0.0
            }
        }
    }

    pub fn as_f32(&self) -> f32 {
        self.as_f64() as f32
    }

    /// Text form of the value. Anything but a string is formatted and
    /// logged as a conversion; NULL yields `"NULL"`.
    pub fn as_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Null => self.to_string(),
            other => {
                other.lossy("string");
                other.to_string()
            }
        }
    }

    pub fn as_timestamp(&self) -> Timestamp {
        match self {
            Value::Timestamp(ts) => *ts,
            other => {
                other.not_convertible("timestamp");
                Timestamp::default()
            }
        }
    }

    pub fn as_date(&self) -> Date {
        match self {
            Value::Date(d) => *d,
            other => {
                other.not_convertible("date");
                Date::default()
            }
        }
    }

    // ==================== Strict accessors ====================
    //
    // Exact tag or lossless widening only; no logging.

    pub fn try_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn try_u8(&self) -> Option<u8> {
        match *self {
            Value::UInt8(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_i32(&self) -> Option<i32> {
        match *self {
            Value::UInt8(v) => Some(i32::from(v)),
            Value::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_i64(&self) -> Option<i64> {
        match *self {
            Value::UInt8(v) => Some(i64::from(v)),
            Value::Int32(v) => Some(i64::from(v)),
            Value::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_f64(&self) -> Option<f64> {
        match *self {
            Value::UInt8(v) => Some(f64::from(v)),
            Value::Int32(v) => Some(f64::from(v)),
            Value::Int64(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn try_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn try_date(&self) -> Option<Date> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::Date(d) => write!(f, "{}", d),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::UInt8(v) => serializer.serialize_u8(*v),
            Value::Int32(v) => serializer.serialize_i32(*v),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
            Value::Timestamp(ts) => serializer.collect_str(ts),
            Value::Date(d) => serializer.collect_str(d),
        }
    }
}

// Implement From traits for Value

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt8(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Date> for Value {
    fn from(v: Date) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v.into())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
