//! SQL data type codes as reported in column descriptors.
//!
//! The numbering is the ODBC one (`SQL_CHAR = 1`, `SQL_BIGINT = -5`, ...),
//! which every backend translates its native type information into.

/// Declared SQL type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Unknown,
    Char,
    Numeric,
    Decimal,
    Integer,
    SmallInt,
    Float,
    Real,
    Double,
    DateTime,
    Time,
    Timestamp,
    VarChar,
    Udt,
    Row,
    Array,
    Multiset,
    TypeDate,
    TypeTime,
    TypeTimestamp,
    TypeTimeWithTimezone,
    TypeTimestampWithTimezone,
    LongVarChar,
    Binary,
    VarBinary,
    LongVarBinary,
    BigInt,
    TinyInt,
    Bit,
    WChar,
    WVarChar,
    WLongVarChar,
    Guid,
    TypeTinyInt,
    SsVariant,
    SsUdt,
    SsXml,
    SsTable,
    SsTime2,
    SsTimestampOffset,
    /// A code outside the known table.
    Other(i16),
}

/// How a non-null cell of a given column type is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoding {
    Text,
    /// Single precision read, widened to a double.
    Float,
    Double,
    /// 4 to 8 byte integers.
    BigInt,
    /// Byte and short integers.
    Int,
    Date,
    Timestamp,
    /// Not decoded; the cell becomes NULL.
    Unsupported,
}

const CODES: &[(SqlType, i16)] = &[
    (SqlType::Unknown, 0),
    (SqlType::Char, 1),
    (SqlType::Numeric, 2),
    (SqlType::Decimal, 3),
    (SqlType::Integer, 4),
    (SqlType::SmallInt, 5),
    (SqlType::Float, 6),
    (SqlType::Real, 7),
    (SqlType::Double, 8),
    (SqlType::DateTime, 9),
    (SqlType::Time, 10),
    (SqlType::Timestamp, 11),
    (SqlType::VarChar, 12),
    (SqlType::Udt, 17),
    (SqlType::Row, 19),
    (SqlType::Array, 50),
    (SqlType::Multiset, 55),
    (SqlType::TypeDate, 91),
    (SqlType::TypeTime, 92),
    (SqlType::TypeTimestamp, 93),
    (SqlType::TypeTimeWithTimezone, 94),
    (SqlType::TypeTimestampWithTimezone, 95),
    (SqlType::LongVarChar, -1),
    (SqlType::Binary, -2),
    (SqlType::VarBinary, -3),
    (SqlType::LongVarBinary, -4),
    (SqlType::BigInt, -5),
    (SqlType::TinyInt, -6),
    (SqlType::Bit, -7),
    (SqlType::WChar, -8),
    (SqlType::WVarChar, -9),
    (SqlType::WLongVarChar, -10),
    (SqlType::Guid, -11),
    (SqlType::TypeTinyInt, -25),
    (SqlType::SsVariant, -150),
    (SqlType::SsUdt, -151),
    (SqlType::SsXml, -152),
    (SqlType::SsTable, -153),
    (SqlType::SsTime2, -154),
    (SqlType::SsTimestampOffset, -155),
];

impl SqlType {
    pub fn from_code(code: i16) -> Self {
        CODES
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(ty, _)| *ty)
            .unwrap_or(SqlType::Other(code))
    }

    pub fn code(self) -> i16 {
        if let SqlType::Other(code) = self {
            return code;
        }
        CODES
            .iter()
            .find(|(ty, _)| *ty == self)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }

    /// Decoding rule for cells of this type.
    pub fn decoding(self) -> Decoding {
        match self {
            SqlType::Char
            | SqlType::VarChar
            | SqlType::WChar
            | SqlType::WVarChar
            | SqlType::WLongVarChar
            | SqlType::LongVarChar => Decoding::Text,

            SqlType::Float => Decoding::Float,

            SqlType::Double | SqlType::Numeric | SqlType::Decimal | SqlType::Real => {
                Decoding::Double
            }

            SqlType::Integer | SqlType::BigInt => Decoding::BigInt,

            SqlType::SmallInt | SqlType::TinyInt | SqlType::TypeTinyInt => Decoding::Int,

            SqlType::DateTime => Decoding::Date,

            SqlType::Timestamp | SqlType::TypeTimestamp => Decoding::Timestamp,

            _ => Decoding::Unsupported,
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for (ty, code) in CODES {
            assert_eq!(SqlType::from_code(*code), *ty);
            assert_eq!(ty.code(), *code);
        }
        assert_eq!(SqlType::from_code(1234), SqlType::Other(1234));
        assert_eq!(SqlType::Other(1234).code(), 1234);
    }

    #[test]
    fn test_decoding_table() {
        assert_eq!(SqlType::WVarChar.decoding(), Decoding::Text);
        assert_eq!(SqlType::Float.decoding(), Decoding::Float);
        assert_eq!(SqlType::Decimal.decoding(), Decoding::Double);
        assert_eq!(SqlType::Integer.decoding(), Decoding::BigInt);
        assert_eq!(SqlType::BigInt.decoding(), Decoding::BigInt);
        assert_eq!(SqlType::TinyInt.decoding(), Decoding::Int);
        assert_eq!(SqlType::DateTime.decoding(), Decoding::Date);
        assert_eq!(SqlType::TypeTimestamp.decoding(), Decoding::Timestamp);
        assert_eq!(SqlType::Bit.decoding(), Decoding::Unsupported);
        assert_eq!(SqlType::Guid.decoding(), Decoding::Unsupported);
        assert_eq!(SqlType::Other(77).decoding(), Decoding::Unsupported);
    }
}
