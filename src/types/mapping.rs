//! SQL types reported in result metadata and decoding of their wire values.
//!
//! Result cells arrive as strings (or JSON null). Fixed-point numbers are
//! sent in their decimal text form with `scale` fractional digits.

use crate::error::ConversionError;

/// SQL type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// NUMBER(p, s)
    Fixed { precision: u8, scale: u8 },
    /// FLOAT / DOUBLE
    Real,
    /// VARCHAR(n)
    Text { length: Option<u64> },
    Boolean,
    /// BINARY(n), hex encoded on the wire
    Binary { length: Option<u64> },
    Date,
    Time { scale: u8 },
    TimestampLtz { scale: u8 },
    TimestampNtz { scale: u8 },
    TimestampTz { scale: u8 },
    Variant,
    Object,
    Array,
}

const DEFAULT_PRECISION: u8 = 38;
const DEFAULT_TIME_SCALE: u8 = 9;

impl SqlType {
    /// Parse a rowtype `type` string with its metadata.
    ///
    /// # Errors
    /// Returns `ConversionError::InvalidFormat` for unknown type names.
    pub fn from_rowtype(
        type_name: &str,
        precision: Option<i64>,
        scale: Option<i64>,
        length: Option<i64>,
    ) -> Result<Self, ConversionError> {
        let scale_or = |default: u8| scale.map(|s| s.clamp(0, 37) as u8).unwrap_or(default);
        let length = length.and_then(|l| u64::try_from(l).ok());

        let sql_type = match type_name.to_ascii_lowercase().as_str() {
            "fixed" => SqlType::Fixed {
                precision: precision
                    .map(|p| p.clamp(1, DEFAULT_PRECISION as i64) as u8)
                    .unwrap_or(DEFAULT_PRECISION),
                scale: scale_or(0),
            },
            "real" => SqlType::Real,
            "text" => SqlType::Text { length },
            "boolean" => SqlType::Boolean,
            "binary" => SqlType::Binary { length },
            "date" => SqlType::Date,
            "time" => SqlType::Time {
                scale: scale_or(DEFAULT_TIME_SCALE),
            },
            "timestamp_ltz" => SqlType::TimestampLtz {
                scale: scale_or(DEFAULT_TIME_SCALE),
            },
            "timestamp_ntz" => SqlType::TimestampNtz {
                scale: scale_or(DEFAULT_TIME_SCALE),
            },
            "timestamp_tz" => SqlType::TimestampTz {
                scale: scale_or(DEFAULT_TIME_SCALE),
            },
            "variant" => SqlType::Variant,
            "object" => SqlType::Object,
            "array" => SqlType::Array,
            other => {
                return Err(ConversionError::InvalidFormat(format!(
                    "Unknown column type: {}",
                    other
                )))
            }
        };

        Ok(sql_type)
    }

    /// Check if values of this type are numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, SqlType::Fixed { .. } | SqlType::Real)
    }
}

/// Decoder for string-encoded cell values.
pub struct TypeMapper;

impl TypeMapper {
    /// Decode an integer value.
    ///
    /// Fixed values with a scale are accepted when their fractional digits
    /// are all zero.
    pub fn decode_i64(sql_type: &SqlType, raw: &str) -> Result<i64, String> {
        match sql_type {
            SqlType::Fixed { .. } | SqlType::Text { .. } => {
                let (integral, fraction) = split_decimal(raw);
                if fraction.bytes().any(|b| b != b'0') {
                    return Err(format!("'{}' has a fractional part", raw));
                }
                integral
                    .parse::<i64>()
                    .map_err(|e| format!("'{}' is not an integer: {}", raw, e))
            }
            SqlType::Real => {
                let value = Self::decode_f64(sql_type, raw)?;
                if value.fract() != 0.0 || !value.is_finite() {
                    return Err(format!("'{}' is not an integer", raw));
                }
                Ok(value as i64)
            }
            SqlType::Boolean => Self::decode_bool(raw).map(i64::from),
            other => Err(format!("Cannot read {:?} as integer", other)),
        }
    }

    /// Decode a floating-point value.
    pub fn decode_f64(sql_type: &SqlType, raw: &str) -> Result<f64, String> {
        match sql_type {
            SqlType::Fixed { .. } | SqlType::Real | SqlType::Text { .. } => {
                match raw.to_ascii_lowercase().as_str() {
                    "nan" => Ok(f64::NAN),
                    "inf" | "infinity" => Ok(f64::INFINITY),
                    "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                    _ => raw
                        .parse::<f64>()
                        .map_err(|e| format!("'{}' is not a number: {}", raw, e)),
                }
            }
            other => Err(format!("Cannot read {:?} as float", other)),
        }
    }

    /// Decode a boolean value.
    pub fn decode_bool(raw: &str) -> Result<bool, String> {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            _ => Err(format!("'{}' is not a boolean", raw)),
        }
    }
}

fn split_decimal(raw: &str) -> (&str, &str) {
    raw.split_once('.').unwrap_or((raw, ""))
}
