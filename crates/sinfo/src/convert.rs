//! Lexical conversion laws shared by all codecs.
//!
//! The stored variant of a node and its numeric interpretation are
//! independent: reading an integer from a string-valued node parses the
//! string, reading a string from a numeric node renders the shortest
//! round-trip decimal form.

use crate::{Scalar, SerializationError, SerializationInfo};

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_owned())
    }
}
impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}
impl From<Vec<u8>> for Scalar {
    fn from(v: Vec<u8>) -> Self {
        Scalar::Bytes(v)
    }
}
impl From<&[u8]> for Scalar {
    fn from(v: &[u8]) -> Self {
        Scalar::Bytes(v.to_owned())
    }
}
impl From<char> for Scalar {
    fn from(v: char) -> Self {
        Scalar::Char(v)
    }
}
impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}
impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v)
    }
}
impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Double(v)
    }
}

macro_rules! scalar_from_int {
    ($($t:ty),*) => {$(
        impl From<$t> for Scalar {
            fn from(v: $t) -> Self {
                Scalar::Int(v as i64)
            }
        }
    )*};
}
macro_rules! scalar_from_uint {
    ($($t:ty),*) => {$(
        impl From<$t> for Scalar {
            fn from(v: $t) -> Self {
                Scalar::UInt(v as u64)
            }
        }
    )*};
}
scalar_from_int!(i8, i16, i32, i64);
scalar_from_uint!(u8, u16, u32, u64);

/// Parses a signed integer in the C locale, tolerating surrounding
/// whitespace and a leading sign.
pub fn parse_int(s: &str) -> Option<i64> {
    s.trim().parse::<i64>().ok()
}

/// Parses an unsigned integer in the C locale.
pub fn parse_uint(s: &str) -> Option<u64> {
    s.trim().parse::<u64>().ok()
}

/// Parses a float, recognizing `nan`, `inf`, `-inf` and `infinity`
/// case-insensitively.
pub fn parse_float(s: &str) -> Option<f64> {
    let t = s.trim();
    match t.to_ascii_lowercase().as_str() {
        "nan" => return Some(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" => return Some(f64::INFINITY),
        "-inf" | "-infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    t.parse::<f64>().ok()
}

/// Renders the shortest decimal form which round-trips, using `nan`,
/// `inf` and `-inf` for the non-finite values.
pub fn float_to_string(v: f64) -> String {
    if v.is_nan() {
        "nan".to_owned()
    } else if v == f64::INFINITY {
        "inf".to_owned()
    } else if v == f64::NEG_INFINITY {
        "-inf".to_owned()
    } else {
        format!("{}", v)
    }
}

/// True iff the first character is one of `1 t T y Y`.
pub fn bool_from_str(s: &str) -> bool {
    matches!(s.chars().next(), Some('1' | 't' | 'T' | 'y' | 'Y'))
}

impl SerializationInfo {
    /// The stored variant as a signed integer, converting lexically from
    /// strings and numerically from the other scalar kinds.
    pub(crate) fn to_i64(&self) -> Result<i64, SerializationError> {
        match self.scalar() {
            None => Err(SerializationError::NullConversion("integer")),
            Some(Scalar::Int(v)) => Ok(*v),
            Some(Scalar::UInt(v)) => i64::try_from(*v)
                .map_err(|_| SerializationError::conversion("unsigned", v, "integer")),
            Some(Scalar::Bool(v)) => Ok(*v as i64),
            Some(Scalar::Char(c)) => c
                .to_digit(10)
                .map(|d| d as i64)
                .ok_or_else(|| SerializationError::conversion("char", c, "integer")),
            Some(Scalar::Float(v)) => float_to_i64(*v as f64),
            Some(Scalar::Double(v)) => float_to_i64(*v),
            Some(Scalar::Str(s)) => {
                parse_int(s).ok_or_else(|| SerializationError::conversion("string", s, "integer"))
            }
            Some(Scalar::Bytes(b)) => std::str::from_utf8(b)
                .ok()
                .and_then(parse_int)
                .ok_or_else(|| SerializationError::conversion("bytes", "<binary>", "integer")),
        }
    }

    pub(crate) fn to_u64(&self) -> Result<u64, SerializationError> {
        match self.scalar() {
            None => Err(SerializationError::NullConversion("unsigned")),
            Some(Scalar::UInt(v)) => Ok(*v),
            Some(Scalar::Int(v)) => u64::try_from(*v)
                .map_err(|_| SerializationError::conversion("int", v, "unsigned")),
            Some(Scalar::Bool(v)) => Ok(*v as u64),
            Some(Scalar::Char(c)) => c
                .to_digit(10)
                .map(|d| d as u64)
                .ok_or_else(|| SerializationError::conversion("char", c, "unsigned")),
            Some(Scalar::Float(v)) => float_to_u64(*v as f64),
            Some(Scalar::Double(v)) => float_to_u64(*v),
            Some(Scalar::Str(s)) => {
                parse_uint(s).ok_or_else(|| SerializationError::conversion("string", s, "unsigned"))
            }
            Some(Scalar::Bytes(b)) => std::str::from_utf8(b)
                .ok()
                .and_then(parse_uint)
                .ok_or_else(|| SerializationError::conversion("bytes", "<binary>", "unsigned")),
        }
    }

    pub(crate) fn to_f64(&self) -> Result<f64, SerializationError> {
        match self.scalar() {
            None => Err(SerializationError::NullConversion("float")),
            Some(Scalar::Double(v)) => Ok(*v),
            Some(Scalar::Float(v)) => Ok(*v as f64),
            Some(Scalar::Int(v)) => Ok(*v as f64),
            Some(Scalar::UInt(v)) => Ok(*v as f64),
            Some(Scalar::Bool(v)) => Ok(*v as u8 as f64),
            Some(Scalar::Char(c)) => c
                .to_digit(10)
                .map(|d| d as f64)
                .ok_or_else(|| SerializationError::conversion("char", c, "float")),
            Some(Scalar::Str(s)) => {
                parse_float(s).ok_or_else(|| SerializationError::conversion("string", s, "float"))
            }
            Some(Scalar::Bytes(b)) => std::str::from_utf8(b)
                .ok()
                .and_then(parse_float)
                .ok_or_else(|| SerializationError::conversion("bytes", "<binary>", "float")),
        }
    }

    pub(crate) fn to_string_value(&self) -> Result<String, SerializationError> {
        match self.scalar() {
            None => Ok(String::new()),
            Some(Scalar::Str(s)) => Ok(s.clone()),
            Some(Scalar::Bytes(b)) => String::from_utf8(b.clone())
                .map_err(|_| SerializationError::conversion("bytes", "<binary>", "string")),
            Some(Scalar::Char(c)) => Ok(c.to_string()),
            Some(Scalar::Bool(v)) => Ok(if *v { "true" } else { "false" }.to_owned()),
            Some(Scalar::Int(v)) => Ok(v.to_string()),
            Some(Scalar::UInt(v)) => Ok(v.to_string()),
            Some(Scalar::Float(v)) => Ok(float_to_string(*v as f64)),
            Some(Scalar::Double(v)) => Ok(float_to_string(*v)),
        }
    }

    pub(crate) fn to_bytes_value(&self) -> Result<Vec<u8>, SerializationError> {
        match self.scalar() {
            Some(Scalar::Bytes(b)) => Ok(b.clone()),
            Some(Scalar::Str(s)) => Ok(s.clone().into_bytes()),
            _ => self.to_string_value().map(String::into_bytes),
        }
    }

    pub(crate) fn to_bool(&self) -> Result<bool, SerializationError> {
        match self.scalar() {
            None => Err(SerializationError::NullConversion("bool")),
            Some(Scalar::Bool(v)) => Ok(*v),
            Some(Scalar::Str(s)) => Ok(bool_from_str(s)),
            Some(Scalar::Bytes(b)) => Ok(bool_from_str(&String::from_utf8_lossy(b))),
            Some(Scalar::Char(c)) => Ok(matches!(c, '1' | 't' | 'T' | 'y' | 'Y')),
            Some(Scalar::Int(v)) => Ok(*v != 0),
            Some(Scalar::UInt(v)) => Ok(*v != 0),
            Some(Scalar::Float(v)) => Ok(*v != 0.0),
            Some(Scalar::Double(v)) => Ok(*v != 0.0),
        }
    }

    pub(crate) fn to_char(&self) -> Result<char, SerializationError> {
        match self.scalar() {
            None => Err(SerializationError::NullConversion("char")),
            Some(Scalar::Char(c)) => Ok(*c),
            Some(Scalar::Str(s)) => s
                .chars()
                .next()
                .ok_or_else(|| SerializationError::conversion("string", s, "char")),
            Some(Scalar::Int(v)) if (0..=9).contains(v) => {
                Ok(char::from_digit(*v as u32, 10).unwrap_or('0'))
            }
            Some(Scalar::UInt(v)) if *v <= 9 => Ok(char::from_digit(*v as u32, 10).unwrap_or('0')),
            Some(other) => Err(SerializationError::conversion(other.kind(), "", "char")),
        }
    }
}

fn float_to_i64(v: f64) -> Result<i64, SerializationError> {
    if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Ok(v as i64)
    } else {
        Err(SerializationError::conversion(
            "double",
            float_to_string(v),
            "integer",
        ))
    }
}

fn float_to_u64(v: f64) -> Result<u64, SerializationError> {
    if v.is_finite() && v >= 0.0 && v <= u64::MAX as f64 {
        Ok(v as u64)
    } else {
        Err(SerializationError::conversion(
            "double",
            float_to_string(v),
            "unsigned",
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lexical_int_from_string() {
        let mut si = SerializationInfo::new();
        si.set_value(" 42 ");
        assert_eq!(si.get_value::<i32>().unwrap(), 42);
        assert_eq!(si.get_value::<u64>().unwrap(), 42);

        si.set_value("+7");
        assert_eq!(si.get_value::<i8>().unwrap(), 7);

        si.set_value("x17");
        assert!(si.get_value::<i32>().is_err());
    }

    #[test]
    fn range_checked_narrowing() {
        let mut si = SerializationInfo::new();
        si.set_value(300u32);
        assert!(si.get_value::<u8>().is_err());
        assert_eq!(si.get_value::<u16>().unwrap(), 300);

        si.set_value(-1i32);
        assert!(si.get_value::<u32>().is_err());
        assert_eq!(si.get_value::<i64>().unwrap(), -1);
    }

    #[test]
    fn float_parsing_recognizes_specials() {
        for (s, expect_nan, expect) in [
            ("nan", true, 0.0),
            ("NaN", true, 0.0),
            ("inf", false, f64::INFINITY),
            ("Infinity", false, f64::INFINITY),
            ("-inf", false, f64::NEG_INFINITY),
            ("-INFINITY", false, f64::NEG_INFINITY),
            (" 1.5 ", false, 1.5),
        ] {
            let got = parse_float(s).unwrap();
            if expect_nan {
                assert!(got.is_nan(), "{s}");
            } else {
                assert_eq!(got, expect, "{s}");
            }
        }
        assert_eq!(parse_float("12e300").unwrap(), 12e300);
        assert!(parse_float("one").is_none());
    }

    #[test]
    fn numeric_to_string_is_shortest_roundtrip() {
        let mut si = SerializationInfo::new();
        si.set_value(1000.0f64);
        assert_eq!(si.get_value::<String>().unwrap(), "1000");
        si.set_value(0.25f64);
        assert_eq!(si.get_value::<String>().unwrap(), "0.25");
        si.set_value(f64::NAN);
        assert_eq!(si.get_value::<String>().unwrap(), "nan");
    }

    #[test]
    fn string_to_float_convertible() {
        let mut si = SerializationInfo::new();
        si.set_value("1000");
        assert_eq!(si.get_value::<f64>().unwrap(), 1000.0);
    }

    #[test]
    fn bool_law_first_character() {
        for s in ["1", "true", "T", "yes", "Yup"] {
            assert!(bool_from_str(s), "{s}");
        }
        for s in ["0", "false", "no", "", "2"] {
            assert!(!bool_from_str(s), "{s}");
        }
    }
}
