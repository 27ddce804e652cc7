//! The Formatter contract: codec writers receive a stream of typed value and
//! structural events, produced from a tree by [`format_each`].

use crate::{Category, Scalar, SerializationInfo};
use std::io;

/// A codec-specific writer. Implementations turn the event stream into wire
/// bytes (binary tags, XML elements, JSON tokens, CSV cells).
pub trait Formatter {
    fn add_value_str(&mut self, name: &str, type_name: &str, value: &str) -> io::Result<()>;
    fn add_value_bytes(&mut self, name: &str, type_name: &str, value: &[u8]) -> io::Result<()>;
    fn add_value_char(&mut self, name: &str, type_name: &str, value: char) -> io::Result<()>;
    fn add_value_bool(&mut self, name: &str, type_name: &str, value: bool) -> io::Result<()>;
    fn add_value_int(&mut self, name: &str, type_name: &str, value: i64) -> io::Result<()>;
    fn add_value_unsigned(&mut self, name: &str, type_name: &str, value: u64) -> io::Result<()>;
    fn add_value_float(&mut self, name: &str, type_name: &str, value: f64) -> io::Result<()>;
    fn add_null(&mut self, name: &str, type_name: &str) -> io::Result<()>;

    fn begin_array(&mut self, name: &str, type_name: &str) -> io::Result<()>;
    fn finish_array(&mut self) -> io::Result<()>;
    fn begin_object(&mut self, name: &str, type_name: &str) -> io::Result<()>;
    fn begin_member(&mut self, name: &str) -> io::Result<()>;
    fn finish_member(&mut self) -> io::Result<()>;
    fn finish_object(&mut self) -> io::Result<()>;
}

/// Streams a tree through a Formatter, leaves first within each aggregate.
pub fn format_each<F: Formatter + ?Sized>(
    si: &SerializationInfo,
    fmt: &mut F,
) -> io::Result<()> {
    match si.category() {
        Category::Object => {
            fmt.begin_object(si.name(), si.type_name())?;
            for member in si.members() {
                fmt.begin_member(member.name())?;
                format_each(member, fmt)?;
                fmt.finish_member()?;
            }
            fmt.finish_object()
        }
        Category::Array => {
            fmt.begin_array(si.name(), si.type_name())?;
            for member in si.members() {
                format_each(member, fmt)?;
            }
            fmt.finish_array()
        }
        Category::Void | Category::Value => match si.scalar() {
            None => fmt.add_null(si.name(), si.type_name()),
            Some(Scalar::Str(v)) => fmt.add_value_str(si.name(), si.type_name(), v),
            Some(Scalar::Bytes(v)) => fmt.add_value_bytes(si.name(), si.type_name(), v),
            Some(Scalar::Char(v)) => fmt.add_value_char(si.name(), si.type_name(), *v),
            Some(Scalar::Bool(v)) => fmt.add_value_bool(si.name(), si.type_name(), *v),
            Some(Scalar::Int(v)) => fmt.add_value_int(si.name(), si.type_name(), *v),
            Some(Scalar::UInt(v)) => fmt.add_value_unsigned(si.name(), si.type_name(), *v),
            Some(Scalar::Float(v)) => fmt.add_value_float(si.name(), si.type_name(), *v as f64),
            Some(Scalar::Double(v)) => fmt.add_value_float(si.name(), si.type_name(), *v),
        },
    }
}
