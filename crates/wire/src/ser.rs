//! The wire encoder: a [`sinfo::Formatter`] writing tagged bytes.
//!
//! The encoder owns the outgoing half of a connection's name dictionary and
//! is reused across every value written to that connection.

use crate::{dict::NameDict, tags};
use bytes::{BufMut, BytesMut};
use sinfo::{bool_from_str, format_each, parse_int, parse_uint, Formatter, SerializationInfo};
use std::io;

/// Maps a character onto its packed decimal nibble.
fn bcd_nibble(c: char) -> Option<u8> {
    Some(match c {
        '0'..='9' => c as u8 - b'0',
        '+' => 0xa,
        '-' => 0xb,
        '.' => 0xc,
        ':' => 0xd,
        ' ' => 0xe,
        _ => return None,
    })
}

/// True when every character has a decimal nibble, so the string survives
/// packed two-per-byte without loss. Also true for the non-finite spellings,
/// which have dedicated one-byte encodings.
fn is_bcd_text(s: &str) -> bool {
    matches!(s, "nan" | "inf" | "-inf") || s.chars().all(|c| bcd_nibble(c).is_some())
}

fn lower_bits_set(v: u64, bits: u32) -> bool {
    v & ((1u64 << bits) - 1) != 0
}

/// Splits a finite non-zero float into (negative, exponent, mantissa), with
/// |value| = (1 + mantissa/2^64) * 2^(exponent-1).
fn split_float(v: f64) -> (bool, i32, u64) {
    let neg = v.is_sign_negative();
    let bits = v.abs().to_bits();
    let exp_field = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & 0x000f_ffff_ffff_ffff;
    if exp_field == 0 {
        // Subnormal: normalize so the leading 1 becomes implicit.
        let top = 63 - frac.leading_zeros() as i32;
        let m = if top == 0 { 0 } else { frac << (64 - top) };
        (neg, top - 1073, m)
    } else {
        (neg, exp_field - 1022, frac << 12)
    }
}

/// Encoder holds the per-connection dictionary state for the outgoing
/// direction and renders trees into a byte buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    dict: NameDict,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets dictionary state; call when binding to a new stream.
    pub fn reset(&mut self) {
        self.dict.clear();
    }

    /// Appends the encoding of `si` to `out`.
    pub fn format(&mut self, si: &SerializationInfo, out: &mut BytesMut) -> io::Result<()> {
        let mut fmt = WireFormatter {
            dict: &mut self.dict,
            out,
        };
        format_each(si, &mut fmt)
    }
}

/// One-shot Formatter over a borrowed dictionary and output buffer.
pub struct WireFormatter<'a> {
    dict: &'a mut NameDict,
    out: &'a mut BytesMut,
}

impl<'a> WireFormatter<'a> {
    pub fn new(dict: &'a mut NameDict, out: &'a mut BytesMut) -> Self {
        Self { dict, out }
    }

    /// Emits a name or type string: empty is a lone NUL, a known name is a
    /// two-byte reference, anything else a NUL-terminated literal which both
    /// sides append to their dictionaries.
    fn dict_string(&mut self, s: &str) {
        if s.is_empty() {
            self.out.put_u8(0);
            return;
        }
        match self.dict.find_or_insert(s) {
            Some(index) => {
                tracing::trace!(name = s, index, "dictionary reference");
                self.out.put_u8(tags::DICT_REF);
                self.out.put_u16(index);
            }
            None => {
                self.out.put_slice(s.as_bytes());
                self.out.put_u8(0);
            }
        }
    }

    /// Emits the tag in its plain or named family and the name when named.
    fn tag_with_name(&mut self, base: u8, name: &str) {
        if name.is_empty() {
            self.out.put_u8(base + tags::PLAIN);
        } else {
            self.out.put_u8(base);
            self.dict_string(name);
        }
    }

    /// Emits the wire type code of a type name; unknown names are carried
    /// literally behind Other.
    fn type_code(&mut self, type_name: &str, plain: bool) {
        let family = if plain { tags::PLAIN } else { 0 };
        match tags::code_of_type_name(type_name) {
            Some(base) => self.out.put_u8(base + family),
            None => {
                self.out.put_u8(tags::OTHER + family);
                self.dict_string(type_name);
            }
        }
    }

    fn print_uint(&mut self, v: u64, name: &str) {
        if v <= u8::MAX as u64 {
            self.tag_with_name(tags::UINT8, name);
            self.out.put_u8(v as u8);
        } else if v <= u16::MAX as u64 {
            self.tag_with_name(tags::UINT16, name);
            self.out.put_u16(v as u16);
        } else if v <= u32::MAX as u64 {
            self.tag_with_name(tags::UINT32, name);
            self.out.put_u32(v as u32);
        } else {
            self.tag_with_name(tags::UINT64, name);
            self.out.put_u64(v);
        }
    }

    fn print_int(&mut self, v: i64, name: &str) {
        if v >= 0 {
            self.print_uint(v as u64, name);
        } else if v >= i8::MIN as i64 {
            self.tag_with_name(tags::INT8, name);
            self.out.put_i8(v as i8);
        } else if v >= i16::MIN as i64 {
            self.tag_with_name(tags::INT16, name);
            self.out.put_i16(v as i16);
        } else if v >= i32::MIN as i64 {
            self.tag_with_name(tags::INT32, name);
            self.out.put_i32(v as i32);
        } else {
            self.tag_with_name(tags::INT64, name);
            self.out.put_i64(v);
        }
    }

    fn put_binary(&mut self, name: &str, value: &[u8]) {
        if value.len() <= u16::MAX as usize {
            self.tag_with_name(tags::BINARY2, name);
            self.out.put_u16(value.len() as u16);
        } else {
            self.tag_with_name(tags::BINARY4, name);
            self.out.put_u32(value.len() as u32);
        }
        self.out.put_slice(value);
    }

    fn bcd_digits(&mut self, value: &str) -> io::Result<()> {
        match value {
            "nan" => self.out.put_u8(0xf0),
            "inf" => self.out.put_u8(0xf1),
            "-inf" => self.out.put_u8(0xf2),
            _ => {
                let mut pending: Option<u8> = None;
                for c in value.chars() {
                    let nibble = bcd_nibble(c).ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "not a bcd character")
                    })?;
                    match pending.take() {
                        None => pending = Some(nibble << 4),
                        Some(high) => self.out.put_u8(high | nibble),
                    }
                }
                // An odd run ends with the 0xF sentinel nibble.
                if let Some(high) = pending {
                    self.out.put_u8(high | 0x0f);
                }
            }
        }
        self.out.put_u8(tags::END);
        Ok(())
    }

    fn short_float_special(&mut self, name: &str, e: u8, m: u16) {
        self.tag_with_name(tags::SHORT_FLOAT, name);
        self.out.put_u8(e);
        self.out.put_u16(m);
    }
}

impl Formatter for WireFormatter<'_> {
    fn add_value_str(&mut self, name: &str, type_name: &str, value: &str) -> io::Result<()> {
        if type_name == "int" || type_name == "long" {
            // A numeric string with an integer type travels as a real integer.
            if value.starts_with('-') {
                let v = parse_int(value).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "not an integer string")
                })?;
                self.print_int(v, name);
            } else {
                let v = parse_uint(value).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "not an integer string")
                })?;
                self.print_uint(v, name);
            }
        } else if is_bcd_text(value) {
            // A decimal-looking string keeps its exact spelling, packed.
            let is_double = type_name == "double";
            let base = if is_double { tags::BCD_FLOAT } else { tags::BCD };
            let plain = name.is_empty();
            self.out
                .put_u8(if plain { base + tags::PLAIN } else { base });
            if !is_double {
                self.dict_string(type_name);
            }
            if !plain {
                self.dict_string(name);
            }
            self.bcd_digits(value)?;
        } else if type_name == "bool" {
            self.tag_with_name(tags::BOOL, name);
            self.out.put_u8(bool_from_str(value) as u8);
        } else if value.as_bytes().contains(&0) {
            // A NUL in the body would collide with the terminator.
            self.put_binary(name, value.as_bytes());
        } else {
            let plain = name.is_empty();
            self.type_code(type_name, plain);
            if !plain {
                self.dict_string(name);
            }
            self.out.put_slice(value.as_bytes());
            self.out.put_slice(&[0, tags::END]);
        }
        Ok(())
    }

    fn add_value_bytes(&mut self, name: &str, _type_name: &str, value: &[u8]) -> io::Result<()> {
        self.put_binary(name, value);
        Ok(())
    }

    fn add_value_char(&mut self, name: &str, _type_name: &str, value: char) -> io::Result<()> {
        self.tag_with_name(tags::CHAR, name);
        let mut buf = [0u8; 4];
        self.out.put_slice(value.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }

    fn add_value_bool(&mut self, name: &str, _type_name: &str, value: bool) -> io::Result<()> {
        self.tag_with_name(tags::BOOL, name);
        self.out.put_u8(value as u8);
        Ok(())
    }

    fn add_value_int(&mut self, name: &str, _type_name: &str, value: i64) -> io::Result<()> {
        self.print_int(value, name);
        Ok(())
    }

    fn add_value_unsigned(&mut self, name: &str, _type_name: &str, value: u64) -> io::Result<()> {
        self.print_uint(value, name);
        Ok(())
    }

    fn add_value_float(&mut self, name: &str, _type_name: &str, value: f64) -> io::Result<()> {
        if value.is_nan() {
            self.short_float_special(name, 0x7f, 0x0100);
        } else if value == f64::INFINITY {
            self.short_float_special(name, 0x7f, 0);
        } else if value == f64::NEG_INFINITY {
            self.short_float_special(name, 0xff, 0);
        } else if value == 0.0 {
            self.short_float_special(name, 0, 0);
        } else {
            let (neg, exp, m) = split_float(value);
            if lower_bits_set(m, 32) || exp > 63 || exp < -63 {
                let mut e = (exp + 16383) as u16;
                if neg {
                    e |= 0x8000;
                }
                self.tag_with_name(tags::LONG_FLOAT, name);
                self.out.put_u16(e);
                self.out.put_u64(m);
            } else if lower_bits_set(m, 48) {
                let mut e = (exp + 63) as u8;
                if neg {
                    e |= 0x80;
                }
                self.tag_with_name(tags::MEDIUM_FLOAT, name);
                self.out.put_u8(e);
                self.out.put_u32((m >> 32) as u32);
            } else {
                let mut e = (exp + 63) as u8;
                if neg {
                    e |= 0x80;
                }
                self.tag_with_name(tags::SHORT_FLOAT, name);
                self.out.put_u8(e);
                self.out.put_u16((m >> 48) as u16);
            }
        }
        Ok(())
    }

    fn add_null(&mut self, name: &str, _type_name: &str) -> io::Result<()> {
        self.tag_with_name(tags::EMPTY, name);
        self.out.put_u8(tags::END);
        Ok(())
    }

    fn begin_array(&mut self, name: &str, type_name: &str) -> io::Result<()> {
        self.out.put_u8(tags::CATEGORY_ARRAY);
        self.dict_string(name);
        self.type_code(type_name, true);
        Ok(())
    }

    fn finish_array(&mut self) -> io::Result<()> {
        self.out.put_u8(tags::END);
        Ok(())
    }

    fn begin_object(&mut self, name: &str, type_name: &str) -> io::Result<()> {
        self.out.put_u8(tags::CATEGORY_OBJECT);
        self.dict_string(name);
        self.type_code(type_name, false);
        Ok(())
    }

    fn begin_member(&mut self, _name: &str) -> io::Result<()> {
        Ok(())
    }

    fn finish_member(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn finish_object(&mut self) -> io::Result<()> {
        self.out.put_u8(tags::END);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(si: &SerializationInfo) -> Vec<u8> {
        let mut out = BytesMut::new();
        Encoder::new().format(si, &mut out).unwrap();
        out.to_vec()
    }

    #[test]
    fn integers_take_the_smallest_width() {
        let mut si = SerializationInfo::new();
        si.set_value(2i32);
        assert_eq!(encode(&si), [tags::UINT8 + tags::PLAIN, 2]);

        si.set_value(0x1234u32);
        assert_eq!(encode(&si), [tags::UINT16 + tags::PLAIN, 0x12, 0x34]);

        si.set_value(-2i32);
        assert_eq!(encode(&si), [tags::INT8 + tags::PLAIN, 0xfe]);

        si.set_value(-0x8000_0000i64 - 1);
        assert_eq!(
            encode(&si),
            [tags::INT64 + tags::PLAIN, 0xff, 0xff, 0xff, 0xff, 0x7f, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn named_value_carries_its_name() {
        let mut si = SerializationInfo::new();
        si.set_name("n");
        si.set_value(3u8);
        assert_eq!(encode(&si), [tags::UINT8, b'n', 0, 3]);
    }

    #[test]
    fn float_specials_are_canonical_short_floats() {
        let mut si = SerializationInfo::new();
        si.set_value(f64::NAN);
        assert_eq!(encode(&si), [tags::SHORT_FLOAT + tags::PLAIN, 0x7f, 0x01, 0x00]);
        si.set_value(f64::INFINITY);
        assert_eq!(encode(&si), [tags::SHORT_FLOAT + tags::PLAIN, 0x7f, 0x00, 0x00]);
        si.set_value(f64::NEG_INFINITY);
        assert_eq!(encode(&si), [tags::SHORT_FLOAT + tags::PLAIN, 0xff, 0x00, 0x00]);
        si.set_value(0.0f64);
        assert_eq!(encode(&si), [tags::SHORT_FLOAT + tags::PLAIN, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn float_envelope_tiebreaks() {
        // 1.0: mantissa zero, exponent 1 -> short.
        let mut si = SerializationInfo::new();
        si.set_value(1.0f64);
        assert_eq!(encode(&si), [tags::SHORT_FLOAT + tags::PLAIN, 64, 0, 0]);

        // A mantissa needing more than 16 but at most 32 bits -> medium.
        si.set_value(1.0f64 + 2.0f64.powi(-20));
        assert_eq!(encode(&si)[0], tags::MEDIUM_FLOAT + tags::PLAIN);

        // Low-32 mantissa bits set -> long.
        si.set_value(1.0f64 + 2.0f64.powi(-50));
        assert_eq!(encode(&si)[0], tags::LONG_FLOAT + tags::PLAIN);

        // Exponent beyond +-63 -> long even with a short mantissa.
        si.set_value(2.0f64.powi(100));
        assert_eq!(encode(&si)[0], tags::LONG_FLOAT + tags::PLAIN);
    }

    #[test]
    fn decimal_strings_pack_as_bcd() {
        let mut si = SerializationInfo::new();
        si.set_value("47.11");
        // Plain Bcd, empty type string, digit pairs 4|7 .|1, trailing 1|F.
        assert_eq!(
            encode(&si),
            [tags::BCD + tags::PLAIN, 0x00, 0x47, 0xc1, 0x1f, 0xff]
        );
    }

    #[test]
    fn repeated_names_become_references() {
        let mut si = SerializationInfo::new();
        si.set_type_name("row");
        si.add_member("value").set_value(1u8);
        si.add_member("value").set_value(2u8);

        let bytes = encode(&si);
        let literal: &[u8] = b"value\x00";
        let reference: &[u8] = &[tags::DICT_REF, 0x00, 0x01];
        // "row" takes index 0, "value" index 1; the second use is a reference.
        assert_eq!(bytes.windows(6).filter(|w| *w == literal).count(), 1);
        assert!(bytes.windows(3).any(|w| w == reference));
    }
}
