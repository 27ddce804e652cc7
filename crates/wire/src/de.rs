//! The streaming decoder.
//!
//! [`Parser::advance`] consumes whatever bytes are available and returns true
//! exactly once a complete top-level value has been assembled, leaving any
//! trailing bytes in the buffer. The parser is a byte-driven state machine
//! with an explicit stack of open containers, so a value may arrive in
//! arbitrarily small chunks.

use crate::{dict::NameDict, error::WireError, tags};
use bytes::Buf;
use sinfo::{Category, Scalar, SerializationInfo};

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    Tag,
    BcdType,
    OtherType,
    Name,
    Fixed,
    CharFirst,
    CharRest,
    StrBody,
    StrEnd,
    BinLen,
    BinBody,
    Bcd,
    BcdDigits,
    BcdSpecialEnd,
    EmptyEnd,
    ObjName,
    ObjType,
    ObjOtherType,
    ArrName,
    ArrType,
    ArrOtherType,
}

/// Reads a dictionary-compressed string: a lone NUL is empty, a leading
/// [`tags::DICT_REF`] introduces a two-byte index, anything else is a
/// NUL-terminated literal recorded into the dictionary.
#[derive(Debug, Default)]
struct StrReader {
    mode: StrMode,
    buf: Vec<u8>,
    ref_high: u8,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
enum StrMode {
    #[default]
    Start,
    Literal,
    RefHigh,
    RefLow,
}

impl StrReader {
    fn step(&mut self, b: u8, dict: &mut NameDict) -> Result<Option<String>, WireError> {
        match self.mode {
            StrMode::Start => {
                if b == 0 {
                    Ok(Some(String::new()))
                } else if b == tags::DICT_REF {
                    self.mode = StrMode::RefHigh;
                    Ok(None)
                } else {
                    self.mode = StrMode::Literal;
                    self.buf.push(b);
                    Ok(None)
                }
            }
            StrMode::RefHigh => {
                self.ref_high = b;
                self.mode = StrMode::RefLow;
                Ok(None)
            }
            StrMode::RefLow => {
                self.mode = StrMode::Start;
                let index = u16::from_be_bytes([self.ref_high, b]);
                match dict.get(index) {
                    Some(s) => Ok(Some(s.to_owned())),
                    None => Err(WireError::BadDictIndex(index)),
                }
            }
            StrMode::Literal => {
                if b != 0 {
                    self.buf.push(b);
                    return Ok(None);
                }
                self.mode = StrMode::Start;
                let s = String::from_utf8(std::mem::take(&mut self.buf))
                    .map_err(|_| WireError::BadUtf8("name string"))?;
                dict.insert(&s);
                Ok(Some(s))
            }
        }
    }
}

/// Parser decodes one value at a time from a connection's byte stream,
/// keeping the incoming half of the connection's name dictionary.
#[derive(Debug)]
pub struct Parser {
    dict: NameDict,
    state: State,
    stack: Vec<SerializationInfo>,
    done: Option<SerializationInfo>,

    reader: StrReader,
    base: u8,
    plain: bool,
    name: String,
    type_name: String,
    text: String,
    scratch: Vec<u8>,
    need: usize,
    bcd_closed: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            dict: NameDict::new(),
            state: State::Tag,
            stack: Vec::new(),
            done: None,
            reader: StrReader::default(),
            base: 0,
            plain: false,
            name: String::new(),
            type_name: String::new(),
            text: String::new(),
            scratch: Vec::new(),
            need: 0,
            bcd_closed: false,
        }
    }

    /// Drops all value and dictionary state, as when bound to a new stream.
    pub fn reset(&mut self) {
        *self = Parser::new();
    }

    /// Consumes available bytes; true once a complete value is assembled.
    /// Trailing bytes stay in the buffer. Errors leave the parser poisoned
    /// and the connection must be closed.
    pub fn advance<B: Buf>(&mut self, buf: &mut B) -> Result<bool, WireError> {
        while buf.has_remaining() {
            if self.step(buf.get_u8())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The value assembled by the last completed [`advance`](Self::advance).
    pub fn take(&mut self) -> SerializationInfo {
        self.done.take().unwrap_or_default()
    }

    fn step(&mut self, b: u8) -> Result<bool, WireError> {
        match self.state {
            State::Tag => self.on_tag(b),
            State::BcdType => {
                if let Some(s) = self.reader.step(b, &mut self.dict)? {
                    self.type_name = s;
                    if self.plain {
                        self.state = State::Bcd;
                    } else {
                        self.state = State::Name;
                    }
                }
                Ok(false)
            }
            State::OtherType => {
                if let Some(s) = self.reader.step(b, &mut self.dict)? {
                    self.type_name = s;
                    if self.plain {
                        self.state = State::StrBody;
                    } else {
                        self.state = State::Name;
                    }
                }
                Ok(false)
            }
            State::Name => {
                if let Some(s) = self.reader.step(b, &mut self.dict)? {
                    self.name = s;
                    self.enter_body()?;
                }
                Ok(false)
            }
            State::Fixed => {
                self.scratch.push(b);
                if self.scratch.len() == self.need {
                    return self.finish_fixed();
                }
                Ok(false)
            }
            State::CharFirst => {
                self.need = match b {
                    0x00..=0x7f => 1,
                    0xc0..=0xdf => 2,
                    0xe0..=0xef => 3,
                    0xf0..=0xf7 => 4,
                    _ => return Err(WireError::BadUtf8("char value")),
                };
                self.scratch.push(b);
                if self.scratch.len() == self.need {
                    return self.finish_char();
                }
                self.state = State::CharRest;
                Ok(false)
            }
            State::CharRest => {
                self.scratch.push(b);
                if self.scratch.len() == self.need {
                    return self.finish_char();
                }
                Ok(false)
            }
            State::StrBody => {
                if b != 0 {
                    self.scratch.push(b);
                    return Ok(false);
                }
                self.text = String::from_utf8(std::mem::take(&mut self.scratch))
                    .map_err(|_| WireError::BadUtf8("string value"))?;
                self.state = State::StrEnd;
                Ok(false)
            }
            State::StrEnd => {
                if b != tags::END {
                    return Err(WireError::MissingTerminator);
                }
                let type_name = match self.base {
                    tags::STRING => "string".to_owned(),
                    tags::INT => "int".to_owned(),
                    _ => std::mem::take(&mut self.type_name),
                };
                let text = std::mem::take(&mut self.text);
                let node = self.leaf(Some(Scalar::Str(text)), type_name);
                Ok(self.complete(node))
            }
            State::BinLen => {
                self.scratch.push(b);
                let len_bytes = if self.base == tags::BINARY2 { 2 } else { 4 };
                if self.scratch.len() < len_bytes {
                    return Ok(false);
                }
                self.need = self
                    .scratch
                    .iter()
                    .fold(0usize, |acc, b| (acc << 8) | *b as usize);
                self.scratch.clear();
                if self.need == 0 {
                    let node = self.leaf(Some(Scalar::Bytes(Vec::new())), String::new());
                    return Ok(self.complete(node));
                }
                self.state = State::BinBody;
                Ok(false)
            }
            State::BinBody => {
                self.scratch.push(b);
                if self.scratch.len() == self.need {
                    let bytes = std::mem::take(&mut self.scratch);
                    let node = self.leaf(Some(Scalar::Bytes(bytes)), String::new());
                    return Ok(self.complete(node));
                }
                Ok(false)
            }
            State::Bcd => match b {
                tags::END => self.finish_bcd(),
                0xf0 => {
                    self.text = "nan".to_owned();
                    self.state = State::BcdSpecialEnd;
                    Ok(false)
                }
                0xf1 => {
                    self.text = "inf".to_owned();
                    self.state = State::BcdSpecialEnd;
                    Ok(false)
                }
                0xf2 => {
                    self.text = "-inf".to_owned();
                    self.state = State::BcdSpecialEnd;
                    Ok(false)
                }
                _ => {
                    self.push_bcd_byte(b)?;
                    self.state = State::BcdDigits;
                    Ok(false)
                }
            },
            State::BcdDigits => {
                if b == tags::END {
                    return self.finish_bcd();
                }
                self.push_bcd_byte(b)
            }
            State::BcdSpecialEnd => {
                if b != tags::END {
                    return Err(WireError::MissingTerminator);
                }
                self.finish_bcd()
            }
            State::EmptyEnd => {
                if b != tags::END {
                    return Err(WireError::MissingTerminator);
                }
                let node = self.leaf(None, String::new());
                Ok(self.complete(node))
            }
            State::ObjName | State::ArrName => {
                if let Some(s) = self.reader.step(b, &mut self.dict)? {
                    self.name = s;
                    self.state = if self.state == State::ObjName {
                        State::ObjType
                    } else {
                        State::ArrType
                    };
                }
                Ok(false)
            }
            State::ObjType | State::ArrType => {
                let object = self.state == State::ObjType;
                let (base, _plain) = tags::split(b).ok_or(WireError::UnknownTag(b))?;
                if base == tags::OTHER {
                    self.state = if object {
                        State::ObjOtherType
                    } else {
                        State::ArrOtherType
                    };
                    return Ok(false);
                }
                let type_name = tags::type_name_of_code(base).to_owned();
                self.open_container(object, type_name);
                Ok(false)
            }
            State::ObjOtherType | State::ArrOtherType => {
                let object = self.state == State::ObjOtherType;
                if let Some(s) = self.reader.step(b, &mut self.dict)? {
                    self.open_container(object, s);
                }
                Ok(false)
            }
        }
    }

    fn on_tag(&mut self, b: u8) -> Result<bool, WireError> {
        match b {
            tags::END => {
                // Closes the innermost open container.
                let node = self.stack.pop().ok_or(WireError::UnexpectedEnd)?;
                Ok(self.complete(node))
            }
            tags::CATEGORY_OBJECT => {
                self.state = State::ObjName;
                Ok(false)
            }
            tags::CATEGORY_ARRAY => {
                self.state = State::ArrName;
                Ok(false)
            }
            _ => {
                let (base, plain) = tags::split(b).ok_or(WireError::UnknownTag(b))?;
                if (tags::PAIR..=tags::MULTIMAP).contains(&base) {
                    // Container codes only appear behind a category header.
                    return Err(WireError::UnknownTag(b));
                }
                self.base = base;
                self.plain = plain;
                self.name.clear();
                self.type_name.clear();
                self.text.clear();
                self.scratch.clear();
                self.bcd_closed = false;
                match base {
                    tags::BCD => self.state = State::BcdType,
                    tags::OTHER => self.state = State::OtherType,
                    _ if plain => self.enter_body()?,
                    _ => self.state = State::Name,
                }
                Ok(false)
            }
        }
    }

    /// Positions the machine at the value body of the current scalar tag,
    /// after any name and type strings have been read.
    fn enter_body(&mut self) -> Result<(), WireError> {
        self.scratch.clear();
        self.state = match self.base {
            tags::EMPTY => State::EmptyEnd,
            tags::BOOL => {
                self.need = 1;
                State::Fixed
            }
            tags::CHAR => State::CharFirst,
            tags::STRING | tags::INT => State::StrBody,
            tags::BCD | tags::BCD_FLOAT => State::Bcd,
            tags::OTHER => State::StrBody,
            tags::BINARY2 | tags::BINARY4 => State::BinLen,
            tags::INT8 | tags::UINT8 => {
                self.need = 1;
                State::Fixed
            }
            tags::INT16 | tags::UINT16 => {
                self.need = 2;
                State::Fixed
            }
            tags::INT32 | tags::UINT32 => {
                self.need = 4;
                State::Fixed
            }
            tags::INT64 | tags::UINT64 => {
                self.need = 8;
                State::Fixed
            }
            tags::SHORT_FLOAT => {
                self.need = 3;
                State::Fixed
            }
            tags::MEDIUM_FLOAT => {
                self.need = 5;
                State::Fixed
            }
            tags::LONG_FLOAT => {
                self.need = 10;
                State::Fixed
            }
            other => return Err(WireError::UnknownTag(other)),
        };
        Ok(())
    }

    fn finish_fixed(&mut self) -> Result<bool, WireError> {
        let bytes = std::mem::take(&mut self.scratch);
        let (value, type_name) = match self.base {
            tags::BOOL => (Scalar::Bool(bytes[0] != 0), "bool"),
            tags::INT8 => (Scalar::Int(bytes[0] as i8 as i64), "int"),
            tags::INT16 => (
                Scalar::Int(i16::from_be_bytes([bytes[0], bytes[1]]) as i64),
                "int",
            ),
            tags::INT32 => (
                Scalar::Int(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64),
                "int",
            ),
            tags::INT64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes);
                (Scalar::Int(i64::from_be_bytes(raw)), "int")
            }
            tags::UINT8 => (Scalar::UInt(bytes[0] as u64), "int"),
            tags::UINT16 => (
                Scalar::UInt(u16::from_be_bytes([bytes[0], bytes[1]]) as u64),
                "int",
            ),
            tags::UINT32 => (
                Scalar::UInt(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64),
                "int",
            ),
            tags::UINT64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes);
                (Scalar::UInt(u64::from_be_bytes(raw)), "int")
            }
            tags::SHORT_FLOAT | tags::MEDIUM_FLOAT | tags::LONG_FLOAT => {
                (Scalar::Double(decode_float(self.base, &bytes)), "double")
            }
            other => return Err(WireError::UnknownTag(other)),
        };
        let node = self.leaf(Some(value), type_name.to_owned());
        Ok(self.complete(node))
    }

    fn finish_char(&mut self) -> Result<bool, WireError> {
        let bytes = std::mem::take(&mut self.scratch);
        let c = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.chars().next())
            .ok_or(WireError::BadUtf8("char value"))?;
        let node = self.leaf(Some(Scalar::Char(c)), "char".to_owned());
        Ok(self.complete(node))
    }

    fn push_bcd_byte(&mut self, b: u8) -> Result<bool, WireError> {
        if self.bcd_closed {
            // Digit bytes after the 0xF sentinel nibble.
            return Err(WireError::BadBcdDigit(b));
        }
        let high = b >> 4;
        let low = b & 0x0f;
        if high == 0x0f {
            return Err(WireError::BadBcdDigit(high));
        }
        self.text.push(bcd_char(high));
        if low == 0x0f {
            self.bcd_closed = true;
        } else {
            self.text.push(bcd_char(low));
        }
        Ok(false)
    }

    fn finish_bcd(&mut self) -> Result<bool, WireError> {
        self.bcd_closed = false;
        let type_name = if self.base == tags::BCD_FLOAT {
            "double".to_owned()
        } else {
            std::mem::take(&mut self.type_name)
        };
        let text = std::mem::take(&mut self.text);
        let node = self.leaf(Some(Scalar::Str(text)), type_name);
        Ok(self.complete(node))
    }

    fn leaf(&mut self, value: Option<Scalar>, type_name: String) -> SerializationInfo {
        let mut node = SerializationInfo::new();
        node.set_name(std::mem::take(&mut self.name));
        if !type_name.is_empty() {
            node.set_type_name(type_name);
        }
        match value {
            Some(v) => node.set_value(v),
            None => node.set_null(),
        }
        node
    }

    fn open_container(&mut self, object: bool, type_name: String) {
        let mut node = SerializationInfo::new();
        node.set_name(std::mem::take(&mut self.name));
        node.set_type_name(type_name);
        node.set_category(if object {
            Category::Object
        } else {
            Category::Array
        });
        self.stack.push(node);
        self.state = State::Tag;
    }

    fn complete(&mut self, node: SerializationInfo) -> bool {
        self.state = State::Tag;
        match self.stack.last_mut() {
            Some(parent) => {
                parent.push_member(node);
                false
            }
            None => {
                tracing::trace!(stack = self.stack.len(), "top-level value complete");
                self.done = Some(node);
                true
            }
        }
    }
}

fn bcd_char(nibble: u8) -> char {
    match nibble {
        0x0..=0x9 => (b'0' + nibble) as char,
        0xa => '+',
        0xb => '-',
        0xc => '.',
        0xd => ':',
        _ => ' ',
    }
}

fn decode_float(base: u8, bytes: &[u8]) -> f64 {
    let (neg, exp, m) = match base {
        tags::SHORT_FLOAT => {
            let e = bytes[0];
            let m = (u16::from_be_bytes([bytes[1], bytes[2]]) as u64) << 48;
            // Canonical bit patterns for the specials.
            match (e, m) {
                (0x7f, 0) => return f64::INFINITY,
                (0xff, 0) => return f64::NEG_INFINITY,
                (0x7f, _) => return f64::NAN,
                (0x00, 0) => return 0.0,
                _ => {}
            }
            (e & 0x80 != 0, (e & 0x7f) as i32 - 63, m)
        }
        tags::MEDIUM_FLOAT => {
            let e = bytes[0];
            let m = (u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as u64) << 32;
            (e & 0x80 != 0, (e & 0x7f) as i32 - 63, m)
        }
        _ => {
            let e = u16::from_be_bytes([bytes[0], bytes[1]]);
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[2..10]);
            let m = u64::from_be_bytes(raw);
            (e & 0x8000 != 0, (e & 0x7fff) as i32 - 16383, m)
        }
    };
    let v = (1.0 + (m as f64) / 18446744073709551616.0) * ((exp - 1) as f64).exp2();
    if neg {
        -v
    } else {
        v
    }
}
