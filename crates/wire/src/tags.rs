//! The one-byte type tags of the binary encoding.
//!
//! Tags come in two parallel families: *plain* (no member name follows the
//! tag) and *named* (a dictionary-compressed name string follows). A plain
//! tag is its named counterpart plus [`PLAIN`].

pub const EMPTY: u8 = 0x00;
pub const BOOL: u8 = 0x01;
pub const CHAR: u8 = 0x02;
pub const STRING: u8 = 0x03;
pub const INT: u8 = 0x04;
pub const BCD: u8 = 0x05;
pub const BINARY2: u8 = 0x06;
pub const BINARY4: u8 = 0x07;

pub const INT8: u8 = 0x10;
pub const INT16: u8 = 0x11;
pub const INT32: u8 = 0x12;
pub const INT64: u8 = 0x13;
pub const UINT8: u8 = 0x18;
pub const UINT16: u8 = 0x19;
pub const UINT32: u8 = 0x1a;
pub const UINT64: u8 = 0x1b;

pub const BCD_FLOAT: u8 = 0x20;
pub const SHORT_FLOAT: u8 = 0x21;
pub const MEDIUM_FLOAT: u8 = 0x22;
pub const LONG_FLOAT: u8 = 0x23;

pub const PAIR: u8 = 0x30;
pub const ARRAY: u8 = 0x31;
pub const LIST: u8 = 0x32;
pub const DEQUE: u8 = 0x33;
pub const SET: u8 = 0x34;
pub const MULTISET: u8 = 0x35;
pub const MAP: u8 = 0x36;
pub const MULTIMAP: u8 = 0x37;
pub const OTHER: u8 = 0x3f;

/// Added to a named tag to form its plain counterpart.
pub const PLAIN: u8 = 0x40;

pub const CATEGORY_OBJECT: u8 = 0xa0;
pub const CATEGORY_ARRAY: u8 = 0xa1;

/// Closes every structural opener, scalar body and frame.
pub const END: u8 = 0xff;

/// First byte of a two-byte big-endian dictionary reference inside a name
/// string.
pub const DICT_REF: u8 = 0x01;

/// Splits a value tag into its named-family base and plain flag.
/// Returns None for bytes outside both families.
pub fn split(tag: u8) -> Option<(u8, bool)> {
    let (base, plain) = if (PLAIN..PLAIN + 0x40).contains(&tag) {
        (tag - PLAIN, true)
    } else if tag < PLAIN {
        (tag, false)
    } else {
        return None;
    };
    match base {
        EMPTY | BOOL | CHAR | STRING | INT | BCD | BINARY2 | BINARY4 | INT8 | INT16 | INT32
        | INT64 | UINT8 | UINT16 | UINT32 | UINT64 | BCD_FLOAT | SHORT_FLOAT | MEDIUM_FLOAT
        | LONG_FLOAT | PAIR | ARRAY | LIST | DEQUE | SET | MULTISET | MAP | MULTIMAP | OTHER => {
            Some((base, plain))
        }
        _ => None,
    }
}

/// The wire type code of a known container/scalar type name, or None when
/// the name must be carried literally behind [`OTHER`].
pub fn code_of_type_name(type_name: &str) -> Option<u8> {
    Some(match type_name {
        "bool" => BOOL,
        "char" => CHAR,
        "string" => STRING,
        "int" => INT,
        "double" => BCD_FLOAT,
        "pair" => PAIR,
        "array" => ARRAY,
        "list" => LIST,
        "deque" => DEQUE,
        "set" => SET,
        "multiset" => MULTISET,
        "map" => MAP,
        "multimap" => MULTIMAP,
        _ => return None,
    })
}

/// The canonical type name a decoded tag reports. Inverse of
/// [`code_of_type_name`] for the codes that one produces.
pub fn type_name_of_code(base: u8) -> &'static str {
    match base {
        BOOL => "bool",
        CHAR => "char",
        STRING => "string",
        INT => "int",
        BCD_FLOAT => "double",
        PAIR => "pair",
        ARRAY => "array",
        LIST => "list",
        DEQUE => "deque",
        SET => "set",
        MULTISET => "multiset",
        MAP => "map",
        MULTIMAP => "multimap",
        _ => "",
    }
}

/// Frame marker bytes of the RPC layer.
pub mod frame {
    /// Opens a request: method name, then one value per argument.
    pub const REQUEST: u8 = 0xc0;
    /// Opens a success reply carrying a single result value.
    pub const RESPONSE: u8 = 0xc1;
    /// Opens an error reply: rc[4 BE], then a NUL-terminated message.
    pub const EXCEPTION: u8 = 0xc2;
    /// Opens a request with a domain prefix before the method name.
    pub const DOMAIN: u8 = 0xc3;
}
