//! The binary wire codec: a self-delimiting, type-tagged encoding of
//! serialization trees with per-connection dictionary compression of
//! repeated names.
//!
//! Every value starts with a one-byte tag from two parallel families (plain
//! and named), multi-byte integers are big-endian, strings are UTF-8, and
//! every structural opener is balanced by exactly one 0xFF terminator. The
//! [`Parser`] decodes incrementally: it accepts bytes as they arrive off the
//! socket and reports completion without over-reading.

mod de;
mod dict;
mod error;
mod ser;
pub mod tags;

pub use de::Parser;
pub use dict::NameDict;
pub use error::WireError;
pub use ser::{Encoder, WireFormatter};
pub use tags::frame;
