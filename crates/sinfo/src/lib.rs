mod compose;
mod convert;
mod error;
pub mod fmt;
mod path;

pub use compose::{Compose, Decompose};
pub use convert::{bool_from_str, float_to_string, parse_float, parse_int, parse_uint};
pub use error::SerializationError;
pub use fmt::{format_each, Formatter};

/// Category is the structural kind of a [`SerializationInfo`] node.
///
/// Void is an uninitialized node, Value a leaf scalar, Object a named-member
/// aggregate and Array a positional aggregate.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Category {
    #[default]
    Void,
    Value,
    Object,
    Array,
}

/// Scalar is the stored leaf variant of a node.
///
/// The stored variant is independent from the numeric interpretation:
/// [`SerializationInfo::get_value`] on a `Str` performs a lexical conversion.
#[derive(Clone, Debug)]
pub enum Scalar {
    Str(String),
    Bytes(Vec<u8>),
    Char(char),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
}

impl Scalar {
    /// A short human label for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::Str(_) => "string",
            Scalar::Bytes(_) => "bytes",
            Scalar::Char(_) => "char",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::UInt(_) => "unsigned",
            Scalar::Float(_) => "float",
            Scalar::Double(_) => "double",
        }
    }
}

/// Equality is value-semantic across the numeric and textual families:
/// wire codecs canonicalize storage width (a non-negative Int travels in the
/// unsigned family, text with embedded NULs travels as bytes), so `Int(5)`
/// equals `UInt(5)` and `Str` equals `Bytes` holding the same octets.
impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        use Scalar::*;
        match (self, other) {
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Str(a), Bytes(b)) | (Bytes(b), Str(a)) => a.as_bytes() == b.as_slice(),
            (Char(a), Char(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (UInt(a), UInt(b)) => a == b,
            (Int(a), UInt(b)) | (UInt(b), Int(a)) => u64::try_from(*a) == Ok(*b),
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Float(a), Double(b)) | (Double(b), Float(a)) => *a as f64 == *b,
            _ => false,
        }
    }
}

/// SerializationInfo is a typed, self-describing tree of values: the canonical
/// intermediate representation between wire codecs (binary, JSON, XML-RPC, CSV)
/// and application types.
///
/// A node carries a structural [`Category`], an optional member `name`, a
/// free-form `type_name` consumed by codecs that distinguish wire types, an
/// optional [`Scalar`] value, and an ordered sequence of children. Member names
/// of an Object are significant; duplicates are permitted and order is
/// preserved. Names of Array elements are irrelevant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SerializationInfo {
    category: Category,
    name: String,
    type_name: String,
    value: Option<Scalar>,
    children: Vec<SerializationInfo>,
}

impl SerializationInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn set_category(&mut self, category: Category) {
        self.category = category;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Sets the type name, promoting a Void node to Object.
    /// Other categories are preserved.
    pub fn set_type_name(&mut self, type_name: impl Into<String>) {
        self.type_name = type_name.into();
        if self.category == Category::Void {
            self.category = Category::Object;
        }
    }

    /// Stores a scalar value and makes this node a Value.
    pub fn set_value(&mut self, value: impl Into<Scalar>) {
        self.value = Some(value.into());
        self.category = Category::Value;
    }

    /// Makes this node an explicit null: a Value with no stored variant.
    pub fn set_null(&mut self) {
        self.value = None;
        self.category = Category::Value;
        self.children.clear();
    }

    /// True when no variant is stored and the node is not an aggregate.
    pub fn is_null(&self) -> bool {
        self.value.is_none() && matches!(self.category, Category::Void | Category::Value)
    }

    pub fn scalar(&self) -> Option<&Scalar> {
        self.value.as_ref()
    }

    /// Reads the stored value converted to `T` per the lexical conversion
    /// laws. Fails with a conversion error when the stored variant does not
    /// represent a valid `T`.
    pub fn get_value<T: Compose>(&self) -> Result<T, SerializationError> {
        T::compose(self)
    }

    /// Shorthand for `get_member(name)?.get_value()`.
    pub fn get_member_value<T: Compose>(&self, name: &str) -> Result<T, SerializationError> {
        self.get_member(name)?.get_value()
    }

    /// Appends a new child with the given name and returns it.
    /// A Void node becomes an Object (or Array when the name is empty).
    pub fn add_member(&mut self, name: impl Into<String>) -> &mut SerializationInfo {
        let name = name.into();
        if self.category == Category::Void {
            self.category = if name.is_empty() {
                Category::Array
            } else {
                Category::Object
            };
        }
        let index = self.children.len();
        self.children.push(SerializationInfo {
            name,
            ..SerializationInfo::default()
        });
        &mut self.children[index]
    }

    /// Appends an already-built node as the last child. Codecs use this to
    /// attach a parsed subtree without re-walking it.
    pub fn push_member(&mut self, child: SerializationInfo) {
        if self.category == Category::Void {
            self.category = if child.name.is_empty() {
                Category::Array
            } else {
                Category::Object
            };
        }
        self.children.push(child);
    }

    /// Returns the member with the given name, appending it first when absent.
    pub fn get_add_member(&mut self, name: &str) -> &mut SerializationInfo {
        match self.children.iter().position(|c| c.name == name) {
            Some(index) => &mut self.children[index],
            None => self.add_member(name),
        }
    }

    /// Returns the first member with the given name.
    pub fn find_member(&self, name: &str) -> Option<&SerializationInfo> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn find_member_mut(&mut self, name: &str) -> Option<&mut SerializationInfo> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Like [`find_member`](Self::find_member), but failing with
    /// MemberNotFound when the name is absent.
    pub fn get_member(&self, name: &str) -> Result<&SerializationInfo, SerializationError> {
        self.find_member(name)
            .ok_or_else(|| SerializationError::MemberNotFound(name.to_owned()))
    }

    pub fn get_member_mut(
        &mut self,
        name: &str,
    ) -> Result<&mut SerializationInfo, SerializationError> {
        self.find_member_mut(name)
            .ok_or_else(|| SerializationError::MemberNotFound(name.to_owned()))
    }

    /// Returns the member at the given position.
    pub fn get_member_idx(&self, index: usize) -> Result<&SerializationInfo, SerializationError> {
        let len = self.children.len();
        self.children
            .get(index)
            .ok_or(SerializationError::MemberIndexOutOfRange { index, len })
    }

    pub fn member_count(&self) -> usize {
        self.children.len()
    }

    pub fn members(&self) -> std::slice::Iter<'_, SerializationInfo> {
        self.children.iter()
    }

    pub fn members_mut(&mut self) -> std::slice::IterMut<'_, SerializationInfo> {
        self.children.iter_mut()
    }

    /// Resets this node to a fresh Void, dropping value and children.
    pub fn clear(&mut self) {
        *self = SerializationInfo::default();
    }

    /// Exchanges the complete state of two nodes in O(1).
    pub fn swap(&mut self, other: &mut SerializationInfo) {
        std::mem::swap(self, other);
    }

    /// Serializes `value` into this node via its [`Decompose`] impl.
    pub fn compose_from<T: Decompose + ?Sized>(&mut self, value: &T) {
        value.decompose(self);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn void_until_touched() {
        let si = SerializationInfo::new();
        assert_eq!(si.category(), Category::Void);
        assert!(si.is_null());
    }

    #[test]
    fn set_value_makes_value_category() {
        let mut si = SerializationInfo::new();
        si.set_value(17i32);
        assert_eq!(si.category(), Category::Value);
        assert!(!si.is_null());
        assert_eq!(si.get_value::<i32>().unwrap(), 17);
    }

    #[test]
    fn set_null_is_null_but_value_category() {
        let mut si = SerializationInfo::new();
        si.set_value("x");
        si.set_null();
        assert_eq!(si.category(), Category::Value);
        assert!(si.is_null());
    }

    #[test]
    fn type_name_promotes_void_to_object() {
        let mut si = SerializationInfo::new();
        si.set_type_name("TestObject");
        assert_eq!(si.category(), Category::Object);

        // An Array keeps its category.
        let mut si = SerializationInfo::new();
        si.set_category(Category::Array);
        si.set_type_name("array");
        assert_eq!(si.category(), Category::Array);
    }

    #[test]
    fn add_member_promotes_by_name() {
        let mut si = SerializationInfo::new();
        si.add_member("a");
        assert_eq!(si.category(), Category::Object);

        let mut si = SerializationInfo::new();
        si.add_member("");
        assert_eq!(si.category(), Category::Array);
    }

    #[test]
    fn duplicate_members_preserved_in_order() {
        let mut si = SerializationInfo::new();
        si.add_member("k").set_value(1u32);
        si.add_member("k").set_value(2u32);
        assert_eq!(si.member_count(), 2);
        // Name lookup returns the first match.
        assert_eq!(si.get_member("k").unwrap().get_value::<u32>().unwrap(), 1);
        assert_eq!(si.get_member_idx(1).unwrap().get_value::<u32>().unwrap(), 2);
    }

    #[test]
    fn get_add_member_appends_only_when_absent() {
        let mut si = SerializationInfo::new();
        si.get_add_member("a").set_value(1u32);
        si.get_add_member("a").set_value(2u32);
        assert_eq!(si.member_count(), 1);
        assert_eq!(si.get_member("a").unwrap().get_value::<u32>().unwrap(), 2);
    }

    #[test]
    fn missing_member_errors() {
        let si = SerializationInfo::new();
        assert!(matches!(
            si.get_member("nope"),
            Err(SerializationError::MemberNotFound(_))
        ));
        assert!(matches!(
            si.get_member_idx(3),
            Err(SerializationError::MemberIndexOutOfRange { index: 3, len: 0 })
        ));
    }

    #[test]
    fn deep_copy_and_swap() {
        let mut a = SerializationInfo::new();
        a.set_name("root");
        a.add_member("x").set_value(1i32);
        a.add_member("y").add_member("z").set_value("deep");

        let copy = a.clone();
        assert_eq!(a, copy);

        let mut b = SerializationInfo::new();
        b.set_value(42u8);
        a.swap(&mut b);
        assert_eq!(b, copy);
        assert_eq!(a.get_value::<u8>().unwrap(), 42);
    }
}
