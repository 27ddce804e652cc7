//! Compose and Decompose: the bridge between live values and the tree.
//!
//! `Decompose` fills a node from a value (serialization); `Compose` builds a
//! value back out of a node (deserialization). Codecs never see application
//! types, only trees produced and consumed through these traits.

use crate::{Category, SerializationError, SerializationInfo};

/// Builds `Self` from a node, converting lexically where needed.
pub trait Compose: Sized {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError>;
}

/// Writes `self` into a node, setting value, type name and children.
/// The node's own member name is left untouched.
pub trait Decompose {
    fn decompose(&self, si: &mut SerializationInfo);
}

macro_rules! compose_signed {
    ($($t:ty => $name:literal),*) => {$(
        impl Compose for $t {
            fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
                let v = si.to_i64()?;
                <$t>::try_from(v).map_err(|_| SerializationError::Conversion {
                    kind: "integer",
                    value: v.to_string(),
                    target: $name,
                })
            }
        }
        impl Decompose for $t {
            fn decompose(&self, si: &mut SerializationInfo) {
                si.set_value(*self);
                si.set_type_name("int");
            }
        }
    )*};
}

macro_rules! compose_unsigned {
    ($($t:ty => $name:literal),*) => {$(
        impl Compose for $t {
            fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
                let v = si.to_u64()?;
                <$t>::try_from(v).map_err(|_| SerializationError::Conversion {
                    kind: "unsigned",
                    value: v.to_string(),
                    target: $name,
                })
            }
        }
        impl Decompose for $t {
            fn decompose(&self, si: &mut SerializationInfo) {
                si.set_value(*self);
                si.set_type_name("int");
            }
        }
    )*};
}

compose_signed!(i8 => "i8", i16 => "i16", i32 => "i32", i64 => "i64");
compose_unsigned!(u8 => "u8", u16 => "u16", u32 => "u32", u64 => "u64");

impl Compose for f64 {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        si.to_f64()
    }
}
impl Decompose for f64 {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_value(*self);
        si.set_type_name("double");
    }
}

impl Compose for f32 {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        Ok(si.to_f64()? as f32)
    }
}
impl Decompose for f32 {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_value(*self);
        si.set_type_name("double");
    }
}

impl Compose for bool {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        si.to_bool()
    }
}
impl Decompose for bool {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_value(*self);
        si.set_type_name("bool");
    }
}

impl Compose for char {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        si.to_char()
    }
}
impl Decompose for char {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_value(*self);
        si.set_type_name("char");
    }
}

impl Compose for String {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        si.to_string_value()
    }
}
impl Decompose for String {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_value(self.as_str());
        si.set_type_name("string");
    }
}
impl Decompose for &str {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_value(*self);
        si.set_type_name("string");
    }
}

impl Compose for SerializationInfo {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        Ok(si.clone())
    }
}
impl Decompose for SerializationInfo {
    fn decompose(&self, si: &mut SerializationInfo) {
        let name = std::mem::take(&mut si.name);
        *si = self.clone();
        si.name = name;
    }
}

impl<T: Compose> Compose for Option<T> {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        if si.is_null() {
            Ok(None)
        } else {
            T::compose(si).map(Some)
        }
    }
}
impl<T: Decompose> Decompose for Option<T> {
    fn decompose(&self, si: &mut SerializationInfo) {
        match self {
            Some(v) => v.decompose(si),
            None => si.set_null(),
        }
    }
}

impl<T: Compose> Compose for Vec<T> {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        si.members().map(T::compose).collect()
    }
}
impl<T: Decompose> Decompose for Vec<T> {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_category(Category::Array);
        si.set_type_name("array");
        for v in self {
            v.decompose(si.add_member(""));
        }
    }
}

impl<A: Compose, B: Compose> Compose for (A, B) {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        Ok((
            A::compose(si.get_member("first")?)?,
            B::compose(si.get_member("second")?)?,
        ))
    }
}
impl<A: Decompose, B: Decompose> Decompose for (A, B) {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_type_name("pair");
        self.0.decompose(si.add_member("first"));
        self.1.decompose(si.add_member("second"));
    }
}

impl<K: Compose + Ord, V: Compose> Compose for std::collections::BTreeMap<K, V> {
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        si.members().map(<(K, V)>::compose).collect()
    }
}
impl<K: Decompose, V: Decompose> Decompose for std::collections::BTreeMap<K, V> {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_category(Category::Array);
        si.set_type_name("map");
        for (k, v) in self {
            let member = si.add_member("");
            member.set_type_name("pair");
            k.decompose(member.add_member("first"));
            v.decompose(member.add_member("second"));
        }
    }
}

impl<K: Compose + std::hash::Hash + Eq, V: Compose> Compose
    for std::collections::HashMap<K, V>
{
    fn compose(si: &SerializationInfo) -> Result<Self, SerializationError> {
        si.members().map(<(K, V)>::compose).collect()
    }
}
impl<K: Decompose, V: Decompose> Decompose for std::collections::HashMap<K, V> {
    fn decompose(&self, si: &mut SerializationInfo) {
        si.set_category(Category::Array);
        si.set_type_name("map");
        for (k, v) in self {
            let member = si.add_member("");
            member.set_type_name("pair");
            k.decompose(member.add_member("first"));
            v.decompose(member.add_member("second"));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn vector_roundtrip() {
        let v = vec![4i32, 17, 12];
        let mut si = SerializationInfo::new();
        v.decompose(&mut si);

        assert_eq!(si.category(), Category::Array);
        assert_eq!(si.type_name(), "array");
        assert_eq!(si.member_count(), 3);
        assert_eq!(Vec::<i32>::compose(&si).unwrap(), v);
    }

    #[test]
    fn pair_roundtrip() {
        let p = ("hi".to_owned(), -42i64);
        let mut si = SerializationInfo::new();
        p.decompose(&mut si);

        assert_eq!(si.type_name(), "pair");
        assert_eq!(<(String, i64)>::compose(&si).unwrap(), p);
    }

    #[test]
    fn map_roundtrip() {
        let mut m = std::collections::BTreeMap::new();
        m.insert(17u32, "foo".to_owned());
        m.insert(56, "bar".to_owned());

        let mut si = SerializationInfo::new();
        m.decompose(&mut si);
        assert_eq!(si.type_name(), "map");
        assert_eq!(
            std::collections::BTreeMap::<u32, String>::compose(&si).unwrap(),
            m
        );
    }

    #[test]
    fn option_null_roundtrip() {
        let mut si = SerializationInfo::new();
        Option::<i32>::None.decompose(&mut si);
        assert!(si.is_null());
        assert_eq!(Option::<i32>::compose(&si).unwrap(), None);

        Some(9i32).decompose(&mut si);
        assert_eq!(Option::<i32>::compose(&si).unwrap(), Some(9));
    }

    #[test]
    fn si_decompose_preserves_target_name() {
        let mut inner = SerializationInfo::new();
        inner.set_value(5u32);

        let mut outer = SerializationInfo::new();
        outer.add_member("slot").compose_from(&inner);
        assert_eq!(outer.get_member("slot").unwrap().name(), "slot");
        assert_eq!(outer.get_member_value::<u32>("slot").unwrap(), 5);
    }
}
