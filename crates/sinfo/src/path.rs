//! A small lookup language over trees: `.name` descends into a member,
//! `[index]` into a positional child, and a trailing `::size`, `::type` or
//! `::isnull` queries the resolved node instead of returning it.

use crate::{SerializationError, SerializationInfo};

impl SerializationInfo {
    /// Resolves a path expression such as `"a.b[2].c::size"` against this
    /// node, returning the result as a detached node.
    pub fn path(&self, path: &str) -> Result<SerializationInfo, SerializationError> {
        let invalid = |reason: &'static str| SerializationError::InvalidPath {
            path: path.to_owned(),
            reason,
        };

        let (walk, query) = match path.find("::") {
            Some(at) => (&path[..at], Some(&path[at + 2..])),
            None => (path, None),
        };

        let mut node = self;
        let mut rest = walk;
        while !rest.is_empty() {
            rest = rest.strip_prefix('.').unwrap_or(rest);
            if let Some(after) = rest.strip_prefix('[') {
                let close = after.find(']').ok_or_else(|| invalid("unterminated index"))?;
                let index: usize = after[..close]
                    .parse()
                    .map_err(|_| invalid("index is not a number"))?;
                node = node.get_member_idx(index)?;
                rest = &after[close + 1..];
            } else {
                let end = rest
                    .find(|c| c == '.' || c == '[')
                    .unwrap_or(rest.len());
                if end == 0 {
                    return Err(invalid("empty member name"));
                }
                node = node.get_member(&rest[..end])?;
                rest = &rest[end..];
            }
        }

        let mut result = SerializationInfo::new();
        match query {
            None => result = node.clone(),
            Some("size") => result.set_value(node.member_count() as u64),
            Some("type") => result.set_value(node.type_name()),
            Some("isnull") => result.set_value(node.is_null()),
            Some(_) => return Err(invalid("unknown query operator")),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixture() -> SerializationInfo {
        let mut root = SerializationInfo::new();
        let a = root.add_member("a");
        a.set_type_name("TestObject");
        let b = a.add_member("b");
        for n in [10i32, 20, 30] {
            b.add_member("").set_value(n);
        }
        a.add_member("empty").set_null();
        root
    }

    #[test]
    fn member_and_index_walk() {
        let root = fixture();
        assert_eq!(root.path("a.b[2]").unwrap().get_value::<i32>().unwrap(), 30);
        assert_eq!(root.path("a.b[0]").unwrap().get_value::<i32>().unwrap(), 10);
    }

    #[test]
    fn query_operators() {
        let root = fixture();
        assert_eq!(root.path("a.b::size").unwrap().get_value::<u64>().unwrap(), 3);
        assert_eq!(
            root.path("a::type").unwrap().get_value::<String>().unwrap(),
            "TestObject"
        );
        assert!(root.path("a.empty::isnull").unwrap().get_value::<bool>().unwrap());
        assert!(!root.path("a.b::isnull").unwrap().get_value::<bool>().unwrap());
    }

    #[test]
    fn errors() {
        let root = fixture();
        assert!(matches!(
            root.path("a.nope"),
            Err(SerializationError::MemberNotFound(_))
        ));
        assert!(matches!(
            root.path("a.b[9]"),
            Err(SerializationError::MemberIndexOutOfRange { .. })
        ));
        assert!(matches!(
            root.path("a.b::frobnicate"),
            Err(SerializationError::InvalidPath { .. })
        ));
    }
}
