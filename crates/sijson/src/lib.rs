//! JSON ↔ serialization tree.
//!
//! JSON objects cannot represent duplicate member names; when a tree carries
//! duplicates, later members win. Non-finite floats have no JSON spelling
//! and render as null, and byte values render through lossy UTF-8.

use sinfo::{Category, Scalar, SerializationInfo};

/// Renders a tree as a JSON value.
pub fn to_json(si: &SerializationInfo) -> serde_json::Value {
    use serde_json::Value;

    match si.category() {
        Category::Object => Value::Object(
            si.members()
                .map(|m| (m.name().to_owned(), to_json(m)))
                .collect(),
        ),
        Category::Array => Value::Array(si.members().map(to_json).collect()),
        Category::Void | Category::Value => match si.scalar() {
            None => Value::Null,
            Some(Scalar::Str(s)) => Value::String(s.clone()),
            Some(Scalar::Bytes(b)) => Value::String(String::from_utf8_lossy(b).into_owned()),
            Some(Scalar::Char(c)) => Value::String(c.to_string()),
            Some(Scalar::Bool(b)) => Value::Bool(*b),
            Some(Scalar::Int(v)) => Value::Number((*v).into()),
            Some(Scalar::UInt(v)) => Value::Number((*v).into()),
            Some(Scalar::Float(v)) => serde_json::Number::from_f64(*v as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Some(Scalar::Double(v)) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        },
    }
}

/// Builds a tree from a JSON value.
pub fn from_json(value: &serde_json::Value) -> SerializationInfo {
    use serde_json::Value;

    let mut si = SerializationInfo::new();
    match value {
        Value::Null => si.set_null(),
        Value::Bool(b) => {
            si.set_value(*b);
            si.set_type_name("bool");
        }
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                si.set_value(v);
            } else if let Some(v) = n.as_i64() {
                si.set_value(v);
            } else {
                si.set_value(n.as_f64().unwrap_or(f64::NAN));
                si.set_type_name("double");
                return si;
            }
            si.set_type_name("int");
        }
        Value::String(s) => {
            si.set_value(s.as_str());
            si.set_type_name("string");
        }
        Value::Array(items) => {
            si.set_category(Category::Array);
            si.set_type_name("array");
            for item in items {
                let mut child = from_json(item);
                child.set_name("");
                si.push_member(child);
            }
        }
        Value::Object(map) => {
            si.set_category(Category::Object);
            for (name, member) in map {
                let mut child = from_json(member);
                child.set_name(name.as_str());
                si.push_member(child);
            }
        }
    }
    si
}

/// Parses JSON text into a tree.
pub fn parse(text: &str) -> Result<SerializationInfo, serde_json::Error> {
    Ok(from_json(&serde_json::from_str(text)?))
}

/// Renders a tree as compact JSON text.
pub fn render(si: &SerializationInfo) -> String {
    to_json(si).to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_mixed_object() {
        let si = parse(
            r#"{"intValue":17,"stringValue":"foo bar\t","doubleValue":"1000","boolValue":true,"nullValue":null}"#,
        )
        .unwrap();

        assert_eq!(si.category(), Category::Object);
        assert_eq!(si.get_member_value::<i32>("intValue").unwrap(), 17);
        assert_eq!(
            si.get_member_value::<String>("stringValue").unwrap(),
            "foo bar\t"
        );
        // A numeric string stays a string but converts on demand.
        assert_eq!(si.get_member_value::<f64>("doubleValue").unwrap(), 1000.0);
        assert!(si.get_member_value::<bool>("boolValue").unwrap());
        assert!(si.get_member("nullValue").unwrap().is_null());
    }

    #[test]
    fn decode_numbers_keep_their_family() {
        let si = parse(r#"{"pos":17,"neg":-2,"frac":2.5}"#).unwrap();
        assert_eq!(
            si.get_member("pos").unwrap().scalar(),
            Some(&Scalar::UInt(17))
        );
        assert_eq!(
            si.get_member("neg").unwrap().scalar(),
            Some(&Scalar::Int(-2))
        );
        assert_eq!(
            si.get_member("frac").unwrap().scalar(),
            Some(&Scalar::Double(2.5))
        );
    }

    #[test]
    fn encode_decode_roundtrip() {
        let text = r#"{"a":[1,2,3],"b":{"c":"x","d":false},"e":null}"#;
        let si = parse(text).unwrap();
        let back: serde_json::Value = serde_json::from_str(&render(&si)).unwrap();
        let original: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn nested_arrays() {
        let si = parse(r#"[[1,2],[3]]"#).unwrap();
        assert_eq!(si.category(), Category::Array);
        assert_eq!(si.member_count(), 2);
        assert_eq!(
            si.path("[0][1]").unwrap().get_value::<u32>().unwrap(),
            2
        );
        assert_eq!(si.path("[1]::size").unwrap().get_value::<u64>().unwrap(), 1);
    }

    #[test]
    fn non_finite_floats_render_null() {
        let mut si = SerializationInfo::new();
        si.set_value(f64::INFINITY);
        assert_eq!(to_json(&si), serde_json::Value::Null);
    }
}
