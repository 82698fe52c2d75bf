//! Lenient decoding of JSON values into typed targets.
//!
//! The target type decides the coercion: a field declared as a number accepts
//! `"21.5"`, a string field accepts `42`, a bool accepts `"1"` or `0`, and a
//! sequence accepts a lone value as a one-element list.

use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{Deserializer, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;
use serde_json::{Error, Number, Value};

pub(crate) struct WeakValue(pub(crate) Value);

impl<'de> IntoDeserializer<'de, Error> for WeakValue {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(n) = s.parse::<i64>() {
        return Some(Value::from(n));
    }
    if let Ok(n) = s.parse::<u64>() {
        return Some(Value::from(n));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "True" | "TRUE" => Some(true),
        "" | "0" | "f" | "F" | "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

impl WeakValue {
    fn into_number(self) -> Value {
        match self.0 {
            Value::String(s) => parse_number(&s).unwrap_or(Value::String(s)),
            Value::Bool(b) => Value::from(u8::from(b)),
            other => other,
        }
    }
}

macro_rules! deserialize_number {
    ($($method:ident)*) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
            self.into_number().$method(visitor)
        }
    )*};
}

impl<'de> Deserializer<'de> for WeakValue {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Array(items) => {
                let mut seq: SeqDeserializer<_, Error> =
                    SeqDeserializer::new(items.into_iter().map(WeakValue));
                let out = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(out)
            }
            Value::Object(entries) => {
                let mut map: MapDeserializer<'de, _, Error> = MapDeserializer::new(
                    entries.into_iter().map(|(key, value)| (key, WeakValue(value))),
                );
                let out = visitor.visit_map(&mut map)?;
                map.end()?;
                Ok(out)
            }
            other => other.deserialize_any(visitor),
        }
    }

    deserialize_number! {
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
        deserialize_f32 deserialize_f64
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::String(s) => match parse_bool(&s) {
                Some(b) => visitor.visit_bool(b),
                None => Value::String(s).deserialize_bool(visitor),
            },
            Value::Number(n) => visitor.visit_bool(n.as_f64().is_some_and(|f| f != 0.0)),
            other => other.deserialize_bool(visitor),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Number(n) => visitor.visit_string(n.to_string()),
            Value::Bool(b) => visitor.visit_string(b.to_string()),
            other => other.deserialize_string(visitor),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Null => visitor.visit_none(),
            other => visitor.visit_some(WeakValue(other)),
        }
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        let items = match self.0 {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        WeakValue(Value::Array(items)).deserialize_any(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.0.deserialize_enum(name, variants, visitor)
    }

    forward_to_deserialize_any! {
        char bytes byte_buf unit unit_struct tuple tuple_struct map struct
        identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Status {
        name: String,
        value: f64,
        count: u32,
        active: bool,
        tags: Vec<String>,
        note: Option<String>,
    }

    fn weak<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, Error> {
        T::deserialize(WeakValue(value))
    }

    #[test]
    fn test_exact_types_pass_through() {
        let status: Status = weak(json!({
            "name": "pump",
            "value": 1.5,
            "count": 3,
            "active": true,
            "tags": ["a", "b"],
            "note": "ok"
        }))
        .unwrap();
        assert_eq!(
            status,
            Status {
                name: "pump".into(),
                value: 1.5,
                count: 3,
                active: true,
                tags: vec!["a".into(), "b".into()],
                note: Some("ok".into()),
            }
        );
    }

    #[test]
    fn test_coerces_towards_target_types() {
        let status: Status = weak(json!({
            "name": 42,
            "value": "21.5",
            "count": "7",
            "active": "1",
            "tags": "solo",
            "note": null
        }))
        .unwrap();
        assert_eq!(status.name, "42");
        assert_eq!(status.value, 21.5);
        assert_eq!(status.count, 7);
        assert!(status.active);
        assert_eq!(status.tags, vec!["solo".to_string()]);
        assert_eq!(status.note, None);
    }

    #[test]
    fn test_bool_and_number_cross_coercion() {
        assert_eq!(weak::<u8>(json!(true)).unwrap(), 1);
        assert!(!weak::<bool>(json!(0)).unwrap());
        assert!(!weak::<bool>(json!("false")).unwrap());
    }

    #[test]
    fn test_unparseable_string_is_an_error() {
        assert!(weak::<f64>(json!("warm")).is_err());
        assert!(weak::<u8>(json!("300")).is_err());
    }

    #[test]
    fn test_nested_structures_are_lenient() {
        #[derive(Debug, Deserialize)]
        struct Outer {
            inner: Vec<Status>,
        }
        let outer: Outer = weak(json!({
            "inner": {
                "name": "x",
                "value": "2",
                "count": 1,
                "active": "true",
                "tags": [],
                "note": 5
            }
        }))
        .unwrap();
        assert_eq!(outer.inner.len(), 1);
        assert_eq!(outer.inner[0].value, 2.0);
        assert_eq!(outer.inner[0].note.as_deref(), Some("5"));
    }
}
