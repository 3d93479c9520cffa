//! Property paths: addressing nested fields by string.
//!
//! Syntax:
//!
//! - `abc` addresses field/key `abc`
//! - `abc.def` and `abc->def` descend into `abc`
//! - `abc[def]` addresses element `def` of `abc` (numeric keys also index arrays)
//! - a path may start with `->` or `[`

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::error::{CodecError, CodecResult};
use crate::record::Record;
use crate::value::Value;

/// One step of a [`PropertyPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A plain name: map key or field.
    Any(String),
    /// A name introduced with `->`.
    Property(String),
    /// A bracketed key: map key or array offset.
    Element(String),
}

impl Segment {
    /// The name or key of this segment.
    pub fn name(&self) -> &str {
        match self {
            Segment::Any(name) | Segment::Property(name) | Segment::Element(name) => name,
        }
    }

    fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match (self, value) {
            (Segment::Element(key), Value::Array(items)) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            (Segment::Element(key), Value::Map(pairs)) => pairs
                .iter()
                .find(|(k, _)| match k {
                    Value::Text(text) => text == key,
                    Value::Integer(n) => key.parse::<i64>().ok() == Some(*n),
                    _ => false,
                })
                .map(|(_, v)| v),
            (_, value) => value.get(self.name()),
        }
    }

    fn lookup_or_insert<'a>(&self, value: &'a mut Value) -> CodecResult<&'a mut Value> {
        if value.is_null() {
            *value = Value::empty_map();
        }
        match value {
            Value::Array(items) => {
                let index = match self {
                    Segment::Element(key) => key.parse::<usize>().ok(),
                    _ => None,
                }
                .ok_or_else(|| CodecError::unexpected_type("map", "array"))?;
                if index == items.len() {
                    items.push(Value::Null);
                }
                let len = items.len();
                items.get_mut(index).ok_or_else(|| {
                    CodecError::invalid_path(
                        self.name(),
                        format!("offset beyond array length {len}"),
                    )
                })
            }
            Value::Map(pairs) => {
                let key = Value::from(self.name());
                let pos = match pairs.binary_search_by(|(k, _)| k.cmp_canonical(&key)) {
                    Ok(pos) => pos,
                    Err(pos) => {
                        pairs.insert(pos, (key, Value::Null));
                        pos
                    }
                };
                Ok(&mut pairs[pos].1)
            }
            other => Err(CodecError::unexpected_type("map", other.kind())),
        }
    }
}

/// A compiled property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    segments: Vec<Segment>,
}

impl PropertyPath {
    /// Parses a path.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPath`] for empty paths, empty segments,
    /// an unterminated `[`, or text directly after a `]`.
    pub fn parse(path: &str) -> CodecResult<Self> {
        if path.is_empty() {
            return Err(CodecError::invalid_path(path, "path is empty"));
        }

        let mut segments = Vec::new();
        let mut buf = String::new();
        let mut property = false;
        let mut expect_name = false;
        let mut after_element = false;
        let mut chars = path.chars().peekable();

        let push = |segments: &mut Vec<Segment>, buf: &mut String, property: bool| {
            let name = std::mem::take(buf);
            segments.push(if property {
                Segment::Property(name)
            } else {
                Segment::Any(name)
            });
        };

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if buf.is_empty() && !after_element {
                        return Err(CodecError::invalid_path(path, "empty segment before '.'"));
                    }
                    if !buf.is_empty() {
                        push(&mut segments, &mut buf, property);
                    }
                    property = false;
                    expect_name = true;
                    after_element = false;
                }
                '-' if chars.peek() == Some(&'>') => {
                    chars.next();
                    if buf.is_empty() && !after_element && !segments.is_empty() {
                        return Err(CodecError::invalid_path(path, "empty segment before '->'"));
                    }
                    if buf.is_empty() && expect_name {
                        return Err(CodecError::invalid_path(path, "empty segment before '->'"));
                    }
                    if !buf.is_empty() {
                        push(&mut segments, &mut buf, property);
                    }
                    property = true;
                    expect_name = true;
                    after_element = false;
                }
                '[' => {
                    if buf.is_empty() && expect_name {
                        return Err(CodecError::invalid_path(path, "empty segment before '['"));
                    }
                    if !buf.is_empty() {
                        push(&mut segments, &mut buf, property);
                    }
                    let mut key = String::new();
                    let mut closed = false;
                    for k in chars.by_ref() {
                        if k == ']' {
                            closed = true;
                            break;
                        }
                        key.push(k);
                    }
                    if !closed {
                        return Err(CodecError::invalid_path(path, "unterminated '[', expecting a ']'"));
                    }
                    segments.push(Segment::Element(key));
                    property = false;
                    expect_name = false;
                    after_element = true;
                }
                _ => {
                    if after_element {
                        return Err(CodecError::invalid_path(path, "expected '.', '->' or '[' after ']'"));
                    }
                    buf.push(c);
                    expect_name = false;
                }
            }
        }

        if !buf.is_empty() {
            push(&mut segments, &mut buf, property);
        } else if expect_name {
            return Err(CodecError::invalid_path(path, "path ends with a separator"));
        }
        if segments.is_empty() {
            return Err(CodecError::invalid_path(path, "path has no segments"));
        }
        Ok(Self { segments })
    }

    /// A single-segment path; `name` is taken literally.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Any(name.into())],
        }
    }

    /// The segments of this path.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns true for single-segment paths.
    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }

    /// The head segment and the remaining path, if any.
    pub fn split_first(&self) -> (&Segment, Option<PropertyPath>) {
        let (head, rest) = (&self.segments[0], &self.segments[1..]);
        let rest = if rest.is_empty() {
            None
        } else {
            Some(Self {
                segments: rest.to_vec(),
            })
        };
        (head, rest)
    }

    /// Name of the head segment.
    pub fn head(&self) -> &str {
        self.segments[0].name()
    }

    /// Resolves the path inside `value`.
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| segment.lookup(current))
    }

    /// Writes `new` at the path inside `value`, creating maps for missing
    /// or null intermediate steps.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedType`] when an intermediate value is a
    /// scalar that cannot hold fields.
    pub fn set(&self, value: &mut Value, new: Value) -> CodecResult<()> {
        let mut current = value;
        for segment in &self.segments {
            current = segment.lookup_or_insert(current)?;
        }
        *current = new;
        Ok(())
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Any(name) if i == 0 => write!(f, "{name}")?,
                Segment::Any(name) => write!(f, ".{name}")?,
                Segment::Property(name) => write!(f, "->{name}")?,
                Segment::Element(key) => write!(f, "[{key}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for PropertyPath {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Something a [`PropertyPath`] can be resolved against.
pub trait PathTarget {
    /// Error raised while resolving (e.g. a lazy relation failing to load).
    type Error;

    /// Resolves `path`, returning `None` when nothing lives there.
    fn resolve_path(&self, path: &PropertyPath) -> Result<Option<Value>, Self::Error>;
}

impl PathTarget for Value {
    type Error = Infallible;

    fn resolve_path(&self, path: &PropertyPath) -> Result<Option<Value>, Self::Error> {
        Ok(path.get(self).cloned())
    }
}

impl PathTarget for Record {
    type Error = Infallible;

    fn resolve_path(&self, path: &PropertyPath) -> Result<Option<Value>, Self::Error> {
        let (head, rest) = path.split_first();
        let Some(value) = self.get(head.name()) else {
            return Ok(None);
        };
        Ok(match rest {
            None => Some(value.clone()),
            Some(rest) => rest.get(value).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::map(vec![
            (Value::from("name"), Value::from("Bob")),
            (
                Value::from("address"),
                Value::map(vec![(Value::from("city"), Value::from("Amsterdam"))]),
            ),
            (
                Value::from("tags"),
                Value::Array(vec![Value::from("a"), Value::from("b")]),
            ),
        ])
    }

    #[test]
    fn parse_segments() {
        let path = PropertyPath::parse("a.b->c[d][0]").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Any("a".into()),
                Segment::Any("b".into()),
                Segment::Property("c".into()),
                Segment::Element("d".into()),
                Segment::Element("0".into()),
            ]
        );
        assert_eq!(path.to_string(), "a.b->c[d][0]");
    }

    #[test]
    fn parse_leading_forms() {
        assert_eq!(
            PropertyPath::parse("->abc").unwrap().segments(),
            &[Segment::Property("abc".into())]
        );
        assert_eq!(
            PropertyPath::parse("[abc]").unwrap().segments(),
            &[Segment::Element("abc".into())]
        );
        assert_eq!(
            PropertyPath::parse("a[0].b").unwrap().to_string(),
            "a[0].b"
        );
    }

    #[test]
    fn parse_errors() {
        assert!(PropertyPath::parse("").is_err());
        assert!(PropertyPath::parse("a..b").is_err());
        assert!(PropertyPath::parse("a.").is_err());
        assert!(PropertyPath::parse(".a").is_err());
        assert!(PropertyPath::parse("a[b").is_err());
        assert!(PropertyPath::parse("a[b]c").is_err());
        assert!(PropertyPath::parse("a->").is_err());
    }

    #[test]
    fn get_nested_values() {
        let value = sample();
        let get = |p: &str| PropertyPath::parse(p).unwrap().get(&value).cloned();
        assert_eq!(get("name"), Some(Value::from("Bob")));
        assert_eq!(get("address.city"), Some(Value::from("Amsterdam")));
        assert_eq!(get("address->city"), Some(Value::from("Amsterdam")));
        assert_eq!(get("[address][city]"), Some(Value::from("Amsterdam")));
        assert_eq!(get("tags[1]"), Some(Value::from("b")));
        assert_eq!(get("tags[5]"), None);
        assert_eq!(get("missing.deeper"), None);
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut value = Value::Null;
        PropertyPath::parse("address.city")
            .unwrap()
            .set(&mut value, Value::from("Utrecht"))
            .unwrap();
        assert_eq!(
            value.get("address").and_then(|a| a.get("city")),
            Some(&Value::from("Utrecht"))
        );
    }

    #[test]
    fn set_array_elements() {
        let mut value = sample();
        let path = PropertyPath::parse("tags[1]").unwrap();
        path.set(&mut value, Value::from("z")).unwrap();
        assert_eq!(path.get(&value), Some(&Value::from("z")));

        let append = PropertyPath::parse("tags[2]").unwrap();
        append.set(&mut value, Value::from("c")).unwrap();
        assert_eq!(value.get("tags").unwrap().as_array().unwrap().len(), 3);

        let beyond = PropertyPath::parse("tags[9]").unwrap();
        assert!(beyond.set(&mut value, Value::Null).is_err());
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut value = sample();
        let path = PropertyPath::parse("name.first").unwrap();
        assert!(matches!(
            path.set(&mut value, Value::from("x")),
            Err(CodecError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn split_first_and_head() {
        let path = PropertyPath::parse("customer.address[city]").unwrap();
        let (head, rest) = path.split_first();
        assert_eq!(head.name(), "customer");
        assert_eq!(rest.unwrap().to_string(), "address[city]");
        assert_eq!(path.head(), "customer");

        let (_, rest) = PropertyPath::field("id").split_first();
        assert!(rest.is_none());
    }

    #[test]
    fn record_target() {
        let record = Record::new()
            .with("id", 1)
            .with("meta", Value::map(vec![(Value::from("k"), Value::from("v"))]));
        let id = PropertyPath::field("id");
        let nested = PropertyPath::parse("meta.k").unwrap();
        assert_eq!(record.resolve_path(&id), Ok(Some(Value::Integer(1))));
        assert_eq!(record.resolve_path(&nested), Ok(Some(Value::from("v"))));
        assert_eq!(
            record.resolve_path(&PropertyPath::field("nope")),
            Ok(None)
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn name() -> impl Strategy<Value = String> {
            prop::string::string_regex("[a-z][a-z0-9_]{0,7}").expect("valid regex")
        }

        proptest! {
            #[test]
            fn set_then_get_returns_the_value(
                names in prop::collection::vec(name(), 1..4),
                n in any::<i64>(),
            ) {
                let path = PropertyPath::parse(&names.join(".")).unwrap();
                let mut value = Value::Null;
                path.set(&mut value, Value::Integer(n)).unwrap();
                prop_assert_eq!(path.get(&value), Some(&Value::Integer(n)));
                prop_assert_eq!(PropertyPath::parse(&path.to_string()).unwrap(), path);
            }
        }
    }
}
