//! Filter conditions over records and instances.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{CodecError, CodecResult};
use crate::path::{PathTarget, PropertyPath};
use crate::value::Value;

/// Comparison operator of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `IN`, the expected value is an array.
    In,
    /// `LIKE`, `%` matches any run of characters.
    Like,
}

impl Operator {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "IN" => Some(Self::In),
            "LIKE" => Some(Self::Like),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "IN",
            Self::Like => "LIKE",
        }
    }
}

/// A single `path operator value` test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Where the tested value lives.
    pub path: PropertyPath,
    /// How to compare.
    pub operator: Operator,
    /// The value to compare against.
    pub value: Value,
}

impl Condition {
    /// Creates a condition.
    pub fn new(path: PropertyPath, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            path,
            operator,
            value: value.into(),
        }
    }

    /// Parses a key like `"name"` or `"id >="` and pairs it with `value`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown operator or an invalid path.
    pub fn parse(key: &str, value: impl Into<Value>) -> CodecResult<Self> {
        let key = key.trim();
        let (path, operator) = match key.rsplit_once(char::is_whitespace) {
            Some((path, op)) => {
                let operator = Operator::parse(op).ok_or_else(|| {
                    CodecError::invalid_condition(key, format!("unknown operator \"{op}\""))
                })?;
                (path.trim(), operator)
            }
            None => (key, Operator::Eq),
        };
        let operator_value = value.into();
        if operator == Operator::In && operator_value.as_array().is_none() {
            return Err(CodecError::invalid_condition(key, "IN expects an array"));
        }
        Ok(Self::new(PropertyPath::parse(path)?, operator, operator_value))
    }

    /// Tests `actual` (the value found at the path) against this condition.
    pub fn test(&self, actual: &Value) -> bool {
        match self.operator {
            Operator::Eq => loose_eq(actual, &self.value),
            Operator::Ne => !loose_eq(actual, &self.value),
            Operator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            Operator::Le => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            Operator::Ge => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::In => self
                .value
                .as_array()
                .is_some_and(|items| items.iter().any(|item| loose_eq(actual, item))),
            Operator::Like => match (text_of(actual), self.value.as_text()) {
                (Some(text), Some(pattern)) => like(&text, pattern),
                _ => false,
            },
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.path, self.operator.as_str(), self.value)
    }
}

/// A conjunction of [`Condition`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conditions {
    items: Vec<Condition>,
}

impl Conditions {
    /// No conditions; matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `(key, value)` pairs, see [`Condition::parse`].
    ///
    /// # Errors
    ///
    /// Returns the first parse error.
    pub fn from_pairs<K, V, I>(pairs: I) -> CodecResult<Self>
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let items = pairs
            .into_iter()
            .map(|(k, v)| Condition::parse(k.as_ref(), v))
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self { items })
    }

    /// A single equality test on a literal field name.
    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            items: vec![Condition::new(PropertyPath::field(field), Operator::Eq, value)],
        }
    }

    /// A single `IN` test on a literal field name.
    pub fn field_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            items: vec![Condition::new(
                PropertyPath::field(field),
                Operator::In,
                Value::Array(values),
            )],
        }
    }

    /// Adds a condition.
    #[must_use]
    pub fn and(mut self, condition: Condition) -> Self {
        self.items.push(condition);
        self
    }

    /// Appends all conditions of `other`.
    #[must_use]
    pub fn merge(mut self, other: &Conditions) -> Self {
        self.items.extend(other.items.iter().cloned());
        self
    }

    /// Returns true when there are no conditions.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates the conditions.
    pub fn iter(&self) -> std::slice::Iter<'_, Condition> {
        self.items.iter()
    }

    /// Rewrites every path with `map`; `None` from `map` aborts the rewrite.
    pub fn map_paths<F>(&self, mut map: F) -> Option<Conditions>
    where
        F: FnMut(&PropertyPath) -> Option<PropertyPath>,
    {
        let items = self
            .items
            .iter()
            .map(|c| {
                map(&c.path).map(|path| Condition {
                    path,
                    operator: c.operator,
                    value: c.value.clone(),
                })
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Conditions { items })
    }

    /// Evaluates every condition against `target`.
    ///
    /// # Errors
    ///
    /// Propagates errors raised while resolving paths on `target`.
    pub fn matches<T: PathTarget + ?Sized>(&self, target: &T) -> Result<bool, T::Error> {
        for condition in &self.items {
            let actual = target.resolve_path(&condition.path)?.unwrap_or_default();
            if !condition.test(&actual) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, condition) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "{condition}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Conditions {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Equality that treats numeric text and integers alike (`"1" == 1`).
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Integer(_), Value::Text(_)) | (Value::Text(_), Value::Integer(_)) => {
            matches!((a.as_number(), b.as_number()), (Some(x), Some(y)) if x == y)
        }
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(n) => Some(n.to_string()),
        _ => None,
    }
}

fn like(text: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return text == pattern;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else if let Some(pos) = rest.find(part) {
            rest = &rest[pos + part.len()..];
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn bob() -> Record {
        Record::new()
            .with("id", 1)
            .with("name", "Bob Fanger")
            .with("age", "42")
    }

    #[test]
    fn parse_keys() {
        let c = Condition::parse("id >=", 0).unwrap();
        assert_eq!(c.operator, Operator::Ge);
        assert_eq!(c.path.to_string(), "id");

        let c = Condition::parse("name", "Bob").unwrap();
        assert_eq!(c.operator, Operator::Eq);

        let c = Condition::parse("name like", "B%").unwrap();
        assert_eq!(c.operator, Operator::Like);

        assert!(Condition::parse("id ~~", 1).is_err());
        assert!(Condition::parse("id IN", 1).is_err());
    }

    #[test]
    fn equality_is_loose_for_numbers() {
        let record = bob();
        let conditions = Conditions::from_pairs([("id", "1")]).unwrap();
        assert_eq!(conditions.matches(&record), Ok(true));
        let conditions = Conditions::from_pairs([("age", 42)]).unwrap();
        assert_eq!(conditions.matches(&record), Ok(true));
        let conditions = Conditions::from_pairs([("name", "James Bond")]).unwrap();
        assert_eq!(conditions.matches(&record), Ok(false));
    }

    #[test]
    fn ordering_operators() {
        let record = bob();
        let check = |key: &str, value: Value| {
            Conditions::from_pairs([(key, value)])
                .unwrap()
                .matches(&record)
                .unwrap()
        };
        assert!(check("id >=", Value::Integer(0)));
        assert!(check("id <=", Value::Integer(1)));
        assert!(!check("id <", Value::Integer(1)));
        assert!(check("age >", Value::Integer(40)));
        assert!(check("name !=", Value::from("James")));
    }

    #[test]
    fn in_and_like() {
        let record = bob();
        let within = Conditions::field_in("id", vec![Value::Integer(3), Value::Integer(1)]);
        assert_eq!(within.matches(&record), Ok(true));
        let outside = Conditions::field_in("id", vec![]);
        assert_eq!(outside.matches(&record), Ok(false));

        assert!(like("Bob Fanger", "Bob%"));
        assert!(like("Bob Fanger", "%Fang%"));
        assert!(like("Bob Fanger", "%ger"));
        assert!(!like("Bob Fanger", "%James%"));
        assert!(like("exact", "exact"));
    }

    #[test]
    fn conjunction() {
        let record = bob();
        let conditions = Conditions::from_pairs([("id", Value::Integer(1)), ("name", Value::from("Bob Fanger"))])
            .unwrap();
        assert_eq!(conditions.matches(&record), Ok(true));
        assert_eq!(conditions.to_string(), "id = 1 AND name = 'Bob Fanger'");
        assert_eq!(Conditions::new().matches(&record), Ok(true));
    }

    #[test]
    fn missing_field_is_null() {
        let record = bob();
        let conditions = Conditions::field_eq("nope", Value::Null);
        assert_eq!(conditions.matches(&record), Ok(true));
    }

    #[test]
    fn map_paths_rewrites_or_aborts() {
        let conditions = Conditions::from_pairs([("name", "Bob")]).unwrap();
        let renamed = conditions
            .map_paths(|p| Some(PropertyPath::field(format!("c_{p}"))))
            .unwrap();
        assert_eq!(renamed.to_string(), "c_name = 'Bob'");
        assert!(conditions.map_paths(|_| None).is_none());
    }
}
