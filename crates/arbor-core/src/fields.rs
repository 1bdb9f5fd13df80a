//! Plain-data fields: scalar attribute accessors with round-trip validation.
//!
//! Every field maps one node attribute to a typed [`Value`]. Reads re-derive
//! the value from the attribute on every call; writes validate the value and
//! serialize it back, removing the attribute entirely when the value equals
//! the field's default.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

use arbor_doc::{Document, NodeId};

use crate::errors::{ModelError, Result};

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// The attribute is absent and the field has no better default
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A member of an enumeration field, by member name
    Enum(String),
    DateTime(DateTime<FixedOffset>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTime(v)
    }
}

/// The value space of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Str,
    Bool,
    Int,
    Float,
    DateTime,
    /// One of a predetermined set of member names; the first member is the
    /// default when the attribute is absent.
    Enum { members: Vec<String> },
}

/// Declaration of a plain-data field on a class.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub attribute: String,
    pub kind: FieldKind,
    pub writable: bool,
}

impl FieldDef {
    pub fn string(attribute: impl Into<String>) -> Self {
        Self::new(attribute, FieldKind::Str)
    }

    pub fn boolean(attribute: impl Into<String>) -> Self {
        Self::new(attribute, FieldKind::Bool)
    }

    pub fn int(attribute: impl Into<String>) -> Self {
        Self::new(attribute, FieldKind::Int)
    }

    pub fn float(attribute: impl Into<String>) -> Self {
        Self::new(attribute, FieldKind::Float)
    }

    pub fn datetime(attribute: impl Into<String>) -> Self {
        Self::new(attribute, FieldKind::DateTime)
    }

    pub fn enumeration<I, S>(attribute: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            attribute,
            FieldKind::Enum {
                members: members.into_iter().map(Into::into).collect(),
            },
        )
    }

    fn new(attribute: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            attribute: attribute.into(),
            kind,
            writable: true,
        }
    }

    /// Forbid changing the value once the attribute exists (e.g. identifiers).
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// The value reported when the attribute is absent.
    pub fn default_value(&self) -> Value {
        match &self.kind {
            FieldKind::Str => Value::Str(String::new()),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Int => Value::Int(0),
            FieldKind::Float => Value::Float(0.0),
            FieldKind::DateTime => Value::Null,
            FieldKind::Enum { members } => members
                .first()
                .map(|m| Value::Enum(m.clone()))
                .unwrap_or(Value::Null),
        }
    }

    /// Read the field from a node, re-deriving from the raw attribute.
    pub fn read(&self, doc: &Document, node: NodeId) -> Result<Value> {
        let Some(raw) = doc.attribute(node, &self.attribute)? else {
            return Ok(self.default_value());
        };
        self.parse(raw)
    }

    fn parse(&self, raw: &str) -> Result<Value> {
        let bad = || ModelError::InvalidFieldValue {
            attr: self.attribute.clone(),
            value: raw.to_string(),
        };
        match &self.kind {
            FieldKind::Str => Ok(Value::Str(raw.to_string())),
            FieldKind::Bool => Ok(Value::Bool(raw == "true")),
            FieldKind::Int => raw.parse().map(Value::Int).map_err(|_| bad()),
            FieldKind::Float => {
                if raw == "*" {
                    return Ok(Value::Float(f64::INFINITY));
                }
                raw.parse().map(Value::Float).map_err(|_| bad())
            }
            FieldKind::DateTime => {
                DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
                    .map(Value::DateTime)
                    .map_err(|_| bad())
            }
            FieldKind::Enum { members } => {
                if members.iter().any(|m| m == raw) {
                    Ok(Value::Enum(raw.to_string()))
                } else {
                    Err(bad())
                }
            }
        }
    }

    /// Write the field, validating the value against the declared kind.
    ///
    /// Writing the default (or [`Value::Null`]) removes the attribute.
    pub fn write(&self, doc: &mut Document, node: NodeId, value: Value) -> Result<()> {
        if !self.writable && doc.attribute(node, &self.attribute)?.is_some() {
            return Err(ModelError::invalid(format!(
                "Field {:?} is not writable",
                self.attribute
            )));
        }

        if value.is_null() || value == self.default_value() {
            doc.remove_attribute(node, &self.attribute)?;
            return Ok(());
        }

        let serialized = self.serialize(&value)?;
        doc.set_attribute(node, &self.attribute, serialized)?;
        Ok(())
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        let mismatch = || {
            ModelError::invalid(format!(
                "Field {:?} only accepts {:?} values, got {value:?}",
                self.attribute, self.kind
            ))
        };
        match (&self.kind, value) {
            (FieldKind::Str, Value::Str(s)) => Ok(s.clone()),
            (FieldKind::Bool, Value::Bool(b)) => Ok(if *b { "true" } else { "false" }.to_string()),
            (FieldKind::Int, Value::Int(i)) => Ok(i.to_string()),
            (FieldKind::Float, v) => {
                let f = v.as_float().ok_or_else(mismatch)?;
                if f.is_nan() {
                    return Err(ModelError::invalid("Cannot represent NaN"));
                }
                if f == f64::INFINITY {
                    return Ok("*".to_string());
                }
                if f == f64::NEG_INFINITY {
                    return Err(ModelError::invalid("Cannot represent negative infinity"));
                }
                Ok(f.to_string())
            }
            (FieldKind::DateTime, Value::DateTime(dt)) => {
                // ISO-8601 with millisecond precision; the offset is written
                // without the colon.
                let formatted = dt.to_rfc3339_opts(SecondsFormat::Millis, false);
                Ok(match formatted.rfind(['+', '-']) {
                    Some(pos) if pos > 10 => {
                        let (head, tz) = formatted.split_at(pos);
                        format!("{head}{}", tz.replace(':', ""))
                    }
                    _ => formatted,
                })
            }
            (FieldKind::Enum { members }, v) => {
                let name = v.as_str().ok_or_else(mismatch)?;
                if !members.iter().any(|m| m == name) {
                    return Err(ModelError::invalid(format!(
                        "{name:?} is not a member of enum field {:?}",
                        self.attribute
                    )));
                }
                Ok(name.to_string())
            }
            _ => Err(mismatch()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> (Document, NodeId) {
        let doc = Document::new("root");
        let root = doc.root();
        (doc, root)
    }

    #[test]
    fn test_string_field_default_and_round_trip() {
        let (mut doc, node) = doc();
        let field = FieldDef::string("name");

        assert_eq!(field.read(&doc, node).unwrap(), Value::Str(String::new()));
        field.write(&mut doc, node, "Widget A".into()).unwrap();
        assert_eq!(field.read(&doc, node).unwrap(), Value::Str("Widget A".into()));

        // Writing the default removes the raw attribute again.
        field.write(&mut doc, node, "".into()).unwrap();
        assert_eq!(doc.attribute(node, "name").unwrap(), None);
    }

    #[test]
    fn test_bool_field() {
        let (mut doc, node) = doc();
        let field = FieldDef::boolean("abstract");
        field.write(&mut doc, node, true.into()).unwrap();
        assert_eq!(doc.attribute(node, "abstract").unwrap(), Some("true"));
        assert_eq!(field.read(&doc, node).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_int_field_rejects_garbage() {
        let (mut doc, node) = doc();
        doc.set_attribute(node, "count", "many").unwrap();
        let field = FieldDef::int("count");
        assert!(matches!(
            field.read(&doc, node),
            Err(ModelError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn test_float_field_special_values() {
        let (mut doc, node) = doc();
        let field = FieldDef::float("weight");

        field.write(&mut doc, node, f64::INFINITY.into()).unwrap();
        assert_eq!(doc.attribute(node, "weight").unwrap(), Some("*"));
        assert_eq!(
            field.read(&doc, node).unwrap(),
            Value::Float(f64::INFINITY)
        );

        assert!(field.write(&mut doc, node, f64::NAN.into()).is_err());
        assert!(field.write(&mut doc, node, f64::NEG_INFINITY.into()).is_err());

        // Ints coerce to float.
        field.write(&mut doc, node, 3i64.into()).unwrap();
        assert_eq!(field.read(&doc, node).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_datetime_round_trip_without_tz_colon() {
        let (mut doc, node) = doc();
        let field = FieldDef::datetime("lastModified");
        let dt = DateTime::parse_from_rfc3339("2019-07-23T17:45:30.000+02:00").unwrap();

        field.write(&mut doc, node, dt.into()).unwrap();
        assert_eq!(
            doc.attribute(node, "lastModified").unwrap(),
            Some("2019-07-23T17:45:30.000+0200")
        );
        assert_eq!(field.read(&doc, node).unwrap(), Value::DateTime(dt));
    }

    #[test]
    fn test_datetime_default_is_null() {
        let (doc, node) = doc();
        let field = FieldDef::datetime("lastModified");
        assert_eq!(field.read(&doc, node).unwrap(), Value::Null);
    }

    #[test]
    fn test_enum_field() {
        let (mut doc, node) = doc();
        let field = FieldDef::enumeration("visibility", ["UNSET", "PUBLIC", "PRIVATE"]);

        assert_eq!(field.read(&doc, node).unwrap(), Value::Enum("UNSET".into()));
        field
            .write(&mut doc, node, Value::Enum("PUBLIC".into()))
            .unwrap();
        assert_eq!(field.read(&doc, node).unwrap(), Value::Enum("PUBLIC".into()));
        assert!(field
            .write(&mut doc, node, Value::Enum("SIDEWAYS".into()))
            .is_err());

        doc.set_attribute(node, "visibility", "SIDEWAYS").unwrap();
        assert!(field.read(&doc, node).is_err());
    }

    #[test]
    fn test_read_only_field() {
        let (mut doc, node) = doc();
        let field = FieldDef::string("id").read_only();

        // Free to set while the attribute is absent...
        field.write(&mut doc, node, "first".into()).unwrap();
        // ...but not to overwrite it.
        assert!(field.write(&mut doc, node, "second".into()).is_err());
    }

    #[test]
    fn test_type_mismatch_fails_closed() {
        let (mut doc, node) = doc();
        let field = FieldDef::int("count");
        assert!(field.write(&mut doc, node, "three".into()).is_err());
        assert_eq!(doc.attribute(node, "count").unwrap(), None);
    }
}
