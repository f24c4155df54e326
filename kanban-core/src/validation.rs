//! Structural validation of operation parameters.
//!
//! Each [`OperationDescriptor`](crate::descriptor::OperationDescriptor) carries a
//! [`ParamSchema`]. Validation runs before the orchestrator touches the cache or
//! any backend and reports every offending field at once.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::descriptor::Registry;
use crate::error::GatewayError;

// ── Error types ────────────────────────────────────────────

/// A field-level validation error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: &str) -> Self {
        FieldError {
            field: field.into(),
            message: message.into(),
            code: code.to_string(),
        }
    }
}

// ── Schema ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
}

/// Declaration of a single parameter.
///
/// Built fluently:
///
/// ```
/// use kanban_core::validation::FieldSpec;
///
/// let sku = FieldSpec::string("sku").required().len(1, 50);
/// let qty = FieldSpec::integer("qty").required().range(1, 100_000);
/// assert!(sku.required && qty.required);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hex: bool,
}

impl FieldSpec {
    fn new(name: &'static str, ty: FieldType) -> Self {
        FieldSpec {
            name,
            ty,
            required: false,
            default: None,
            min_len: None,
            max_len: None,
            one_of: Vec::new(),
            min: None,
            max: None,
            hex: false,
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn integer(name: &'static str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value used when the field is absent or null.
    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Inclusive character-count bounds, applied after trimming.
    pub fn len(mut self, min: usize, max: usize) -> Self {
        self.min_len = Some(min);
        self.max_len = Some(max);
        self
    }

    pub fn one_of(mut self, allowed: &[&'static str]) -> Self {
        self.one_of = allowed.to_vec();
        self
    }

    /// Inclusive integer bounds.
    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Restrict a string to hexadecimal digits.
    pub fn hex(mut self) -> Self {
        self.hex = true;
        self
    }

    fn check(&self, value: &Value, errors: &mut Vec<FieldError>) -> Option<Value> {
        match self.ty {
            FieldType::String => {
                let Some(s) = value.as_str() else {
                    errors.push(FieldError::new(self.name, "must be a string", "type"));
                    return None;
                };
                let s = s.trim();
                let len = s.chars().count();
                if let Some(min) = self.min_len {
                    if len < min {
                        let msg = if min == 1 {
                            "must not be empty".to_string()
                        } else {
                            format!("must be at least {min} characters")
                        };
                        errors.push(FieldError::new(self.name, msg, "length"));
                        return None;
                    }
                }
                if let Some(max) = self.max_len {
                    if len > max {
                        errors.push(FieldError::new(
                            self.name,
                            format!("must be at most {max} characters"),
                            "length",
                        ));
                        return None;
                    }
                }
                if !self.one_of.is_empty() && !self.one_of.contains(&s) {
                    errors.push(FieldError::new(
                        self.name,
                        format!("must be one of {}", self.one_of.join(", ")),
                        "one_of",
                    ));
                    return None;
                }
                if self.hex && !s.chars().all(|c| c.is_ascii_hexdigit()) {
                    errors.push(FieldError::new(
                        self.name,
                        "must contain only hexadecimal digits",
                        "charset",
                    ));
                    return None;
                }
                Some(Value::String(s.to_string()))
            }
            FieldType::Integer => {
                let Some(i) = value.as_i64() else {
                    errors.push(FieldError::new(self.name, "must be an integer", "type"));
                    return None;
                };
                let below = self.min.is_some_and(|min| i < min);
                let above = self.max.is_some_and(|max| i > max);
                if below || above {
                    let msg = match (self.min, self.max) {
                        (Some(min), Some(max)) => format!("must be between {min} and {max}"),
                        (Some(min), None) => format!("must be at least {min}"),
                        (None, Some(max)) => format!("must be at most {max}"),
                        (None, None) => "is out of range".to_string(),
                    };
                    errors.push(FieldError::new(self.name, msg, "range"));
                    return None;
                }
                Some(Value::from(i))
            }
            FieldType::Boolean => match value {
                Value::Bool(b) => Some(Value::Bool(*b)),
                _ => {
                    errors.push(FieldError::new(self.name, "must be a boolean", "type"));
                    None
                }
            },
        }
    }
}

/// The declared parameter set of one operation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ParamSchema {
    fields: Vec<FieldSpec>,
}

impl ParamSchema {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(fields: Vec<FieldSpec>) -> Self {
        ParamSchema { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Check `raw` against this schema, returning the normalised parameters.
    ///
    /// `null` is accepted as "no parameters". Strings are trimmed, defaults are
    /// applied, unknown fields are rejected.
    pub fn validate(&self, raw: &Value) -> Result<TypedParams, GatewayError> {
        let empty = Map::new();
        let input = match raw {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => {
                return Err(GatewayError::validation(
                    "params",
                    "must be a JSON object",
                    "type",
                ))
            }
        };

        let mut errors = Vec::new();
        let mut out = Map::new();

        for key in input.keys() {
            if !self.fields.iter().any(|f| f.name == key) {
                errors.push(FieldError::new(key.as_str(), "is not a known parameter", "unknown_field"));
            }
        }

        for spec in &self.fields {
            match input.get(spec.name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &spec.default {
                        out.insert(spec.name.to_string(), default.clone());
                    } else if spec.required {
                        errors.push(FieldError::new(spec.name, "is required", "required"));
                    }
                }
                Some(value) => {
                    if let Some(v) = spec.check(value, &mut errors) {
                        out.insert(spec.name.to_string(), v);
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(TypedParams(out))
        } else {
            Err(GatewayError::Validation(errors))
        }
    }
}

// ── Validated parameters ───────────────────────────────────

/// Parameters that passed schema validation.
///
/// Accessors for required fields return `InternalFault` when the field is
/// missing, since validation guarantees its presence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedParams(Map<String, Value>);

impl TypedParams {
    /// Wrap an already-checked object, e.g. in adapter tests.
    pub fn from_map(map: Map<String, Value>) -> Self {
        TypedParams(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    pub fn require_str(&self, name: &str) -> Result<&str, GatewayError> {
        self.str(name)
            .ok_or_else(|| GatewayError::internal(format!("validated parameter '{name}' is missing")))
    }

    pub fn require_int(&self, name: &str) -> Result<i64, GatewayError> {
        self.int(name)
            .ok_or_else(|| GatewayError::internal(format!("validated parameter '{name}' is missing")))
    }

    /// The parameters as a JSON object (used for cache keys and logging).
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Validate `raw` for the named operation.
///
/// An unknown operation is itself a validation failure on the `operation` field.
pub fn validate(registry: &Registry, operation: &str, raw: &Value) -> Result<TypedParams, GatewayError> {
    let descriptor = registry.get(operation).ok_or_else(|| {
        GatewayError::validation(
            "operation",
            format!("unknown operation '{operation}'"),
            "unknown_operation",
        )
    })?;
    descriptor.schema.validate(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stock_schema() -> ParamSchema {
        ParamSchema::new(vec![
            FieldSpec::string("sku").required().len(1, 50),
            FieldSpec::integer("qty").required().range(1, 100_000),
        ])
    }

    #[test]
    fn accepts_valid_params() {
        let params = stock_schema().validate(&json!({"sku": " X1 ", "qty": 5})).unwrap();
        assert_eq!(params.str("sku"), Some("X1"));
        assert_eq!(params.int("qty"), Some(5));
    }

    #[test]
    fn collects_every_error() {
        let err = stock_schema()
            .validate(&json!({"qty": 0, "colour": "red"}))
            .unwrap_err();
        let GatewayError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        let codes: Vec<_> = errors.iter().map(|e| (e.field.as_str(), e.code.as_str())).collect();
        assert!(codes.contains(&("sku", "required")));
        assert!(codes.contains(&("qty", "range")));
        assert!(codes.contains(&("colour", "unknown_field")));
    }

    #[test]
    fn rejects_non_object() {
        let err = stock_schema().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationError);
    }

    #[test]
    fn applies_defaults() {
        let schema = ParamSchema::new(vec![FieldSpec::integer("status").range(0, 1).default(json!(0))]);
        let params = schema.validate(&Value::Null).unwrap();
        assert_eq!(params.int("status"), Some(0));
    }

    #[test]
    fn enforces_one_of_and_hex() {
        let schema = ParamSchema::new(vec![
            FieldSpec::string("art_supplier").one_of(&["OKB", "RKB", "SW"]),
            FieldSpec::string("preferred_tag_id").len(24, 24).hex(),
        ]);
        assert!(schema.validate(&json!({"art_supplier": "XYZ"})).is_err());
        assert!(schema
            .validate(&json!({"preferred_tag_id": "ZZZZZZZZZZZZZZZZZZZZZZZZ"}))
            .is_err());
        assert!(schema
            .validate(&json!({"art_supplier": "SW", "preferred_tag_id": "0123456789ABCDEF01234567"}))
            .is_ok());
    }

    #[test]
    fn rejects_float_for_integer() {
        let err = stock_schema().validate(&json!({"sku": "X1", "qty": 1.5})).unwrap_err();
        assert!(err.to_string().contains("qty: must be an integer"));
    }
}
