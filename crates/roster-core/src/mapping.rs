//! # Field Mappings
//!
//! Tenant-configured projection of raw source fields onto local fields.
//!
//! ```text
//! source { "FirstName": " Ann ", "Grade": "07", "Active": "Y" }
//!    │
//!    │  FirstName → first_name  (trim)
//!    │  Grade     → grade       (to_integer)
//!    │  Active    → active      (to_boolean)
//!    │  Email     → email       (required, default "unknown@example.org")
//!    ▼
//! local  { "active": true, "email": "unknown@example.org",
//!          "first_name": "Ann", "grade": 7 }
//! ```
//!
//! With no mappings configured the source payload is stored as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::MappingError;
use crate::types::SourceData;

/// A named pure transform applied to a mapped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Lowercase,
    Uppercase,
    Trim,
    ToString,
    ToInteger,
    ToBoolean,
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transform::Lowercase => "lowercase",
            Transform::Uppercase => "uppercase",
            Transform::Trim => "trim",
            Transform::ToString => "to_string",
            Transform::ToInteger => "to_integer",
            Transform::ToBoolean => "to_boolean",
        };
        f.write_str(s)
    }
}

impl Transform {
    /// Applies the transform. Null passes through untouched.
    pub fn apply(&self, field: &str, value: &Value) -> Result<Value, MappingError> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        let fail = |reason: String| MappingError::TransformFailed {
            field: field.to_string(),
            transform: self.to_string(),
            reason,
        };

        match self {
            Transform::Lowercase | Transform::Uppercase | Transform::Trim => {
                let s = value
                    .as_str()
                    .ok_or_else(|| fail(format!("expected a string, got {}", value)))?;
                let out = match self {
                    Transform::Lowercase => s.to_lowercase(),
                    Transform::Uppercase => s.to_uppercase(),
                    _ => s.trim().to_string(),
                };
                Ok(Value::String(out))
            }
            Transform::ToString => match value {
                Value::String(s) => Ok(Value::String(s.clone())),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(fail(format!("cannot stringify {}", other))),
            },
            Transform::ToInteger => match value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Ok(Value::from(i))
                    } else {
                        match n.as_f64() {
                            Some(f) if f.is_finite() && f.fract() == 0.0 => {
                                Ok(Value::from(f as i64))
                            }
                            _ => Err(fail(format!("{} is not an integer", n))),
                        }
                    }
                }
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|e| fail(format!("'{}': {}", s, e))),
                Value::Bool(b) => Ok(Value::from(i64::from(*b))),
                other => Err(fail(format!("cannot convert {} to integer", other))),
            },
            Transform::ToBoolean => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err(fail(format!("{} is not 0 or 1", n))),
                },
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "t" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
                    "false" | "f" | "no" | "n" | "0" => Ok(Value::Bool(false)),
                    _ => Err(fail(format!("'{}' is not a boolean", s))),
                },
                other => Err(fail(format!("cannot convert {} to boolean", other))),
            },
        }
    }
}

/// One `sourceField → targetField` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
    #[serde(default)]
    pub transform: Option<Transform>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
}

impl FieldMapping {
    pub fn new(source_field: impl Into<String>, target_field: impl Into<String>) -> Self {
        FieldMapping {
            source_field: source_field.into(),
            target_field: target_field.into(),
            transform: None,
            required: false,
            default_value: None,
        }
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Projects `source` through `mappings`.
///
/// ## Rules
/// - No mappings: identity
/// - Absent or null source value: `default_value` if set, else an error when
///   `required`, else the target field is omitted
/// - Transforms run on present values only; defaults are stored verbatim
pub fn apply_mappings(
    mappings: &[FieldMapping],
    source: &SourceData,
) -> Result<SourceData, MappingError> {
    if mappings.is_empty() {
        return Ok(source.clone());
    }

    let mut out = SourceData::new();
    for mapping in mappings {
        match source.get(&mapping.source_field).filter(|v| !v.is_null()) {
            Some(value) => {
                let mapped = match mapping.transform {
                    Some(t) => t.apply(&mapping.source_field, value)?,
                    None => value.clone(),
                };
                out.insert(mapping.target_field.clone(), mapped);
            }
            None => {
                if let Some(default) = &mapping.default_value {
                    out.insert(mapping.target_field.clone(), default.clone());
                } else if mapping.required {
                    return Err(MappingError::MissingRequiredField {
                        field: mapping.source_field.clone(),
                    });
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> SourceData {
        SourceData::from_value(json!({
            "FirstName": "  Ann ",
            "Email": "ANN@School.org",
            "Grade": "07",
            "Active": "Y",
            "Ignored": 1
        }))
        .unwrap()
    }

    #[test]
    fn test_identity_without_mappings() {
        assert_eq!(apply_mappings(&[], &source()).unwrap(), source());
    }

    #[test]
    fn test_mappings_with_transforms() {
        let mappings = vec![
            FieldMapping::new("FirstName", "first_name").transform(Transform::Trim),
            FieldMapping::new("Email", "email").transform(Transform::Lowercase),
            FieldMapping::new("Grade", "grade").transform(Transform::ToInteger),
            FieldMapping::new("Active", "active").transform(Transform::ToBoolean),
        ];

        let mapped = apply_mappings(&mappings, &source()).unwrap();
        assert_eq!(
            mapped.to_value(),
            json!({
                "first_name": "Ann",
                "email": "ann@school.org",
                "grade": 7,
                "active": true
            })
        );
    }

    #[test]
    fn test_required_and_defaults() {
        let missing = vec![FieldMapping::new("Phone", "phone").required()];
        assert_eq!(
            apply_mappings(&missing, &source()),
            Err(MappingError::MissingRequiredField {
                field: "Phone".into()
            })
        );

        let defaulted = vec![FieldMapping::new("Phone", "phone")
            .required()
            .default_value(json!("n/a"))];
        let mapped = apply_mappings(&defaulted, &source()).unwrap();
        assert_eq!(mapped.get("phone"), Some(&json!("n/a")));

        let optional = vec![FieldMapping::new("Phone", "phone")];
        assert!(apply_mappings(&optional, &source()).unwrap().is_empty());
    }

    #[test]
    fn test_transform_failures() {
        let err = Transform::ToInteger
            .apply("Grade", &json!("seventh"))
            .unwrap_err();
        assert!(matches!(err, MappingError::TransformFailed { .. }));

        assert!(Transform::Uppercase.apply("n", &json!(5)).is_err());
        assert_eq!(
            Transform::ToString.apply("n", &json!(5)).unwrap(),
            json!("5")
        );
        assert_eq!(
            Transform::ToInteger.apply("n", &json!(12.0)).unwrap(),
            json!(12)
        );
        assert_eq!(Transform::Trim.apply("n", &Value::Null).unwrap(), Value::Null);
    }
}
