//! Override validation.
//!
//! Validation is a pluggable boundary: any implementation of
//! [`OverrideValidator`] can be attached to a schema. The default validator
//! is derived from the schema's property descriptors at build time.

use crate::error::ValidationIssue;
use crate::schema::types::{FauxKind, PropertyDef, PropertyType};
use serde_json::{Map, Value};

/// Validates component overrides before they are written into a store.
pub trait OverrideValidator: Send + Sync {
    /// Returns the list of rejected overrides, or `Ok(())` when all pass.
    fn validate(&self, overrides: &Map<String, Value>) -> Result<(), Vec<ValidationIssue>>;
}

/// Builds the default schema-derived validator for a property set.
pub fn schema_validator(type_name: &str, properties: &[PropertyDef]) -> Box<dyn OverrideValidator> {
    Box::new(SchemaRules {
        type_name: type_name.to_string(),
        properties: properties.to_vec(),
    })
}

struct SchemaRules {
    type_name: String,
    properties: Vec<PropertyDef>,
}

impl OverrideValidator for SchemaRules {
    fn validate(&self, overrides: &Map<String, Value>) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        for (key, value) in overrides {
            // `type` is reserved and silently skipped by the write path.
            if key == "type" {
                continue;
            }
            match self.properties.iter().find(|p| &p.key == key) {
                None => issues.push(ValidationIssue {
                    key: key.clone(),
                    message: format!("unknown property on component {}", self.type_name),
                }),
                Some(prop) => check_value(key, &prop.prop_type, value, &mut issues),
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn check_value(key: &str, prop_type: &PropertyType, value: &Value, issues: &mut Vec<ValidationIssue>) {
    match prop_type {
        PropertyType::Scalar(_) => {
            if !value.is_number() {
                issues.push(issue(key, "expected a number"));
            }
        }
        PropertyType::Boolean => {
            let ok = value.is_boolean()
                || value.as_u64().map(|n| n <= 1).unwrap_or(false);
            if !ok {
                issues.push(issue(key, "expected a boolean"));
            }
        }
        PropertyType::SubArray { length, .. } => match value.as_array() {
            None => issues.push(issue(key, "expected an array of numbers")),
            Some(items) => {
                if items.len() > *length {
                    issues.push(ValidationIssue {
                        key: key.to_string(),
                        message: format!(
                            "array of {} elements exceeds declared length {}",
                            items.len(),
                            length
                        ),
                    });
                }
                if items.iter().any(|v| !v.is_number()) {
                    issues.push(issue(key, "expected numeric array elements"));
                }
            }
        },
        PropertyType::Faux(kind) => check_faux(key, kind, value, issues),
    }
}

fn check_faux(key: &str, kind: &FauxKind, value: &Value, issues: &mut Vec<ValidationIssue>) {
    // Faux values are nullable.
    if value.is_null() {
        return;
    }
    match kind {
        FauxKind::Str => match value.as_str() {
            None => issues.push(issue(key, "expected a string")),
            Some(s) => {
                if s.chars().count() > 255 {
                    issues.push(issue(key, "string longer than 255 characters"));
                }
            }
        },
        FauxKind::Number => {
            if !value.is_number() {
                issues.push(issue(key, "expected a number"));
            }
        }
        FauxKind::Boolean => {
            if !value.is_boolean() {
                issues.push(issue(key, "expected a boolean"));
            }
        }
        FauxKind::Object(props) => match value.as_object() {
            None => issues.push(issue(key, "expected an object")),
            Some(obj) => {
                for (sub_key, sub_value) in obj {
                    match props.iter().find(|(k, _)| k == sub_key) {
                        None => issues.push(ValidationIssue {
                            key: format!("{}.{}", key, sub_key),
                            message: "undeclared object property".to_string(),
                        }),
                        Some((_, sub_kind)) => check_faux(
                            &format!("{}.{}", key, sub_key),
                            sub_kind,
                            sub_value,
                            issues,
                        ),
                    }
                }
            }
        },
        FauxKind::Array(elem) => match value.as_array() {
            None => issues.push(issue(key, "expected an array")),
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    check_faux(&format!("{}[{}]", key, i), elem, item, issues);
                }
            }
        },
        // Opaque JSON accepts anything serde_json can hold.
        FauxKind::Json => {}
    }
}

fn issue(key: &str, message: &str) -> ValidationIssue {
    ValidationIssue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{ComponentBuilder, ElementType};
    use serde_json::json;

    fn overrides(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn accepts_matching_overrides() {
        let schema = ComponentBuilder::new("Body")
            .scalar("mass", ElementType::F64, 1.0)
            .boolean("fixed", false)
            .subarray("extents", ElementType::F32, 3, &[])
            .faux("label", FauxKind::Str, Value::Null)
            .build();

        let ok = overrides(json!({
            "mass": 2.5,
            "fixed": true,
            "extents": [1.0, 2.0],
            "label": "crate",
        }));
        assert!(schema.validator().validate(&ok).is_ok());
    }

    #[test]
    fn rejects_unknown_keys_and_bad_types() {
        let schema = ComponentBuilder::new("Body")
            .scalar("mass", ElementType::F64, 1.0)
            .subarray("extents", ElementType::F32, 2, &[])
            .build();

        let bad = overrides(json!({
            "mass": "heavy",
            "extents": [1.0, 2.0, 3.0],
            "bogus": 1,
        }));
        let errors = schema.validator().validate(&bad).unwrap_err();
        let keys: Vec<&str> = errors.iter().map(|e| e.key.as_str()).collect();
        assert!(keys.contains(&"mass"));
        assert!(keys.contains(&"extents"));
        assert!(keys.contains(&"bogus"));
    }

    #[test]
    fn reserved_type_key_is_skipped() {
        let schema = ComponentBuilder::new("Tag").build();
        let with_type = overrides(json!({ "type": "Tag" }));
        assert!(schema.validator().validate(&with_type).is_ok());
    }

    #[test]
    fn faux_object_checks_declared_subproperties() {
        let schema = ComponentBuilder::new("Meta")
            .faux(
                "info",
                FauxKind::Object(vec![
                    ("name".into(), FauxKind::Str),
                    ("score".into(), FauxKind::Number),
                ]),
                Value::Null,
            )
            .build();

        let ok = overrides(json!({ "info": { "name": "a", "score": 1.0 } }));
        assert!(schema.validator().validate(&ok).is_ok());

        let bad = overrides(json!({ "info": { "name": 1, "extra": true } }));
        let errors = schema.validator().validate(&bad).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
