//! Declarative component tables.
//!
//! Components can be described in a TOML document instead of the builder
//! API. Each `[components.<Type>]` table lists `fields` with a `name`, a
//! `type` string, and an optional `default`.
//!
//! Type strings: element types (`"f64"`, `"u8c"`, `"eid"`, ...), `"bool"`,
//! sub-arrays as `"[f32; 3]"`, and faux kinds `"string"`, `"number"`,
//! `"json"`, `"object"` (with a `properties` list), or `"[string]"`-style
//! faux arrays.

use crate::error::{Result, SimEcsError};
use crate::schema::types::{ComponentBuilder, ComponentSchema, ElementType, FauxKind};
use serde_json::Value;
use std::sync::Arc;

pub struct SchemaParser;

impl SchemaParser {
    /// Parses a TOML document into component schemas, in declaration order.
    pub fn from_string(toml_str: &str) -> Result<Vec<Arc<ComponentSchema>>> {
        let doc: toml::Value = toml::from_str(toml_str)
            .map_err(|e| SimEcsError::SchemaError(format!("TOML parse error: {}", e)))?;

        let components = doc
            .get("components")
            .and_then(|v| v.as_table())
            .ok_or_else(|| SimEcsError::SchemaError("Missing [components] section".into()))?;

        let mut schemas = Vec::with_capacity(components.len());
        for (type_name, config) in components {
            schemas.push(Self::parse_component(type_name, config)?);
        }
        Ok(schemas)
    }

    fn parse_component(type_name: &str, config: &toml::Value) -> Result<Arc<ComponentSchema>> {
        let mut builder = ComponentBuilder::new(type_name);

        let fields = config
            .get("fields")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for field in &fields {
            let name = field
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SimEcsError::SchemaError("Field missing 'name'".into()))?;
            let type_str = field
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SimEcsError::SchemaError("Field missing 'type'".into()))?;
            let default = field.get("default");

            builder = Self::parse_field(builder, name, type_str, default, field)?;
        }

        Ok(builder.build())
    }

    fn parse_field(
        builder: ComponentBuilder,
        name: &str,
        type_str: &str,
        default: Option<&toml::Value>,
        field: &toml::Value,
    ) -> Result<ComponentBuilder> {
        // Sub-array: "[elem; N]"
        if let Some(inner) = type_str
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .filter(|s| s.contains(';'))
        {
            let parts: Vec<&str> = inner.split(';').map(|p| p.trim()).collect();
            if parts.len() != 2 {
                return Err(SimEcsError::SchemaError(format!(
                    "Invalid sub-array type syntax: {}",
                    type_str
                )));
            }
            let element = ElementType::parse(parts[0])?;
            let length: usize = parts[1].parse().map_err(|_| {
                SimEcsError::SchemaError(format!("Invalid sub-array length: {}", parts[1]))
            })?;
            let defaults = match default {
                Some(toml::Value::Array(items)) => items
                    .iter()
                    .map(|v| toml_number(v))
                    .collect::<Result<Vec<f64>>>()?,
                Some(other) => {
                    return Err(SimEcsError::SchemaError(format!(
                        "Sub-array default must be an array, got {}",
                        other
                    )))
                }
                None => Vec::new(),
            };
            return Ok(builder.subarray(name, element, length, &defaults));
        }

        // Faux array: "[string]"
        if let Some(inner) = type_str.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let elem = Self::parse_faux_kind(inner.trim(), field)?;
            let default = default.map(toml_to_json).unwrap_or(Value::Null);
            return Ok(builder.faux(name, FauxKind::Array(Box::new(elem)), default));
        }

        match type_str {
            "bool" => {
                let d = default.and_then(|v| v.as_bool()).unwrap_or(false);
                Ok(builder.boolean(name, d))
            }
            "string" | "number" | "json" | "object" => {
                let kind = Self::parse_faux_kind(type_str, field)?;
                let default = default.map(toml_to_json).unwrap_or(Value::Null);
                Ok(builder.faux(name, kind, default))
            }
            elem => {
                let element = ElementType::parse(elem)?;
                let d = default.map(|v| toml_number(v)).transpose()?.unwrap_or(0.0);
                Ok(builder.scalar(name, element, d))
            }
        }
    }

    fn parse_faux_kind(type_str: &str, field: &toml::Value) -> Result<FauxKind> {
        match type_str {
            "string" => Ok(FauxKind::Str),
            "number" => Ok(FauxKind::Number),
            "bool" => Ok(FauxKind::Boolean),
            "json" => Ok(FauxKind::Json),
            "object" => {
                let props = field
                    .get("properties")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| {
                        SimEcsError::SchemaError(
                            "Object field requires a 'properties' list".into(),
                        )
                    })?;
                let mut sub = Vec::with_capacity(props.len());
                for p in props {
                    let sub_name = p
                        .get("name")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            SimEcsError::SchemaError("Object property missing 'name'".into())
                        })?;
                    let sub_type = p
                        .get("type")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            SimEcsError::SchemaError("Object property missing 'type'".into())
                        })?;
                    sub.push((sub_name.to_string(), Self::parse_faux_kind(sub_type, p)?));
                }
                Ok(FauxKind::Object(sub))
            }
            other => Err(SimEcsError::SchemaError(format!(
                "unknown faux type '{}'",
                other
            ))),
        }
    }
}

fn toml_number(v: &toml::Value) -> Result<f64> {
    match v {
        toml::Value::Integer(i) => Ok(*i as f64),
        toml::Value::Float(f) => Ok(*f),
        other => Err(SimEcsError::SchemaError(format!(
            "expected a number, got {}",
            other
        ))),
    }
}

fn toml_to_json(v: &toml::Value) -> Value {
    match v {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::PropertyType;

    #[test]
    fn parses_component_tables() -> Result<()> {
        let schemas = SchemaParser::from_string(
            r#"
            [components.Position]
            fields = [
                { name = "x", type = "f64" },
                { name = "y", type = "f64", default = 1.5 },
            ]

            [components.Velocity]
            fields = [
                { name = "xyz", type = "[f32; 3]", default = [1.0, 2.0, 3.0] },
            ]

            [components.Frozen]
            fields = []

            [components.Label]
            fields = [
                { name = "text", type = "string" },
                { name = "meta", type = "object", properties = [
                    { name = "author", type = "string" },
                    { name = "rev", type = "number" },
                ] },
            ]
            "#,
        )?;

        assert_eq!(schemas.len(), 4);
        let by_name = |n: &str| schemas.iter().find(|s| s.type_name() == n).unwrap();

        let position = by_name("Position");
        assert_eq!(position.properties().len(), 2);
        assert_eq!(
            position.property("y").unwrap().default,
            serde_json::json!(1.5)
        );

        let velocity = by_name("Velocity");
        match &velocity.property("xyz").unwrap().prop_type {
            PropertyType::SubArray { element, length } => {
                assert_eq!(*element, ElementType::F32);
                assert_eq!(*length, 3);
            }
            other => panic!("unexpected property type {:?}", other),
        }

        assert!(by_name("Frozen").is_tag());

        let label = by_name("Label");
        match &label.property("meta").unwrap().prop_type {
            PropertyType::Faux(FauxKind::Object(props)) => assert_eq!(props.len(), 2),
            other => panic!("unexpected property type {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn rejects_bad_type_strings() {
        let err = SchemaParser::from_string(
            r#"
            [components.Broken]
            fields = [ { name = "x", type = "quaternion" } ]
            "#,
        );
        assert!(err.is_err());
    }
}
