use crate::error::{Result, SimEcsError};
use crate::schema::validator::{schema_validator, OverrideValidator};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Numeric element types a dense column can hold.
///
/// `U8C` is a clamped byte: writes round to the nearest integer and clamp to
/// `0..=255` instead of casting. `Eid` is stored as `u32` and marks columns
/// holding entity references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    I8,
    U8,
    U8C,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
    Eid,
}

impl ElementType {
    /// Returns the width of one element in bytes.
    pub fn byte_width(&self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 | ElementType::U8C => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 | ElementType::Eid => 4,
            ElementType::F64 => 8,
        }
    }

    /// Returns true for columns holding entity references.
    pub fn is_eid(&self) -> bool {
        matches!(self, ElementType::Eid)
    }

    /// Smallest unsigned type able to index a sub-array of `length` elements.
    /// Cached on sub-array columns and used to compress dirty-index lists.
    pub fn index_type_for(length: usize) -> ElementType {
        if length <= u8::MAX as usize {
            ElementType::U8
        } else if length <= u16::MAX as usize {
            ElementType::U16
        } else {
            ElementType::U32
        }
    }

    /// Parses the schema-table spelling of an element type.
    pub fn parse(s: &str) -> Result<ElementType> {
        match s {
            "i8" => Ok(ElementType::I8),
            "u8" => Ok(ElementType::U8),
            "u8c" => Ok(ElementType::U8C),
            "i16" => Ok(ElementType::I16),
            "u16" => Ok(ElementType::U16),
            "i32" => Ok(ElementType::I32),
            "u32" => Ok(ElementType::U32),
            "f32" => Ok(ElementType::F32),
            "f64" => Ok(ElementType::F64),
            "eid" => Ok(ElementType::Eid),
            other => Err(SimEcsError::SchemaError(format!(
                "unknown element type '{}'",
                other
            ))),
        }
    }
}

/// Shape of a keyed ("faux") property value.
///
/// Faux columns hold values the columnar layout cannot express. The declared
/// kind selects the inline wire encoding; kinds that cannot be encoded inline
/// travel out-of-band in the complex-data buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FauxKind {
    /// Latin-1 string of at most 255 characters.
    Str,
    /// An f64.
    Number,
    /// A boolean byte.
    Boolean,
    /// An object with a declared, ordered property set.
    Object(Vec<(String, FauxKind)>),
    /// A homogeneous array of the given element kind.
    Array(Box<FauxKind>),
    /// Opaque JSON; always serialized out-of-band.
    Json,
}

impl FauxKind {
    /// True for kinds with a fixed inline scalar encoding.
    pub fn is_primitive(&self) -> bool {
        matches!(self, FauxKind::Str | FauxKind::Number | FauxKind::Boolean)
    }

    /// An object is shallow-simple when every sub-property is primitive;
    /// such objects are encoded inline per-property in key order.
    pub fn is_shallow_simple(&self) -> bool {
        match self {
            FauxKind::Object(props) => props.iter().all(|(_, k)| k.is_primitive()),
            _ => false,
        }
    }

    /// True when values of this kind are encoded inline in the entities block.
    pub fn is_inline(&self) -> bool {
        match self {
            FauxKind::Str | FauxKind::Number | FauxKind::Boolean => true,
            FauxKind::Object(_) => self.is_shallow_simple(),
            FauxKind::Array(elem) => elem.is_primitive(),
            FauxKind::Json => false,
        }
    }
}

/// Storage class of one component property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyType {
    /// One dense element per entity.
    Scalar(ElementType),
    /// A u8 column projected to `true`/`false` on read.
    Boolean,
    /// A fixed-length slice per entity, backed by a shared buffer.
    SubArray { element: ElementType, length: usize },
    /// An eid-keyed value map.
    Faux(FauxKind),
}

/// A single property descriptor: key, storage class, and default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub key: String,
    pub prop_type: PropertyType,
    /// Applied on `add_component` when the overrides omit this key.
    /// `Null` means "no default beyond the zeroed row".
    pub default: Value,
}

/// A component schema: globally-unique type name plus ordered property
/// descriptors and a precomputed override validator.
///
/// Schemas are registered with a [`Registry`](crate::registry::Registry) and
/// frozen when the first world is created; the freeze assigns each schema a
/// stable `index`, sorted by type name.
pub struct ComponentSchema {
    type_name: String,
    properties: Vec<PropertyDef>,
    validator: Box<dyn OverrideValidator>,
    index: OnceCell<usize>,
}

impl std::fmt::Debug for ComponentSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentSchema")
            .field("type_name", &self.type_name)
            .field("properties", &self.properties)
            .field("index", &self.index.get())
            .finish()
    }
}

impl ComponentSchema {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.key == key)
    }

    /// A schema with no properties is a tag component: membership lives only
    /// in the entity bitmasks.
    pub fn is_tag(&self) -> bool {
        self.properties.is_empty()
    }

    /// Stable index assigned at registry freeze; `None` before that.
    pub fn index(&self) -> Option<usize> {
        self.index.get().copied()
    }

    pub(crate) fn assign_index(&self, index: usize) {
        // A second freeze of the same registry re-assigns the same value.
        let _ = self.index.set(index);
    }

    pub fn validator(&self) -> &dyn OverrideValidator {
        self.validator.as_ref()
    }
}

/// Override map builder for `add_component`.
///
/// Values are projected to JSON through `serde` on the way in, which is
/// how value objects participate in validation and storage.
#[derive(Debug, Clone, Default)]
pub struct Overrides(serde_json::Map<String, Value>);

impl Overrides {
    pub fn new() -> Overrides {
        Overrides::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl serde::Serialize) -> Overrides {
        self.0.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        self
    }

    pub fn into_map(self) -> serde_json::Map<String, Value> {
        self.0
    }
}

/// Builder for [`ComponentSchema`]; the `build()` output is shared via `Arc`.
///
/// ```
/// use simecs::schema::{ComponentBuilder, ElementType};
///
/// let position = ComponentBuilder::new("Position")
///     .scalar("x", ElementType::F64, 0.0)
///     .scalar("y", ElementType::F64, 0.0)
///     .build();
/// assert_eq!(position.type_name(), "Position");
/// ```
pub struct ComponentBuilder {
    type_name: String,
    properties: Vec<PropertyDef>,
    validator: Option<Box<dyn OverrideValidator>>,
}

impl ComponentBuilder {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: Vec::new(),
            validator: None,
        }
    }

    /// Adds a dense scalar column.
    pub fn scalar(mut self, key: impl Into<String>, element: ElementType, default: f64) -> Self {
        self.properties.push(PropertyDef {
            key: key.into(),
            prop_type: PropertyType::Scalar(element),
            default: if default == 0.0 {
                Value::Null
            } else {
                serde_json::json!(default)
            },
        });
        self
    }

    /// Adds a boolean column (u8 storage, bool projection).
    pub fn boolean(mut self, key: impl Into<String>, default: bool) -> Self {
        self.properties.push(PropertyDef {
            key: key.into(),
            prop_type: PropertyType::Boolean,
            default: if default { Value::Bool(true) } else { Value::Null },
        });
        self
    }

    /// Adds a fixed-length sub-array column sharing the per-type backing
    /// buffer. `defaults` may be shorter than `length`; the rest stays zero.
    pub fn subarray(
        mut self,
        key: impl Into<String>,
        element: ElementType,
        length: usize,
        defaults: &[f64],
    ) -> Self {
        let default = if defaults.iter().all(|v| *v == 0.0) {
            Value::Null
        } else {
            Value::Array(defaults.iter().map(|v| serde_json::json!(v)).collect())
        };
        self.properties.push(PropertyDef {
            key: key.into(),
            prop_type: PropertyType::SubArray {
                element,
                length,
            },
            default,
        });
        self
    }

    /// Adds an eid-keyed faux column of the declared kind.
    pub fn faux(mut self, key: impl Into<String>, kind: FauxKind, default: Value) -> Self {
        self.properties.push(PropertyDef {
            key: key.into(),
            prop_type: PropertyType::Faux(kind),
            default,
        });
        self
    }

    /// Installs a custom override validator in place of the schema-derived one.
    pub fn validator(mut self, validator: Box<dyn OverrideValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn build(self) -> Arc<ComponentSchema> {
        let validator = self
            .validator
            .unwrap_or_else(|| schema_validator(&self.type_name, &self.properties));
        Arc::new(ComponentSchema {
            type_name: self.type_name,
            properties: self.properties,
            validator,
            index: OnceCell::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_widths() {
        assert_eq!(ElementType::I8.byte_width(), 1);
        assert_eq!(ElementType::U16.byte_width(), 2);
        assert_eq!(ElementType::Eid.byte_width(), 4);
        assert_eq!(ElementType::F64.byte_width(), 8);
    }

    #[test]
    fn index_type_boundaries() {
        assert_eq!(ElementType::index_type_for(255), ElementType::U8);
        assert_eq!(ElementType::index_type_for(256), ElementType::U16);
        assert_eq!(ElementType::index_type_for(65535), ElementType::U16);
        assert_eq!(ElementType::index_type_for(65536), ElementType::U32);
    }

    #[test]
    fn shallow_simple_objects() {
        let simple = FauxKind::Object(vec![
            ("a".into(), FauxKind::Number),
            ("b".into(), FauxKind::Str),
        ]);
        assert!(simple.is_shallow_simple());
        assert!(simple.is_inline());

        let nested = FauxKind::Object(vec![(
            "inner".into(),
            FauxKind::Object(vec![("x".into(), FauxKind::Number)]),
        )]);
        assert!(!nested.is_shallow_simple());
        assert!(!nested.is_inline());

        assert!(FauxKind::Array(Box::new(FauxKind::Number)).is_inline());
        assert!(!FauxKind::Array(Box::new(FauxKind::Json)).is_inline());
    }

    #[test]
    fn tag_schema_has_no_properties() {
        let tag = ComponentBuilder::new("Frozen").build();
        assert!(tag.is_tag());
        assert!(tag.index().is_none());
    }
}
