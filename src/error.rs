use thiserror::Error;

/// A single rejected override reported by a validator.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Property key the issue is about, or empty for schema-level issues.
    pub key: String,
    /// Human-readable description of what was rejected.
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.key, self.message)
        }
    }
}

#[derive(Error, Debug)]
pub enum SimEcsError {
    #[error("Entity capacity exceeded: eid {eid} does not fit in a world of size {size}")]
    CapacityExceeded { eid: u32, size: u32 },

    #[error("Entity reference is unset")]
    EntityUndefined,

    #[error("Entity not found: {0}")]
    EntityMissing(u32),

    #[error("Component schema is null or unregistered")]
    ComponentNull,

    #[error("Validation failed for component {component}: {}", .errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Validation {
        component: String,
        overrides: serde_json::Map<String, serde_json::Value>,
        errors: Vec<ValidationIssue>,
    },

    #[error("Unsupported property type tag for {component}.{key}")]
    UnsupportedTypeTag { component: String, key: String },

    #[error("Serializer version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u16, found: u16 },

    #[error("Cannot apply a delta buffer before a baseline snapshot has been applied")]
    DeltaWithoutBaseline,

    #[error("Cannot define {0} after the registry has been frozen")]
    DefineAfterFreeze(String),

    #[error("Unknown component type: {0}")]
    UnknownComponentType(String),

    #[error("Unknown property {key} on component {component}")]
    UnknownProperty { component: String, key: String },

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("JSON error: {0}")]
    JsonError(String),
}

pub type Result<T> = std::result::Result<T, SimEcsError>;
