use crate::task::TaskId;
use crate::value::ValueType;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NshError {
    #[error("'{name}' not found in {location}")]
    NotFound { name: String, location: String },

    #[error("Property {name} not found, valid properties are: {}", .valid.join(","))]
    UnknownProperty { name: String, valid: Vec<String> },

    #[error("Property {0} is read-only")]
    ImmutableProperty(String),

    #[error("Invalid value '{value}' for {name}, allowed values are: {}", .allowed.join(", "))]
    InvalidChoice {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("Required properties not provided: {}", .0.join(", "))]
    MissingRequiredProperty(Vec<String>),

    #[error("{0}")]
    Arity(String),

    #[error("Cannot convert '{value}' to {target}")]
    TypeCoercion { value: String, target: ValueType },

    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    #[error("Call to {method} timed out after {}s", .timeout.as_secs())]
    Timeout { method: String, timeout: Duration },

    #[error("Task #{id} failed: {message}")]
    TaskFailed { id: TaskId, message: String },

    #[error("Invalid pipeline: {0}")]
    Composition(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("{0}")]
    Command(String),

    #[error("Invalid namespace definition: {0}")]
    Definition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NshError>;

impl NshError {
    pub fn not_found(name: impl Into<String>, location: impl Into<String>) -> Self {
        NshError::NotFound {
            name: name.into(),
            location: location.into(),
        }
    }

    pub fn coercion(value: impl Into<String>, target: ValueType) -> Self {
        NshError::TypeCoercion {
            value: value.into(),
            target,
        }
    }
}
