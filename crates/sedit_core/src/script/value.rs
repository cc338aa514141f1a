//! Runtime values for sedit scripts.

use serde_json::Value as JsonValue;
use std::fmt::{Display, Formatter};

/// One script value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    /// Stable type name used in runtime error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
        }
    }

    /// Truthiness used by `if`, `while`, `and`, `or` and `not`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(value) => *value,
            Self::Int(value) => *value != 0,
            Self::Str(value) => !value.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Converts into a settings/event payload value.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Nil => JsonValue::Null,
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Int(value) => JsonValue::from(*value),
            Self::Str(value) => JsonValue::String(value.clone()),
        }
    }

    /// Converts a settings/event payload value.
    ///
    /// Floats that are not integral, arrays and objects have no script
    /// representation and arrive as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Nil,
            JsonValue::Bool(value) => Self::Bool(*value),
            JsonValue::Number(number) => match number.as_i64() {
                Some(value) => Self::Int(value),
                None => Self::Str(number.to_string()),
            },
            JsonValue::String(value) => Self::Str(value.clone()),
            other => Self::Str(other.to_string()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
