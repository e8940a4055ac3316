use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::ArticleError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyValue {
    Text(String),
    Flag(bool),
}

impl PropertyValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "string",
            Self::Flag(_) => "bool",
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Flag(true) => f.write_str("ON"),
            Self::Flag(false) => f.write_str("OFF"),
        }
    }
}

/// Parse one of the accepted boolean tokens. An empty string reads as off.
pub fn parse_flag(token: &str) -> Option<bool> {
    match token.trim() {
        "ON" | "on" => Some(true),
        "OFF" | "off" | "" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    name: &'static str,
    default: PropertyValue,
    value: Option<PropertyValue>,
}

impl Property {
    pub fn new(name: &'static str, default: impl Into<PropertyValue>) -> Self {
        Self {
            name,
            default: default.into(),
            value: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> &PropertyValue {
        &self.default
    }

    /// The set value, or the default when nothing was set.
    pub fn value(&self) -> &PropertyValue {
        self.value.as_ref().unwrap_or(&self.default)
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    pub fn set_value(&mut self, value: impl Into<PropertyValue>) -> Result<(), ArticleError> {
        let value = value.into();
        let normalized = match (&self.default, value) {
            (PropertyValue::Text(_), PropertyValue::Text(text)) => {
                PropertyValue::Text(text.trim().to_string())
            }
            (PropertyValue::Flag(_), PropertyValue::Flag(flag)) => PropertyValue::Flag(flag),
            (PropertyValue::Flag(_), PropertyValue::Text(text)) => match parse_flag(&text) {
                Some(flag) => PropertyValue::Flag(flag),
                None => return Err(self.mismatch(&PropertyValue::Text(text))),
            },
            (PropertyValue::Text(_), other) => return Err(self.mismatch(&other)),
        };
        self.value = Some(normalized);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.value = None;
    }

    /// Text content, empty for flags.
    pub fn as_text(&self) -> &str {
        match self.value() {
            PropertyValue::Text(text) => text,
            PropertyValue::Flag(_) => "",
        }
    }

    /// Flag content, `false` for text properties.
    pub fn as_flag(&self) -> bool {
        matches!(self.value(), PropertyValue::Flag(true))
    }

    fn mismatch(&self, got: &PropertyValue) -> ArticleError {
        ArticleError::TypeMismatch {
            name: self.name.to_string(),
            expected: self.default.kind(),
            got: got.to_string(),
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.value(), f)
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value() == other.value()
    }
}

impl Eq for Property {}

impl Hash for Property {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.value().hash(state);
    }
}
