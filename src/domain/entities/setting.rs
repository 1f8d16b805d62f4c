//! Plugin setting descriptors
//!
//! A setting's current value must satisfy its declared type, options and
//! bounds at all times. Every mutation goes through [`SettingDescriptor::set_value`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::application::errors::SettingError;

/// Declared type of a plugin setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Boolean,
    String,
    Choice,
    Numeric,
}

impl SettingType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "boolean" | "bool" => Some(SettingType::Boolean),
            "string" | "str" | "text" => Some(SettingType::String),
            "choice" | "enum" => Some(SettingType::Choice),
            "numeric" | "number" | "int" | "float" => Some(SettingType::Numeric),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SettingType::Boolean => "boolean",
            SettingType::String => "string",
            SettingType::Choice => "choice",
            SettingType::Numeric => "numeric",
        }
    }
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value held by a setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Encode for the settings table
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    fn type_name(&self) -> &str {
        match self {
            SettingValue::Bool(_) => "boolean",
            SettingValue::Number(_) => "number",
            SettingValue::Text(_) => "string",
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Number(n) => write!(f, "{}", n),
            SettingValue::Text(s) => f.write_str(s),
        }
    }
}

/// A single configurable setting declared by a plugin manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingDescriptor {
    pub key: String,
    pub setting_type: SettingType,
    value: SettingValue,
    pub options: Vec<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub max_length: Option<usize>,
    pub label: Option<String>,
    pub description: Option<String>,
}

impl SettingDescriptor {
    pub fn new(key: impl Into<String>, setting_type: SettingType) -> Self {
        let value = match setting_type {
            SettingType::Boolean => SettingValue::Bool(false),
            SettingType::Numeric => SettingValue::Number(0.0),
            SettingType::String | SettingType::Choice => SettingValue::Text(String::new()),
        };
        Self {
            key: key.into(),
            setting_type,
            value,
            options: Vec::new(),
            min: None,
            max: None,
            max_length: None,
            label: None,
            description: None,
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        if self.setting_type == SettingType::Choice {
            if let Some(first) = options.first() {
                self.value = SettingValue::Text(first.clone());
            }
        }
        self.options = options;
        self
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        if self.setting_type == SettingType::Numeric {
            let mut start = min.unwrap_or(0.0);
            if let Some(max) = max {
                start = start.min(max);
            }
            self.value = SettingValue::Number(start);
        }
        self
    }

    pub fn with_max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_label(mut self, label: Option<String>, description: Option<String>) -> Self {
        self.label = label;
        self.description = description;
        self
    }

    pub fn value(&self) -> &SettingValue {
        &self.value
    }

    /// Problems with the declaration itself, independent of the value
    pub fn schema_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.setting_type {
            SettingType::Boolean => {
                if !self.options.is_empty() {
                    errors.push("options are not allowed for boolean settings".to_string());
                }
            }
            SettingType::Choice => {
                if self.options.is_empty() {
                    errors.push("choice settings need a non-empty options list".to_string());
                }
                if self.options.iter().any(|o| o.trim().is_empty()) {
                    errors.push("options cannot be empty".to_string());
                }
            }
            SettingType::Numeric => {
                if let (Some(min), Some(max)) = (self.min, self.max) {
                    if min > max {
                        errors.push(format!("min ({}) is greater than max ({})", min, max));
                    }
                }
            }
            SettingType::String => {}
        }

        if self.setting_type != SettingType::Numeric && (self.min.is_some() || self.max.is_some()) {
            errors.push("min/max are only allowed for numeric settings".to_string());
        }

        errors
    }

    /// Check a candidate value against type, options and bounds
    pub fn check(&self, value: &SettingValue) -> Result<(), String> {
        match (self.setting_type, value) {
            (SettingType::Boolean, SettingValue::Bool(_)) => Ok(()),
            (SettingType::String, SettingValue::Text(s)) => match self.max_length {
                Some(max) if s.chars().count() > max => {
                    Err(format!("value is longer than {} characters", max))
                }
                _ => Ok(()),
            },
            (SettingType::Choice, SettingValue::Text(s)) => {
                if self.options.iter().any(|o| o == s) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not one of: {}", s, self.options.join(", ")))
                }
            }
            (SettingType::Numeric, SettingValue::Number(n)) => {
                if !n.is_finite() {
                    return Err("value must be a finite number".to_string());
                }
                if let Some(min) = self.min {
                    if *n < min {
                        return Err(format!("value {} is below minimum {}", n, min));
                    }
                }
                if let Some(max) = self.max {
                    if *n > max {
                        return Err(format!("value {} is above maximum {}", n, max));
                    }
                }
                Ok(())
            }
            (expected, got) => Err(format!(
                "expected a {} value, got {}",
                expected,
                got.type_name()
            )),
        }
    }

    /// Replace the value, rejecting anything that violates the declaration
    pub fn set_value(&mut self, value: SettingValue) -> Result<(), SettingError> {
        self.check(&value).map_err(|reason| SettingError::InvalidValue {
            key: self.key.clone(),
            reason,
        })?;
        self.value = value;
        Ok(())
    }

    /// Parse user-provided text according to the declared type
    pub fn parse_value(&self, raw: &str) -> Result<SettingValue, SettingError> {
        let raw = raw.trim();
        let invalid = |reason: String| SettingError::InvalidValue {
            key: self.key.clone(),
            reason,
        };

        match self.setting_type {
            SettingType::Boolean => match raw.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(SettingValue::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(SettingValue::Bool(false)),
                other => Err(invalid(format!("'{}' is not a boolean", other))),
            },
            SettingType::Numeric => raw
                .parse::<f64>()
                .map(SettingValue::Number)
                .map_err(|_| invalid(format!("'{}' is not a number", raw))),
            SettingType::String | SettingType::Choice => Ok(SettingValue::Text(raw.to_string())),
        }
    }
}
