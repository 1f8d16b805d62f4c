//! Plugin manifest (`plugin.toml`) parsing and validation
//!
//! ```toml
//! [plugin]
//! name = "kibe"
//! description = "Steal stickers into your own pack"
//! author = ["alice", "bob"]
//! requirements = ["pillow>=9"]
//!
//! [settings.pack_size]
//! type = "numeric"
//! value = 120
//! min = 1
//! max = 120
//! ```
//!
//! Validation collects every problem before failing, so the person
//! installing a plugin sees the whole list at once.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::application::errors::{PluginError, PluginResult};
use crate::domain::entities::{
    Author, PluginDescriptor, PluginOrigin, SettingDescriptor, SettingType, SettingValue,
};

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").expect("valid regex"));

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    plugin: Option<RawPlugin>,
    #[serde(default)]
    settings: BTreeMap<String, RawSetting>,
}

// Fields stay untyped so a wrongly typed value is reported alongside the
// other problems instead of failing deserialization.
#[derive(Debug, Default, Deserialize)]
struct RawPlugin {
    name: Option<toml::Value>,
    description: Option<toml::Value>,
    author: Option<toml::Value>,
    requirements: Option<toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSetting {
    #[serde(rename = "type")]
    setting_type: Option<toml::Value>,
    value: Option<toml::Value>,
    options: Option<toml::Value>,
    min: Option<toml::Value>,
    max: Option<toml::Value>,
    max_length: Option<toml::Value>,
    label: Option<toml::Value>,
    description: Option<toml::Value>,
}

/// `None` when absent or blank; `Some(Err)` when not a string
fn parse_text(field: &str, value: Option<toml::Value>) -> Option<Result<String, String>> {
    match value? {
        toml::Value::String(s) if s.trim().is_empty() => None,
        toml::Value::String(s) => Some(Ok(s)),
        other => Some(Err(format!("{} must be a string, found {}", field, other.type_str()))),
    }
}

fn optional_text(field: &str, value: Option<toml::Value>, errors: &mut Vec<String>) -> Option<String> {
    match parse_text(field, value)? {
        Ok(s) => Some(s),
        Err(e) => {
            errors.push(e);
            None
        }
    }
}

fn optional_number(field: &str, value: Option<toml::Value>, errors: &mut Vec<String>) -> Option<f64> {
    match value? {
        toml::Value::Integer(i) => Some(i as f64),
        toml::Value::Float(f) => Some(f),
        other => {
            errors.push(format!("{} must be a number, found {}", field, other.type_str()));
            None
        }
    }
}

/// Items of a list of strings; anything else is reported once
fn string_list(field: &str, value: Option<toml::Value>, errors: &mut Vec<String>) -> Vec<String> {
    let items = match value {
        None => return Vec::new(),
        Some(toml::Value::Array(items)) => items,
        Some(_) => {
            errors.push(format!("{} must be a list of strings", field));
            return Vec::new();
        }
    };

    let mut strings = Vec::with_capacity(items.len());
    for item in items {
        match item {
            toml::Value::String(s) => strings.push(s),
            _ => {
                errors.push(format!("{} must be a list of strings", field));
                return Vec::new();
            }
        }
    }
    strings
}

/// `None` when absent or empty; `Some(Err)` when present but malformed
fn parse_author(value: Option<toml::Value>) -> Option<Result<Author, String>> {
    match value? {
        toml::Value::String(name) if name.trim().is_empty() => None,
        toml::Value::String(name) => Some(Ok(Author::One(name))),
        toml::Value::Array(items) if items.is_empty() => None,
        toml::Value::Array(items) => {
            let names: Option<Vec<String>> = items
                .into_iter()
                .map(|item| match item {
                    toml::Value::String(s) => Some(s),
                    _ => None,
                })
                .collect();
            match names {
                Some(names) if names.iter().any(|n| n.trim().is_empty()) => {
                    Some(Err("author cannot be empty".to_string()))
                }
                Some(names) => Some(Ok(Author::Many(names))),
                None => Some(Err("author must be a string or a list of strings".to_string())),
            }
        }
        _ => Some(Err("author must be a string or a list of strings".to_string())),
    }
}

fn setting_value(value: toml::Value) -> Result<SettingValue, String> {
    match value {
        toml::Value::Boolean(b) => Ok(SettingValue::Bool(b)),
        toml::Value::Integer(i) => Ok(SettingValue::Number(i as f64)),
        toml::Value::Float(f) => Ok(SettingValue::Number(f)),
        toml::Value::String(s) => Ok(SettingValue::Text(s)),
        _ => Err("value must be a boolean, number or string".to_string()),
    }
}

/// Build one setting, returning its errors instead when invalid
fn build_setting(key: &str, raw: RawSetting) -> Result<SettingDescriptor, Vec<String>> {
    let type_name = match parse_text("type", raw.setting_type) {
        None => return Err(vec!["type is required".to_string()]),
        Some(Err(e)) => return Err(vec![e]),
        Some(Ok(type_name)) => type_name,
    };
    let Some(setting_type) = SettingType::parse(&type_name) else {
        return Err(vec![format!(
            "unknown type '{}' (expected boolean, string, choice or numeric)",
            type_name
        )]);
    };

    let mut errors = Vec::new();

    let options = string_list("options", raw.options, &mut errors);
    let min = optional_number("min", raw.min, &mut errors);
    let max = optional_number("max", raw.max, &mut errors);
    let max_length = match raw.max_length {
        None => None,
        Some(toml::Value::Integer(n)) if n >= 0 => Some(n as usize),
        Some(_) => {
            errors.push("max_length must be a non-negative integer".to_string());
            None
        }
    };
    let label = optional_text("label", raw.label, &mut errors);
    let description = optional_text("description", raw.description, &mut errors);

    let mut setting = SettingDescriptor::new(key, setting_type)
        .with_options(options)
        .with_bounds(min, max)
        .with_max_length(max_length)
        .with_label(label, description);

    errors.extend(setting.schema_errors());

    if errors.is_empty() {
        if let Some(value) = raw.value {
            match setting_value(value) {
                Ok(value) => {
                    if let Err(reason) = setting.check(&value) {
                        errors.push(reason);
                    } else if let Err(e) = setting.set_value(value) {
                        errors.push(e.to_string());
                    }
                }
                Err(reason) => errors.push(reason),
            }
        }
    }

    if errors.is_empty() {
        Ok(setting)
    } else {
        Err(errors)
    }
}

/// Parse and validate manifest text
pub fn parse(content: &str, origin: PluginOrigin) -> PluginResult<PluginDescriptor> {
    let raw: RawManifest = toml::from_str(content)
        .map_err(|e| PluginError::ManifestInvalid(vec![format!("could not parse manifest: {}", e)]))?;

    let Some(plugin) = raw.plugin else {
        return Err(PluginError::ManifestInvalid(vec![
            "missing [plugin] table".to_string(),
        ]));
    };

    let name = parse_text("name", plugin.name);
    let description = parse_text("description", plugin.description);
    let author = parse_author(plugin.author);

    let missing: Vec<String> = [
        ("name", name.is_none()),
        ("description", description.is_none()),
        ("author", author.is_none()),
    ]
    .into_iter()
    .filter(|(_, absent)| *absent)
    .map(|(field, _)| format!("missing required field: {}", field))
    .collect();

    let (Some(name), Some(description), Some(author)) = (name, description, author) else {
        return Err(PluginError::ManifestInvalid(missing));
    };

    let mut errors = Vec::new();

    let name = match name {
        Ok(name) => {
            if !NAME_RE.is_match(&name) {
                errors.push("name must be alphanumeric".to_string());
            }
            name
        }
        Err(e) => {
            errors.push(e);
            String::new()
        }
    };

    let description = description.unwrap_or_else(|e| {
        errors.push(e);
        String::new()
    });

    let author = author.unwrap_or_else(|e| {
        errors.push(e);
        Author::Many(Vec::new())
    });

    let requirements = string_list("requirements", plugin.requirements, &mut errors);

    let mut settings = BTreeMap::new();
    for (key, raw_setting) in raw.settings {
        match build_setting(&key, raw_setting) {
            Ok(setting) => {
                settings.insert(key, setting);
            }
            Err(setting_errors) => {
                errors.extend(
                    setting_errors
                        .into_iter()
                        .map(|e| format!("settings: {}: {}", key, e)),
                );
            }
        }
    }

    if !errors.is_empty() {
        return Err(PluginError::ManifestInvalid(errors));
    }

    Ok(PluginDescriptor {
        name,
        description,
        author,
        requirements,
        settings,
        origin,
    })
}

/// Read and validate the manifest inside a plugin folder
pub fn from_folder(folder: &Path) -> PluginResult<PluginDescriptor> {
    let manifest_path = folder.join(super::layout::MANIFEST_FILE);
    let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
        PluginError::FolderShapeInvalid(format!(
            "Failed to read manifest {}: {}",
            manifest_path.display(),
            e
        ))
    })?;

    parse(&content, PluginOrigin::Folder(folder.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors_of(content: &str) -> Vec<String> {
        match parse(content, PluginOrigin::Folder("/tmp".into())) {
            Err(PluginError::ManifestInvalid(errors)) => errors,
            other => panic!("expected ManifestInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_manifest() {
        let descriptor = parse(
            r#"
            [plugin]
            name = "kibe"
            description = "Sticker thief"
            author = ["alice", "bob"]
            requirements = ["pillow>=9"]

            [settings.animated]
            type = "boolean"
            value = true

            [settings.quality]
            type = "choice"
            options = ["low", "high"]
            value = "high"

            [settings.pack_size]
            type = "numeric"
            value = 120
            min = 1
            max = 120
            "#,
            PluginOrigin::Folder("/srv/plugins/kibe".into()),
        )
        .unwrap();

        assert_eq!(descriptor.name, "kibe");
        assert_eq!(descriptor.author.to_string(), "alice, bob");
        assert_eq!(descriptor.requirements, vec!["pillow>=9".to_string()]);
        assert_eq!(descriptor.settings.len(), 3);
        assert_eq!(
            descriptor.setting("quality").unwrap().value(),
            &SettingValue::Text("high".to_string())
        );
        assert_eq!(
            descriptor.setting("pack_size").unwrap().value(),
            &SettingValue::Number(120.0)
        );
    }

    #[test]
    fn test_reports_exactly_missing_fields() {
        let errors = errors_of(
            r#"
            [plugin]
            name = "my-plugin"
            author = ""
            "#,
        );
        assert_eq!(
            errors,
            vec![
                "missing required field: description".to_string(),
                "missing required field: author".to_string(),
            ]
        );

        let errors = errors_of("[plugin]\ndescription = \"d\"\nauthor = \"a\"\n");
        assert_eq!(errors, vec!["missing required field: name".to_string()]);
    }

    #[test]
    fn test_name_format() {
        let errors = errors_of(
            r#"
            [plugin]
            name = "my-plugin"
            description = "d"
            author = "a"
            "#,
        );
        assert_eq!(errors, vec!["name must be alphanumeric".to_string()]);
    }

    #[test]
    fn test_missing_plugin_table() {
        assert_eq!(errors_of("[other]\nx = 1\n"), vec!["missing [plugin] table".to_string()]);
    }

    #[test]
    fn test_errors_are_aggregated() {
        let errors = errors_of(
            r#"
            [plugin]
            name = "bad name"
            description = "d"
            author = "a"
            requirements = ["ok", 3]

            [settings.mode]
            type = "choice"

            [settings.flag]
            type = "boolean"
            value = "yes"

            [settings.level]
            type = "colour"
            "#,
        );

        assert_eq!(errors.len(), 5);
        assert_eq!(errors[0], "name must be alphanumeric");
        assert_eq!(errors[1], "requirements must be a list of strings");
        assert!(errors.iter().any(|e| e.starts_with("settings: flag: expected a boolean")));
        assert!(errors.iter().any(|e| e == "settings: level: unknown type 'colour' (expected boolean, string, choice or numeric)"));
        assert!(errors.iter().any(|e| e == "settings: mode: choice settings need a non-empty options list"));
    }

    #[test]
    fn test_wrongly_typed_fields_are_aggregated() {
        let errors = errors_of(
            r#"
            [plugin]
            name = "kibe"
            description = 42
            author = "a"
            requirements = "pillow"

            [settings.count]
            type = "numeric"
            min = "a"
            max_length = -1

            [settings.pack]
            type = "choice"
            options = "cats"
            "#,
        );

        assert_eq!(
            errors,
            vec![
                "description must be a string, found integer".to_string(),
                "requirements must be a list of strings".to_string(),
                "settings: count: min must be a number, found string".to_string(),
                "settings: count: max_length must be a non-negative integer".to_string(),
                "settings: pack: options must be a list of strings".to_string(),
                "settings: pack: choice settings need a non-empty options list".to_string(),
            ]
        );
    }

    #[test]
    fn test_setting_value_outside_bounds() {
        let errors = errors_of(
            r#"
            [plugin]
            name = "n"
            description = "d"
            author = "a"

            [settings.count]
            type = "numeric"
            value = 50
            max = 10
            "#,
        );
        assert_eq!(errors, vec!["settings: count: value 50 is above maximum 10".to_string()]);
    }

    #[test]
    fn test_unparseable_manifest() {
        let errors = errors_of("[plugin\nname=");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("could not parse manifest"));
    }
}
