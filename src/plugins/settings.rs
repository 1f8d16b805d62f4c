//! Settings bridge - keeps in-memory plugin settings and the store in step

use std::collections::BTreeSet;

use crate::application::errors::{PluginError, PluginResult, SettingError, StorageError};
use crate::domain::entities::{PluginDescriptor, SettingDescriptor, SettingType, SettingValue};
use crate::domain::traits::Store;
use crate::infrastructure::plugins::PluginRegistry;

/// Config key holding the JSON array of inactive plugin names
pub const INACTIVE_PLUGINS_KEY: &str = "INACTIVE_PLUGINS";

pub async fn load_inactive(store: &dyn Store) -> PluginResult<BTreeSet<String>> {
    let Some(raw) = store.get(INACTIVE_PLUGINS_KEY).await? else {
        return Ok(BTreeSet::new());
    };
    serde_json::from_str(&raw).map_err(|e| {
        PluginError::Storage(StorageError::Serialization(format!(
            "{} is not a list of names: {}",
            INACTIVE_PLUGINS_KEY, e
        )))
    })
}

pub async fn save_inactive(store: &dyn Store, inactive: &BTreeSet<String>) -> PluginResult<()> {
    let raw = serde_json::to_string(inactive)
        .map_err(|e| PluginError::Storage(StorageError::Serialization(e.to_string())))?;
    store.set(INACTIVE_PLUGINS_KEY, &raw).await?;
    Ok(())
}

/// Apply persisted values onto a freshly parsed descriptor.
///
/// Rows for unknown keys, or whose value no longer fits the declaration,
/// are skipped. Returns how many values were applied.
pub async fn restore(store: &dyn Store, descriptor: &mut PluginDescriptor) -> PluginResult<usize> {
    let rows = store.plugin_settings(&descriptor.name).await?;
    let mut restored = 0;

    for (key, raw) in rows {
        let plugin = descriptor.name.clone();
        let Some(setting) = descriptor.setting_mut(&key) else {
            tracing::warn!("Ignoring stored value for unknown setting {}.{}", plugin, key);
            continue;
        };
        let Some(value) = SettingValue::from_json(&raw) else {
            tracing::warn!("Ignoring unreadable stored value for {}.{}: {}", plugin, key, raw);
            continue;
        };
        match setting.set_value(value) {
            Ok(()) => restored += 1,
            Err(e) => tracing::warn!("Ignoring stored value for {}.{}: {}", plugin, key, e),
        }
    }

    Ok(restored)
}

/// Look up a setting, compute its next value, persist it, then apply it
async fn update<F>(
    registry: &PluginRegistry,
    store: &dyn Store,
    name: &str,
    key: &str,
    next: F,
) -> PluginResult<SettingDescriptor>
where
    F: FnOnce(&SettingDescriptor) -> Result<SettingValue, SettingError>,
{
    let descriptor = registry
        .descriptor(name)
        .ok_or_else(|| SettingError::PluginNotFound(name.to_string()))?;
    if descriptor.settings.is_empty() {
        return Err(SettingError::NoSettings(name.to_string()).into());
    }
    let mut setting = descriptor
        .setting(key)
        .cloned()
        .ok_or_else(|| SettingError::UnknownKey {
            plugin: name.to_string(),
            key: key.to_string(),
        })?;

    let value = next(&setting)?;
    setting.set_value(value.clone())?;

    store.set_plugin_setting(name, key, &value.to_json()).await?;

    registry.update_descriptor(name, |d| match d.setting_mut(key) {
        Some(current) => current.set_value(value),
        None => Err(SettingError::UnknownKey {
            plugin: name.to_string(),
            key: key.to_string(),
        }),
    })??;

    tracing::info!("Setting {}.{} is now {}", name, key, setting.value());
    Ok(setting)
}

/// Flip a boolean setting
pub async fn toggle(
    registry: &PluginRegistry,
    store: &dyn Store,
    name: &str,
    key: &str,
) -> PluginResult<SettingDescriptor> {
    update(registry, store, name, key, |setting| {
        match (setting.setting_type, setting.value()) {
            (SettingType::Boolean, SettingValue::Bool(current)) => Ok(SettingValue::Bool(!current)),
            _ => Err(SettingError::NotBoolean {
                plugin: name.to_string(),
                key: key.to_string(),
            }),
        }
    })
    .await
}

/// Parse `raw` according to the declared type and store it
pub async fn set(
    registry: &PluginRegistry,
    store: &dyn Store,
    name: &str,
    key: &str,
    raw: &str,
) -> PluginResult<SettingDescriptor> {
    update(registry, store, name, key, |setting| setting.parse_value(raw)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Author, PluginOrigin};
    use crate::infrastructure::database::Database;
    use crate::infrastructure::plugins::PluginEntry;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn descriptor() -> PluginDescriptor {
        let mut settings = BTreeMap::new();
        settings.insert(
            "nsfw".to_string(),
            SettingDescriptor::new("nsfw", SettingType::Boolean),
        );
        settings.insert(
            "pack".to_string(),
            SettingDescriptor::new("pack", SettingType::Choice)
                .with_options(vec!["cats".to_string(), "dogs".to_string()]),
        );
        settings.insert(
            "limit".to_string(),
            SettingDescriptor::new("limit", SettingType::Numeric).with_bounds(Some(1.0), Some(10.0)),
        );
        PluginDescriptor {
            name: "kibe".to_string(),
            description: "stickers".to_string(),
            author: Author::One("alice".to_string()),
            requirements: Vec::new(),
            settings,
            origin: PluginOrigin::Folder(PathBuf::from("kibe")),
        }
    }

    fn setup() -> (PluginRegistry, Database) {
        let registry = PluginRegistry::new();
        registry.insert(PluginEntry::active(descriptor(), None)).unwrap();
        (registry, Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_toggle_persists() {
        let (registry, db) = setup();

        let setting = toggle(&registry, &db, "kibe", "nsfw").await.unwrap();
        assert_eq!(setting.value(), &SettingValue::Bool(true));
        assert_eq!(
            registry.descriptor("kibe").unwrap().setting("nsfw").unwrap().value(),
            &SettingValue::Bool(true)
        );
        assert_eq!(
            db.plugin_settings("kibe").await.unwrap(),
            vec![("nsfw".to_string(), "true".to_string())]
        );

        let setting = toggle(&registry, &db, "kibe", "nsfw").await.unwrap();
        assert_eq!(setting.value(), &SettingValue::Bool(false));
    }

    #[tokio::test]
    async fn test_toggle_non_boolean_is_rejected() {
        let (registry, db) = setup();

        let err = toggle(&registry, &db, "kibe", "pack").await.unwrap_err();
        assert!(err.to_string().contains("not boolean"));
        assert_eq!(
            registry.descriptor("kibe").unwrap().setting("pack").unwrap().value(),
            &SettingValue::Text("cats".to_string())
        );
        assert!(db.plugin_settings("kibe").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_errors() {
        let (registry, db) = setup();

        let err = toggle(&registry, &db, "ghost", "nsfw").await.unwrap_err();
        assert!(matches!(err, PluginError::Setting(SettingError::PluginNotFound(_))));

        let err = toggle(&registry, &db, "kibe", "missing").await.unwrap_err();
        assert!(matches!(err, PluginError::Setting(SettingError::UnknownKey { .. })));

        let mut bare = descriptor();
        bare.name = "bare".to_string();
        bare.settings.clear();
        registry.insert(PluginEntry::active(bare, None)).unwrap();
        let err = toggle(&registry, &db, "bare", "nsfw").await.unwrap_err();
        assert!(matches!(err, PluginError::Setting(SettingError::NoSettings(_))));
    }

    #[tokio::test]
    async fn test_set_validates() {
        let (registry, db) = setup();

        let setting = set(&registry, &db, "kibe", "pack", "dogs").await.unwrap();
        assert_eq!(setting.value().as_str(), Some("dogs"));

        let err = set(&registry, &db, "kibe", "pack", "birds").await.unwrap_err();
        assert!(matches!(err, PluginError::Setting(SettingError::InvalidValue { .. })));

        let err = set(&registry, &db, "kibe", "limit", "50").await.unwrap_err();
        assert!(err.to_string().contains("above maximum"));
        assert_eq!(
            registry.descriptor("kibe").unwrap().setting("limit").unwrap().value(),
            &SettingValue::Number(1.0)
        );

        set(&registry, &db, "kibe", "limit", "7").await.unwrap();
        assert_eq!(db.plugin_settings("kibe").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_skips_bad_rows() {
        let db = Database::open_in_memory().unwrap();
        db.set_plugin_setting("kibe", "nsfw", "true").await.unwrap();
        db.set_plugin_setting("kibe", "pack", "\"birds\"").await.unwrap();
        db.set_plugin_setting("kibe", "limit", "\"seven\"").await.unwrap();
        db.set_plugin_setting("kibe", "removed", "1").await.unwrap();

        let mut descriptor = descriptor();
        assert_eq!(restore(&db, &mut descriptor).await.unwrap(), 1);
        assert_eq!(descriptor.setting("nsfw").unwrap().value(), &SettingValue::Bool(true));
        assert_eq!(descriptor.setting("pack").unwrap().value().as_str(), Some("cats"));
    }

    #[tokio::test]
    async fn test_inactive_set() {
        let db = Database::open_in_memory().unwrap();
        assert!(load_inactive(&db).await.unwrap().is_empty());

        let inactive: BTreeSet<String> = ["kibe".to_string(), "afk".to_string()].into();
        save_inactive(&db, &inactive).await.unwrap();
        assert_eq!(db.get(INACTIVE_PLUGINS_KEY).await.unwrap().as_deref(), Some("[\"afk\",\"kibe\"]"));
        assert_eq!(load_inactive(&db).await.unwrap(), inactive);

        db.set(INACTIVE_PLUGINS_KEY, "not json").await.unwrap();
        assert!(load_inactive(&db).await.is_err());
    }
}
