//! Plugin lifecycle integration tests
//! Run with: cargo test --test plugin_lifecycle_test

use async_trait::async_trait;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use zip::write::SimpleFileOptions;

use plugbot::application::messaging::MessageParser;
use plugbot::domain::entities::{Message, PluginStatus, SettingValue};
use plugbot::domain::traits::{Client, ClientContext, Handler, HandlerResult, Store};
use plugbot::infrastructure::adapters::ConsoleClient;
use plugbot::infrastructure::config::Config;
use plugbot::infrastructure::database::Database;
use plugbot::infrastructure::plugins::layout::entry_point_name;
use plugbot::infrastructure::plugins::BuiltinLoader;
use plugbot::plugins::{Controller, HandlerEntry, PluginContext, PluginElements, PluginManager};
use plugbot::PluginError;

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Replies with a sticker name when asked for one
struct Sticker;

#[async_trait]
impl Handler for Sticker {
    fn name(&self) -> &str {
        "sticker"
    }

    fn matches(&self, message: &Message) -> bool {
        message.content.command() == Some("kibe")
    }

    async fn handle(&self, message: &Message) -> HandlerResult {
        let pack = match &message.content {
            plugbot::domain::entities::Content::Command { args, .. } => args.first().cloned(),
            _ => None,
        };
        Ok(Some(format!("sticker from {}", pack.unwrap_or_else(|| "default".to_string()))))
    }
}

struct AdminPanel;

impl Controller for AdminPanel {
    fn name(&self) -> &str {
        "admin"
    }

    fn handlers(&self) -> Vec<HandlerEntry> {
        vec![HandlerEntry::new(Arc::new(Sticker), 5)]
    }
}

fn kibe(_ctx: &PluginContext) -> PluginElements {
    PluginElements::new()
        .user_handler(Arc::new(Sticker), 0)
        .controller(ClientContext::Assistant, Arc::new(AdminPanel))
}

const MANIFEST: &str = r#"
[plugin]
name = "kibe"
description = "Steal stickers into your own pack"
author = ["alice", "bob"]
requirements = []

[settings.animated]
type = "boolean"
value = true

[settings.limit]
type = "numeric"
value = 30
min = 1
max = 120
"#;

fn write_archive(dir: &Path) -> PathBuf {
    let path = dir.join("upload.zip");
    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    writer.start_file("kibe/plugin.toml", SimpleFileOptions::default()).unwrap();
    writer.write_all(MANIFEST.as_bytes()).unwrap();
    writer
        .start_file(format!("kibe/{}", entry_point_name("kibe")), SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"linked into the test binary").unwrap();
    writer.finish().unwrap();
    path
}

struct Host {
    user: Arc<ConsoleClient>,
    assistant: Arc<ConsoleClient>,
    manager: PluginManager,
}

fn host(root: &Path, store: Arc<dyn Store>) -> Host {
    let mut config = Config::default();
    config.plugins.directory = root.to_path_buf();

    let user = Arc::new(ConsoleClient::new(ClientContext::User));
    let assistant = Arc::new(ConsoleClient::new(ClientContext::Assistant));
    let manager = PluginManager::new(
        &config.plugins,
        user.clone(),
        assistant.clone(),
        store,
        Arc::new(BuiltinLoader::new().with_plugin("kibe", kibe)),
    );
    Host {
        user,
        assistant,
        manager,
    }
}

#[tokio::test]
async fn test_installed_plugin_handles_messages() {
    ensure_init();
    let root = tempfile::tempdir().unwrap();
    let uploads = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> = Arc::new(Database::open_in_memory().unwrap());
    let host = host(root.path(), store);

    host.user.start().await.unwrap();
    host.assistant.start().await.unwrap();

    let summary = host.manager.install_archive(&write_archive(uploads.path())).await.unwrap();
    assert_eq!(summary.author, "alice, bob");
    assert_eq!(summary.status, PluginStatus::Active);

    let parser = MessageParser::new(".");
    assert_eq!(
        host.user.handle_line(&parser, ".kibe cats").await,
        vec!["sticker from cats".to_string()]
    );
    assert_eq!(host.assistant.handle_line(&parser, ".kibe").await.len(), 1);
    assert_eq!(host.assistant.dispatcher().groups()[0].0, 5);

    host.manager.unload("kibe").await.unwrap();
    assert!(host.user.handle_line(&parser, ".kibe cats").await.is_empty());
    assert!(!root.path().join("kibe").exists());
}

#[tokio::test]
async fn test_settings_survive_restart() {
    ensure_init();
    let root = tempfile::tempdir().unwrap();
    let uploads = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("plugbot.db");

    {
        let store: Arc<dyn Store> = Arc::new(Database::new(&db_path).unwrap());
        let host = host(root.path(), store);
        host.manager.install_archive(&write_archive(uploads.path())).await.unwrap();

        let setting = host.manager.toggle_setting("kibe", "animated").await.unwrap();
        assert_eq!(setting.value(), &SettingValue::Bool(false));
        host.manager.set_setting("kibe", "limit", "60").await.unwrap();

        let err = host.manager.set_setting("kibe", "limit", "500").await.unwrap_err();
        assert!(matches!(err, PluginError::Setting(_)));
        host.manager.shutdown().await;
    }

    let store: Arc<dyn Store> = Arc::new(Database::new(&db_path).unwrap());
    let host = host(root.path(), store);
    let report = host.manager.load_all_installed().await.unwrap();
    assert_eq!(report.loaded, vec!["kibe".to_string()]);

    let descriptor = host.manager.descriptor("kibe").unwrap();
    assert_eq!(descriptor.setting("animated").unwrap().value(), &SettingValue::Bool(false));
    assert_eq!(descriptor.setting("limit").unwrap().value(), &SettingValue::Number(60.0));
}

#[tokio::test]
async fn test_disabled_plugin_is_dormant_after_restart() {
    ensure_init();
    let root = tempfile::tempdir().unwrap();
    let uploads = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> = Arc::new(Database::open_in_memory().unwrap());

    {
        let host = host(root.path(), store.clone());
        host.manager.install_archive(&write_archive(uploads.path())).await.unwrap();
        host.manager.disable("kibe").await.unwrap();
        host.manager.shutdown().await;
    }

    let host = host(root.path(), store);
    let report = host.manager.load_all_installed().await.unwrap();
    assert_eq!(report.dormant, vec!["kibe".to_string()]);
    assert_eq!(host.manager.status("kibe"), Some(PluginStatus::Dormant));
    assert!(host.user.dispatcher().is_empty());
    assert!(host.assistant.dispatcher().is_empty());
}
