use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use plugbot::application::errors::BotError;
use plugbot::application::messaging::MessageParser;
use plugbot::domain::traits::{Client, ClientContext, Store};
use plugbot::infrastructure::adapters::console::{run_console, ConsoleClient};
use plugbot::infrastructure::config::Config;
use plugbot::infrastructure::database::Database;
use plugbot::infrastructure::plugins::NativeLoader;
use plugbot::plugins::PluginManager;

#[derive(Parser)]
#[command(name = "plugbot")]
#[command(about = "A chat bot host with installable plugins", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Plugins directory (overrides config)
    #[arg(long)]
    plugins_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
    /// Manage installed plugins
    #[command(subcommand)]
    Plugin(PluginCommand),
}

#[derive(Subcommand)]
enum PluginCommand {
    /// List installed plugins
    List,
    /// Install a plugin from a zip archive
    Install { archive: PathBuf },
    /// Remove a plugin, its environment and its settings
    Remove { name: String },
    /// Load a plugin at startup again
    Enable { name: String },
    /// Keep a plugin installed but stop loading it
    Disable { name: String },
    /// Show a plugin's settings
    Settings { name: String },
    /// Flip a boolean setting
    Toggle { name: String, key: String },
    /// Change a setting
    Set { name: String, key: String, value: String },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Version => {
            println!("plugbot v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(),
        Commands::Run => with_runtime(|| run_bot(load_config(&cli.config, cli.plugins_dir))),
        Commands::Plugin(command) => {
            with_runtime(|| run_plugin_command(load_config(&cli.config, cli.plugins_dir), command))
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn with_runtime<F, Fut>(f: F) -> Result<(), BotError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), BotError>>,
{
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| BotError::Internal(format!("Failed to start runtime: {}", e)))?;
    rt.block_on(f())
}

fn load_config(config_path: &str, plugins_dir: Option<PathBuf>) -> Config {
    let mut config = if Path::new(config_path).exists() {
        Config::load(config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        Config::default()
    };
    config.apply_env();

    if let Some(dir) = plugins_dir {
        config.plugins.directory = dir;
    }
    config
}

struct Host {
    user: Arc<ConsoleClient>,
    assistant: Arc<ConsoleClient>,
    manager: PluginManager,
}

fn build_host(config: &Config) -> Result<Host, BotError> {
    std::fs::create_dir_all(&config.plugins.directory)
        .map_err(|e| BotError::Internal(format!("Failed to create plugins directory: {}", e)))?;

    let db = Database::new(&config.database.path)
        .map_err(|e| BotError::Storage(e.into()))?;
    tracing::info!("Database initialized");
    let store: Arc<dyn Store> = Arc::new(db);

    let user = Arc::new(ConsoleClient::new(ClientContext::User));
    let assistant = Arc::new(ConsoleClient::new(ClientContext::Assistant));
    let manager = PluginManager::new(
        &config.plugins,
        user.clone(),
        assistant.clone(),
        store,
        Arc::new(NativeLoader::new()),
    );

    Ok(Host {
        user,
        assistant,
        manager,
    })
}

/// Wait for Ctrl-C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Install signal handlers; the receiver flips to `true` on the first
/// signal and a second one exits immediately
fn watch_signals() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Received shutdown signal, shutting down");
        stop_tx.send_replace(true);

        shutdown_signal().await;
        tracing::warn!("Second shutdown signal, exiting");
        std::process::exit(130);
    });
    stop_rx
}

/// Drive plugin work to completion. A shutdown signal cancels running
/// installers, and the work then finishes with whatever it managed.
async fn until_stopped<F, T>(manager: &PluginManager, mut stop: watch::Receiver<bool>, work: F) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(work);
    tokio::select! {
        out = &mut work => return out,
        Ok(_) = stop.wait_for(|s| *s) => {
            manager.request_shutdown();
        }
    }
    work.await
}

async fn run_bot(config: Config) -> Result<(), BotError> {
    tracing::info!("Starting {}", config.bot.name);
    let stop = watch_signals();
    let host = build_host(&config)?;

    host.user.start().await?;
    host.assistant.start().await?;

    if config.plugins.auto_load {
        let report = until_stopped(&host.manager, stop.clone(), host.manager.load_all_installed()).await?;
        for (name, reason) in &report.failed {
            tracing::warn!("Plugin {} not loaded: {}", name, reason);
        }
    }
    tracing::info!("Plugin system initialized with {} plugins", host.manager.list().len());

    if !*stop.borrow() {
        let mut console = tokio::spawn(run_console(
            vec![host.user.clone(), host.assistant.clone()],
            MessageParser::new(config.bot.prefix.clone()),
            stop.clone(),
        ));

        let mut stopped = stop.clone();
        let finished = tokio::select! {
            result = &mut console => Some(result),
            Ok(_) = stopped.wait_for(|s| *s) => None,
        };
        let result = match finished {
            Some(result) => result,
            None => console.await,
        };
        match result {
            Ok(Err(e)) => tracing::warn!("Console stopped with error: {}", e),
            Err(e) => tracing::warn!("Console task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    host.manager.shutdown().await;
    host.user.stop().await?;
    host.assistant.stop().await?;
    Ok(())
}

async fn run_plugin_command(config: Config, command: PluginCommand) -> Result<(), BotError> {
    let stop = watch_signals();
    let host = build_host(&config)?;
    let manager = &host.manager;

    match command {
        PluginCommand::List => {
            manager.discover().await?;
            let inactive = manager.inactive().await?;
            let plugins = manager.list();
            if plugins.is_empty() {
                println!("No plugins installed in {}", manager.plugins_root().display());
            }
            for plugin in plugins {
                let state = if inactive.contains(&plugin.name) { "disabled" } else { "enabled" };
                println!(
                    "{} [{}] - {} (by {}, {} settings)",
                    plugin.name, state, plugin.description, plugin.author, plugin.settings
                );
            }
        }
        PluginCommand::Install { archive } => {
            let summary = until_stopped(manager, stop.clone(), manager.install_archive(&archive)).await?;
            println!("Installed {}: {}", summary.name, summary.description);
        }
        PluginCommand::Remove { name } => {
            manager.discover().await?;
            manager.unload(&name).await?;
            println!("Removed {}", name);
        }
        PluginCommand::Enable { name } => {
            let summary = until_stopped(manager, stop.clone(), manager.enable(&name)).await?;
            println!("Enabled {}", summary.name);
        }
        PluginCommand::Disable { name } => {
            manager.discover().await?;
            manager.disable(&name).await?;
            println!("Disabled {}", name);
        }
        PluginCommand::Settings { name } => {
            manager.discover().await?;
            let descriptor = manager
                .descriptor(&name)
                .ok_or_else(|| BotError::Plugin(plugbot::PluginError::NotFound(name.clone())))?;
            if descriptor.settings.is_empty() {
                println!("{} has no settings", name);
            }
            for setting in descriptor.settings.values() {
                let label = setting.label.as_deref().unwrap_or(&setting.key);
                println!("{} ({}) = {}  # {}", setting.key, setting.setting_type, setting.value(), label);
            }
        }
        PluginCommand::Toggle { name, key } => {
            manager.discover().await?;
            let setting = manager.toggle_setting(&name, &key).await?;
            println!("{}.{} = {}", name, setting.key, setting.value());
        }
        PluginCommand::Set { name, key, value } => {
            manager.discover().await?;
            let setting = manager.set_setting(&name, &key, &value).await?;
            println!("{}.{} = {}", name, setting.key, setting.value());
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn init_config() -> Result<(), BotError> {
    let yaml = Config::default().to_yaml()?;
    println!("{}", yaml);
    println!("\nSave this to config.yaml and adjust as needed.");
    Ok(())
}
