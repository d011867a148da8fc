use std::sync::Arc;

use chime_addon::{
    AddonError, AddonManager, EntryPoints, HookTarget, LifecycleTask, RuntimeConfig, StartPhase,
    StaticHostPlugins,
};
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod builtin;
mod triggers;

/// Phases the host sweeps on boot, in order.
const BOOT_PHASES: [StartPhase; 3] = [
    StartPhase::PluginLoad,
    StartPhase::PluginEnable,
    StartPhase::ServerLoadComplete,
];

/// Enabled host plugins from `CHIME_HOST_PLUGINS` (comma-separated).
fn host_plugins_from_env() -> Vec<String> {
    std::env::var("CHIME_HOST_PLUGINS")
        .map(|raw| parse_plugin_list(&raw))
        .unwrap_or_default()
}

fn parse_plugin_list(raw: &str) -> Vec<String> {
    let mut plugins: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !plugins.iter().any(|p| p == name) {
            plugins.push(name.to_string());
        }
    }
    plugins
}

async fn await_all(tasks: Vec<LifecycleTask>) -> usize {
    let mut failed = 0;
    for task in tasks {
        if !task.await.is_completed() {
            failed += 1;
        }
    }
    failed
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        tracing::error!("chime host failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AddonError> {
    let config = RuntimeConfig::from_env();
    let plugin_names = host_plugins_from_env();
    let plugins = Arc::new(StaticHostPlugins::new(plugin_names.iter().cloned()));
    tracing::info!(
        addon_dir = %config.addon_dir.display(),
        plugins = ?plugin_names,
        "starting chime host"
    );

    let entry_points = EntryPoints::new();
    builtin::link(&entry_points)?;

    let manager = Arc::new(
        AddonManager::new(config, entry_points)?.with_host_plugins(plugins),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    manager.subscribe(Arc::new(triggers::observer(tx)));
    let hook_loop = tokio::spawn(triggers::run(Arc::clone(&manager), rx));

    let report = manager.register_addons().await?;
    tracing::info!(
        registered = report.registered.len(),
        failed = report.failures.len(),
        "addons registered"
    );

    for phase in BOOT_PHASES {
        // Phase starts are fire-and-forget; hooks follow through the trigger loop.
        let tasks = manager.start_addons(phase);
        tracing::info!(phase = %phase, started = tasks.len(), "boot phase reached");

        if phase == StartPhase::PluginEnable {
            for plugin in &plugin_names {
                manager.start_hooked(&HookTarget::plugin(plugin.as_str())).await;
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
    tracing::info!("shutting down");

    // Hook-phase addons go first, each with whatever it hooks into.
    for plugin in plugin_names.iter().rev() {
        manager.stop_hooked(&HookTarget::plugin(plugin.as_str())).await;
    }
    for addon in manager.addons().iter().rev() {
        if !addon.descriptor().start_phase.is_hook() {
            manager.stop_hooked(&HookTarget::addon(addon.name())).await;
        }
    }
    let failed = await_all(manager.stop_addons()).await;
    hook_loop.abort();

    match serde_json::to_string_pretty(&manager.summaries()) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!("failed to render addon summaries: {e}"),
    }
    tracing::info!(failed, "chime host stopped");
    Ok(())
}
