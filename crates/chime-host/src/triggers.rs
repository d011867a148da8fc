//! Hook triggers driven by addon lifecycle events.
//!
//! Observers run on lifecycle workers, so they only queue a trigger; the
//! loop below does the actual (awaited) hook starts and stops.

use std::sync::Arc;

use chime_addon::{AddonLifecycleEvent, AddonManager, HookTarget};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Loaded(String),
    Unloaded(String),
}

impl Trigger {
    pub fn from_event(event: &AddonLifecycleEvent) -> Self {
        let name = event.addon.name().to_string();
        if event.loading {
            Trigger::Loaded(name)
        } else {
            Trigger::Unloaded(name)
        }
    }
}

/// Observer that queues one trigger per lifecycle event.
pub fn observer(tx: UnboundedSender<Trigger>) -> impl Fn(&AddonLifecycleEvent) + Send + Sync {
    move |event: &AddonLifecycleEvent| {
        // The receiver is gone only during shutdown.
        let _ = tx.send(Trigger::from_event(event));
    }
}

/// Start or stop whatever hooks into each addon as it comes and goes.
pub async fn run(manager: Arc<AddonManager>, mut rx: UnboundedReceiver<Trigger>) {
    while let Some(trigger) = rx.recv().await {
        let outcomes = match &trigger {
            Trigger::Loaded(name) => manager.start_hooked(&HookTarget::addon(name.as_str())).await,
            Trigger::Unloaded(name) => manager.stop_hooked(&HookTarget::addon(name.as_str())).await,
        };
        if !outcomes.is_empty() {
            let failed = outcomes.iter().filter(|o| !o.is_completed()).count();
            tracing::debug!(
                trigger = ?trigger,
                hooked = outcomes.len(),
                failed,
                "hook trigger handled"
            );
        }
    }
}
