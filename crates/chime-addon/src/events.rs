//! Addon lifecycle events.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::addon::Addon;
use crate::descriptor::StartPhase;

/// Broadcast after an addon's start or stop hook has completed.
#[derive(Debug, Clone)]
pub struct AddonLifecycleEvent {
    pub addon: Arc<Addon>,
    /// `true` when the addon was loaded (started), `false` when unloaded.
    pub loading: bool,
}

impl AddonLifecycleEvent {
    pub fn new(addon: Arc<Addon>, loading: bool) -> Self {
        Self { addon, loading }
    }

    pub fn summary(&self) -> AddonSummary {
        AddonSummary::of(&self.addon)
    }
}

/// Receives lifecycle events. Called on the worker thread that ran the hook.
pub trait LifecycleObserver: Send + Sync {
    fn on_lifecycle(&self, event: &AddonLifecycleEvent);
}

impl<F> LifecycleObserver for F
where
    F: Fn(&AddonLifecycleEvent) + Send + Sync,
{
    fn on_lifecycle(&self, event: &AddonLifecycleEvent) {
        self(event)
    }
}

/// Registered observers, notified in subscription order.
#[derive(Default)]
pub(crate) struct Observers {
    observers: RwLock<Vec<Arc<dyn LifecycleObserver>>>,
}

impl Observers {
    pub(crate) fn subscribe(&self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.write().push(observer);
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub(crate) fn broadcast(&self, event: &AddonLifecycleEvent) {
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_lifecycle(event);
        }
    }
}

// ─── Summaries ──────────────────────────────────────────────────────────

/// Serializable snapshot of an addon's identity and state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSummary {
    pub name: String,
    pub version: String,
    pub authors: Vec<String>,
    pub start_phase: StartPhase,
    pub package: String,
    pub started: bool,
    pub stopped: bool,
    pub loaded: bool,
}

impl AddonSummary {
    pub fn of(addon: &Addon) -> Self {
        let descriptor = addon.descriptor();
        Self {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            authors: descriptor.authors.clone(),
            start_phase: descriptor.start_phase,
            package: addon.package_path().display().to_string(),
            started: addon.is_started(),
            stopped: addon.is_stopped(),
            loaded: addon.is_loaded(),
        }
    }
}
