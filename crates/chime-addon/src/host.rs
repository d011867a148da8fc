//! What the runtime needs to know about its host.

use std::collections::BTreeSet;
use std::fmt;

use parking_lot::RwLock;

/// Answers whether a host plugin is currently enabled.
pub trait HostPlugins: Send + Sync {
    fn is_plugin_enabled(&self, name: &str) -> bool;
}

/// A host without plugins.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHostPlugins;

impl HostPlugins for NoHostPlugins {
    fn is_plugin_enabled(&self, _name: &str) -> bool {
        false
    }
}

/// A mutable set of enabled host plugin names.
#[derive(Debug, Default)]
pub struct StaticHostPlugins {
    enabled: RwLock<BTreeSet<String>>,
}

impl StaticHostPlugins {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: RwLock::new(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn enable(&self, name: impl Into<String>) {
        self.enabled.write().insert(name.into());
    }

    pub fn disable(&self, name: &str) {
        self.enabled.write().remove(name);
    }

    pub fn enabled(&self) -> Vec<String> {
        self.enabled.read().iter().cloned().collect()
    }
}

impl HostPlugins for StaticHostPlugins {
    fn is_plugin_enabled(&self, name: &str) -> bool {
        self.enabled.read().contains(name)
    }
}

/// Something a hook-phase addon can hook into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookTarget {
    /// Another addon, by name.
    Addon(String),
    /// A host plugin, by name.
    Plugin(String),
}

impl HookTarget {
    pub fn addon(name: impl Into<String>) -> Self {
        HookTarget::Addon(name.into())
    }

    pub fn plugin(name: impl Into<String>) -> Self {
        HookTarget::Plugin(name.into())
    }
}

impl fmt::Display for HookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookTarget::Addon(name) => write!(f, "addon {name}"),
            HookTarget::Plugin(name) => write!(f, "plugin {name}"),
        }
    }
}
