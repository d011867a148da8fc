//! Addon entry points.
//!
//! Addons do not get instantiated through reflection. The host links a
//! constructor for every `main` identifier it supports into an
//! [`EntryPoints`] catalog before registration; the class loader resolves the
//! manifest's `main` class and then calls the matching constructor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::class_loader::{AddonClass, AddonClassLoader};
use crate::descriptor::AddonDescriptor;
use crate::error::AddonError;

/// Result of an addon start or stop hook.
pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The main object of an addon.
///
/// Hooks run on a blocking worker thread, never on the host's own thread.
pub trait AddonMain: Send + Sync {
    fn on_start(&self, ctx: &AddonContext) -> HookResult;

    fn on_stop(&self, ctx: &AddonContext) -> HookResult {
        let _ = ctx;
        Ok(())
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "addon code panicked".to_string()
    }
}

/// Builds an addon's main object.
pub type AddonConstructor =
    Arc<dyn Fn(&AddonContext) -> Result<Box<dyn AddonMain>, AddonError> + Send + Sync>;

/// Catalog of constructors keyed by `main` identifier.
#[derive(Clone, Default)]
pub struct EntryPoints {
    constructors: Arc<RwLock<HashMap<String, AddonConstructor>>>,
}

impl std::fmt::Debug for EntryPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("EntryPoints").field("main", &names).finish()
    }
}

impl EntryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a constructor to a `main` identifier.
    pub fn register<F>(&self, main: impl Into<String>, constructor: F) -> Result<(), AddonError>
    where
        F: Fn(&AddonContext) -> Result<Box<dyn AddonMain>, AddonError> + Send + Sync + 'static,
    {
        let main = main.into();
        let mut constructors = self.constructors.write();
        if constructors.contains_key(&main) {
            return Err(AddonError::AlreadyExists(format!("entry point {main}")));
        }
        constructors.insert(main, Arc::new(constructor));
        Ok(())
    }

    pub fn contains(&self, main: &str) -> bool {
        self.constructors.read().contains_key(main)
    }

    pub(crate) fn get(&self, main: &str) -> Option<AddonConstructor> {
        self.constructors.read().get(main).cloned()
    }
}

/// What an addon's code sees of the runtime.
#[derive(Clone)]
pub struct AddonContext {
    descriptor: Arc<AddonDescriptor>,
    loader: Arc<AddonClassLoader>,
    data_folder: PathBuf,
}

impl std::fmt::Debug for AddonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonContext")
            .field("addon", &self.descriptor.name)
            .field("data_folder", &self.data_folder)
            .finish_non_exhaustive()
    }
}

impl AddonContext {
    pub fn new(
        descriptor: Arc<AddonDescriptor>,
        loader: Arc<AddonClassLoader>,
        data_folder: PathBuf,
    ) -> Self {
        Self {
            descriptor,
            loader,
            data_folder,
        }
    }

    pub fn descriptor(&self) -> &AddonDescriptor {
        &self.descriptor
    }

    pub fn loader(&self) -> &Arc<AddonClassLoader> {
        &self.loader
    }

    /// Resolve a class through this addon's loader.
    pub fn load_class(&self, name: &str) -> Result<Arc<AddonClass>, AddonError> {
        self.loader.load_class(name)
    }

    /// Path of the addon's data folder, without creating it.
    pub fn data_folder_path(&self) -> &Path {
        &self.data_folder
    }

    /// The addon's data folder, created on first use.
    pub fn data_folder(&self) -> Result<&Path, AddonError> {
        std::fs::create_dir_all(&self.data_folder)?;
        Ok(&self.data_folder)
    }
}
