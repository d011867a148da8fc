//! Per-addon class loaders and the registry they share.
//!
//! Every registered addon gets one [`AddonClassLoader`]. A loader resolves
//! classes from its own archive first and then searches its siblings, so an
//! addon can use classes shipped by the addons it depends on. Loaders find
//! each other through an explicit [`ClassRegistry`] owned by the host.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::entry::{panic_message, AddonContext, AddonMain, EntryPoints};
use crate::error::AddonError;
use crate::package::AddonPackage;

/// A class resolved from some addon's archive.
#[derive(Debug)]
pub struct AddonClass {
    name: String,
    owner: String,
    bytes: Vec<u8>,
}

impl AddonClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the addon whose archive ships this class.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Cache key: (requesting addon, class name).
type CacheKey = (String, String);

// ─── Registry ───────────────────────────────────────────────────────────

/// Active loaders plus the resolution cache shared by all of them.
///
/// Both collections sit behind their own `RwLock`; no lock is held while an
/// archive is read.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    /// Active loaders in registration order.
    loaders: RwLock<Vec<Arc<AddonClassLoader>>>,
    cache: RwLock<HashMap<CacheKey, Arc<AddonClass>>>,
}

impl ClassRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a loader to the active set.
    ///
    /// Fails when another loader already serves the same archive or the
    /// same addon name.
    pub fn register(&self, loader: Arc<AddonClassLoader>) -> Result<(), AddonError> {
        let mut loaders = self.loaders.write();
        if let Some(existing) = loaders
            .iter()
            .find(|l| l.package.path() == loader.package.path())
        {
            return Err(AddonError::State(format!(
                "package {} is already loaded by addon {}",
                loader.package.path().display(),
                existing.addon
            )));
        }
        if loaders.iter().any(|l| l.addon == loader.addon) {
            return Err(AddonError::AlreadyExists(loader.addon.clone()));
        }
        loaders.push(loader);
        Ok(())
    }

    /// Remove an addon's loader and evict every cache entry it requested or owns.
    pub fn unregister(&self, addon: &str) -> Option<Arc<AddonClassLoader>> {
        let removed = {
            let mut loaders = self.loaders.write();
            let index = loaders.iter().position(|l| l.addon == addon)?;
            loaders.remove(index)
        };
        self.cache
            .write()
            .retain(|(requester, _), class| requester != addon && class.owner != addon);
        Some(removed)
    }

    /// Snapshot of the active loaders.
    pub fn loaders(&self) -> Vec<Arc<AddonClassLoader>> {
        self.loaders.read().clone()
    }

    pub fn loader(&self, addon: &str) -> Option<Arc<AddonClassLoader>> {
        self.loaders.read().iter().find(|l| l.addon == addon).cloned()
    }

    pub fn len(&self) -> usize {
        self.loaders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.read().is_empty()
    }

    /// Cached resolution of `class` as seen by `requester`.
    pub fn cached(&self, requester: &str, class: &str) -> Option<Arc<AddonClass>> {
        self.cache
            .read()
            .get(&(requester.to_string(), class.to_string()))
            .cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    fn remember(&self, requester: &str, class: Arc<AddonClass>) -> Arc<AddonClass> {
        let key = (requester.to_string(), class.name.clone());
        // Keep the first resolution if another worker raced us here.
        self.cache.write().entry(key).or_insert(class).clone()
    }
}

// ─── Loader ─────────────────────────────────────────────────────────────

/// Class loader of a single addon.
pub struct AddonClassLoader {
    addon: String,
    dependencies: Vec<String>,
    package: AddonPackage,
    registry: Weak<ClassRegistry>,
    main: Mutex<Option<Arc<dyn AddonMain>>>,
}

impl std::fmt::Debug for AddonClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonClassLoader")
            .field("addon", &self.addon)
            .field("package", &self.package.path())
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl AddonClassLoader {
    /// Create a loader for `addon`. It is not active until registered.
    pub fn new(
        addon: impl Into<String>,
        dependencies: Vec<String>,
        package: AddonPackage,
        registry: &Arc<ClassRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            addon: addon.into(),
            dependencies,
            package,
            registry: Arc::downgrade(registry),
            main: Mutex::new(None),
        })
    }

    pub fn addon(&self) -> &str {
        &self.addon
    }

    pub fn package_path(&self) -> &Path {
        self.package.path()
    }

    pub fn package(&self) -> &AddonPackage {
        &self.package
    }

    /// Resolve a class by dotted name.
    ///
    /// Order: shared cache, this addon's archive, then every other active
    /// loader's archive in registration order.
    pub fn load_class(&self, name: &str) -> Result<Arc<AddonClass>, AddonError> {
        let registry = self.registry.upgrade().ok_or_else(|| {
            AddonError::State(format!("class registry of addon {} was dropped", self.addon))
        })?;

        if let Some(class) = registry.cached(&self.addon, name) {
            tracing::trace!(addon = %self.addon, class = %name, "class served from cache");
            return Ok(class);
        }

        if let Some(class) = self.find_local(name)? {
            return Ok(registry.remember(&self.addon, class));
        }

        for sibling in registry.loaders() {
            if sibling.addon == self.addon {
                continue;
            }
            match sibling.find_local(name) {
                Ok(Some(class)) => {
                    tracing::debug!(
                        addon = %self.addon,
                        class = %name,
                        owner = %sibling.addon,
                        "class resolved from sibling addon"
                    );
                    return Ok(registry.remember(&self.addon, class));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(
                        addon = %self.addon,
                        sibling = %sibling.addon,
                        "failed to search sibling archive: {e}"
                    );
                }
            }
        }

        Err(AddonError::class_not_found(
            name,
            &self.addon,
            &self.dependencies,
        ))
    }

    /// Look a class up in this addon's own archive, bypassing the cache.
    fn find_local(&self, name: &str) -> Result<Option<Arc<AddonClass>>, AddonError> {
        let Some(bytes) = self.package.read_class(name)? else {
            return Ok(None);
        };
        Ok(Some(Arc::new(AddonClass {
            name: name.to_string(),
            owner: self.addon.clone(),
            bytes,
        })))
    }

    /// Build the addon's main object. Succeeds at most once per loader.
    ///
    /// A constructor that panics fails with a load error. The `main` slot is
    /// not locked while the constructor runs, so it may call back into this
    /// loader.
    pub fn instantiate_main(
        &self,
        entry_points: &EntryPoints,
        context: &AddonContext,
    ) -> Result<Arc<dyn AddonMain>, AddonError> {
        if self.main.lock().is_some() {
            return Err(self.already_instantiated());
        }

        let main_class = &context.descriptor().main;
        let class = self.load_class(main_class).map_err(|e| match e {
            AddonError::ClassNotFound { .. } => AddonError::Load(format!(
                "main class {main_class} of addon {} is not shipped by its package",
                self.addon
            )),
            other => other,
        })?;
        if class.owner != self.addon {
            return Err(AddonError::Load(format!(
                "main class {main_class} of addon {} is shipped by addon {}",
                self.addon, class.owner
            )));
        }

        let constructor = entry_points.get(main_class).ok_or_else(|| {
            AddonError::Load(format!(
                "no entry point linked for main class {main_class} of addon {}",
                self.addon
            ))
        })?;

        let built = catch_unwind(AssertUnwindSafe(|| constructor(context))).map_err(|payload| {
            AddonError::Load(format!(
                "constructor of main class {main_class} of addon {} panicked: {}",
                self.addon,
                panic_message(payload.as_ref())
            ))
        })??;
        let main: Arc<dyn AddonMain> = Arc::from(built);

        let mut slot = self.main.lock();
        if slot.is_some() {
            return Err(self.already_instantiated());
        }
        *slot = Some(Arc::clone(&main));
        Ok(main)
    }

    fn already_instantiated(&self) -> AddonError {
        AddonError::State(format!(
            "main object of addon {} is already instantiated",
            self.addon
        ))
    }

    /// The main object, once instantiated.
    pub fn main(&self) -> Option<Arc<dyn AddonMain>> {
        self.main.lock().clone()
    }
}
