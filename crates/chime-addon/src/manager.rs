//! Addon manager: registration, dependency order and lifecycle.
//!
//! The `AddonManager` owns the addon registry. The host calls it once per
//! boot phase: `register_addons()` early, `start_addons(phase)` for each
//! phase, `start_hooked()` when a hooked plugin or addon comes up, and
//! `stop_addons()` on shutdown. Start and stop hooks run on tokio's blocking
//! pool so a slow addon never stalls the host.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::addon::Addon;
use crate::class_loader::{AddonClassLoader, ClassRegistry};
use crate::config::RuntimeConfig;
use crate::descriptor::{AddonDescriptor, StartPhase};
use crate::entry::{panic_message, AddonContext, EntryPoints};
use crate::error::AddonError;
use crate::events::{AddonLifecycleEvent, AddonSummary, LifecycleObserver, Observers};
use crate::graph;
use crate::host::{HookTarget, HostPlugins, NoHostPlugins};
use crate::package::{discover_packages, AddonPackage};
use crate::report::{
    Dispatch, FailureReport, FailureReporter, FailureStage, LifecycleOutcome, LifecycleTask,
    RegistrationReport,
};

// ─── Shared lifecycle state ─────────────────────────────────────────────

/// State the lifecycle workers need besides the addon itself.
#[derive(Default)]
struct Shared {
    observers: Observers,
    reporter: RwLock<Option<Arc<dyn FailureReporter>>>,
}

impl Shared {
    /// Log a failure and hand it to the reporter.
    fn report(&self, report: FailureReport) {
        tracing::error!(
            stage = %report.stage,
            kind = ?report.kind,
            addon = report.addon.as_deref().unwrap_or("-"),
            authors = ?report.authors,
            package = report.package.as_deref().unwrap_or("-"),
            "{}",
            report.message
        );
        self.forward(&report);
    }

    fn forward(&self, report: &FailureReport) {
        let reporter = self.reporter.read().clone();
        if let Some(reporter) = reporter {
            reporter.report(report);
        }
    }
}

/// Marks an addon's start finished when dropped, whether or not the start
/// worker ever ran.
struct StartFinished(Arc<Addon>);

impl Drop for StartFinished {
    fn drop(&mut self) {
        self.0.finish_start();
    }
}

/// Run an addon's start (`loading`) or stop hook, then record and broadcast.
///
/// A stop first waits for a start that is still running.
fn run_hook(addon: Arc<Addon>, shared: Arc<Shared>, loading: bool) -> LifecycleOutcome {
    if !loading {
        addon.wait_for_start();
    }
    let ctx = addon.context();
    let result = catch_unwind(AssertUnwindSafe(|| {
        if loading {
            addon.main().on_start(ctx)
        } else {
            addon.main().on_stop(ctx)
        }
    }));

    let failure = match result {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
    };

    addon.set_loaded(loading);

    let outcome = match failure {
        None => {
            tracing::info!(
                addon = %addon.name(),
                version = %addon.descriptor().version,
                "addon {}",
                if loading { "started" } else { "stopped" }
            );
            LifecycleOutcome::Completed
        }
        Some(message) => {
            let stage = if loading {
                FailureStage::Start
            } else {
                FailureStage::Stop
            };
            let error = AddonError::Lifecycle {
                addon: addon.name().to_string(),
                message,
            };
            let report = FailureReport::for_addon(stage, &addon, &error);
            shared.report(report.clone());
            LifecycleOutcome::Failed(report)
        }
    };

    shared
        .observers
        .broadcast(&AddonLifecycleEvent::new(Arc::clone(&addon), loading));
    outcome
}

// ─── Registration scan ──────────────────────────────────────────────────

/// A package whose descriptor parsed and whose loader is active.
struct Candidate {
    path: PathBuf,
    descriptor: AddonDescriptor,
    loader: Arc<AddonClassLoader>,
}

/// Everything the registration worker needs, moved onto its thread.
struct Scan {
    config: RuntimeConfig,
    entry_points: EntryPoints,
    classes: Arc<ClassRegistry>,
}

impl Scan {
    fn run(self) -> Result<(Vec<Arc<Addon>>, Vec<FailureReport>), AddonError> {
        let paths = discover_packages(&self.config.addon_dir, &self.config.archive_extensions)?;
        tracing::info!(
            dir = %self.config.addon_dir.display(),
            count = paths.len(),
            "scanning addon packages"
        );

        let mut failures = Vec::new();
        let mut candidates = Vec::new();
        for path in paths {
            match self.prepare(&path) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => failures.push(FailureReport::for_package(
                    FailureStage::Register,
                    &path,
                    &e,
                )),
            }
        }

        let candidates = self.drop_cycles(candidates, &mut failures);

        let descriptors: Vec<AddonDescriptor> =
            candidates.iter().map(|c| c.descriptor.clone()).collect();
        let order = match graph::sort_descriptors(&descriptors) {
            Ok(order) => order,
            Err(e) => {
                // Leave the registry as it was before the scan.
                for candidate in &candidates {
                    self.classes.unregister(&candidate.descriptor.name);
                }
                return Err(e);
            }
        };

        let mut addons = Vec::with_capacity(order.len());
        for descriptor in order {
            let Some(candidate) = candidates.iter().find(|c| c.descriptor.name == descriptor.name)
            else {
                continue;
            };
            match self.instantiate(candidate) {
                Ok(addon) => addons.push(addon),
                Err(e) => {
                    self.classes.unregister(&candidate.descriptor.name);
                    failures.push(
                        FailureReport::for_package(FailureStage::Register, &candidate.path, &e)
                            .with_identity(
                                &candidate.descriptor.name,
                                &candidate.descriptor.authors,
                            ),
                    );
                }
            }
        }

        Ok((addons, failures))
    }

    /// Read the descriptor and activate the package's class loader.
    fn prepare(&self, path: &std::path::Path) -> Result<Candidate, AddonError> {
        let package = AddonPackage::open(path)?;
        let descriptor = AddonDescriptor::from_package(&package)?;
        let loader = AddonClassLoader::new(
            descriptor.name.clone(),
            descriptor.addon_dependencies(),
            package,
            &self.classes,
        );
        self.classes.register(Arc::clone(&loader))?;
        tracing::debug!(
            addon = %descriptor.name,
            package = %path.display(),
            phase = %descriptor.start_phase,
            "addon package accepted"
        );
        Ok(Candidate {
            path: path.to_path_buf(),
            descriptor,
            loader,
        })
    }

    /// Remove every candidate that sits on a dependency cycle.
    fn drop_cycles(
        &self,
        candidates: Vec<Candidate>,
        failures: &mut Vec<FailureReport>,
    ) -> Vec<Candidate> {
        let descriptors: Vec<AddonDescriptor> =
            candidates.iter().map(|c| c.descriptor.clone()).collect();
        let cycle_error = match graph::sort_descriptors(&descriptors) {
            Ok(_) => return candidates,
            Err(e) => e.to_string(),
        };
        let cyclic: HashSet<String> = graph::cyclic_addons(&descriptors).into_iter().collect();

        let (rejected, kept): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|c| cyclic.contains(&c.descriptor.name));
        for candidate in rejected {
            self.classes.unregister(&candidate.descriptor.name);
            let error = AddonError::DependencyCycle(format!(
                "addon {} is part of a dependency cycle ({cycle_error})",
                candidate.descriptor.name
            ));
            failures.push(
                FailureReport::for_package(FailureStage::Register, &candidate.path, &error)
                    .with_identity(&candidate.descriptor.name, &candidate.descriptor.authors),
            );
        }
        kept
    }

    fn instantiate(&self, candidate: &Candidate) -> Result<Arc<Addon>, AddonError> {
        let context = AddonContext::new(
            Arc::new(candidate.descriptor.clone()),
            Arc::clone(&candidate.loader),
            self.config.data_folder(&candidate.descriptor.name),
        );
        let main = candidate
            .loader
            .instantiate_main(&self.entry_points, &context)?;
        Ok(Arc::new(Addon::new(context, main)))
    }
}

// ─── Manager ────────────────────────────────────────────────────────────

/// Owns the addon registry and drives every addon's lifecycle.
pub struct AddonManager {
    config: RuntimeConfig,
    entry_points: EntryPoints,
    classes: Arc<ClassRegistry>,
    host: Arc<dyn HostPlugins>,
    /// Registered addons, dependencies first.
    addons: RwLock<Vec<Arc<Addon>>>,
    /// Serializes `register_addons` calls.
    registration: tokio::sync::Mutex<()>,
    shared: Arc<Shared>,
    runtime: Handle,
}

impl std::fmt::Debug for AddonManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonManager")
            .field("config", &self.config)
            .field("addons", &self.addons.read().len())
            .finish_non_exhaustive()
    }
}

impl AddonManager {
    /// Create a manager bound to the current tokio runtime.
    ///
    /// Does NOT scan for addons; call `register_addons()` after creation.
    pub fn new(config: RuntimeConfig, entry_points: EntryPoints) -> Result<Self, AddonError> {
        let runtime = Handle::try_current().map_err(|e| {
            AddonError::State(format!("addon manager needs a tokio runtime: {e}"))
        })?;
        Ok(Self {
            config,
            entry_points,
            classes: ClassRegistry::new(),
            host: Arc::new(NoHostPlugins),
            addons: RwLock::new(Vec::new()),
            registration: tokio::sync::Mutex::new(()),
            shared: Arc::new(Shared::default()),
            runtime,
        })
    }

    /// Consult `host` for `required-plugins`.
    pub fn with_host_plugins(mut self, host: Arc<dyn HostPlugins>) -> Self {
        self.host = host;
        self
    }

    /// Forward every failure to `reporter` in addition to the log.
    pub fn with_reporter(self, reporter: Arc<dyn FailureReporter>) -> Self {
        *self.shared.reporter.write() = Some(reporter);
        self
    }

    /// Use an existing class registry instead of a fresh one.
    pub fn with_class_registry(mut self, classes: Arc<ClassRegistry>) -> Self {
        self.classes = classes;
        self
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Scan the addon directory and register every valid package.
    ///
    /// The scan runs on a blocking worker; the caller waits for it. Broken
    /// packages are logged and reported without affecting the others.
    /// Fails with a state error if addons are already registered.
    pub async fn register_addons(&self) -> Result<RegistrationReport, AddonError> {
        let _guard = self.registration.lock().await;
        if !self.addons.read().is_empty() {
            return Err(AddonError::State("addons are already registered".into()));
        }

        let preexisting: HashSet<String> = self
            .classes
            .loaders()
            .iter()
            .map(|l| l.addon().to_string())
            .collect();
        let scan = Scan {
            config: self.config.clone(),
            entry_points: self.entry_points.clone(),
            classes: Arc::clone(&self.classes),
        };
        let joined = self.runtime.spawn_blocking(move || scan.run()).await;
        let (addons, failures) = match joined {
            Ok(result) => result?,
            Err(e) => {
                // The worker died mid-scan; drop whatever loaders it activated.
                for loader in self.classes.loaders() {
                    if !preexisting.contains(loader.addon()) {
                        self.classes.unregister(loader.addon());
                    }
                }
                return Err(AddonError::State(format!(
                    "registration worker failed: {e}"
                )));
            }
        };

        for failure in &failures {
            self.shared.report(failure.clone());
        }

        let registered: Vec<String> = addons.iter().map(|a| a.name().to_string()).collect();
        tracing::info!(
            registered = registered.len(),
            failed = failures.len(),
            addons = ?registered,
            "addon registration complete"
        );
        *self.addons.write() = addons;

        Ok(RegistrationReport {
            registered,
            failures,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Registered addons, dependencies first.
    pub fn addons(&self) -> Vec<Arc<Addon>> {
        self.addons.read().clone()
    }

    pub fn addon(&self, name: &str) -> Option<Arc<Addon>> {
        self.addons.read().iter().find(|a| a.name() == name).cloned()
    }

    pub fn summaries(&self) -> Vec<AddonSummary> {
        self.addons
            .read()
            .iter()
            .map(|a| AddonSummary::of(a.as_ref()))
            .collect()
    }

    pub fn class_registry(&self) -> &Arc<ClassRegistry> {
        &self.classes
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register a lifecycle observer.
    pub fn subscribe(&self, observer: Arc<dyn LifecycleObserver>) {
        self.shared.observers.subscribe(observer);
    }

    // ── Start ────────────────────────────────────────────────────────

    /// Start every unstarted addon bound to `phase`, without waiting.
    ///
    /// Hook phases are never swept; their addons start via `start_hooked`.
    pub fn start_addons(&self, phase: StartPhase) -> Vec<LifecycleTask> {
        if phase.is_hook() {
            tracing::debug!(phase = %phase, "hook phases are not swept");
            return Vec::new();
        }

        let tasks: Vec<LifecycleTask> = self
            .addons()
            .into_iter()
            .filter(|a| a.descriptor().start_phase == phase && a.can_start())
            .filter_map(|a| self.spawn_start(a))
            .collect();
        tracing::info!(phase = %phase, count = tasks.len(), "starting addons");
        tasks
    }

    /// Start one addon.
    ///
    /// Hook-phase addons are awaited so the caller sees them fully started;
    /// others keep running in the background.
    pub async fn start_addon(&self, addon: &Arc<Addon>) -> Dispatch {
        let Some(task) = self.spawn_start(Arc::clone(addon)) else {
            return Dispatch::Skipped;
        };
        if addon.descriptor().start_phase.is_hook() {
            Dispatch::Finished(task.await)
        } else {
            Dispatch::Running(task)
        }
    }

    /// Start every hook-phase addon activated by `target`, in dependency
    /// order, waiting for each. Addons hooking an addon started here are
    /// started as well.
    pub async fn start_hooked(&self, target: &HookTarget) -> Vec<LifecycleOutcome> {
        let hooked = self.hooked_closure(target);
        let mut outcomes = Vec::new();
        for addon in self.addons() {
            if !hooked.contains(addon.name()) {
                continue;
            }
            if let Some(outcome) = self.start_addon(&addon).await.outcome().await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn spawn_start(&self, addon: Arc<Addon>) -> Option<LifecycleTask> {
        if !addon.can_start() {
            return None;
        }
        if let Err(e) = self.check_requirements(&addon) {
            tracing::warn!(
                addon = %addon.name(),
                authors = ?addon.descriptor().authors,
                "refusing to start addon: {e}"
            );
            self.shared
                .forward(&FailureReport::for_addon(FailureStage::Start, &addon, &e));
            return None;
        }
        if !addon.try_mark_started() {
            return None;
        }

        let name = addon.name().to_string();
        let shared = Arc::clone(&self.shared);
        let finished = StartFinished(Arc::clone(&addon));
        let handle = self.runtime.spawn_blocking(move || {
            let _finished = finished;
            run_hook(addon, shared, true)
        });
        Some(LifecycleTask::new(name, true, handle))
    }

    /// Required addons must be registered and required plugins enabled.
    fn check_requirements(&self, addon: &Addon) -> Result<(), AddonError> {
        let descriptor = addon.descriptor();
        let missing_addons: Vec<&str> = descriptor
            .required_addons
            .iter()
            .filter(|name| self.addon(name).is_none())
            .map(String::as_str)
            .collect();
        let missing_plugins: Vec<&str> = descriptor
            .required_plugins
            .iter()
            .filter(|name| !self.host.is_plugin_enabled(name))
            .map(String::as_str)
            .collect();

        if missing_addons.is_empty() && missing_plugins.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();
        if !missing_addons.is_empty() {
            parts.push(format!("missing required addons: {}", missing_addons.join(", ")));
        }
        if !missing_plugins.is_empty() {
            parts.push(format!(
                "missing required plugins: {}",
                missing_plugins.join(", ")
            ));
        }
        Err(AddonError::State(parts.join("; ")))
    }

    // ── Stop ─────────────────────────────────────────────────────────

    /// Stop every started, non-hook addon, dependants first, without waiting.
    ///
    /// Hook-phase addons stop with whatever they hook into (`stop_hooked`).
    pub fn stop_addons(&self) -> Vec<LifecycleTask> {
        let tasks: Vec<LifecycleTask> = self
            .addons()
            .into_iter()
            .rev()
            .filter(|a| !a.descriptor().start_phase.is_hook() && a.can_stop())
            .filter_map(|a| self.spawn_stop(a))
            .collect();
        tracing::info!(count = tasks.len(), "stopping addons");
        tasks
    }

    /// Stop one addon; hook-phase addons are awaited.
    pub async fn stop_addon(&self, addon: &Arc<Addon>) -> Dispatch {
        let Some(task) = self.spawn_stop(Arc::clone(addon)) else {
            return Dispatch::Skipped;
        };
        if addon.descriptor().start_phase.is_hook() {
            Dispatch::Finished(task.await)
        } else {
            Dispatch::Running(task)
        }
    }

    /// Stop every hook-phase addon depending on `target`, dependants first,
    /// waiting for each.
    pub async fn stop_hooked(&self, target: &HookTarget) -> Vec<LifecycleOutcome> {
        let hooked = self.hooked_closure(target);
        let mut outcomes = Vec::new();
        for addon in self.addons().into_iter().rev() {
            if !hooked.contains(addon.name()) {
                continue;
            }
            if let Some(outcome) = self.stop_addon(&addon).await.outcome().await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn spawn_stop(&self, addon: Arc<Addon>) -> Option<LifecycleTask> {
        if !addon.try_mark_stopped() {
            return None;
        }
        let name = addon.name().to_string();
        let shared = Arc::clone(&self.shared);
        let handle = self
            .runtime
            .spawn_blocking(move || run_hook(addon, shared, false));
        Some(LifecycleTask::new(name, false, handle))
    }

    // ── Hooks ────────────────────────────────────────────────────────

    /// Names of hook-phase addons activated, directly or through other
    /// hook-phase addons, by `target`.
    fn hooked_closure(&self, target: &HookTarget) -> HashSet<String> {
        let addons = self.addons();
        let hooks = |addon: &Addon, target: &HookTarget| {
            let descriptor = addon.descriptor();
            match target {
                HookTarget::Addon(name) => {
                    descriptor.start_phase == StartPhase::HookAddons
                        && descriptor.hook_addons.contains(name)
                }
                HookTarget::Plugin(name) => {
                    descriptor.start_phase == StartPhase::HookPlugins
                        && descriptor.hook_plugins.contains(name)
                }
            }
        };

        let mut hooked = HashSet::new();
        let mut pending = vec![target.clone()];
        while let Some(current) = pending.pop() {
            for addon in &addons {
                if hooks(addon.as_ref(), &current) && hooked.insert(addon.name().to_string()) {
                    pending.push(HookTarget::Addon(addon.name().to_string()));
                }
            }
        }
        hooked
    }
}
