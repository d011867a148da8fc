//! A registered addon and its lifecycle flags.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::class_loader::AddonClassLoader;
use crate::descriptor::AddonDescriptor;
use crate::entry::{AddonContext, AddonMain};

/// A registered addon.
///
/// `started` and `stopped` only ever go from `false` to `true`; `loaded`
/// mirrors whether the last completed transition was a start. A stop hook
/// never runs before the start hook it follows has finished.
pub struct Addon {
    package_path: PathBuf,
    context: AddonContext,
    main: Arc<dyn AddonMain>,
    started: AtomicBool,
    stopped: AtomicBool,
    loaded: AtomicBool,
    start_finished: Mutex<bool>,
    start_signal: Condvar,
}

impl std::fmt::Debug for Addon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Addon")
            .field("name", &self.name())
            .field("version", &self.descriptor().version)
            .field("package", &self.package_path)
            .field("started", &self.is_started())
            .field("stopped", &self.is_stopped())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Addon {
    pub(crate) fn new(context: AddonContext, main: Arc<dyn AddonMain>) -> Self {
        Self {
            package_path: context.loader().package_path().to_path_buf(),
            context,
            main,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            start_finished: Mutex::new(false),
            start_signal: Condvar::new(),
        }
    }

    pub fn descriptor(&self) -> &AddonDescriptor {
        self.context.descriptor()
    }

    pub fn name(&self) -> &str {
        &self.descriptor().name
    }

    pub fn package_path(&self) -> &Path {
        &self.package_path
    }

    pub fn context(&self) -> &AddonContext {
        &self.context
    }

    pub fn loader(&self) -> &Arc<AddonClassLoader> {
        self.context.loader()
    }

    pub(crate) fn main(&self) -> &Arc<dyn AddonMain> {
        &self.main
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Whether a start would do anything right now.
    pub fn can_start(&self) -> bool {
        !self.is_started() && !self.is_stopped()
    }

    /// Whether a stop would do anything right now.
    pub fn can_stop(&self) -> bool {
        self.is_started() && !self.is_stopped()
    }

    /// Claim the start transition. Returns `false` if already started or stopped.
    pub(crate) fn try_mark_started(&self) -> bool {
        !self.is_stopped()
            && self
                .started
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Claim the stop transition. Returns `false` unless started and not yet stopped.
    pub(crate) fn try_mark_stopped(&self) -> bool {
        self.is_started()
            && self
                .stopped
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub(crate) fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::Release);
    }

    /// Record that the start transition has run to completion.
    pub(crate) fn finish_start(&self) {
        *self.start_finished.lock() = true;
        self.start_signal.notify_all();
    }

    /// Block until the start transition has finished. Only called once the
    /// addon is marked started.
    pub(crate) fn wait_for_start(&self) {
        let mut finished = self.start_finished.lock();
        while !*finished {
            self.start_signal.wait(&mut finished);
        }
    }
}
