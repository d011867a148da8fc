//! Chime addon runtime
//!
//! Discovers third-party addon archives at startup, gives each one its own
//! class loader that can also resolve classes from sibling addons, orders
//! addons so dependencies start before dependants, and drives every addon
//! through a start/stop lifecycle tied to the host's boot phases. Hooks run
//! on tokio's blocking pool; a failing addon never takes the host down.

pub mod addon;
pub mod class_loader;
pub mod config;
pub mod descriptor;
pub mod entry;
pub mod error;
pub mod events;
pub mod graph;
pub mod host;
pub mod manager;
pub mod package;
pub mod report;

pub use addon::Addon;
pub use class_loader::{AddonClass, AddonClassLoader, ClassRegistry};
pub use config::RuntimeConfig;
pub use descriptor::{AddonDescriptor, StartPhase};
pub use entry::{AddonConstructor, AddonContext, AddonMain, EntryPoints, HookResult};
pub use error::{AddonError, ErrorKind};
pub use events::{AddonLifecycleEvent, AddonSummary, LifecycleObserver};
pub use host::{HookTarget, HostPlugins, NoHostPlugins, StaticHostPlugins};
pub use manager::AddonManager;
pub use report::{
    Dispatch, FailureReport, FailureReporter, FailureStage, LifecycleOutcome, LifecycleTask,
    RegistrationReport,
};
