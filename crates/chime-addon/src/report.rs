//! Failure reports and lifecycle outcomes.
//!
//! Nothing in the runtime is fatal to the host: a broken package or a
//! failing hook degrades to "this addon did not load/start", is logged, and
//! is handed to the host's [`FailureReporter`] so it can route the problem
//! to the addon's authors.

use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::addon::Addon;
use crate::error::{AddonError, ErrorKind};

/// Where in an addon's life a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Register,
    Start,
    Stop,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FailureStage::Register => "register",
            FailureStage::Start => "start",
            FailureStage::Stop => "stop",
        })
    }
}

/// A single addon or package failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub stage: FailureStage,
    pub kind: ErrorKind,
    pub package: Option<String>,
    pub addon: Option<String>,
    pub authors: Vec<String>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl FailureReport {
    /// Failure of a package that never became an addon.
    pub fn for_package(stage: FailureStage, package: &Path, error: &AddonError) -> Self {
        Self {
            stage,
            kind: error.kind(),
            package: Some(package.display().to_string()),
            addon: None,
            authors: Vec::new(),
            message: error.to_string(),
            occurred_at: Utc::now(),
        }
    }

    /// Failure of a registered addon.
    pub fn for_addon(stage: FailureStage, addon: &Addon, error: &AddonError) -> Self {
        Self {
            stage,
            kind: error.kind(),
            package: Some(addon.package_path().display().to_string()),
            addon: Some(addon.name().to_string()),
            authors: addon.descriptor().authors.clone(),
            message: error.to_string(),
            occurred_at: Utc::now(),
        }
    }

    pub(crate) fn with_identity(mut self, addon: &str, authors: &[String]) -> Self {
        self.addon = Some(addon.to_string());
        self.authors = authors.to_vec();
        self
    }
}

/// Receives every failure the runtime reports.
pub trait FailureReporter: Send + Sync {
    fn report(&self, report: &FailureReport);
}

impl<F> FailureReporter for F
where
    F: Fn(&FailureReport) + Send + Sync,
{
    fn report(&self, report: &FailureReport) {
        self(report)
    }
}

/// Result of [`AddonManager::register_addons`](crate::AddonManager::register_addons).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrationReport {
    /// Registered addon names, dependencies first.
    pub registered: Vec<String>,
    pub failures: Vec<FailureReport>,
}

// ─── Lifecycle outcomes ─────────────────────────────────────────────────

/// How a start or stop hook ended. The transition is recorded either way.
#[derive(Debug, Clone)]
pub enum LifecycleOutcome {
    Completed,
    Failed(FailureReport),
}

impl LifecycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, LifecycleOutcome::Completed)
    }
}

/// A start or stop hook running on the blocking pool.
///
/// Awaiting the task waits for the hook; dropping it does not cancel it.
#[derive(Debug)]
pub struct LifecycleTask {
    addon: String,
    loading: bool,
    handle: JoinHandle<LifecycleOutcome>,
}

impl LifecycleTask {
    pub(crate) fn new(addon: String, loading: bool, handle: JoinHandle<LifecycleOutcome>) -> Self {
        Self {
            addon,
            loading,
            handle,
        }
    }

    pub fn addon(&self) -> &str {
        &self.addon
    }

    /// `true` for a start, `false` for a stop.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl std::future::Future for LifecycleTask {
    type Output = LifecycleOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let stage = if self.loading {
            FailureStage::Start
        } else {
            FailureStage::Stop
        };
        Pin::new(&mut self.handle).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                let error = AddonError::Lifecycle {
                    addon: self.addon.clone(),
                    message: format!("lifecycle worker failed: {e}"),
                };
                LifecycleOutcome::Failed(FailureReport {
                    stage,
                    kind: error.kind(),
                    package: None,
                    addon: Some(self.addon.clone()),
                    authors: Vec::new(),
                    message: error.to_string(),
                    occurred_at: Utc::now(),
                })
            })
        })
    }
}

/// What a single-addon start or stop request turned into.
#[derive(Debug)]
pub enum Dispatch {
    /// The hook is running in the background.
    Running(LifecycleTask),
    /// The hook ran to completion before the call returned.
    Finished(LifecycleOutcome),
    /// Nothing to do: already in the requested state, or refused.
    Skipped,
}

impl Dispatch {
    /// Wait for the hook if it is still running.
    pub async fn outcome(self) -> Option<LifecycleOutcome> {
        match self {
            Dispatch::Running(task) => Some(task.await),
            Dispatch::Finished(outcome) => Some(outcome),
            Dispatch::Skipped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_report() {
        let err = AddonError::Descriptor("missing required field 'main'".into());
        let report = FailureReport::for_package(
            FailureStage::Register,
            Path::new("addons/broken.jar"),
            &err,
        );
        assert_eq!(report.kind, ErrorKind::Descriptor);
        assert_eq!(report.package.as_deref(), Some("addons/broken.jar"));
        assert!(report.addon.is_none());
        assert!(report.message.contains("'main'"));

        let report = report.with_identity("Jukebox", &["Jane".to_string()]);
        assert_eq!(report.addon.as_deref(), Some("Jukebox"));
        assert_eq!(report.authors, vec!["Jane"]);
    }

    #[test]
    fn test_report_serialization() {
        let err = AddonError::Load("boom".into());
        let report = FailureReport::for_package(FailureStage::Start, Path::new("x.jar"), &err);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stage"], "start");
        assert_eq!(json["kind"], "load");
    }

    #[tokio::test]
    async fn test_task_resolves_outcome() {
        let handle = tokio::task::spawn_blocking(|| LifecycleOutcome::Completed);
        let task = LifecycleTask::new("Jukebox".into(), true, handle);
        assert_eq!(task.addon(), "Jukebox");
        assert!(task.is_loading());
        assert!(task.await.is_completed());
    }

    #[tokio::test]
    async fn test_task_maps_worker_panic() {
        let handle = tokio::task::spawn_blocking(|| -> LifecycleOutcome { panic!("worker died") });
        let outcome = LifecycleTask::new("Jukebox".into(), false, handle).await;
        match outcome {
            LifecycleOutcome::Failed(report) => {
                assert_eq!(report.stage, FailureStage::Stop);
                assert_eq!(report.kind, ErrorKind::Lifecycle);
            }
            LifecycleOutcome::Completed => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_outcome() {
        assert!(Dispatch::Skipped.outcome().await.is_none());
        assert!(Dispatch::Finished(LifecycleOutcome::Completed)
            .outcome()
            .await
            .unwrap()
            .is_completed());
    }
}
