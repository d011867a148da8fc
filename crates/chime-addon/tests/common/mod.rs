// Shared test utilities for integration tests
#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chime_addon::{
    AddonContext, AddonError, AddonLifecycleEvent, AddonMain, EntryPoints, FailureReport,
    HookResult,
};
use zip::write::SimpleFileOptions;

/// Write an addon archive holding `manifest` and the given classes.
pub fn write_addon(dir: &Path, file: &str, manifest: &str, classes: &[&str]) -> PathBuf {
    let path = dir.join(file);
    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    zip.start_file("addon.toml", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(manifest.as_bytes()).unwrap();
    for class in classes {
        let entry = format!("{}.class", class.replace('.', "/"));
        zip.start_file(entry, SimpleFileOptions::default()).unwrap();
        zip.write_all(class.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
}

/// Minimal manifest with extra key/value lines appended.
pub fn manifest(name: &str, main: &str, extra: &str) -> String {
    format!("name = \"{name}\"\nmain = \"{main}\"\nauthor = \"Test Author\"\n{extra}")
}

/// Everything the test addons did, in order.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// How a recording addon's hooks behave.
#[derive(Clone, Copy, Default)]
pub enum Behavior {
    #[default]
    Succeed,
    FailStart,
    PanicStart,
    SlowStart(Duration),
}

/// Addon main object that writes its hook calls to a journal.
pub struct Recorder {
    name: String,
    journal: Arc<Journal>,
    behavior: Behavior,
    starts: Arc<AtomicUsize>,
}

impl AddonMain for Recorder {
    fn on_start(&self, _ctx: &AddonContext) -> HookResult {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => {}
            Behavior::FailStart => return Err("speaker exploded".into()),
            Behavior::PanicStart => panic!("addon blew up"),
            Behavior::SlowStart(delay) => std::thread::sleep(delay),
        }
        self.journal.push(format!("start {}", self.name));
        Ok(())
    }

    fn on_stop(&self, _ctx: &AddonContext) -> HookResult {
        self.journal.push(format!("stop {}", self.name));
        Ok(())
    }
}

/// Link a recording constructor for `main`.
pub fn link(
    entries: &EntryPoints,
    main: &str,
    journal: &Arc<Journal>,
    behavior: Behavior,
) -> Arc<AtomicUsize> {
    let journal = Arc::clone(journal);
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&starts);
    entries
        .register(main, move |ctx: &AddonContext| {
            Ok(Box::new(Recorder {
                name: ctx.descriptor().name.clone(),
                journal: Arc::clone(&journal),
                behavior,
                starts: Arc::clone(&counter),
            }) as Box<dyn AddonMain>)
        })
        .unwrap();
    starts
}

/// Link a constructor that always fails.
pub fn link_failing(entries: &EntryPoints, main: &str) {
    entries
        .register(main, |_ctx: &AddonContext| {
            Err(AddonError::Load("constructor refused".into()))
        })
        .unwrap();
}

/// Link a constructor that panics.
pub fn link_panicking(entries: &EntryPoints, main: &str) {
    entries
        .register(main, |_ctx: &AddonContext| -> Result<Box<dyn AddonMain>, AddonError> {
            panic!("constructor blew up")
        })
        .unwrap();
}

/// Collects lifecycle events as `"+Name"` / `"-Name"`.
pub fn event_log() -> (Arc<Mutex<Vec<String>>>, impl Fn(&AddonLifecycleEvent) + Send + Sync) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let observer = move |event: &AddonLifecycleEvent| {
        let sign = if event.loading { '+' } else { '-' };
        sink.lock()
            .unwrap()
            .push(format!("{sign}{}", event.addon.name()));
    };
    (log, observer)
}

/// Collects failure reports.
pub fn failure_log() -> (
    Arc<Mutex<Vec<FailureReport>>>,
    impl Fn(&FailureReport) + Send + Sync,
) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let reporter = move |report: &FailureReport| sink.lock().unwrap().push(report.clone());
    (log, reporter)
}
