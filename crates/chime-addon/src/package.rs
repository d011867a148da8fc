//! Addon packages: zip archives holding a manifest and class entries.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::AddonError;

/// Name of the manifest entry at the archive root.
pub const MANIFEST_ENTRY: &str = "addon.toml";

/// Suffix of class entries inside an archive.
const CLASS_SUFFIX: &str = ".class";

/// Largest manifest the runtime reads.
pub const MANIFEST_SIZE_LIMIT: u64 = 1024 * 1024;

/// Largest class entry the runtime reads.
pub const CLASS_SIZE_LIMIT: u64 = 16 * 1024 * 1024;

/// An indexed addon archive.
///
/// The entry index is read once on [`AddonPackage::open`]; entry contents are
/// read on demand by reopening the archive, so no bytes are held in memory.
#[derive(Debug, Clone)]
pub struct AddonPackage {
    path: PathBuf,
    entries: BTreeSet<String>,
}

/// Map a dotted class name (`org.tunes.Player`) to its archive entry
/// (`org/tunes/Player.class`).
pub fn class_entry(class_name: &str) -> String {
    format!("{}{CLASS_SUFFIX}", class_name.replace('.', "/"))
}

impl AddonPackage {
    /// Open an archive and index its file entries.
    pub fn open(path: &Path) -> Result<Self, AddonError> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let mut entries = BTreeSet::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.is_file() {
                entries.insert(entry.name().trim_start_matches('/').to_string());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the manifest text.
    pub fn manifest_text(&self) -> Result<String, AddonError> {
        if !self.entries.contains(MANIFEST_ENTRY) {
            return Err(AddonError::Descriptor(format!(
                "missing {MANIFEST_ENTRY} in {}",
                self.path.display()
            )));
        }
        let bytes = self.read_entry(MANIFEST_ENTRY, MANIFEST_SIZE_LIMIT)?;
        String::from_utf8(bytes).map_err(|_| {
            AddonError::Descriptor(format!("{MANIFEST_ENTRY} is not valid UTF-8"))
        })
    }

    /// Whether the archive ships the given class.
    pub fn contains_class(&self, class_name: &str) -> bool {
        self.entries.contains(&class_entry(class_name))
    }

    /// Read a class entry, or `None` when the archive does not ship it.
    pub fn read_class(&self, class_name: &str) -> Result<Option<Vec<u8>>, AddonError> {
        let entry = class_entry(class_name);
        if !self.entries.contains(&entry) {
            return Ok(None);
        }
        self.read_entry(&entry, CLASS_SIZE_LIMIT).map(Some)
    }

    /// Dotted names of every class shipped by the archive.
    pub fn class_names(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().filter_map(|entry| {
            entry
                .strip_suffix(CLASS_SUFFIX)
                .map(|stem| stem.replace('/', "."))
        })
    }

    /// Read an entry of at most `limit` bytes. The size the archive declares
    /// is not trusted; reading stops one byte past the limit.
    fn read_entry(&self, name: &str, limit: u64) -> Result<Vec<u8>, AddonError> {
        let file = File::open(&self.path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let entry = archive.by_name(name)?;
        let mut buf = Vec::new();
        entry.take(limit + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > limit {
            return Err(AddonError::Load(format!(
                "entry {name} of {} exceeds {limit} bytes",
                self.path.display()
            )));
        }
        Ok(buf)
    }
}

/// List the addon archives in `dir`, sorted by file name.
///
/// A missing directory is created and yields no packages.
pub fn discover_packages(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, AddonError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if matches {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
