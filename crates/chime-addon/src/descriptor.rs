//! Addon descriptor parsing and validation.
//!
//! Parses the `addon.toml` manifest shipped at the root of every addon
//! archive. Values are plain strings; list-valued keys are comma separated
//! (`hook-addons = "Speakers, Vinyl Core"`), though TOML arrays are accepted
//! as well.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AddonError;
use crate::package::AddonPackage;

/// Version used when a manifest declares neither `version` nor `api-version`.
pub const DEFAULT_VERSION: &str = "1.0";

const NAME_MIN_LEN: usize = 3;
const NAME_MAX_LEN: usize = 26;
const NAME_MIN_LETTERS: usize = 3;

// ─── Start phase ────────────────────────────────────────────────────────

/// Point in the host's boot sequence at which an addon is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartPhase {
    /// Host is loading its plugins.
    PluginLoad,
    /// Host is enabling its plugins.
    PluginEnable,
    /// Host finished booting.
    #[default]
    ServerLoadComplete,
    /// Started when one of the addons in `hook-addons` starts.
    HookAddons,
    /// Started when one of the host plugins in `hook-plugins` is enabled.
    HookPlugins,
}

impl StartPhase {
    /// Every phase, boot-sequence phases first.
    pub const ALL: [StartPhase; 5] = [
        StartPhase::PluginLoad,
        StartPhase::PluginEnable,
        StartPhase::ServerLoadComplete,
        StartPhase::HookAddons,
        StartPhase::HookPlugins,
    ];

    /// Hook phases are never driven by phase sweeps.
    pub fn is_hook(self) -> bool {
        matches!(self, StartPhase::HookAddons | StartPhase::HookPlugins)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StartPhase::PluginLoad => "PLUGIN_LOAD",
            StartPhase::PluginEnable => "PLUGIN_ENABLE",
            StartPhase::ServerLoadComplete => "SERVER_LOAD_COMPLETE",
            StartPhase::HookAddons => "HOOK_ADDONS",
            StartPhase::HookPlugins => "HOOK_PLUGINS",
        }
    }
}

impl fmt::Display for StartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartPhase {
    type Err = AddonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        StartPhase::ALL
            .into_iter()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                AddonError::Descriptor(format!(
                    "unknown start-time '{wanted}'; valid phases: {}",
                    StartPhase::ALL.map(StartPhase::as_str).join(", ")
                ))
            })
    }
}

// ─── Raw manifest ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListValue {
    Joined(String),
    Items(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScalarValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl ScalarValue {
    fn into_string(self) -> String {
        match self {
            ScalarValue::Text(s) => s,
            ScalarValue::Integer(i) => i.to_string(),
            ScalarValue::Float(f) => f.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawManifest {
    name: Option<String>,
    main: Option<String>,
    version: Option<ScalarValue>,
    api_version: Option<ScalarValue>,
    author: Option<ListValue>,
    authors: Option<ListValue>,
    start_time: Option<String>,
    hook_addons: Option<ListValue>,
    hook_plugins: Option<ListValue>,
    required_addons: Option<ListValue>,
    required_plugins: Option<ListValue>,
}

/// Split a list value into trimmed, non-empty, de-duplicated entries.
fn split_list(value: Option<ListValue>) -> Vec<String> {
    let raw: Vec<String> = match value {
        None => Vec::new(),
        Some(ListValue::Joined(s)) => s.split(',').map(str::to_string).collect(),
        Some(ListValue::Items(items)) => items,
    };

    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for item in raw {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|existing| existing == item) {
            out.push(item.to_string());
        }
    }
    out
}

// ─── Validation helpers ─────────────────────────────────────────────────

/// Validate an addon name.
///
/// Names are 3-26 characters, contain at least 3 letters, and consist only
/// of letters, digits and inner whitespace. Names are checked and stored
/// exactly as written.
pub fn validate_addon_name(name: &str) -> Result<(), AddonError> {
    let len = name.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(AddonError::Descriptor(format!(
            "addon name must be {NAME_MIN_LEN}-{NAME_MAX_LEN} characters, got {len}"
        )));
    }

    let letters = name.chars().filter(|c| c.is_alphabetic()).count();
    if letters < NAME_MIN_LETTERS {
        return Err(AddonError::Descriptor(format!(
            "addon name must contain at least {NAME_MIN_LETTERS} letters, got {letters}"
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        return Err(AddonError::Descriptor(format!(
            "addon name contains invalid character '{bad}'"
        )));
    }

    if name.trim() != name {
        return Err(AddonError::Descriptor(
            "addon name must not start or end with whitespace".into(),
        ));
    }

    Ok(())
}

fn required_field(value: Option<String>, field: &str) -> Result<String, AddonError> {
    let value = value
        .ok_or_else(|| AddonError::Descriptor(format!("missing required field '{field}'")))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AddonError::Descriptor(format!(
            "required field '{field}' must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

// ─── Descriptor ─────────────────────────────────────────────────────────

/// Validated addon manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddonDescriptor {
    pub name: String,
    /// Identifier of the addon's entry point, also the class that must be
    /// shipped by the archive.
    pub main: String,
    pub version: String,
    pub api_version: Option<String>,
    pub authors: Vec<String>,
    pub start_phase: StartPhase,
    pub hook_addons: Vec<String>,
    pub hook_plugins: Vec<String>,
    pub required_addons: Vec<String>,
    pub required_plugins: Vec<String>,
}

impl AddonDescriptor {
    /// Parse and validate a manifest from its TOML text.
    pub fn parse(toml_str: &str) -> Result<Self, AddonError> {
        let raw: RawManifest = toml::from_str(toml_str)?;

        let name = raw
            .name
            .ok_or_else(|| AddonError::Descriptor("missing required field 'name'".into()))?;
        validate_addon_name(&name)?;

        let main = required_field(raw.main, "main")?;

        let mut authors = split_list(raw.author);
        for extra in split_list(raw.authors) {
            if !authors.contains(&extra) {
                authors.push(extra);
            }
        }
        if authors.is_empty() {
            return Err(AddonError::Descriptor(
                "missing required field 'author' or 'authors'".into(),
            ));
        }

        let start_phase = match raw.start_time {
            Some(value) => value.parse()?,
            None => StartPhase::default(),
        };

        let hook_addons = split_list(raw.hook_addons);
        let hook_plugins = split_list(raw.hook_plugins);

        match start_phase {
            StartPhase::HookAddons if hook_addons.is_empty() => {
                return Err(AddonError::Descriptor(
                    "start-time HOOK_ADDONS requires a non-empty 'hook-addons' list".into(),
                ));
            }
            StartPhase::HookPlugins if hook_plugins.is_empty() => {
                return Err(AddonError::Descriptor(
                    "start-time HOOK_PLUGINS requires a non-empty 'hook-plugins' list".into(),
                ));
            }
            _ => {}
        }

        let required_addons = split_list(raw.required_addons);
        let required_plugins = split_list(raw.required_plugins);

        if hook_addons.contains(&name) || required_addons.contains(&name) {
            return Err(AddonError::Descriptor(format!(
                "addon '{name}' cannot hook or require itself"
            )));
        }

        let api_version = raw.api_version.map(ScalarValue::into_string);
        let version = raw
            .version
            .map(ScalarValue::into_string)
            .or_else(|| api_version.clone())
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());

        Ok(Self {
            name,
            main,
            version,
            api_version,
            authors,
            start_phase,
            hook_addons,
            hook_plugins,
            required_addons,
            required_plugins,
        })
    }

    /// Read and validate the manifest of an opened package.
    pub fn from_package(package: &AddonPackage) -> Result<Self, AddonError> {
        Self::parse(&package.manifest_text()?)
    }

    /// Whether this addon hooks into or requires the addon named `other`.
    pub fn depends_on(&self, other: &str) -> bool {
        self.hook_addons.iter().any(|n| n == other)
            || self.required_addons.iter().any(|n| n == other)
    }

    /// Names of every addon this one hooks into or requires.
    pub fn addon_dependencies(&self) -> Vec<String> {
        let mut deps = self.required_addons.clone();
        for hook in &self.hook_addons {
            if !deps.contains(hook) {
                deps.push(hook.clone());
            }
        }
        deps
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_VALID_TOML: &str = r#"
name = "Vinyl Core"
main = "org.vinyl.VinylCore"
version = "2.4.1"
api-version = "1.20"
author = "Jane Doe"
authors = "Jane Doe, Rob Smith"
start-time = "hook_addons"
hook-addons = "Speakers, Turntable"
hook-plugins = "WorldGuard"
required-addons = "Speakers"
required-plugins = "ProtocolLib, Vault"
"#;

    fn manifest_with_name(name: &str) -> String {
        format!("name = \"{name}\"\nmain = \"a.Main\"\nauthor = \"me\"\n")
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn test_parse_full_manifest() {
        let d = AddonDescriptor::parse(FULL_VALID_TOML).unwrap();
        assert_eq!(d.name, "Vinyl Core");
        assert_eq!(d.main, "org.vinyl.VinylCore");
        assert_eq!(d.version, "2.4.1");
        assert_eq!(d.api_version.as_deref(), Some("1.20"));
        assert_eq!(d.authors, vec!["Jane Doe", "Rob Smith"]);
        assert_eq!(d.start_phase, StartPhase::HookAddons);
        assert_eq!(d.hook_addons, vec!["Speakers", "Turntable"]);
        assert_eq!(d.hook_plugins, vec!["WorldGuard"]);
        assert_eq!(d.required_addons, vec!["Speakers"]);
        assert_eq!(d.required_plugins, vec!["ProtocolLib", "Vault"]);
        assert_eq!(d.addon_dependencies(), vec!["Speakers", "Turntable"]);
    }

    #[test]
    fn test_parse_minimal_manifest_defaults() {
        let d = AddonDescriptor::parse(&manifest_with_name("Boombox")).unwrap();
        assert_eq!(d.version, DEFAULT_VERSION);
        assert!(d.api_version.is_none());
        assert_eq!(d.start_phase, StartPhase::ServerLoadComplete);
        assert!(d.hook_addons.is_empty());
        assert!(d.required_plugins.is_empty());
    }

    #[test]
    fn test_version_falls_back_to_api_version() {
        let toml = "name = \"Boombox\"\nmain = \"a.Main\"\nauthor = \"me\"\napi-version = 1.19\n";
        let d = AddonDescriptor::parse(toml).unwrap();
        assert_eq!(d.version, "1.19");
        assert_eq!(d.api_version.as_deref(), Some("1.19"));
    }

    #[test]
    fn test_list_values_accept_arrays() {
        let toml = r#"
name = "Boombox"
main = "a.Main"
authors = ["Ann", " Bo ", ""]
"#;
        let d = AddonDescriptor::parse(toml).unwrap();
        assert_eq!(d.authors, vec!["Ann", "Bo"]);
    }

    #[test]
    fn test_invalid_toml() {
        let err = AddonDescriptor::parse("this is not {{ toml").unwrap_err();
        assert!(matches!(err, AddonError::TomlParse(_)));
    }

    // ── Required fields ─────────────────────────────────────────────

    #[test]
    fn test_missing_name() {
        let err = AddonDescriptor::parse("main = \"a.Main\"\nauthor = \"me\"").unwrap_err();
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn test_missing_main() {
        let err = AddonDescriptor::parse("name = \"Boombox\"\nauthor = \"me\"").unwrap_err();
        assert!(matches!(err, AddonError::Descriptor(_)));
        assert!(err.to_string().contains("'main'"));
    }

    #[test]
    fn test_blank_main() {
        let err =
            AddonDescriptor::parse("name = \"Boombox\"\nmain = \"  \"\nauthor = \"me\"").unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_missing_author() {
        let err = AddonDescriptor::parse("name = \"Boombox\"\nmain = \"a.Main\"").unwrap_err();
        assert!(err.to_string().contains("author"));

        let err = AddonDescriptor::parse("name = \"Boombox\"\nmain = \"a.Main\"\nauthors = \" , \"")
            .unwrap_err();
        assert!(err.to_string().contains("author"));
    }

    // ── Name validation ─────────────────────────────────────────────

    #[test]
    fn test_valid_names() {
        for name in ["Abc", "Vinyl Core 2", "abcdefghijklmnopqrstuvwxyz", "Ünïcödé", "a1b2c3"] {
            assert!(validate_addon_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_name_length_bounds() {
        for name in ["ab", "", "abcdefghijklmnopqrstuvwxyzA"] {
            let err = validate_addon_name(name).unwrap_err();
            assert!(err.to_string().contains("3-26 characters"), "{name}");
        }
    }

    #[test]
    fn test_name_needs_three_letters() {
        for name in ["a1234", "12 ab", "   ab"] {
            let err = validate_addon_name(name).unwrap_err();
            assert!(err.to_string().contains("at least 3 letters"), "{name}");
        }
    }

    #[test]
    fn test_name_rejects_symbols() {
        for name in ["my-addon", "my_addon", "addon!", "dots.are.bad"] {
            let err = validate_addon_name(name).unwrap_err();
            assert!(err.to_string().contains("invalid character"), "{name}");
        }
    }

    #[test]
    fn test_name_rejects_padding() {
        for name in ["  Abc  ", "Abc ", "\tVinyl"] {
            let err = validate_addon_name(name).unwrap_err();
            assert!(err.to_string().contains("whitespace"), "{name:?}");
        }
        let err = AddonDescriptor::parse(&manifest_with_name("  Abc  ")).unwrap_err();
        assert!(err.to_string().contains("whitespace"));
    }

    #[test]
    fn test_invalid_name_fails_parse() {
        let err = AddonDescriptor::parse(&manifest_with_name("my-addon")).unwrap_err();
        assert!(matches!(err, AddonError::Descriptor(_)));
    }

    // ── Phases ──────────────────────────────────────────────────────

    #[test]
    fn test_phase_round_trip_names() {
        for phase in StartPhase::ALL {
            assert_eq!(phase.as_str().parse::<StartPhase>().unwrap(), phase);
            assert_eq!(phase.to_string(), phase.as_str());
        }
        assert_eq!(
            "plugin_enable".parse::<StartPhase>().unwrap(),
            StartPhase::PluginEnable
        );
    }

    #[test]
    fn test_unknown_phase() {
        let toml = format!("{}start-time = \"LUNCH_TIME\"\n", manifest_with_name("Boombox"));
        let err = AddonDescriptor::parse(&toml).unwrap_err();
        assert!(err.to_string().contains("unknown start-time 'LUNCH_TIME'"));
    }

    #[test]
    fn test_hook_phases() {
        assert!(StartPhase::HookAddons.is_hook());
        assert!(StartPhase::HookPlugins.is_hook());
        assert!(!StartPhase::ServerLoadComplete.is_hook());
    }

    #[test]
    fn test_hook_addons_phase_requires_targets() {
        let toml = format!("{}start-time = \"HOOK_ADDONS\"\n", manifest_with_name("Boombox"));
        let err = AddonDescriptor::parse(&toml).unwrap_err();
        assert!(err.to_string().contains("hook-addons"));

        let toml = format!(
            "{}start-time = \"HOOK_ADDONS\"\nhook-plugins = \"Vault\"\n",
            manifest_with_name("Boombox")
        );
        assert!(AddonDescriptor::parse(&toml).is_err());
    }

    #[test]
    fn test_hook_plugins_phase_requires_targets() {
        let toml = format!(
            "{}start-time = \"HOOK_PLUGINS\"\nhook-plugins = \"\"\n",
            manifest_with_name("Boombox")
        );
        let err = AddonDescriptor::parse(&toml).unwrap_err();
        assert!(err.to_string().contains("hook-plugins"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let toml = format!(
            "{}required-addons = \"Boombox\"\n",
            manifest_with_name("Boombox")
        );
        let err = AddonDescriptor::parse(&toml).unwrap_err();
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn test_depends_on() {
        let d = AddonDescriptor::parse(FULL_VALID_TOML).unwrap();
        assert!(d.depends_on("Speakers"));
        assert!(d.depends_on("Turntable"));
        assert!(!d.depends_on("WorldGuard"));
    }
}
