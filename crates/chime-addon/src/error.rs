//! Addon runtime error types.

use thiserror::Error;

/// Coarse classification of an [`AddonError`], used when reporting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing manifest fields, dependency cycles.
    Descriptor,
    /// Archive, class loading or instantiation failures during registration.
    Load,
    /// Failures raised by an addon's own start/stop hook.
    Lifecycle,
    /// Cross-addon class resolution failures.
    Resolution,
    /// Operations invoked in the wrong runtime state.
    State,
}

#[derive(Error, Debug)]
pub enum AddonError {
    #[error("invalid descriptor: {0}")]
    Descriptor(String),

    #[error("load error: {0}")]
    Load(String),

    #[error(
        "class {class} not found for addon {addon}; \
         is a required addon missing or undeclared? (declared dependencies: {dependencies})"
    )]
    ClassNotFound {
        class: String,
        addon: String,
        dependencies: String,
    },

    #[error("illegal state: {0}")]
    State(String),

    #[error("addon {addon} failed: {message}")]
    Lifecycle { addon: String, message: String },

    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("addon already exists: {0}")]
    AlreadyExists(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl AddonError {
    /// Build a [`AddonError::ClassNotFound`] from the addon's declared dependency names.
    pub fn class_not_found(class: &str, addon: &str, dependencies: &[String]) -> Self {
        let dependencies = if dependencies.is_empty() {
            "none".to_string()
        } else {
            dependencies.join(", ")
        };
        Self::ClassNotFound {
            class: class.to_string(),
            addon: addon.to_string(),
            dependencies,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Descriptor(_) | Self::DependencyCycle(_) | Self::TomlParse(_) => {
                ErrorKind::Descriptor
            }
            Self::Load(_) | Self::Io(_) | Self::Archive(_) => ErrorKind::Load,
            Self::ClassNotFound { .. } => ErrorKind::Resolution,
            Self::Lifecycle { .. } => ErrorKind::Lifecycle,
            Self::State(_) | Self::AlreadyExists(_) => ErrorKind::State,
        }
    }
}
