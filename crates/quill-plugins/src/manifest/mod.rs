//! Capability manifest types.
//!
//! A plugin describes what it contributes to the editor through plain
//! serialisable descriptors: commands, major and minor modes, and key
//! bindings. The host fetches each list once after initialization, keeps its
//! own copy, and validates the aggregate [`PluginManifest`] before wiring any
//! of it into its registries.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a manifest is internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// A descriptor has an empty name.
    #[error("{kind} name must not be empty")]
    EmptyName {
        /// Descriptor kind, such as `command`.
        kind: &'static str,
    },

    /// Two descriptors of the same kind share a name.
    #[error("duplicate {kind} '{name}'")]
    DuplicateName {
        /// Descriptor kind.
        kind: &'static str,
        /// The repeated name.
        name: String,
    },

    /// A key binding has no key sequence.
    #[error("key binding for '{command}' has an empty sequence")]
    EmptyKeySequence {
        /// Command the binding targets.
        command: String,
    },
}

/// An interactive command contributed by a plugin.
///
/// # Example
///
/// ```
/// use quill_plugins::CommandSpec;
///
/// let spec = CommandSpec::new("word-count", "Count words in the buffer");
/// assert_eq!(spec.name, "word-count");
/// assert!(spec.arg_spec.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Unique command name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Free-form description of the expected arguments.
    #[serde(default)]
    pub arg_spec: String,
}

impl CommandSpec {
    /// Creates a command descriptor without an argument description.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arg_spec: String::new(),
        }
    }

    /// Sets the argument description.
    #[must_use]
    pub fn with_arg_spec(mut self, arg_spec: impl Into<String>) -> Self {
        self.arg_spec = arg_spec.into();
        self
    }
}

/// A major mode, selected per buffer by file pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MajorModeSpec {
    /// Unique mode name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Glob patterns for files that select this mode.
    #[serde(default)]
    pub file_patterns: Vec<String>,
}

impl MajorModeSpec {
    /// Creates a major mode descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        file_patterns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            file_patterns,
        }
    }
}

/// A minor mode that can be toggled alongside the major mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorModeSpec {
    /// Unique mode name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Short mode-line indicator.
    #[serde(default)]
    pub lighter: String,
    /// Whether the mode applies to every buffer at once.
    #[serde(default)]
    pub global: bool,
}

impl MinorModeSpec {
    /// Creates a buffer-local minor mode descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        lighter: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            lighter: lighter.into(),
            global: false,
        }
    }

    /// Marks the mode as global.
    #[must_use]
    pub const fn global(mut self) -> Self {
        self.global = true;
        self
    }
}

/// Where a key binding is active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyScope {
    /// Active everywhere.
    Global,
    /// Active while the named major mode is selected.
    MajorMode {
        /// Mode name.
        mode: String,
    },
    /// Active while the named minor mode is enabled.
    MinorMode {
        /// Mode name.
        mode: String,
    },
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::MajorMode { mode } => write!(f, "major:{mode}"),
            Self::MinorMode { mode } => write!(f, "minor:{mode}"),
        }
    }
}

/// A key sequence bound to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBindingSpec {
    /// Key sequence in editor notation, for example `C-c w`.
    pub sequence: String,
    /// Command invoked by the sequence.
    pub command_name: String,
    /// Where the binding applies.
    pub scope: KeyScope,
}

impl KeyBindingSpec {
    /// Creates a binding.
    #[must_use]
    pub fn new(
        sequence: impl Into<String>,
        command_name: impl Into<String>,
        scope: KeyScope,
    ) -> Self {
        Self {
            sequence: sequence.into(),
            command_name: command_name.into(),
            scope,
        }
    }
}

/// A feature a plugin reports from `Initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Contributes commands.
    Commands,
    /// Contributes major modes.
    MajorModes,
    /// Contributes minor modes.
    MinorModes,
    /// Contributes key bindings.
    KeyBindings,
    /// Answers completion queries.
    Completions,
    /// Registers hooks with the host.
    Hooks,
}

/// The explicit set of capabilities a plugin declares.
///
/// # Example
///
/// ```
/// use quill_plugins::{Capability, CapabilitySet};
///
/// let set: CapabilitySet = [Capability::Commands, Capability::Completions]
///     .into_iter()
///     .collect();
/// assert!(set.contains(Capability::Completions));
/// assert!(!set.contains(Capability::Hooks));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Adds a capability, returning `true` if it was not already present.
    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    /// Returns `true` if the capability is declared.
    #[must_use]
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Returns `true` if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the declared capabilities in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Name, version, and description of a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginIdentity {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// One-line description.
    pub description: String,
}

impl PluginIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Everything a plugin contributes, as the host sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Who the plugin is.
    pub identity: PluginIdentity,
    /// Contributed commands.
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    /// Contributed major modes.
    #[serde(default)]
    pub major_modes: Vec<MajorModeSpec>,
    /// Contributed minor modes.
    #[serde(default)]
    pub minor_modes: Vec<MinorModeSpec>,
    /// Contributed key bindings.
    #[serde(default)]
    pub key_bindings: Vec<KeyBindingSpec>,
}

impl PluginManifest {
    /// Creates an empty manifest for `identity`.
    #[must_use]
    pub fn new(identity: PluginIdentity) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    /// Returns the plugin name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.identity.name.as_str()
    }

    /// Returns the command names in declaration order.
    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|command| command.name.as_str())
    }

    /// Checks names are present and unique within each kind.
    ///
    /// # Errors
    ///
    /// Returns the first [`ManifestError`] found.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.identity.name.trim().is_empty() {
            return Err(ManifestError::EmptyName { kind: "plugin" });
        }
        check_unique("command", self.commands.iter().map(|spec| spec.name.as_str()))?;
        check_unique(
            "major mode",
            self.major_modes.iter().map(|spec| spec.name.as_str()),
        )?;
        check_unique(
            "minor mode",
            self.minor_modes.iter().map(|spec| spec.name.as_str()),
        )?;
        for binding in &self.key_bindings {
            if binding.sequence.trim().is_empty() {
                return Err(ManifestError::EmptyKeySequence {
                    command: binding.command_name.clone(),
                });
            }
            if binding.command_name.trim().is_empty() {
                return Err(ManifestError::EmptyName {
                    kind: "key binding command",
                });
            }
        }
        Ok(())
    }
}

fn check_unique<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ManifestError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ManifestError::EmptyName { kind });
        }
        if !seen.insert(name) {
            return Err(ManifestError::DuplicateName {
                kind,
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}
