//! Major modes, minor modes, and key bindings contributed by plugins.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use quill_plugins::{KeyBindingSpec, KeyScope, MajorModeSpec, MinorModeSpec, PluginManifest};
use thiserror::Error;

/// A manifest entry collides with one registered by another owner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} '{name}' is already registered by '{owner}'")]
pub struct ModeConflict {
    /// Entry kind.
    pub kind: &'static str,
    /// Colliding name or key sequence.
    pub name: String,
    /// Current owner.
    pub owner: String,
}

#[derive(Debug, Clone)]
struct Owned<T> {
    owner: String,
    spec: T,
}

#[derive(Debug, Default)]
struct Tables {
    major: BTreeMap<String, Owned<MajorModeSpec>>,
    minor: BTreeMap<String, Owned<MinorModeSpec>>,
    bindings: BTreeMap<(KeyScope, String), Owned<KeyBindingSpec>>,
}

impl Tables {
    fn conflict(&self, manifest: &PluginManifest) -> Option<ModeConflict> {
        let major = manifest.major_modes.iter().find_map(|spec| {
            self.major.get(&spec.name).map(|existing| ModeConflict {
                kind: "major mode",
                name: spec.name.clone(),
                owner: existing.owner.clone(),
            })
        });
        let minor = || {
            manifest.minor_modes.iter().find_map(|spec| {
                self.minor.get(&spec.name).map(|existing| ModeConflict {
                    kind: "minor mode",
                    name: spec.name.clone(),
                    owner: existing.owner.clone(),
                })
            })
        };
        let binding = || {
            manifest.key_bindings.iter().find_map(|spec| {
                self.bindings
                    .get(&(spec.scope.clone(), spec.sequence.clone()))
                    .map(|existing| ModeConflict {
                        kind: "key binding",
                        name: format!("{} ({})", spec.sequence, spec.scope),
                        owner: existing.owner.clone(),
                    })
            })
        };
        major.or_else(minor).or_else(binding)
    }
}

/// Host-side copy of every plugin's modes and key bindings.
#[derive(Debug, Default)]
pub struct ModeRegistry {
    tables: RwLock<Tables>,
}

impl ModeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first entry of `manifest` that collides with an existing
    /// registration.
    #[must_use]
    pub fn conflict(&self, manifest: &PluginManifest) -> Option<ModeConflict> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .conflict(manifest)
    }

    /// Registers the modes and bindings of `manifest`, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns the first [`ModeConflict`]; nothing is registered then.
    pub fn register(&self, owner: &str, manifest: &PluginManifest) -> Result<(), ModeConflict> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(conflict) = tables.conflict(manifest) {
            return Err(conflict);
        }
        for spec in &manifest.major_modes {
            tables.major.insert(spec.name.clone(), owned(owner, spec));
        }
        for spec in &manifest.minor_modes {
            tables.minor.insert(spec.name.clone(), owned(owner, spec));
        }
        for spec in &manifest.key_bindings {
            tables.bindings.insert(
                (spec.scope.clone(), spec.sequence.clone()),
                owned(owner, spec),
            );
        }
        Ok(())
    }

    /// Removes everything registered by `owner`.
    pub fn unregister_owner(&self, owner: &str) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.major.retain(|_, entry| entry.owner != owner);
        tables.minor.retain(|_, entry| entry.owner != owner);
        tables.bindings.retain(|_, entry| entry.owner != owner);
    }

    /// Returns `true` if a major mode has the name.
    #[must_use]
    pub fn has_major_mode(&self, name: &str) -> bool {
        self.read().major.contains_key(name)
    }

    /// Returns `true` if a minor mode has the name.
    #[must_use]
    pub fn has_minor_mode(&self, name: &str) -> bool {
        self.read().minor.contains_key(name)
    }

    /// Every major mode, sorted by name.
    #[must_use]
    pub fn major_modes(&self) -> Vec<MajorModeSpec> {
        self.read().major.values().map(|entry| entry.spec.clone()).collect()
    }

    /// Every minor mode, sorted by name.
    #[must_use]
    pub fn minor_modes(&self) -> Vec<MinorModeSpec> {
        self.read().minor.values().map(|entry| entry.spec.clone()).collect()
    }

    /// Every key binding, sorted by scope then sequence.
    #[must_use]
    pub fn key_bindings(&self) -> Vec<KeyBindingSpec> {
        self.read()
            .bindings
            .values()
            .map(|entry| entry.spec.clone())
            .collect()
    }

    /// Command bound to `sequence` in `scope`.
    #[must_use]
    pub fn binding(&self, scope: &KeyScope, sequence: &str) -> Option<String> {
        self.read()
            .bindings
            .get(&(scope.clone(), sequence.to_owned()))
            .map(|entry| entry.spec.command_name.clone())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn owned<T: Clone>(owner: &str, spec: &T) -> Owned<T> {
    Owned {
        owner: owner.to_owned(),
        spec: spec.clone(),
    }
}
