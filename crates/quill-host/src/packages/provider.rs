//! In-process package providers.
//!
//! A [`Provider`] is the object a package contributes once its sources are on
//! disk. Providers advertise optional behaviour through
//! [`ProviderCapabilities`]; the package manager only calls
//! [`Provider::configure`] and [`Provider::api_extension`] when the matching
//! capability is present.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::{PackageDeclaration, PackageInfo};

const PROVIDER_TARGET: &str = "quill_host::packages::provider";

/// File describing a declarative package.
pub const PACKAGE_MANIFEST_FILE: &str = "quill-package.json";

/// Failures raised by providers and their loader.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The package manifest could not be read.
    #[error("failed to read '{path}': {source}")]
    Read {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The package manifest is not valid JSON for its schema.
    #[error("invalid package manifest '{path}': {source}")]
    Parse {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// A configuration value was rejected.
    #[error("invalid configuration key '{key}': {message}")]
    Config {
        /// Offending key.
        key: String,
        /// Why it was rejected.
        message: String,
    },

    /// An API namespace is already registered.
    #[error("scripting namespace '{namespace}' is already registered")]
    NamespaceTaken {
        /// Namespace name.
        namespace: String,
    },

    /// Any other provider failure.
    #[error("{0}")]
    Other(String),
}

/// Optional behaviour a provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    /// Accepts the declaration's configuration map.
    Configurable,
    /// Contributes functions to the scripting layer.
    ScriptingApi,
}

/// The capabilities one provider declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderCapabilities(BTreeSet<ProviderCapability>);

impl ProviderCapabilities {
    /// An empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Returns `true` if the capability is declared.
    #[must_use]
    pub fn contains(&self, capability: ProviderCapability) -> bool {
        self.0.contains(&capability)
    }
}

impl FromIterator<ProviderCapability> for ProviderCapabilities {
    fn from_iter<I: IntoIterator<Item = ProviderCapability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Functions a provider adds to the scripting layer under one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiExtension {
    /// Namespace the functions live under.
    pub namespace: String,
    /// Function names.
    #[serde(default)]
    pub functions: Vec<String>,
}

/// A loaded package.
pub trait Provider: Send {
    /// Package metadata.
    fn info(&self) -> PackageInfo;

    /// Optional behaviour this provider supports.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Prepares the provider after loading.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the provider cannot start.
    fn initialize(&mut self) -> Result<(), ProviderError>;

    /// Applies the declaration's configuration.
    ///
    /// Only called for [`ProviderCapability::Configurable`] providers.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if a value is rejected.
    fn configure(&mut self, _config: &BTreeMap<String, Value>) -> Result<(), ProviderError> {
        Ok(())
    }

    /// The scripting functions this provider contributes.
    ///
    /// Only called for [`ProviderCapability::ScriptingApi`] providers.
    fn api_extension(&self) -> Option<ApiExtension> {
        None
    }

    /// Turns the provider's behaviour on.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the provider cannot be enabled.
    fn enable(&mut self) -> Result<(), ProviderError>;

    /// Turns the provider's behaviour off.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the provider cannot be disabled.
    fn disable(&mut self) -> Result<(), ProviderError>;
}

/// Builds providers from downloaded package sources.
pub trait ProviderLoader: Send + Sync {
    /// Loads the package at `source`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the sources do not form a package.
    fn load(
        &self,
        source: &Utf8Path,
        declaration: &PackageDeclaration,
    ) -> Result<Box<dyn Provider>, ProviderError>;
}

/// The scripting configuration layer.
pub trait ScriptingHost: Send + Sync {
    /// Makes `extension` callable from scripts.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the namespace cannot be registered.
    fn register_api_extension(&self, extension: ApiExtension) -> Result<(), ProviderError>;

    /// Withdraws the extension registered under `namespace`, returning
    /// whether one was present.
    fn unregister_api_extension(&self, namespace: &str) -> bool;
}

/// [`ScriptingHost`] that records extensions by namespace.
#[derive(Debug, Default)]
pub struct ExtensionTable {
    extensions: Mutex<BTreeMap<String, ApiExtension>>,
}

impl ExtensionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The extension registered under `namespace`.
    #[must_use]
    pub fn extension(&self, namespace: &str) -> Option<ApiExtension> {
        self.extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }
}

impl ScriptingHost for ExtensionTable {
    fn register_api_extension(&self, extension: ApiExtension) -> Result<(), ProviderError> {
        let mut extensions = self.extensions.lock().unwrap_or_else(PoisonError::into_inner);
        if extensions.contains_key(&extension.namespace) {
            return Err(ProviderError::NamespaceTaken {
                namespace: extension.namespace,
            });
        }
        debug!(
            target: PROVIDER_TARGET,
            namespace = %extension.namespace,
            functions = extension.functions.len(),
            "scripting extension registered"
        );
        extensions.insert(extension.namespace.clone(), extension);
        Ok(())
    }

    fn unregister_api_extension(&self, namespace: &str) -> bool {
        let removed = self
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace)
            .is_some();
        if removed {
            debug!(target: PROVIDER_TARGET, namespace, "scripting extension withdrawn");
        }
        removed
    }
}

/// On-disk shape of [`PACKAGE_MANIFEST_FILE`].
#[derive(Debug, Deserialize)]
struct PackageFile {
    name: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    capabilities: ProviderCapabilities,
    #[serde(default)]
    api: Option<ApiExtension>,
    #[serde(default)]
    options: Vec<String>,
}

/// Loads packages described by a [`PACKAGE_MANIFEST_FILE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestLoader;

impl ProviderLoader for ManifestLoader {
    fn load(
        &self,
        source: &Utf8Path,
        declaration: &PackageDeclaration,
    ) -> Result<Box<dyn Provider>, ProviderError> {
        let path = source.join(PACKAGE_MANIFEST_FILE);
        let text = fs::read_to_string(&path).map_err(|error| ProviderError::Read {
            path: path.clone(),
            source: Arc::new(error),
        })?;
        let file: PackageFile =
            serde_json::from_str(&text).map_err(|error| ProviderError::Parse {
                path: path.clone(),
                source: Arc::new(error),
            })?;
        if file.name.trim().is_empty() {
            return Err(ProviderError::Other(format!("'{path}' does not name its package")));
        }
        Ok(Box::new(DeclarativeProvider {
            info: PackageInfo {
                name: file.name,
                version: file.version,
                description: file.description,
                author: file.author,
                url: declaration.url.clone(),
                dependencies: file.dependencies,
                keywords: file.keywords,
            },
            capabilities: file.capabilities,
            api: file.api,
            options: file.options,
            enabled: false,
        }))
    }
}

/// Provider built from a package manifest with no code of its own.
#[derive(Debug)]
pub struct DeclarativeProvider {
    info: PackageInfo,
    capabilities: ProviderCapabilities,
    api: Option<ApiExtension>,
    options: Vec<String>,
    enabled: bool,
}

impl DeclarativeProvider {
    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            debug!(
                target: PROVIDER_TARGET,
                package = %self.info.name,
                enabled,
                "declarative package toggled"
            );
            self.enabled = enabled;
        }
    }
}

impl Provider for DeclarativeProvider {
    fn info(&self) -> PackageInfo {
        self.info.clone()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    fn initialize(&mut self) -> Result<(), ProviderError> {
        debug!(
            target: PROVIDER_TARGET,
            package = %self.info.name,
            "declarative package initialised"
        );
        Ok(())
    }

    fn configure(&mut self, config: &BTreeMap<String, Value>) -> Result<(), ProviderError> {
        if let Some(key) = config
            .keys()
            .find(|key| !self.options.iter().any(|option| option == *key))
        {
            return Err(ProviderError::Config {
                key: key.clone(),
                message: format!("'{}' has no such option", self.info.name),
            });
        }
        debug!(
            target: PROVIDER_TARGET,
            package = %self.info.name,
            keys = config.len(),
            "declarative package configured"
        );
        Ok(())
    }

    fn api_extension(&self) -> Option<ApiExtension> {
        self.api.clone()
    }

    fn enable(&mut self) -> Result<(), ProviderError> {
        self.set_enabled(true);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ProviderError> {
        self.set_enabled(false);
        Ok(())
    }
}
