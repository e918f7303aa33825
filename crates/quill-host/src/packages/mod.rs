//! Package manager for in-process packages.
//!
//! Packages are declared by URL, then loaded in one batch by
//! [`PackageManager::load_declared_packages`]. Each declaration is downloaded,
//! turned into a [`Provider`], initialised, configured, given the chance to
//! extend the scripting layer, and enabled. Every URL that is attempted gets
//! exactly one record, which moves through [`PackageStatus`] in place.
//!
//! The first failure stops the batch: packages loaded before it stay loaded,
//! the failing record keeps the cause, and the remaining declarations are
//! dropped without a record.

mod download;
mod provider;

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use self::download::{DownloadError, Downloader, GitDownloader};
pub use self::provider::{
    ApiExtension, DeclarativeProvider, ExtensionTable, ManifestLoader, PACKAGE_MANIFEST_FILE,
    Provider, ProviderCapabilities, ProviderCapability, ProviderError, ProviderLoader,
    ScriptingHost,
};

const PACKAGES_TARGET: &str = "quill_host::packages";

/// Where a package is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    /// Never attempted, or removed.
    NotLoaded,
    /// Download or initialisation in progress.
    Loading,
    /// Initialised but not yet enabled.
    Loaded,
    /// Active.
    Enabled,
    /// Loaded and switched off.
    Disabled,
    /// Loading failed.
    Error,
}

/// Metadata a provider reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// One-line summary.
    #[serde(default)]
    pub description: String,
    /// Author.
    #[serde(default)]
    pub author: String,
    /// Source URL.
    pub url: String,
    /// Names of packages this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Search keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A request to load a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDeclaration {
    /// Source URL; also the package's key.
    pub url: String,
    /// Branch or tag to fetch, if not the default.
    #[serde(default)]
    pub version: Option<String>,
    /// Values passed to configurable providers.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

impl PackageDeclaration {
    /// Declares `url` at its default version with no configuration.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            version: None,
            config: BTreeMap::new(),
        }
    }

    /// Pins a branch or tag.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Adds a configuration value.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// Step of the load pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LoadStage {
    /// Building the provider from downloaded sources.
    Load,
    /// [`Provider::initialize`].
    Initialize,
    /// [`Provider::configure`].
    Configure,
    /// Registering the scripting extension.
    RegisterApi,
    /// [`Provider::enable`].
    Enable,
    /// [`Provider::disable`].
    Disable,
}

/// Failures managing packages.
#[derive(Debug, Error)]
pub enum PackageError {
    /// No record exists for the URL.
    #[error("package '{url}' not found")]
    NotFound {
        /// Package URL.
        url: String,
    },

    /// The package is not in a loaded state.
    #[error("package '{url}' is not loaded (status: {status})")]
    NotLoaded {
        /// Package URL.
        url: String,
        /// Current status.
        status: PackageStatus,
    },

    /// Fetching the sources failed.
    #[error("failed to download package '{url}': {source}")]
    Download {
        /// Package URL.
        url: String,
        /// Underlying error.
        #[source]
        source: Arc<DownloadError>,
    },

    /// The provider failed at some stage.
    #[error("package '{url}' failed during {stage}: {source}")]
    Provider {
        /// Package URL.
        url: String,
        /// Failing stage.
        stage: LoadStage,
        /// Underlying error.
        #[source]
        source: Arc<ProviderError>,
    },

    /// The provider declares a scripting API but offers no extension.
    #[error("package '{url}' declares a scripting API but provides none")]
    MissingExtension {
        /// Package URL.
        url: String,
    },

    /// A package failed and the rest of the batch was abandoned.
    #[error("loading stopped at '{url}' with {skipped} declaration(s) not attempted: {source}")]
    BatchAborted {
        /// URL of the failing package.
        url: String,
        /// Why it failed.
        #[source]
        source: Arc<PackageError>,
        /// Declarations dropped without an attempt.
        skipped: usize,
    },
}

/// A read-only view of one package record.
#[derive(Debug, Clone)]
pub struct PackageSummary {
    /// Package URL.
    pub url: String,
    /// Metadata, once the provider has loaded.
    pub info: Option<PackageInfo>,
    /// Current status.
    pub status: PackageStatus,
    /// Why loading failed, for [`PackageStatus::Error`].
    pub error: Option<Arc<PackageError>>,
    /// When the package was enabled by the loader.
    pub loaded_at: Option<SystemTime>,
}

struct LoadedPackage {
    provider: Option<Box<dyn Provider>>,
    info: Option<PackageInfo>,
    status: PackageStatus,
    error: Option<Arc<PackageError>>,
    loaded_at: Option<SystemTime>,
    namespace: Option<String>,
}

impl LoadedPackage {
    const fn loading() -> Self {
        Self {
            provider: None,
            info: None,
            status: PackageStatus::Loading,
            error: None,
            loaded_at: None,
            namespace: None,
        }
    }

    const fn is_loaded(&self) -> bool {
        matches!(
            self.status,
            PackageStatus::Loaded | PackageStatus::Enabled | PackageStatus::Disabled
        )
    }

    fn summary(&self, url: &str) -> PackageSummary {
        PackageSummary {
            url: url.to_owned(),
            info: self.info.clone(),
            status: self.status,
            error: self.error.clone(),
            loaded_at: self.loaded_at,
        }
    }
}

#[derive(Default)]
struct State {
    declarations: Vec<PackageDeclaration>,
    packages: BTreeMap<String, LoadedPackage>,
}

/// Declares, loads, and toggles packages.
///
/// One lock guards the declarations and records for the duration of each
/// public operation, including a whole load batch.
pub struct PackageManager {
    downloader: Arc<dyn Downloader>,
    loader: Arc<dyn ProviderLoader>,
    scripting: Arc<dyn ScriptingHost>,
    packages_dir: Utf8PathBuf,
    state: Mutex<State>,
}

impl PackageManager {
    /// Creates a manager placing sources under `packages_dir`.
    #[must_use]
    pub fn new(
        downloader: Arc<dyn Downloader>,
        loader: Arc<dyn ProviderLoader>,
        scripting: Arc<dyn ScriptingHost>,
        packages_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            downloader,
            loader,
            scripting,
            packages_dir: packages_dir.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Directory receiving package sources.
    #[must_use]
    pub fn packages_dir(&self) -> &Utf8Path {
        &self.packages_dir
    }

    /// Records the intent to load a package. Nothing is fetched yet.
    pub fn declare_package(&self, declaration: PackageDeclaration) {
        debug!(target: PACKAGES_TARGET, url = %declaration.url, "package declared");
        self.state().declarations.push(declaration);
    }

    /// Declarations waiting for the next load batch.
    #[must_use]
    pub fn pending_declarations(&self) -> Vec<PackageDeclaration> {
        self.state().declarations.clone()
    }

    /// Loads every pending declaration in order.
    ///
    /// Declarations are consumed whether or not they are attempted. URLs that
    /// are already loaded are skipped. Returns how many packages were
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::BatchAborted`] for the first package that
    /// fails; its record is left in [`PackageStatus::Error`].
    pub fn load_declared_packages(&self) -> Result<usize, PackageError> {
        let mut state = self.state();
        let declarations = mem::take(&mut state.declarations);
        let total = declarations.len();
        let mut enabled = 0;

        for (index, declaration) in declarations.iter().enumerate() {
            let url = declaration.url.clone();
            if state.packages.get(&url).is_some_and(LoadedPackage::is_loaded) {
                debug!(target: PACKAGES_TARGET, url = %url, "package already loaded");
                continue;
            }
            let record = state
                .packages
                .entry(url.clone())
                .and_modify(|record| *record = LoadedPackage::loading())
                .or_insert_with(LoadedPackage::loading);

            if let Err(error) = self.load_one(declaration, record) {
                let cause = Arc::new(error);
                record.status = PackageStatus::Error;
                record.error = Some(Arc::clone(&cause));
                let skipped = total - index - 1;
                warn!(
                    target: PACKAGES_TARGET,
                    url = %url,
                    error = %cause,
                    skipped,
                    "package failed to load, abandoning batch"
                );
                return Err(PackageError::BatchAborted {
                    url,
                    source: cause,
                    skipped,
                });
            }
            enabled += 1;
        }
        Ok(enabled)
    }

    fn load_one(
        &self,
        declaration: &PackageDeclaration,
        record: &mut LoadedPackage,
    ) -> Result<(), PackageError> {
        let url = declaration.url.as_str();
        let stage_error = |stage: LoadStage| {
            move |source: ProviderError| PackageError::Provider {
                url: url.to_owned(),
                stage,
                source: Arc::new(source),
            }
        };

        let destination = self.packages_dir.join(package_path(url));
        self.downloader
            .download(declaration, &destination)
            .map_err(|source| PackageError::Download {
                url: url.to_owned(),
                source: Arc::new(source),
            })?;

        let mut provider = self
            .loader
            .load(&destination, declaration)
            .map_err(stage_error(LoadStage::Load))?;
        provider
            .initialize()
            .map_err(stage_error(LoadStage::Initialize))?;
        record.info = Some(provider.info());
        record.status = PackageStatus::Loaded;

        let capabilities = provider.capabilities();
        if capabilities.contains(ProviderCapability::Configurable) {
            provider
                .configure(&declaration.config)
                .map_err(stage_error(LoadStage::Configure))?;
        }
        if capabilities.contains(ProviderCapability::ScriptingApi) {
            let extension =
                provider
                    .api_extension()
                    .ok_or_else(|| PackageError::MissingExtension {
                        url: url.to_owned(),
                    })?;
            let namespace = extension.namespace.clone();
            self.scripting
                .register_api_extension(extension)
                .map_err(stage_error(LoadStage::RegisterApi))?;
            record.namespace = Some(namespace);
        }
        if let Err(source) = provider.enable() {
            self.withdraw_extension(url, record);
            return Err(stage_error(LoadStage::Enable)(source));
        }

        record.provider = Some(provider);
        record.status = PackageStatus::Enabled;
        record.loaded_at = Some(SystemTime::now());
        info!(target: PACKAGES_TARGET, url, "package enabled");
        Ok(())
    }

    /// Enables a loaded package. Enabling an enabled package does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::NotFound`] for unknown URLs,
    /// [`PackageError::NotLoaded`] for packages that never loaded, or the
    /// provider's failure.
    pub fn enable_package(&self, url: &str) -> Result<(), PackageError> {
        self.toggle(url, PackageStatus::Enabled)
    }

    /// Disables a loaded package. Disabling a disabled package does nothing.
    ///
    /// # Errors
    ///
    /// See [`PackageManager::enable_package`].
    pub fn disable_package(&self, url: &str) -> Result<(), PackageError> {
        self.toggle(url, PackageStatus::Disabled)
    }

    fn toggle(&self, url: &str, target: PackageStatus) -> Result<(), PackageError> {
        let mut state = self.state();
        let record = state
            .packages
            .get_mut(url)
            .ok_or_else(|| PackageError::NotFound {
                url: url.to_owned(),
            })?;
        if record.status == target {
            return Ok(());
        }
        let status = record.status;
        let not_loaded = || PackageError::NotLoaded {
            url: url.to_owned(),
            status,
        };
        if !record.is_loaded() {
            return Err(not_loaded());
        }
        let provider = record.provider.as_mut().ok_or_else(not_loaded)?;
        let (outcome, stage) = if target == PackageStatus::Enabled {
            (provider.enable(), LoadStage::Enable)
        } else {
            (provider.disable(), LoadStage::Disable)
        };
        outcome.map_err(|source| PackageError::Provider {
            url: url.to_owned(),
            stage,
            source: Arc::new(source),
        })?;
        record.status = target;
        debug!(target: PACKAGES_TARGET, url, status = %target, "package toggled");
        Ok(())
    }

    /// Returns `true` if the package is enabled.
    #[must_use]
    pub fn is_enabled(&self, url: &str) -> bool {
        self.status(url) == PackageStatus::Enabled
    }

    /// Status of a package; [`PackageStatus::NotLoaded`] for unknown URLs.
    #[must_use]
    pub fn status(&self, url: &str) -> PackageStatus {
        self.state()
            .packages
            .get(url)
            .map_or(PackageStatus::NotLoaded, |record| record.status)
    }

    /// Summary of one package.
    #[must_use]
    pub fn package(&self, url: &str) -> Option<PackageSummary> {
        self.state()
            .packages
            .get(url)
            .map(|record| record.summary(url))
    }

    /// Summaries of every package, sorted by URL.
    #[must_use]
    pub fn packages(&self) -> Vec<PackageSummary> {
        self.state()
            .packages
            .iter()
            .map(|(url, record)| record.summary(url))
            .collect()
    }

    /// Deletes a package record, disabling the provider first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::NotFound`] for unknown URLs.
    pub fn remove_package(&self, url: &str) -> Result<(), PackageError> {
        let mut record = self
            .state()
            .packages
            .remove(url)
            .ok_or_else(|| PackageError::NotFound {
                url: url.to_owned(),
            })?;
        if record.status == PackageStatus::Enabled
            && let Some(provider) = &mut record.provider
            && let Err(error) = provider.disable()
        {
            warn!(target: PACKAGES_TARGET, url, %error, "failed to disable removed package");
        }
        self.withdraw_extension(url, &mut record);
        info!(target: PACKAGES_TARGET, url, "package removed");
        Ok(())
    }

    fn withdraw_extension(&self, url: &str, record: &mut LoadedPackage) {
        if let Some(namespace) = record.namespace.take()
            && !self.scripting.unregister_api_extension(&namespace)
        {
            warn!(
                target: PACKAGES_TARGET,
                url,
                namespace = %namespace,
                "scripting extension was already gone"
            );
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("PackageManager")
            .field("packages_dir", &self.packages_dir)
            .field("pending", &state.declarations.len())
            .field("packages", &state.packages.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Location of a package's sources relative to the packages directory.
///
/// Mirrors the URL's host and path (`github.com/alice/foo`) so packages that
/// share a final segment still land in separate directories.
fn package_path(url: &str) -> Utf8PathBuf {
    let location = url.split_once("://").map_or(url, |(_, rest)| rest);
    let without_user = match (location.find('@'), location.find('/')) {
        (Some(at), Some(slash)) if at < slash => location.get(at + 1..).unwrap_or(location),
        (Some(at), None) => location.get(at + 1..).unwrap_or(location),
        _ => location,
    };
    let trimmed = without_user.trim_end_matches('/');
    let repository = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let segments: Vec<String> = repository
        .split(['/', ':'])
        .filter(|segment| !segment.is_empty())
        .map(sanitise_segment)
        .collect();
    if segments.is_empty() {
        return Utf8PathBuf::from("package");
    }
    segments.iter().collect()
}

fn sanitise_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|ch| ch == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests;
