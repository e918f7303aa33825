//! Behaviour tests for layered configuration loading.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then};
use tempfile::TempDir;

use quill_config::{Config, DEFAULT_DOWNLOAD_TIMEOUT_SECS, default_log_filter, default_log_format};

const TIMEOUT_ENV: &str = "QUILL_DOWNLOAD_TIMEOUT_SECS";

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
    _env_guard: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let env_guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("quill-host")]),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
            _env_guard: env_guard,
        }
    }

    fn write_config(&self, timeout_secs: u64) {
        let path = self.temp_dir.path().join("quill.toml");
        let toml = format!("download_timeout_secs = {timeout_secs}\n");
        if let Err(error) = fs::write(&path, toml) {
            panic!("failed to write configuration: {error}");
        }

        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is process-wide; the harness holds ENV_MUTEX and
        // restores every override in `Drop`.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) -> Config {
        if self.loaded.borrow().is_none() && self.error.borrow().is_none() {
            let args = self.cli_args.borrow().clone();
            match Config::load_from_iter(args) {
                Ok(config) => *self.loaded.borrow_mut() = Some(config),
                Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
            }
        }

        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            match value {
                Some(os_value) => unsafe { std::env::set_var(&key, os_value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the download timeout to {secs}")]
fn given_configuration_file(harness: &Harness, secs: u64) {
    harness.write_config(secs);
}

#[given("the environment overrides the download timeout to {secs}")]
fn given_environment_override(harness: &Harness, secs: u64) {
    harness.set_env(TIMEOUT_ENV, &secs.to_string());
}

#[given("the command line sets the download timeout to {secs}")]
fn given_cli_override(harness: &Harness, secs: u64) {
    harness.push_cli_arg("--download-timeout-secs");
    harness.push_cli_arg(secs.to_string());
}

#[then("loading the configuration resolves the download timeout to {secs}")]
fn then_timeout_resolved(harness: &Harness, secs: u64) {
    let config = harness.load();
    assert_eq!(config.download_timeout_secs, secs);
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.load();
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert_eq!(config.download_timeout_secs, DEFAULT_DOWNLOAD_TIMEOUT_SECS);
    assert!(config.plugins().is_empty());
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Built-in defaults apply when nothing is configured"
)]
fn defaults_apply(#[from(harness)] harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Configuration file overrides the defaults"
)]
fn file_overrides_defaults(#[from(harness)] harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Environment overrides the configuration file"
)]
fn environment_overrides_file(#[from(harness)] harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Command-line flags override every other layer"
)]
fn cli_overrides_everything(#[from(harness)] harness: Harness) {
    drop(harness);
}
