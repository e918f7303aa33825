//! Unit tests for the package manager.

use mockall::mock;
use rstest::rstest;
use serde_json::json;

use super::*;

const FOO: &str = "https://example.com/quill-foo.git";
const BAR: &str = "https://example.com/quill-bar.git";

mock! {
    Fetch {}
    impl Downloader for Fetch {
        fn download(
            &self,
            declaration: &PackageDeclaration,
            destination: &Utf8Path,
        ) -> Result<(), DownloadError>;
    }
}

mock! {
    Loader {}
    impl ProviderLoader for Loader {
        fn load(
            &self,
            source: &Utf8Path,
            declaration: &PackageDeclaration,
        ) -> Result<Box<dyn Provider>, ProviderError>;
    }
}

mock! {
    Scripting {}
    impl ScriptingHost for Scripting {
        fn register_api_extension(&self, extension: ApiExtension) -> Result<(), ProviderError>;
        fn unregister_api_extension(&self, namespace: &str) -> bool;
    }
}

mock! {
    Package {}
    impl Provider for Package {
        fn info(&self) -> PackageInfo;
        fn capabilities(&self) -> ProviderCapabilities;
        fn initialize(&mut self) -> Result<(), ProviderError>;
        fn configure(&mut self, config: &BTreeMap<String, Value>) -> Result<(), ProviderError>;
        fn api_extension(&self) -> Option<ApiExtension>;
        fn enable(&mut self) -> Result<(), ProviderError>;
        fn disable(&mut self) -> Result<(), ProviderError>;
    }
}

fn info(url: &str) -> PackageInfo {
    PackageInfo {
        name: package_path(url).file_name().unwrap_or("package").to_owned(),
        version: String::from("1.0.0"),
        url: url.to_owned(),
        ..PackageInfo::default()
    }
}

/// A provider that initialises and enables once.
fn package(url: &'static str, capabilities: &[ProviderCapability]) -> MockPackage {
    let mut package = MockPackage::new();
    let declared: ProviderCapabilities = capabilities.iter().copied().collect();
    package.expect_info().returning(move || info(url));
    package.expect_capabilities().return_const(declared);
    package.expect_initialize().times(1).returning(|| Ok(()));
    package.expect_enable().times(1).returning(|| Ok(()));
    package
}

fn fetch_ok() -> MockFetch {
    let mut fetch = MockFetch::new();
    fetch.expect_download().returning(|_, _| Ok(()));
    fetch
}

fn loader_for(packages: Vec<(&'static str, MockPackage)>) -> MockLoader {
    let mut loader = MockLoader::new();
    for (url, package) in packages {
        loader
            .expect_load()
            .withf(move |_, declaration| declaration.url == url)
            .times(1)
            .return_once(move |_, _| Ok(Box::new(package) as Box<dyn Provider>));
    }
    loader
}

fn manager(fetch: MockFetch, loader: MockLoader, scripting: MockScripting) -> PackageManager {
    PackageManager::new(
        Arc::new(fetch),
        Arc::new(loader),
        Arc::new(scripting),
        "/var/quill/packages",
    )
}

#[rstest]
#[case::https_git("https://github.com/quill/quill-foo.git", "github.com/quill/quill-foo")]
#[case::trailing_slash("https://example.com/pkgs/bar/", "example.com/pkgs/bar")]
#[case::scp_style("git@example.com:tools/baz.git", "example.com/tools/baz")]
#[case::user_info("https://me@example.com/qux", "example.com/qux")]
#[case::odd_characters("https://example.com/a b?c", "example.com/a_b_c")]
#[case::dot_segments("https://example.com/..", "example.com/__")]
#[case::nothing_left("", "package")]
fn package_paths_mirror_host_and_path(#[case] url: &str, #[case] expected: &str) {
    assert_eq!(package_path(url), expected);
}

#[rstest]
fn urls_sharing_a_final_segment_get_separate_directories() {
    let mut fetch = MockFetch::new();
    fetch
        .expect_download()
        .withf(|declaration, destination| {
            declaration.url == "https://github.com/alice/foo.git"
                && destination == "/var/quill/packages/github.com/alice/foo"
        })
        .times(1)
        .returning(|_, _| Ok(()));
    fetch
        .expect_download()
        .withf(|declaration, destination| {
            declaration.url == "https://github.com/bob/foo"
                && destination == "/var/quill/packages/github.com/bob/foo"
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let loader = loader_for(vec![
        (
            "https://github.com/alice/foo.git",
            package("https://github.com/alice/foo.git", &[]),
        ),
        (
            "https://github.com/bob/foo",
            package("https://github.com/bob/foo", &[]),
        ),
    ]);
    let manager = manager(fetch, loader, MockScripting::new());
    manager.declare_package(PackageDeclaration::new("https://github.com/alice/foo.git"));
    manager.declare_package(PackageDeclaration::new("https://github.com/bob/foo"));

    manager.load_declared_packages().expect("both load");

    assert!(manager.is_enabled("https://github.com/alice/foo.git"));
    assert!(manager.is_enabled("https://github.com/bob/foo"));
}

#[rstest]
fn full_pipeline_configures_and_registers_the_api() {
    let mut fetch = MockFetch::new();
    fetch
        .expect_download()
        .withf(|declaration, destination| {
            declaration.url == FOO && destination == "/var/quill/packages/example.com/quill-foo"
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let mut provider = package(
        FOO,
        &[ProviderCapability::Configurable, ProviderCapability::ScriptingApi],
    );
    provider
        .expect_configure()
        .withf(|config| config.get("width") == Some(&json!(80)))
        .times(1)
        .returning(|_| Ok(()));
    provider.expect_api_extension().returning(|| {
        Some(ApiExtension {
            namespace: String::from("foo"),
            functions: vec![String::from("greet")],
        })
    });
    let mut scripting = MockScripting::new();
    scripting
        .expect_register_api_extension()
        .withf(|extension| extension.namespace == "foo")
        .times(1)
        .returning(|_| Ok(()));

    let manager = manager(fetch, loader_for(vec![(FOO, provider)]), scripting);
    manager.declare_package(PackageDeclaration::new(FOO).with_config("width", json!(80)));
    let enabled = manager.load_declared_packages().expect("load");

    assert_eq!(enabled, 1);
    let summary = manager.package(FOO).expect("record");
    assert_eq!(summary.status, PackageStatus::Enabled);
    assert_eq!(summary.info.map(|info| info.name), Some(String::from("quill-foo")));
    assert!(summary.loaded_at.is_some());
    assert!(manager.pending_declarations().is_empty());
}

#[rstest]
fn optional_hooks_are_skipped_without_capabilities() {
    let mut provider = package(FOO, &[]);
    provider.expect_configure().times(0);
    provider.expect_api_extension().times(0);
    let mut scripting = MockScripting::new();
    scripting.expect_register_api_extension().times(0);

    let manager = manager(fetch_ok(), loader_for(vec![(FOO, provider)]), scripting);
    manager.declare_package(PackageDeclaration::new(FOO).with_config("ignored", json!(true)));

    assert_eq!(manager.load_declared_packages().expect("load"), 1);
    assert!(manager.is_enabled(FOO));
}

#[rstest]
fn missing_extension_marks_the_package_failed() {
    let mut provider = MockPackage::new();
    provider.expect_info().returning(|| info(FOO));
    provider
        .expect_capabilities()
        .return_const([ProviderCapability::ScriptingApi].into_iter().collect::<ProviderCapabilities>());
    provider.expect_initialize().returning(|| Ok(()));
    provider.expect_api_extension().returning(|| None);
    provider.expect_enable().times(0);

    let manager = manager(
        fetch_ok(),
        loader_for(vec![(FOO, provider)]),
        MockScripting::new(),
    );
    manager.declare_package(PackageDeclaration::new(FOO));
    let error = manager.load_declared_packages().expect_err("no extension");

    let PackageError::BatchAborted { source, skipped, .. } = &error else {
        panic!("expected an aborted batch, got {error}");
    };
    assert_eq!(*skipped, 0);
    assert!(matches!(**source, PackageError::MissingExtension { .. }));
    let summary = manager.package(FOO).expect("record");
    assert_eq!(summary.status, PackageStatus::Error);
    assert!(summary.error.is_some());
}

#[rstest]
fn download_failure_abandons_the_rest_of_the_batch() {
    let mut fetch = MockFetch::new();
    fetch
        .expect_download()
        .withf(|declaration, _| declaration.url == FOO)
        .times(1)
        .returning(|_, _| Err(DownloadError::TimedOut { timeout_secs: 300 }));
    fetch
        .expect_download()
        .withf(|declaration, _| declaration.url == BAR)
        .times(0);

    let manager = manager(fetch, MockLoader::new(), MockScripting::new());
    manager.declare_package(PackageDeclaration::new(FOO));
    manager.declare_package(PackageDeclaration::new(BAR));
    let error = manager.load_declared_packages().expect_err("download fails");

    assert!(matches!(
        error,
        PackageError::BatchAborted { ref url, skipped: 1, .. } if url == FOO
    ));
    assert_eq!(manager.status(FOO), PackageStatus::Error);
    assert!(manager.package(BAR).is_none());
    assert!(manager.pending_declarations().is_empty());
}

#[rstest]
fn loaded_urls_are_not_fetched_twice() {
    let mut fetch = MockFetch::new();
    fetch.expect_download().times(1).returning(|_, _| Ok(()));
    let manager = manager(
        fetch,
        loader_for(vec![(FOO, package(FOO, &[]))]),
        MockScripting::new(),
    );

    manager.declare_package(PackageDeclaration::new(FOO));
    manager.load_declared_packages().expect("first load");
    manager.declare_package(PackageDeclaration::new(FOO).with_version("v2"));

    assert_eq!(manager.load_declared_packages().expect("second load"), 0);
    assert_eq!(manager.packages().len(), 1);
}

#[rstest]
fn toggling_calls_the_provider_once_per_change() {
    let mut provider = package(FOO, &[]);
    provider.expect_disable().times(1).returning(|| Ok(()));
    let manager = manager(
        fetch_ok(),
        loader_for(vec![(FOO, provider)]),
        MockScripting::new(),
    );
    manager.declare_package(PackageDeclaration::new(FOO));
    manager.load_declared_packages().expect("load");

    manager.enable_package(FOO).expect("already enabled");
    manager.disable_package(FOO).expect("disable");
    manager.disable_package(FOO).expect("already disabled");

    assert_eq!(manager.status(FOO), PackageStatus::Disabled);
}

#[rstest]
fn failing_provider_toggles_keep_the_status() {
    let mut provider = package(FOO, &[]);
    provider
        .expect_disable()
        .returning(|| Err(ProviderError::Other(String::from("busy"))));
    let manager = manager(
        fetch_ok(),
        loader_for(vec![(FOO, provider)]),
        MockScripting::new(),
    );
    manager.declare_package(PackageDeclaration::new(FOO));
    manager.load_declared_packages().expect("load");

    let error = manager.disable_package(FOO).expect_err("disable fails");

    assert!(matches!(
        error,
        PackageError::Provider { stage: LoadStage::Disable, .. }
    ));
    assert!(manager.is_enabled(FOO));
}

#[rstest]
fn failed_packages_cannot_be_enabled() {
    let mut fetch = MockFetch::new();
    fetch
        .expect_download()
        .returning(|_, _| Err(DownloadError::TimedOut { timeout_secs: 1 }));
    let manager = manager(fetch, MockLoader::new(), MockScripting::new());
    manager.declare_package(PackageDeclaration::new(FOO));
    manager.load_declared_packages().expect_err("download fails");

    let error = manager.enable_package(FOO).expect_err("not loaded");

    assert!(matches!(
        error,
        PackageError::NotLoaded { status: PackageStatus::Error, .. }
    ));
}

#[rstest]
fn removing_an_enabled_package_disables_it_first() {
    let mut provider = package(FOO, &[]);
    provider.expect_disable().times(1).returning(|| Ok(()));
    let manager = manager(
        fetch_ok(),
        loader_for(vec![(FOO, provider)]),
        MockScripting::new(),
    );
    manager.declare_package(PackageDeclaration::new(FOO));
    manager.load_declared_packages().expect("load");

    manager.remove_package(FOO).expect("remove");

    assert_eq!(manager.status(FOO), PackageStatus::NotLoaded);
    assert!(matches!(
        manager.remove_package(FOO),
        Err(PackageError::NotFound { .. })
    ));
}

#[rstest]
fn retrying_a_failed_url_replaces_its_record() {
    let mut fetch = MockFetch::new();
    let mut attempts = 0;
    fetch.expect_download().times(2).returning(move |_, _| {
        attempts += 1;
        if attempts == 1 {
            Err(DownloadError::TimedOut { timeout_secs: 1 })
        } else {
            Ok(())
        }
    });
    let manager = manager(
        fetch,
        loader_for(vec![(FOO, package(FOO, &[]))]),
        MockScripting::new(),
    );

    manager.declare_package(PackageDeclaration::new(FOO));
    manager.load_declared_packages().expect_err("first attempt fails");
    manager.declare_package(PackageDeclaration::new(FOO));
    manager.load_declared_packages().expect("second attempt");

    let summary = manager.package(FOO).expect("record");
    assert_eq!(summary.status, PackageStatus::Enabled);
    assert!(summary.error.is_none());
}

#[rstest]
fn unknown_urls_are_reported_without_creating_records() {
    let manager = manager(MockFetch::new(), MockLoader::new(), MockScripting::new());

    for _ in 0..2 {
        assert_eq!(manager.status(FOO), PackageStatus::NotLoaded);
        assert!(!manager.is_enabled(FOO));
        assert!(matches!(
            manager.enable_package(FOO),
            Err(PackageError::NotFound { .. })
        ));
        assert!(matches!(
            manager.disable_package(FOO),
            Err(PackageError::NotFound { .. })
        ));
    }
    assert!(manager.packages().is_empty());
}

#[rstest]
fn manifest_loader_reads_package_metadata() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let source = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
    std::fs::write(
        source.join(PACKAGE_MANIFEST_FILE),
        json!({
            "name": "quill-foo",
            "version": "2.1.0",
            "keywords": ["demo"],
            "capabilities": ["configurable", "scripting_api"],
            "api": {"namespace": "foo", "functions": ["greet"]},
            "options": ["width"],
        })
        .to_string(),
    )
    .expect("write manifest");

    let mut provider = ManifestLoader
        .load(&source, &PackageDeclaration::new(FOO))
        .expect("load manifest");

    let loaded = provider.info();
    assert_eq!((loaded.name.as_str(), loaded.url.as_str()), ("quill-foo", FOO));
    assert!(provider.capabilities().contains(ProviderCapability::ScriptingApi));
    assert_eq!(
        provider.api_extension().map(|extension| extension.namespace),
        Some(String::from("foo"))
    );
    let accepted = BTreeMap::from([(String::from("width"), json!(100))]);
    let rejected = BTreeMap::from([(String::from("height"), json!(3))]);
    provider.configure(&accepted).expect("known option");
    assert!(matches!(
        provider.configure(&rejected),
        Err(ProviderError::Config { .. })
    ));
}

#[rstest]
fn manifest_loader_reports_missing_manifests() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let source = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");

    let error = ManifestLoader
        .load(&source, &PackageDeclaration::new(FOO))
        .err()
        .expect("no manifest");

    assert!(matches!(error, ProviderError::Read { .. }));
}

#[rstest]
fn extension_namespaces_are_unique() {
    let table = ExtensionTable::new();
    let extension = ApiExtension {
        namespace: String::from("foo"),
        functions: Vec::new(),
    };

    table
        .register_api_extension(extension.clone())
        .expect("first registration");
    let error = table
        .register_api_extension(extension)
        .expect_err("duplicate namespace");

    assert!(matches!(error, ProviderError::NamespaceTaken { .. }));
    assert!(table.extension("foo").is_some());
}

fn foo_extension() -> Option<ApiExtension> {
    Some(ApiExtension {
        namespace: String::from("foo"),
        functions: vec![String::from("greet")],
    })
}

fn scripted_manager(loader: MockLoader, table: &Arc<ExtensionTable>) -> PackageManager {
    PackageManager::new(
        Arc::new(fetch_ok()),
        Arc::new(loader),
        Arc::clone(table) as Arc<dyn ScriptingHost>,
        "/var/quill/packages",
    )
}

#[rstest]
fn removed_packages_free_their_namespace_for_a_reload() {
    let mut first = package(FOO, &[ProviderCapability::ScriptingApi]);
    first.expect_api_extension().returning(foo_extension);
    first.expect_disable().times(1).returning(|| Ok(()));
    let mut second = package(FOO, &[ProviderCapability::ScriptingApi]);
    second.expect_api_extension().returning(foo_extension);
    let table = Arc::new(ExtensionTable::new());
    let manager = scripted_manager(loader_for(vec![(FOO, first), (FOO, second)]), &table);

    manager.declare_package(PackageDeclaration::new(FOO));
    manager.load_declared_packages().expect("first load");
    assert!(table.extension("foo").is_some());

    manager.remove_package(FOO).expect("remove");
    assert!(table.extension("foo").is_none());

    manager.declare_package(PackageDeclaration::new(FOO));
    assert_eq!(manager.load_declared_packages().expect("reload"), 1);
    assert!(manager.is_enabled(FOO));
    assert!(table.extension("foo").is_some());
}

#[rstest]
fn failed_enable_withdraws_the_extension() {
    let mut provider = MockPackage::new();
    provider.expect_info().returning(|| info(FOO));
    provider
        .expect_capabilities()
        .return_const([ProviderCapability::ScriptingApi].into_iter().collect::<ProviderCapabilities>());
    provider.expect_initialize().returning(|| Ok(()));
    provider.expect_api_extension().returning(foo_extension);
    provider
        .expect_enable()
        .times(1)
        .returning(|| Err(ProviderError::Other(String::from("busy"))));
    let table = Arc::new(ExtensionTable::new());
    let manager = scripted_manager(loader_for(vec![(FOO, provider)]), &table);
    manager.declare_package(PackageDeclaration::new(FOO));

    let error = manager.load_declared_packages().expect_err("enable fails");

    assert!(matches!(
        error,
        PackageError::BatchAborted { ref source, .. }
            if matches!(**source, PackageError::Provider { stage: LoadStage::Enable, .. })
    ));
    assert_eq!(manager.status(FOO), PackageStatus::Error);
    assert!(table.extension("foo").is_none());
}

#[rstest]
fn unregistering_reports_whether_the_namespace_existed() {
    let table = ExtensionTable::new();
    table
        .register_api_extension(foo_extension().expect("extension"))
        .expect("register");

    assert!(table.unregister_api_extension("foo"));
    assert!(!table.unregister_api_extension("foo"));
}

#[rstest]
fn status_names_are_snake_case() {
    assert_eq!(PackageStatus::NotLoaded.to_string(), "not_loaded");
    assert_eq!(LoadStage::RegisterApi.to_string(), "register_api");
}
