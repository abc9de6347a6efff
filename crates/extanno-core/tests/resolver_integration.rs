use extanno_core::{
    AnnotationConfig, AnnotationResolver, CacheSource, CachingAnnotationResolver, FileEvent,
    FileEventKind, GlobalAnnotations, GlobalCacheBuilder, ManualWatcher, MemberKind,
    ReferenceTable, SymbolRef,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const NOT_NULL: &str = "M:JetBrains.Annotations.NotNullAttribute.#ctor";
const CAN_BE_NULL: &str = "M:JetBrains.Annotations.CanBeNullAttribute.#ctor";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn install(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn member(name: &str, body: &str) -> String {
    format!(r#"<member name="{name}">{body}</member>"#)
}

fn attribute(ctor: &str) -> String {
    format!(r#"<attribute ctor="{ctor}"/>"#)
}

fn parameter(name: &str, ctor: &str) -> String {
    format!(r#"<parameter name="{name}">{}</parameter>"#, attribute(ctor))
}

fn document(members: &[String]) -> String {
    format!("<assembly>{}</assembly>", members.concat())
}

struct Fixture {
    temp: TempDir,
    config: AnnotationConfig,
    refs: ReferenceTable,
    watcher: ManualWatcher,
    resolver: CachingAnnotationResolver,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let config = AnnotationConfig::isolated(temp.path());

        install(
            temp.path(),
            "system/ReSharperPlatformVs17/ExternalAnnotations/N/N.xml",
            &document(&[member(
                "M:N.C.Foo",
                &format!("{}{}", attribute(NOT_NULL), parameter("x", CAN_BE_NULL)),
            )]),
        );
        install(
            temp.path(),
            "user/ReSharperPlatformVs16/Extensions/Acme.Plugin/annotations/Acme.xml",
            &document(&[member("T:Acme.Widget", &attribute(NOT_NULL))]),
        );

        fs::create_dir_all(temp.path().join("bin")).unwrap();
        fs::write(temp.path().join("bin/Vendor.dll"), b"MZ").unwrap();
        install(
            temp.path(),
            "bin/Vendor.ExternalAnnotations.xml",
            &document(&[member("P:Vendor.Client.Endpoint", &attribute(CAN_BE_NULL))]),
        );
        let refs = ReferenceTable::new().with_reference("Vendor", temp.path().join("bin/Vendor.dll"));

        let watcher = ManualWatcher::new();
        let resolver = CachingAnnotationResolver::with_watcher(
            Arc::new(GlobalAnnotations::from_config(config.clone())),
            &config,
            Arc::new(watcher.clone()),
        );

        Self {
            temp,
            config,
            refs,
            watcher,
            resolver,
        }
    }

    fn side_by_side_path(&self) -> PathBuf {
        self.temp.path().join("bin/Vendor.ExternalAnnotations.xml")
    }

    fn has(&self, symbol: &SymbolRef) -> bool {
        self.resolver
            .has_annotation_for_symbol(symbol, false, &self.refs)
            .unwrap()
    }
}

#[test]
fn test_installation_annotations_resolve() {
    let fx = Fixture::new();
    fx.resolver.ensure_scanned().unwrap();

    assert!(fx.has(&SymbolRef::member("M:N.C.Foo")));
    assert!(fx.has(&SymbolRef::parameter("M:N.C.Foo", "x")));
    assert!(!fx.has(&SymbolRef::parameter("M:N.C.Foo", "y")));
    assert!(fx.has(&SymbolRef::member("T:Acme.Widget")));
    assert!(!fx.has(&SymbolRef::member("M:Acme.Widget")));

    let item = fx
        .resolver
        .has_annotation_for_symbol(&SymbolRef::member("M:N.C.Foo"), true, &fx.refs)
        .unwrap();
    assert!(!item);
}

#[test]
fn test_global_build_writes_cache_file() {
    let fx = Fixture::new();
    fx.resolver.ensure_scanned().unwrap();

    assert!(fx.config.cache_path().unwrap().is_file());
}

#[test]
fn test_persisted_cache_answers_identically() {
    let fx = Fixture::new();

    let first = GlobalCacheBuilder::new(&fx.config).build().unwrap();
    let second = GlobalCacheBuilder::new(&fx.config).build().unwrap();

    assert_eq!(first.source, CacheSource::Rebuilt);
    assert_eq!(second.source, CacheSource::Loaded);
    assert_eq!(second.parsed_files, 0);
    assert_eq!(first.map.len(), second.map.len());
    for (key, kind, param) in [
        ("N.C.Foo", MemberKind::Method, None),
        ("N.C.Foo", MemberKind::Method, Some("x")),
        ("N.C.Foo", MemberKind::Method, Some("y")),
        ("N.C.Foo", MemberKind::Type, None),
        ("Acme.Widget", MemberKind::Type, None),
        ("Missing", MemberKind::Field, None),
    ] {
        assert_eq!(
            first.map.contains(key, kind, param, false),
            second.map.contains(key, kind, param, false),
            "{kind}:{key} {param:?}"
        );
    }
}

#[test]
fn test_side_by_side_annotations_resolve() {
    let fx = Fixture::new();
    let endpoint = SymbolRef::member("P:Vendor.Client.Endpoint").in_assembly("Vendor");

    assert_eq!(
        fx.resolver.path_or_none(&endpoint, &fx.refs),
        Some(fx.side_by_side_path())
    );
    assert!(fx.has(&endpoint));
    assert!(fx.has(&endpoint));
    assert_eq!(fx.resolver.side_by_side().stats().parses, 1);
}

#[test]
fn test_change_notification_forces_reparse() {
    let fx = Fixture::new();
    let endpoint = SymbolRef::member("P:Vendor.Client.Endpoint").in_assembly("Vendor");
    let timeout = SymbolRef::member("P:Vendor.Client.Timeout").in_assembly("Vendor");

    assert!(fx.has(&endpoint));
    assert!(!fx.has(&timeout));

    fs::write(
        fx.side_by_side_path(),
        document(&[member("P:Vendor.Client.Timeout", &attribute(NOT_NULL))]),
    )
    .unwrap();
    fx.watcher
        .emit(FileEvent::new(FileEventKind::Changed, fx.side_by_side_path()));

    assert!(fx.has(&timeout));
    assert!(!fx.has(&endpoint));
    let stats = fx.resolver.side_by_side().stats();
    assert_eq!(stats.parses, 2);
    assert_eq!(stats.evictions, 1);
}

#[test]
fn test_rename_away_evicts_old_path() {
    let fx = Fixture::new();
    let endpoint = SymbolRef::member("P:Vendor.Client.Endpoint").in_assembly("Vendor");
    assert!(fx.has(&endpoint));

    let moved = fx.temp.path().join("bin/Vendor.ExternalAnnotations.xml.bak");
    fs::rename(fx.side_by_side_path(), &moved).unwrap();
    fx.watcher
        .emit(FileEvent::renamed(fx.side_by_side_path(), &moved));

    assert!(!fx.resolver.side_by_side().contains(&fx.side_by_side_path()));
    assert!(!fx.has(&endpoint));
    assert!(fx.resolver.path_or_none(&endpoint, &fx.refs).is_none());
}

#[test]
fn test_deleted_file_stops_resolving() {
    let fx = Fixture::new();
    let endpoint = SymbolRef::member("P:Vendor.Client.Endpoint").in_assembly("Vendor");
    assert!(fx.has(&endpoint));

    fs::remove_file(fx.side_by_side_path()).unwrap();
    fx.watcher
        .emit(FileEvent::new(FileEventKind::Deleted, fx.side_by_side_path()));

    assert!(!fx.has(&endpoint));
    assert!(fx.resolver.side_by_side().is_empty());
}

fn resolver_over(config: &AnnotationConfig) -> (Arc<GlobalAnnotations>, CachingAnnotationResolver) {
    let global = Arc::new(GlobalAnnotations::from_config(config.clone()));
    let resolver = CachingAnnotationResolver::with_watcher(
        global.clone(),
        config,
        Arc::new(ManualWatcher::new()),
    );
    (global, resolver)
}

#[test]
fn test_missing_installation_is_fatal_and_distinct() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let config = AnnotationConfig::isolated(temp.path());

    let (_, resolver) = resolver_over(&config);
    assert!(resolver.ensure_scanned().unwrap_err().is_missing_data());

    install(
        temp.path(),
        "user/ReSharperPlatformVs17/ExternalAnnotations/Broken.xml",
        "<assembly><member name=\"M:A.B\">",
    );
    let (_, resolver) = resolver_over(&config);
    assert!(!resolver.ensure_scanned().unwrap_err().is_missing_data());
}

#[test]
fn test_failed_build_fails_every_lookup_without_rebuilding() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let config = AnnotationConfig::isolated(temp.path());
    install(
        temp.path(),
        "system/ReSharperPlatformVs17/ExternalAnnotations/N.xml",
        &document(&[member("M:N.C.Foo", &attribute(NOT_NULL))]),
    );
    install(
        temp.path(),
        "system/ReSharperPlatformVs17/ExternalAnnotations/Broken.xml",
        "<assembly><member",
    );
    let (global, resolver) = resolver_over(&config);
    let refs = ReferenceTable::new();

    for _ in 0..5 {
        let err = resolver
            .has_annotation_for_symbol(&SymbolRef::member("M:N.C.Foo"), false, &refs)
            .unwrap_err();
        assert!(!err.is_missing_data());
    }
    assert_eq!(global.build_count(), 1);
    assert!(global.has_failed());
}
