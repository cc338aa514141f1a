use sedit_core::extension::{DefaultExtensionLoader, ModuleState};
use sedit_core::{
    EditorHost, Extension, ExtensionApi, ExtensionError, HeadlessHost, HookResult, MenuEntry,
    Sedit, SeditConfig,
};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const GREETER: &str = r#"
fn setup()
  add_menu_item("Say Hi", "say_hi")
  register_resource("cleanup")
  on("file_opened", "opened")
end

fn say_hi()
  set_text("Hi!")
end

fn cleanup()
  set_setting("greeter_disposed", true)
end

fn opened(path)
  set_extension_setting("last_opened", path)
end
"#;

const BAD: &str = r#"
fn setup()
  add_menu_item("Half", "half")
  raise "setup exploded"
end

fn half()
  log("half")
end
"#;

const SPINNER: &str = r#"
let running = true

fn setup()
  run_background("spin")
end

fn spin()
  let i = 0
  while running and i < 50000000
    i = i + 1
  end
  set_extension_setting("stopped_at", i)
end

fn teardown()
  running = false
end
"#;

fn write_module(dir: &Path, relative: &str, source: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create module dir");
    }
    std::fs::write(path, source).expect("write module");
}

fn start(root: &Path) -> (Arc<HeadlessHost>, Sedit) {
    let config = SeditConfig::rooted_at(root);
    write_module(&config.extensions_dir, "greeter/greeter.sed", GREETER);
    write_module(&config.extensions_dir, "greeter/README.md", "# greeter");
    write_module(&config.extensions_dir, "bad.sed", BAD);
    write_module(&config.extensions_dir, "broken.sed", "let = 1\n");
    let host = Arc::new(HeadlessHost::new());
    let runtime = Sedit::start(config, host.clone());
    (host, runtime)
}

fn items(entries: &[MenuEntry]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| match entry {
            MenuEntry::Item { owner, label, .. } => Some((owner.clone(), label.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn startup_discovers_and_loads_each_extension_independently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_host, runtime) = start(dir.path());
    let extensions = runtime.extensions().extensions();
    let names: Vec<&str> = extensions
        .iter()
        .map(|info| info.descriptor.name.as_str())
        .collect();
    assert_eq!(names, vec!["bad", "broken", "greeter"]);
    assert_eq!(extensions[0].state, ModuleState::Loaded);
    assert!(matches!(extensions[1].state, ModuleState::Failed(_)));
    assert_eq!(extensions[2].state, ModuleState::Loaded);
    assert!(extensions[2].descriptor.readme.is_some());
    assert!(extensions.iter().all(|info| !info.enabled));
}

#[test]
fn greeter_menu_item_appears_runs_and_is_removed_with_its_resource() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, runtime) = start(dir.path());
    let registry = runtime.extensions();

    registry.enable("greeter").expect("enable greeter");
    let menu = registry.menu_snapshot();
    assert_eq!(
        items(&menu),
        vec![("greeter".to_string(), "Say Hi".to_string())]
    );
    assert!(menu.contains(&MenuEntry::Toggle {
        name: "greeter".to_string(),
        enabled: true
    }));

    let say_hi = menu
        .iter()
        .position(|entry| matches!(entry, MenuEntry::Item { label, .. } if label == "Say Hi"))
        .expect("Say Hi row");
    assert!(registry.activate(say_hi));
    assert_eq!(host.buffer_text(), "Hi!");

    registry.disable("greeter");
    assert!(items(&registry.menu_snapshot()).is_empty());
    assert_eq!(
        runtime.context().settings().get("greeter_disposed"),
        Some(json!(true))
    );
    assert!(runtime
        .context()
        .settings()
        .enabled_extensions()
        .is_empty());
}

#[test]
fn raising_setup_leaves_other_extensions_untouched_and_menu_rebuilt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_host, runtime) = start(dir.path());
    let registry = runtime.extensions();
    registry.enable("greeter").expect("enable greeter");
    let greeter_before = registry.extension("greeter");

    let err = registry.enable("bad").expect_err("setup raises");
    match err {
        ExtensionError::HookFailed { name, hook, message } => {
            assert_eq!(name, "bad");
            assert_eq!(hook, "setup");
            assert!(message.contains("setup exploded"));
        }
        other => panic!("unexpected error {other:?}"),
    }

    assert_eq!(registry.extension("greeter"), greeter_before);
    let menu = registry.menu_snapshot();
    assert!(menu.contains(&MenuEntry::Toggle {
        name: "bad".to_string(),
        enabled: false
    }));
    // No rollback: the item registered before the raise stays until disable.
    let bad = registry.extension("bad").expect("bad listed");
    assert_eq!(bad.menu_items, vec!["Half".to_string()]);
    registry.disable("bad");
    assert!(registry
        .extension("bad")
        .expect("bad listed")
        .menu_items
        .is_empty());
    assert!(registry.is_enabled("greeter"));
}

#[test]
fn failed_toggle_from_menu_is_cleaned_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_host, runtime) = start(dir.path());
    let registry = runtime.extensions();
    let toggle = registry
        .menu_snapshot()
        .iter()
        .position(|entry| matches!(entry, MenuEntry::Toggle { name, .. } if name == "bad"))
        .expect("bad toggle");

    assert!(registry.activate(toggle));
    let bad = registry.extension("bad").expect("bad listed");
    assert!(!bad.enabled);
    assert!(bad.menu_items.is_empty());
}

#[test]
fn enabling_unloaded_extensions_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_host, runtime) = start(dir.path());
    assert_eq!(
        runtime.extensions().enable("broken"),
        Err(ExtensionError::NotLoaded("broken".to_string()))
    );
}

#[test]
fn disable_then_enable_restores_the_same_menu_items() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_host, runtime) = start(dir.path());
    let registry = runtime.extensions();

    registry.enable("greeter").expect("enable");
    let first = registry.extension("greeter").expect("listed").menu_items;
    registry.disable("greeter");
    registry.enable("greeter").expect("re-enable");
    let second = registry.extension("greeter").expect("listed").menu_items;
    assert_eq!(first, second);
    assert_eq!(second, vec!["Say Hi".to_string()]);
}

#[test]
fn extension_listeners_follow_enable_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (host, runtime) = start(dir.path());
    let registry = runtime.extensions();
    let document = dir.path().join("doc.txt");
    std::fs::write(&document, "content").expect("write doc");
    let shown = document.to_string_lossy().into_owned();

    registry.enable("greeter").expect("enable");
    runtime.context().open_file(&document).expect("open");
    assert_eq!(host.run_pending(), 1);
    assert_eq!(
        runtime.context().settings().extension_settings("greeter"),
        json!({ "last_opened": shown })
    );

    registry.disable("greeter");
    assert_eq!(runtime.context().events().listener_count("file_opened"), 0);
    runtime.context().open_file(&document).expect("open again");
    assert_eq!(host.run_pending(), 0);
}

#[test]
fn enabled_set_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let (_host, runtime) = start(dir.path());
        runtime.extensions().enable("greeter").expect("enable");
        runtime.shutdown();
    }
    let (_host, runtime) = start(dir.path());
    assert!(runtime.extensions().is_enabled("greeter"));
}

#[derive(Default)]
struct Counters {
    registered: AtomicUsize,
    disposed: Arc<AtomicUsize>,
}

struct Native {
    counters: Arc<Counters>,
    resources: usize,
    fail: bool,
}

impl Extension for Native {
    fn setup(&self, api: &ExtensionApi) -> HookResult {
        for _ in 0..self.resources {
            self.counters.registered.fetch_add(1, Ordering::SeqCst);
            let disposed = Arc::clone(&self.counters.disposed);
            api.register_disposer(move || {
                disposed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        if self.fail {
            return Err("flaky setup".into());
        }
        Ok(())
    }
}

#[test]
fn every_reload_disposes_all_previously_registered_resources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SeditConfig::rooted_at(dir.path());
    write_module(&config.extensions_dir, "native.sed", "");
    write_module(&config.extensions_dir, "flaky.sed", "");
    let counters = Arc::new(Counters::default());
    let native_counters = Arc::clone(&counters);
    let flaky_counters = Arc::clone(&counters);
    let loader = DefaultExtensionLoader::new()
        .with_builtin("native", move || {
            Arc::new(Native {
                counters: Arc::clone(&native_counters),
                resources: 2,
                fail: false,
            })
        })
        .with_builtin("flaky", move || {
            Arc::new(Native {
                counters: Arc::clone(&flaky_counters),
                resources: 1,
                fail: true,
            })
        });
    let runtime =
        Sedit::start_with_loader(config, Arc::new(HeadlessHost::new()), Arc::new(loader));
    let registry = runtime.extensions();
    registry.enable("native").expect("enable native");
    runtime
        .context()
        .settings()
        .set_extension_enabled("flaky", true);

    for _ in 0..3 {
        let registered_before = counters.registered.load(Ordering::SeqCst);
        let summary = registry.load_all().expect("reload");
        assert_eq!(summary.enabled, vec!["native".to_string()]);
        assert_eq!(summary.enable_failed.len(), 1);
        assert!(counters.disposed.load(Ordering::SeqCst) >= registered_before);
    }
    let alive =
        counters.registered.load(Ordering::SeqCst) - counters.disposed.load(Ordering::SeqCst);
    assert_eq!(alive, 3);
}

#[test]
fn disable_does_not_wait_for_a_running_background_job() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SeditConfig::rooted_at(dir.path());
    write_module(&config.extensions_dir, "spinner.sed", SPINNER);
    let runtime = Sedit::start(config, Arc::new(HeadlessHost::new()));
    let registry = runtime.extensions();
    registry.enable("spinner").expect("enable spinner");

    let started = Instant::now();
    registry.disable("spinner");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "disable blocked for {:?}",
        started.elapsed()
    );

    // Teardown flips the global the worker polls, so it stops early.
    let deadline = Instant::now() + Duration::from_secs(30);
    let stopped_at = loop {
        let settings = runtime.context().settings().extension_settings("spinner");
        if let Some(value) = settings.get("stopped_at").and_then(|v| v.as_i64()) {
            break value;
        }
        assert!(Instant::now() < deadline, "worker never stopped");
        std::thread::sleep(Duration::from_millis(20));
    };
    assert!(stopped_at < 50_000_000);
}

#[test]
fn deeply_nested_module_fails_to_load_without_crashing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SeditConfig::rooted_at(dir.path());
    let depth = 50_000;
    let source = format!("print {}1{}\n", "(".repeat(depth), ")".repeat(depth));
    write_module(&config.extensions_dir, "nested.sed", &source);
    write_module(&config.extensions_dir, "greeter.sed", GREETER);
    let runtime = Sedit::start(config, Arc::new(HeadlessHost::new()));

    let nested = runtime.extensions().extension("nested").expect("listed");
    match nested.state {
        ModuleState::Failed(message) => assert!(message.contains("nesting too deep")),
        other => panic!("unexpected state {other:?}"),
    }
    runtime.extensions().enable("greeter").expect("greeter still works");
}
