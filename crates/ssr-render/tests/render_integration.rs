// crates/ssr-render/tests/render_integration.rs
//
// End-to-end renders against real RustPython contexts, using the fixture
// packages under tests/testdata/.

use serde_json::{json, Map, Value};
use ssr_render::output::class_name;
use ssr_render::{
    CacheBehavior, Environment, EnvironmentFactory, Package, PyEnvironmentFactory, RenderError,
    RenderRequest, RenderSettings, Renderer,
};

const TEST_COMPONENT: &str = "./components/server/test_component.py";

fn packages() -> Vec<Package> {
    vec![
        Package::new("corelibs.py", include_str!("testdata/corelibs.py")),
        Package::new("corelibs_legacy.py", include_str!("testdata/corelibs_legacy.py")),
        Package::new("shared.py", include_str!("testdata/shared.py")),
        Package::new("server.py", include_str!("testdata/server.py")),
        Package::new("canvas_test.py", include_str!("testdata/canvas_test.py")),
        Package::new("globals_package.py", include_str!("testdata/globals_package.py")),
        Package::new("polyfill_package.py", include_str!("testdata/polyfill_package.py")),
    ]
}

fn props() -> Value {
    json!({
        "val": 6,
        "list": ["I", "am", "not", "a", "number"],
    })
}

fn renderer() -> Renderer {
    let settings = RenderSettings {
        cache_capacity_bytes: 10_000_000,
        ..RenderSettings::default()
    };
    Renderer::new(settings).expect("renderer")
}

fn red_class() -> String {
    class_name("red", "color:red !important;")
}

// ─── Rendering ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_renders_simple_component() {
    let renderer = renderer();
    let result = renderer
        .render(RenderRequest::new(packages(), TEST_COMPONENT, props()))
        .await
        .expect("render");

    let red = red_class();
    assert_eq!(
        result.markup,
        format!(
            "<div>6<ol class=\"{red}\"><li>I</li><li>am</li><li>not</li>\
             <li>a</li><li>number</li></ol></div>"
        )
    );
    assert_eq!(result.style.content, format!(".{red}{{color:red !important;}}"));
    assert_eq!(result.style.applied_class_names, vec![red]);
    assert_eq!(result.echoed_input, props());
}

#[tokio::test]
async fn test_cached_context_gives_same_result() {
    let renderer = renderer();
    let first = renderer
        .render(RenderRequest::new(packages(), TEST_COMPONENT, props()))
        .await
        .expect("first render");
    let second = renderer
        .render(RenderRequest::new(packages(), TEST_COMPONENT, props()))
        .await
        .expect("second render");

    assert_eq!(renderer.contexts_built(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_does_not_render_without_canvas() {
    let renderer = renderer();
    let result = renderer
        .render(RenderRequest::new(
            packages(),
            "./components/canvas/test_component.py",
            props(),
        ))
        .await
        .expect("render");
    assert_eq!(result.markup, "<canvas width=\"24\"></canvas>");
}

#[tokio::test]
async fn test_references_injected_globals() {
    let renderer = renderer();
    let mut globals = Map::new();
    globals.insert(
        "location".into(),
        json!("http://www.example.org/science/physics"),
    );
    globals.insert("KA".into(), json!({"language": "es"}));

    let result = renderer
        .render(
            RenderRequest::new(packages(), "./components/globals/test_component.py", json!({}))
                .with_globals(globals),
        )
        .await
        .expect("render");
    assert!(result.markup.contains("es"), "markup: {}", result.markup);
    assert!(
        result.markup.contains("http://www.example.org/science/physics"),
        "markup: {}",
        result.markup
    );
}

#[tokio::test]
async fn test_globals_are_refreshed_on_cached_context() {
    let renderer = renderer();
    let path = "./components/globals/test_component.py";
    let with_location = |location: &str| {
        let mut globals = Map::new();
        globals.insert("location".into(), json!(location));
        globals.insert("KA".into(), json!({"language": "en"}));
        RenderRequest::new(packages(), path, json!({})).with_globals(globals)
    };

    renderer.render(with_location("/first")).await.expect("first");
    let second = renderer.render(with_location("/second")).await.expect("second");
    assert_eq!(renderer.contexts_built(), 1);
    assert!(second.markup.contains("/second"), "markup: {}", second.markup);
}

#[tokio::test]
async fn test_reused_context_drops_globals_missing_from_request() {
    let renderer = renderer();
    let path = "./components/globals/test_component.py";
    let mut globals = Map::new();
    globals.insert("location".into(), json!("http://user-a/private"));
    globals.insert("KA".into(), json!({"language": "es"}));

    let first = renderer
        .render(RenderRequest::new(packages(), path, json!({})).with_globals(globals))
        .await
        .expect("render with globals");
    assert!(first.markup.contains("http://user-a/private"), "markup: {}", first.markup);

    let cached = renderer
        .render(RenderRequest::new(packages(), path, json!({})))
        .await
        .err()
        .expect("cached context must not keep the previous globals");
    assert_eq!(renderer.contexts_built(), 1);

    let fresh = renderer
        .render(
            RenderRequest::new(packages(), path, json!({}))
                .with_cache_behavior(CacheBehavior::Ignore),
        )
        .await
        .err()
        .expect("fresh context has no globals either");
    assert_eq!(renderer.contexts_built(), 2);

    for err in [&cached, &fresh] {
        match err {
            RenderError::Execution { message, .. } => {
                assert!(message.contains("location"), "message: {message}")
            }
            other => panic!("expected Execution, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_polyfills_includes() {
    let renderer = renderer();
    let result = renderer
        .render(RenderRequest::new(
            packages(),
            "./components/polyfill/test_component.py",
            json!({"array": [1, 2, 3]}),
        ))
        .await
        .expect("render");
    assert!(result.markup.contains("true"), "markup: {}", result.markup);
}

#[test]
fn test_includes_absent_before_polyfills() {
    let env = PyEnvironmentFactory::new()
        .new_environment()
        .expect("environment");
    let probe = "found = includes([1, 2, 3], 2)\n";
    assert!(
        matches!(
            env.load_source("probe.py", probe),
            Err(RenderError::PackageLoad { .. })
        ),
        "includes must not exist before polyfills are installed"
    );
    env.install_polyfills().expect("polyfills");
    env.load_source("probe.py", probe).expect("includes after polyfills");
}

// ─── Cache behavior ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bypass_read_fills_cache() {
    let renderer = renderer();
    renderer
        .render(RenderRequest::new(packages(), TEST_COMPONENT, props()))
        .await
        .expect("default");
    renderer
        .render(
            RenderRequest::new(packages(), TEST_COMPONENT, props())
                .with_cache_behavior("no".parse().expect("legacy alias")),
        )
        .await
        .expect("bypass-read");
    assert_eq!(renderer.contexts_built(), 2);

    renderer
        .render(RenderRequest::new(packages(), TEST_COMPONENT, props()))
        .await
        .expect("default again");
    assert_eq!(renderer.contexts_built(), 2);
}

#[tokio::test]
async fn test_ignore_never_caches() {
    let renderer = renderer();
    renderer
        .set_default_cache_behavior(CacheBehavior::Ignore)
        .expect("set default");
    for _ in 0..2 {
        renderer
            .render(RenderRequest::new(packages(), TEST_COMPONENT, props()))
            .await
            .expect("render");
    }
    assert_eq!(renderer.contexts_built(), 2);
}

#[tokio::test]
async fn test_different_package_lists_use_different_keys() {
    let renderer = renderer();
    renderer
        .render(RenderRequest::new(packages(), TEST_COMPONENT, props()))
        .await
        .expect("original");

    let mut renamed = packages();
    renamed[0].identifier = "corelibs-2.py".into();
    renderer
        .render(RenderRequest::new(renamed, TEST_COMPONENT, props()))
        .await
        .expect("renamed");
    assert_eq!(renderer.contexts_built(), 2);
}

// ─── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_entry() {
    let renderer = renderer();
    let err = renderer
        .render(RenderRequest::new(packages(), "./components/nope.py", props()))
        .await
        .err()
        .expect("must fail");
    assert!(
        matches!(err, RenderError::EntryNotFound { ref path } if path == "./components/nope.py"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_component_error_leaves_context_cached() {
    let renderer = renderer();
    let err = renderer
        .render(RenderRequest::new(packages(), TEST_COMPONENT, json!({"val": 1})))
        .await
        .err()
        .expect("missing 'list' must fail");
    match err {
        RenderError::Execution { traceback, .. } => {
            assert!(traceback.contains("KeyError"), "traceback: {traceback}")
        }
        other => panic!("expected Execution, got {other:?}"),
    }

    renderer
        .render(RenderRequest::new(packages(), TEST_COMPONENT, props()))
        .await
        .expect("valid props render");
    assert_eq!(renderer.contexts_built(), 1);
}

#[tokio::test]
async fn test_broken_package_is_not_cached() {
    let renderer = renderer();
    let mut broken = packages();
    broken.push(Package::new("broken.py", "def f(:\n"));

    for _ in 0..2 {
        let err = renderer
            .render(RenderRequest::new(broken.clone(), TEST_COMPONENT, props()))
            .await
            .err()
            .expect("must fail");
        assert!(
            matches!(err, RenderError::Syntax { ref identifier, .. } if identifier == "broken.py"),
            "unexpected error: {err:?}"
        );
    }
    assert_eq!(renderer.contexts_built(), 2);
    let stats = renderer.stats().await.expect("stats");
    assert_eq!(stats.cache.map(|c| c.entries), Some(0));
}
