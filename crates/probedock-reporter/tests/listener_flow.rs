//! Integration tests for ProbeDockListener.
//!
//! Uses wiremock for the Probe Dock API and temporary directories for the
//! config files and the workspace. Tests cover startup, publishing, the
//! fingerprint cache across runs and payload persistence.

use std::path::Path;
use std::time::Duration;

use probedock_reporter::annotation::raw_annotation;
use probedock_reporter::{
    AnnotationRegistry, ClientConfig, EnvOverrides, ListenerOptions, ProbeDockListener,
    StackFrame, SuitePhase, TestCase, TestFailure,
};
use serde_json::{json, Value};
use serial_test::serial;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT_CONFIG: &str = "project:\n  apiId: proj1\n  version: \"1.0\"\n";

/// Config directories for one test.
struct Fixture {
    home: TempDir,
    project: TempDir,
    workspace: TempDir,
}

impl Fixture {
    fn new(api_url: &str, project_config: &str) -> Self {
        let fixture = Self {
            home: TempDir::new().unwrap(),
            project: TempDir::new().unwrap(),
            workspace: TempDir::new().unwrap(),
        };

        let user_dir = fixture.home.path().join(".probedock");
        std::fs::create_dir_all(&user_dir).unwrap();
        std::fs::write(
            user_dir.join("config.yml"),
            format!(
                "servers:\n  local:\n    apiUrl: {}\n    apiToken: test-token\nserver: local\n",
                api_url
            ),
        )
        .unwrap();
        std::fs::write(fixture.project.path().join("probedock.yml"), project_config).unwrap();

        fixture
    }

    fn options(&self, env: &[(&str, &str)]) -> ListenerOptions {
        ListenerOptions::default()
            .with_home(self.home.path())
            .with_project_dir(self.project.path())
            .with_env(EnvOverrides::from_pairs(env.iter().copied()))
            .with_annotations(annotations())
            .with_client(ClientConfig::default().with_timeout_secs(5))
    }

    fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    fn workspace_env(&self) -> String {
        self.workspace().display().to_string()
    }
}

fn annotations() -> AnnotationRegistry {
    AnnotationRegistry::new()
        .with(
            "CartTest::testAddsItem",
            raw_annotation([("key", json!("t1"))]),
        )
        .with(
            "CartTest::testSavesCart",
            raw_annotation([("key", json!("t2")), ("tags", json!(["db"]))]),
        )
}

async fn mock_api(status: u16, body: &str, expected_publishes: u64) -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/ping"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/publish"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .expect(expected_publishes)
        .mount(&mock_server)
        .await;

    mock_server
}

fn api_url(mock_server: &MockServer) -> String {
    format!("{}/api", mock_server.uri())
}

async fn published_payloads(mock_server: &MockServer) -> Vec<Value> {
    mock_server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == "/api/publish")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

fn run_test(listener: &mut ProbeDockListener, method: &str, millis: u64) {
    let test = TestCase::new("CartTest", method);
    listener.on_test_start(&test);
    listener.on_test_end(&test, Duration::from_millis(millis));
}

#[tokio::test]
async fn test_passing_test_is_published() {
    let mock_server = mock_api(202, "", 1).await;
    let fixture = Fixture::new(&api_url(&mock_server), PROJECT_CONFIG);

    let mut listener = ProbeDockListener::start(fixture.options(&[])).await;
    assert!(!listener.state().is_failed(), "{}", listener.log().as_str());

    listener.on_suite_start("unit");
    run_test(&mut listener, "testAddsItem", 42);
    run_test(&mut listener, "testWithoutAnnotation", 3);
    let phase = listener.on_suite_end("unit").await;

    assert_eq!(phase, SuitePhase::Delivered);
    assert_eq!(listener.payloads_sent(), 1);

    let payloads = published_payloads(&mock_server).await;
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert_eq!(payload["projectId"], "proj1");
    assert_eq!(payload["version"], "1.0");
    assert_eq!(payload["reports"][0]["uid"], listener.run_uid());

    let result = &payload["results"][0];
    assert_eq!(result["k"], "t1");
    assert_eq!(result["n"], "Test adds item");
    assert_eq!(result["c"], "PHPUnit");
    assert_eq!(result["p"], true);
    assert_eq!(result["d"], 42);
    assert!(result.get("g").is_none());
    assert!(result.get("m").is_none());

    let output = listener.shutdown();
    assert!(output.contains("Probe Dock API: "));
    assert!(output.contains("1 test results successfully sent (payload 1) out of 2 (50%) tests in unit."));
}

#[tokio::test]
async fn test_failure_chain_is_sent_as_message() {
    let mock_server = mock_api(202, "", 1).await;
    let fixture = Fixture::new(&api_url(&mock_server), PROJECT_CONFIG);
    let mut listener = ProbeDockListener::start(fixture.options(&[])).await;

    let failure = TestFailure::new("RuntimeException", "could not save cart")
        .with_frame(StackFrame::new("save").in_class("App\\Cart").at("/src/Cart.php", 42))
        .caused_by(
            TestFailure::new("PDOException", "connection refused")
                .with_frame(StackFrame::new("connect").in_class("App\\Db").at("/src/Db.php", 9)),
        );

    listener.on_suite_start("unit");
    let test = TestCase::new("CartTest", "testSavesCart");
    listener.on_test_start(&test);
    listener.on_test_error(&failure);
    listener.on_test_end(&test, Duration::from_millis(7));
    listener.on_suite_end("unit").await;

    let payloads = published_payloads(&mock_server).await;
    let result = &payloads[0]["results"][0];
    assert_eq!(result["p"], false);
    assert_eq!(result["g"], json!(["db"]));

    let message = result["m"].as_str().unwrap();
    let segments: Vec<&str> = message.split("Caused by: ").collect();
    assert_eq!(segments.len(), 2);
    assert!(segments[0].starts_with("RuntimeException: could not save cart\n at App.Cart.save(Cart.php:42)"));
    assert!(segments[1].starts_with("PDOException: connection refused"));
}

#[tokio::test]
async fn test_rejected_payload_is_logged() {
    let mock_server = mock_api(400, "{\"errors\":[\"invalid project\"]}", 1).await;
    let fixture = Fixture::new(&api_url(&mock_server), PROJECT_CONFIG);
    let mut listener = ProbeDockListener::start(fixture.options(&[])).await;

    listener.on_suite_start("unit");
    run_test(&mut listener, "testAddsItem", 1);
    let phase = listener.on_suite_end("unit").await;

    assert_eq!(phase, SuitePhase::Aborted);
    assert_eq!(listener.payloads_sent(), 0);
    assert_eq!(listener.abandoned_results(), 1);
    assert!(!listener.state().is_failed());

    let output = listener.shutdown();
    assert!(output.contains("returned an HTTP 400 error:\n{\"errors\":[\"invalid project\"]}"));
}

#[tokio::test]
async fn test_unreachable_server_fails_the_run() {
    let fixture = Fixture::new("http://127.0.0.1:1/api", PROJECT_CONFIG);
    let options = fixture
        .options(&[])
        .with_client(ClientConfig::default().with_timeout_secs(2));
    let mut listener = ProbeDockListener::start(options).await;

    assert!(listener.state().is_failed());

    listener.on_suite_start("unit");
    run_test(&mut listener, "testAddsItem", 1);
    assert_eq!(listener.on_suite_end("unit").await, SuitePhase::Aborted);
    assert_eq!(listener.accumulator().total_tests(), 1);

    let output = listener.shutdown();
    assert!(output.contains("Unable to contact Probe Dock server"));
    assert!(output.contains("RESULTS WERE NOT SENT TO PROBE DOCK."));
}

#[tokio::test]
async fn test_missing_project_id_sends_nothing() {
    let mock_server = mock_api(202, "", 0).await;
    let fixture = Fixture::new(&api_url(&mock_server), "project:\n  version: \"1.0\"\n");
    let mut listener = ProbeDockListener::start(fixture.options(&[])).await;

    listener.on_suite_start("unit");
    run_test(&mut listener, "testAddsItem", 1);
    assert_eq!(listener.on_suite_end("unit").await, SuitePhase::Aborted);

    assert!(listener
        .shutdown()
        .contains("missing apiId for project in config files."));
}

#[tokio::test]
async fn test_cache_sends_metadata_once() {
    let mock_server = mock_api(202, "", 3).await;
    let fixture = Fixture::new(&api_url(&mock_server), PROJECT_CONFIG);
    let workspace = fixture.workspace_env();
    let env = [
        ("PROBEDOCK_WORKSPACE", workspace.as_str()),
        ("PROBEDOCK_CACHE_PAYLOAD", "1"),
    ];

    for _ in 0..2 {
        let mut listener = ProbeDockListener::start(fixture.options(&env)).await;
        listener.on_suite_start("unit");
        run_test(&mut listener, "testSavesCart", 5);
        assert_eq!(listener.on_suite_end("unit").await, SuitePhase::Delivered);
    }

    assert!(fixture
        .workspace()
        .join("phpunit/servers/local/cache.json")
        .exists());

    // A project-level tag changes every fingerprint.
    std::fs::write(
        fixture.project.path().join("probedock.yml"),
        format!("{}  tags: [smoke]\n", PROJECT_CONFIG),
    )
    .unwrap();
    let mut listener = ProbeDockListener::start(fixture.options(&env)).await;
    listener.on_suite_start("unit");
    run_test(&mut listener, "testSavesCart", 5);
    listener.on_suite_end("unit").await;

    let payloads = published_payloads(&mock_server).await;
    assert_eq!(payloads.len(), 3);

    let first = &payloads[0]["results"][0];
    assert_eq!(first["n"], "Test saves cart");
    assert_eq!(first["g"], json!(["db"]));

    assert_eq!(payloads[1]["results"][0], json!({"k": "t2", "p": true, "d": 5}));

    let third = &payloads[2]["results"][0];
    assert_eq!(third["n"], "Test saves cart");
    assert_eq!(third["g"], json!(["db", "smoke"]));
}

#[tokio::test]
async fn test_corrupt_cache_file_disables_caching() {
    let mock_server = mock_api(202, "", 1).await;
    let fixture = Fixture::new(&api_url(&mock_server), PROJECT_CONFIG);
    let cache_dir = fixture.workspace().join("phpunit/servers/local");
    std::fs::create_dir_all(&cache_dir).unwrap();
    std::fs::write(cache_dir.join("cache.json"), "not json {{{").unwrap();
    let workspace = fixture.workspace_env();
    let env = [
        ("PROBEDOCK_WORKSPACE", workspace.as_str()),
        ("PROBEDOCK_CACHE_PAYLOAD", "1"),
    ];

    let mut listener = ProbeDockListener::start(fixture.options(&env)).await;
    assert!(!listener.state().is_failed());
    assert!(listener.accumulator().cache().is_none());

    listener.on_suite_start("unit");
    run_test(&mut listener, "testSavesCart", 5);
    assert_eq!(listener.on_suite_end("unit").await, SuitePhase::Delivered);

    let payloads = published_payloads(&mock_server).await;
    let result = &payloads[0]["results"][0];
    assert_eq!(result["n"], "Test saves cart");
    assert_eq!(result["c"], "PHPUnit");
    assert_eq!(result["g"], json!(["db"]));

    assert_eq!(
        std::fs::read_to_string(cache_dir.join("cache.json")).unwrap(),
        "not json {{{"
    );
    assert!(listener.shutdown().contains("Payload caching is disabled."));
}

#[tokio::test]
async fn test_payload_saved_in_workspace() {
    let mock_server = mock_api(202, "", 1).await;
    let fixture = Fixture::new(&api_url(&mock_server), PROJECT_CONFIG);
    let workspace = fixture.workspace_env();
    let env = [
        ("PROBEDOCK_WORKSPACE", workspace.as_str()),
        ("PROBEDOCK_SAVE_PAYLOAD", "true"),
    ];
    let mut listener = ProbeDockListener::start(fixture.options(&env)).await;

    listener.on_suite_start("unit");
    run_test(&mut listener, "testAddsItem", 1);
    listener.on_suite_end("unit").await;

    let saved = fixture.workspace().join("phpunit/servers/local/payload.json");
    let payload: Value = serde_json::from_str(&std::fs::read_to_string(saved).unwrap()).unwrap();
    assert_eq!(payload["results"][0]["k"], "t1");

    let output = listener.shutdown();
    assert!(output.contains("use environment variable instead of config files (PROBEDOCK_SAVE_PAYLOAD=true)."));
    assert!(output.contains("payload saved in workspace."));
}

#[tokio::test]
async fn test_publish_disabled_still_saves() {
    let mock_server = mock_api(202, "", 0).await;
    let fixture = Fixture::new(&api_url(&mock_server), PROJECT_CONFIG);
    let workspace = fixture.workspace_env();
    let env = [
        ("PROBEDOCK_WORKSPACE", workspace.as_str()),
        ("PROBEDOCK_PUBLISH", "0"),
        ("PROBEDOCK_SAVE_PAYLOAD", "1"),
    ];
    let mut listener = ProbeDockListener::start(fixture.options(&env)).await;

    listener.on_suite_start("unit");
    run_test(&mut listener, "testAddsItem", 1);
    assert_eq!(listener.on_suite_end("unit").await, SuitePhase::Aborted);

    assert!(fixture
        .workspace()
        .join("phpunit/servers/local/payload.json")
        .exists());
    assert_eq!(listener.payloads_sent(), 0);
}

#[tokio::test]
async fn test_run_uid_from_workspace_file() {
    let mock_server = mock_api(202, "", 0).await;
    let fixture = Fixture::new(&api_url(&mock_server), PROJECT_CONFIG);
    std::fs::write(fixture.workspace().join("uid"), "shared-report\n").unwrap();
    let workspace = fixture.workspace_env();

    let listener =
        ProbeDockListener::start(fixture.options(&[("PROBEDOCK_WORKSPACE", workspace.as_str())]))
            .await;
    assert_eq!(listener.run_uid(), "shared-report");
}

#[tokio::test]
#[serial]
async fn test_options_from_process_environment() {
    let mock_server = mock_api(202, "", 0).await;
    let fixture = Fixture::new(&api_url(&mock_server), PROJECT_CONFIG);

    std::env::set_var("PROBEDOCK_TEST_REPORT_UID", "from-env");
    let options = ListenerOptions::from_env()
        .with_home(fixture.home.path())
        .with_project_dir(fixture.project.path());
    std::env::remove_var("PROBEDOCK_TEST_REPORT_UID");

    let listener = ProbeDockListener::start(options).await;
    assert_eq!(listener.run_uid(), "from-env");
}
