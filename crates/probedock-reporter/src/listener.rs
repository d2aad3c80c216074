//! Host-facing entry point.
//!
//! ```no_run
//! # async fn run() {
//! use std::time::Duration;
//! use probedock_reporter::{ListenerOptions, ProbeDockListener, TestCase};
//!
//! let mut listener = ProbeDockListener::start(ListenerOptions::from_env()).await;
//! listener.on_suite_start("unit");
//! let test = TestCase::new("CartTest", "testAddsItem");
//! listener.on_test_start(&test);
//! listener.on_test_end(&test, Duration::from_millis(12));
//! listener.on_suite_end("unit").await;
//! print!("{}", listener.shutdown());
//! # }
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::accumulator::{RunAccumulator, RunState, SuitePhase, TestCase};
use crate::annotation::AnnotationRegistry;
use crate::cache::{TestKeyCache, CACHE_FILE};
use crate::client::{ClientConfig, Publisher, ReportingClient};
use crate::config::{self, ConfigSources, EffectiveConfig, EnvOverrides};
use crate::error::{ReporterError, ReporterResult};
use crate::failure::TestFailure;
use crate::report_log::ReportLog;

/// Category given to tests when neither the annotation nor the project sets one.
pub const DEFAULT_CATEGORY: &str = "PHPUnit";

/// Startup options.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Directory holding `.probedock/config.yml`. Defaults to the user's home.
    pub home: Option<PathBuf>,
    /// Directory holding `probedock.yml`.
    pub project_dir: PathBuf,
    pub verbose: bool,
    pub env: EnvOverrides,
    pub default_category: Option<String>,
    pub annotations: AnnotationRegistry,
    pub client: ClientConfig,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            home: None,
            project_dir: PathBuf::from("."),
            verbose: false,
            env: EnvOverrides::default(),
            default_category: Some(DEFAULT_CATEGORY.to_string()),
            annotations: AnnotationRegistry::new(),
            client: ClientConfig::default(),
        }
    }
}

impl ListenerOptions {
    /// Defaults, with overrides taken from the process environment.
    pub fn from_env() -> Self {
        Self {
            env: EnvOverrides::from_env(),
            ..Self::default()
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_project_dir(mut self, project_dir: impl Into<PathBuf>) -> Self {
        self.project_dir = project_dir.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_env(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    pub fn with_default_category(mut self, category: Option<String>) -> Self {
        self.default_category = category;
        self
    }

    pub fn with_annotations(mut self, annotations: AnnotationRegistry) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }
}

/// Reporter bound to one test run.
#[derive(Debug)]
pub struct ProbeDockListener {
    accumulator: RunAccumulator,
    client: Option<ReportingClient>,
}

impl ProbeDockListener {
    /// Load the configuration, reach the server and prepare the cache.
    ///
    /// Never fails. A startup error is logged and leaves the run `Failed`, in
    /// which case tests are still counted but nothing is sent.
    pub async fn start(options: ListenerOptions) -> Self {
        let ListenerOptions {
            home,
            project_dir,
            verbose,
            env,
            default_category,
            annotations,
            client: client_config,
        } = options;
        let mut log = ReportLog::new(verbose);

        let mut config = match load_config(home, &project_dir, &env, &mut log).await {
            Ok(config) => config,
            Err(e) => {
                return Self::failed(EffectiveConfig::default(), String::new(), annotations, log, e)
            }
        };
        if config.project.category.is_none() {
            config.project.category = default_category;
        }

        let run_uid = match config::resolve_run_uid(&env, &config).await {
            Ok(uid) => uid,
            Err(e) => return Self::failed(config, String::new(), annotations, log, e),
        };

        let client = match connect(&config, &client_config).await {
            Ok(client) => client,
            Err(e) => return Self::failed(config, run_uid, annotations, log, e),
        };

        let cache = if config.payload.cache {
            match load_cache(&config).await {
                Ok(cache) => Some(cache),
                Err(e) => {
                    log.warning(format!("{} Payload caching is disabled.", e));
                    None
                }
            }
        } else {
            None
        };

        log.info(format!("Probe Dock API: {}", client.base_url()));
        debug!(run_uid = %run_uid, tests = annotations.len(), "listener started");

        let mut accumulator = RunAccumulator::new(config, run_uid, annotations, log);
        if let Some(cache) = cache {
            accumulator = accumulator.with_cache(cache);
        }

        Self {
            accumulator,
            client: Some(client),
        }
    }

    fn failed(
        config: EffectiveConfig,
        run_uid: String,
        annotations: AnnotationRegistry,
        log: ReportLog,
        err: ReporterError,
    ) -> Self {
        let mut accumulator = RunAccumulator::new(config, run_uid, annotations, log);
        accumulator.fail(err);
        Self {
            accumulator,
            client: None,
        }
    }

    pub fn run_uid(&self) -> &str {
        self.accumulator.run_uid()
    }

    pub fn state(&self) -> &RunState {
        self.accumulator.state()
    }

    pub fn phase(&self) -> SuitePhase {
        self.accumulator.phase()
    }

    pub fn config(&self) -> &EffectiveConfig {
        self.accumulator.config()
    }

    pub fn payloads_sent(&self) -> usize {
        self.accumulator.payloads_sent()
    }

    pub fn abandoned_results(&self) -> usize {
        self.accumulator.abandoned_results()
    }

    pub fn log(&self) -> &ReportLog {
        self.accumulator.log()
    }

    pub fn accumulator(&self) -> &RunAccumulator {
        &self.accumulator
    }

    pub fn on_suite_start(&mut self, suite: &str) {
        self.accumulator.on_suite_start(suite);
    }

    pub fn on_test_start(&mut self, test: &TestCase) {
        self.accumulator.on_test_start(test);
    }

    pub fn on_test_failure(&mut self, failure: &TestFailure) {
        self.accumulator.on_test_failure(failure);
    }

    pub fn on_test_error(&mut self, failure: &TestFailure) {
        self.accumulator.on_test_error(failure);
    }

    pub fn on_test_incomplete(&mut self) {
        self.accumulator.on_test_incomplete();
    }

    pub fn on_test_skipped(&mut self) {
        self.accumulator.on_test_skipped();
    }

    pub fn on_test_risky(&mut self) {
        self.accumulator.on_test_risky();
    }

    pub fn on_test_end(&mut self, test: &TestCase, elapsed: Duration) {
        self.accumulator.on_test_end(test, elapsed);
    }

    pub async fn on_suite_end(&mut self, suite: &str) -> SuitePhase {
        let publisher = self.client.as_ref().map(|c| c as &dyn Publisher);
        self.accumulator.on_suite_end(suite, publisher).await
    }

    /// End the run and hand back the report log, ready to print after the
    /// runner's own output.
    pub fn shutdown(self) -> String {
        self.accumulator.into_log().render()
    }

    pub fn shutdown_to<W: Write>(self, out: W) -> std::io::Result<()> {
        self.accumulator.into_log().write_to(out)
    }
}

async fn load_config(
    home: Option<PathBuf>,
    project_dir: &std::path::Path,
    env: &EnvOverrides,
    log: &mut ReportLog,
) -> ReporterResult<EffectiveConfig> {
    let home = home
        .or_else(dirs::home_dir)
        .ok_or_else(|| ReporterError::config("unable to locate the user's home directory."))?;
    let sources = ConfigSources::load(&home, project_dir, log).await?;
    config::resolve(sources, env, log)
}

async fn connect(config: &EffectiveConfig, client_config: &ClientConfig) -> ReporterResult<ReportingClient> {
    let target = config.server_target()?;
    let client = ReportingClient::new(&target, client_config)?;
    client.ping().await?;
    Ok(client)
}

async fn load_cache(config: &EffectiveConfig) -> ReporterResult<TestKeyCache> {
    let project = config.project_api_id()?;
    let path = config.server_dir()?.join(CACHE_FILE);
    TestKeyCache::load(path, project).await
}
