//! Per-run result collection.
//!
//! The accumulator is driven by the host's lifecycle callbacks, in order, on
//! the test thread. It turns annotated tests into [`TestRecord`]s and, at the
//! end of the suite, assembles and delivers the payload.
//!
//! Suite phases: `Idle -> Running -> Finalizing -> (Delivered | Aborted)`.
//! Independently, a fatal error moves the [`RunState`] to `Failed`; from then
//! on callbacks only count tests and nothing touches the network or the cache.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::annotation::{AnnotationRegistry, TestAnnotation};
use crate::cache::TestKeyCache;
use crate::client::{PublishOutcome, Publisher};
use crate::config::EffectiveConfig;
use crate::error::ReporterError;
use crate::failure::TestFailure;
use crate::fingerprint;
use crate::payload::{self, RunPayload};
use crate::record::{
    humanize_method_name, merge_sorted, TestRecord, INCOMPLETE_MESSAGE, MESSAGE_MAX_BYTES,
};
use crate::report_log::ReportLog;

/// Where the current suite run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuitePhase {
    Idle,
    Running,
    Finalizing,
    Delivered,
    Aborted,
}

/// Health of the whole reporting run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Healthy,
    Failed { reason: String },
}

impl RunState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// A test as identified by the host runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub class: String,
    pub method: String,
}

impl TestCase {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
        }
    }

    /// `Class::method`, the key of the annotation registry.
    pub fn id(&self) -> String {
        format!("{}::{}", self.class, self.method)
    }
}

/// Collects the records of one suite run.
#[derive(Debug)]
pub struct RunAccumulator {
    config: EffectiveConfig,
    run_uid: String,
    annotations: AnnotationRegistry,
    cache: Option<TestKeyCache>,
    log: ReportLog,
    state: RunState,
    phase: SuitePhase,
    suite_started: Option<Instant>,
    current: Option<TestRecord>,
    records: Vec<TestRecord>,
    total_tests: usize,
    probe_tests: usize,
    payloads_sent: usize,
    abandoned_results: usize,
}

impl RunAccumulator {
    pub fn new(
        config: EffectiveConfig,
        run_uid: impl Into<String>,
        annotations: AnnotationRegistry,
        log: ReportLog,
    ) -> Self {
        Self {
            config,
            run_uid: run_uid.into(),
            annotations,
            cache: None,
            log,
            state: RunState::Healthy,
            phase: SuitePhase::Idle,
            suite_started: None,
            current: None,
            records: Vec::new(),
            total_tests: 0,
            probe_tests: 0,
            payloads_sent: 0,
            abandoned_results: 0,
        }
    }

    /// Enable fingerprint caching.
    pub fn with_cache(mut self, cache: TestKeyCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Log an error, failing the run when it is fatal.
    pub fn report(&mut self, err: ReporterError) {
        if err.is_fatal_for_run() {
            self.fail(err);
        } else {
            self.log.record(&err);
        }
    }

    /// Record a fatal error: reporting stops for the rest of the run.
    pub fn fail(&mut self, err: ReporterError) {
        self.log.record(&err);
        if !self.state.is_failed() {
            self.state = RunState::Failed {
                reason: err.to_string(),
            };
        }
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn run_uid(&self) -> &str {
        &self.run_uid
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn phase(&self) -> SuitePhase {
        self.phase
    }

    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    pub fn cache(&self) -> Option<&TestKeyCache> {
        self.cache.as_ref()
    }

    pub fn total_tests(&self) -> usize {
        self.total_tests
    }

    pub fn probe_tests(&self) -> usize {
        self.probe_tests
    }

    /// Payloads accepted by the server so far.
    pub fn payloads_sent(&self) -> usize {
        self.payloads_sent
    }

    /// Results dropped because their payload was never delivered.
    pub fn abandoned_results(&self) -> usize {
        self.abandoned_results
    }

    pub fn log(&self) -> &ReportLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut ReportLog {
        &mut self.log
    }

    pub fn into_log(self) -> ReportLog {
        self.log
    }

    pub fn on_suite_start(&mut self, suite: &str) {
        if !self.records.is_empty() {
            self.abandon("a new suite started before they were sent");
        }
        self.current = None;
        self.total_tests = 0;
        self.probe_tests = 0;
        self.suite_started = Some(Instant::now());
        self.phase = SuitePhase::Running;
        debug!(suite, "suite started");
    }

    pub fn on_test_start(&mut self, test: &TestCase) {
        self.current = None;
        self.total_tests += 1;
        if self.state.is_failed() {
            return;
        }

        let test_id = test.id();
        let Some(raw) = self.annotations.get(&test_id) else {
            return;
        };

        let annotation = match TestAnnotation::parse(&test_id, raw) {
            Ok(annotation) => annotation,
            Err(e) => {
                self.log.record(&e);
                return;
            }
        };

        let project = &self.config.project;
        let mut record = TestRecord::new(
            annotation.key,
            annotation
                .name
                .unwrap_or_else(|| humanize_method_name(&test.method)),
        );
        record.category = annotation.category.or_else(|| project.category.clone());
        record.tags = merge_sorted(&project.tags, &annotation.tags);
        record.tickets = merge_sorted(&project.tickets, &annotation.tickets);
        record.active = annotation.active;
        self.probe_tests += 1;

        if let Some(cache) = self.cache.as_mut() {
            let hash = fingerprint::compute(
                record.name.as_deref().unwrap_or_default(),
                record.category.as_deref(),
                &record.tags,
                &record.tickets,
            );
            if cache.lookup(&record.key) == Some(hash.as_str()) {
                debug!(key = %record.key, "metadata unchanged, sending results only");
                record.strip_metadata();
            } else {
                cache.record(record.key.clone(), hash);
            }
        }

        self.current = Some(record);
    }

    pub fn on_test_failure(&mut self, failure: &TestFailure) {
        if let Some(record) = self.current.as_mut() {
            record.fail(failure.format_chain());
        }
    }

    pub fn on_test_error(&mut self, failure: &TestFailure) {
        self.on_test_failure(failure);
    }

    pub fn on_test_incomplete(&mut self) {
        if let Some(record) = self.current.as_mut() {
            record.fail(INCOMPLETE_MESSAGE);
        }
    }

    pub fn on_test_skipped(&mut self) {
        if let Some(record) = self.current.as_mut() {
            record.mark_inactive();
        }
    }

    /// Risky tests are reported like any other.
    pub fn on_test_risky(&mut self) {}

    pub fn on_test_end(&mut self, test: &TestCase, elapsed: Duration) {
        let Some(mut record) = self.current.take() else {
            self.log
                .verbose_warning(format!("test {} is not a Probe Dock test.", test.method));
            return;
        };

        record.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        if record.truncate_message() {
            self.log.warning(format!(
                "error message of test {} was truncated to {} bytes.",
                record.key, MESSAGE_MAX_BYTES
            ));
        }

        self.records.push(record);
    }

    /// Assemble and deliver the run's payload.
    ///
    /// Never fails: problems end up in the report log and leave the phase at
    /// `Aborted`. The cache is only flushed once the server accepted the
    /// payload.
    pub async fn on_suite_end(
        &mut self,
        suite: &str,
        publisher: Option<&dyn Publisher>,
    ) -> SuitePhase {
        self.phase = SuitePhase::Finalizing;

        if self.state.is_failed() {
            self.log.warning(
                "RESULTS WERE NOT SENT TO PROBE DOCK.\nThis is due to previously logged errors.",
            );
            self.abandon("reporting failed earlier in the run");
            return self.finish(SuitePhase::Aborted);
        }

        if self.records.is_empty() {
            debug!(suite, "no Probe Dock results to send");
            return self.finish(SuitePhase::Aborted);
        }

        let duration_ms = self
            .suite_started
            .map(|started| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();

        let payload = match RunPayload::assemble(
            &self.config,
            &self.run_uid,
            duration_ms,
            self.records.clone(),
        ) {
            Ok(payload) => payload,
            Err(e) => {
                self.report(e);
                self.abandon("the payload could not be assembled");
                return self.finish(SuitePhase::Aborted);
            }
        };

        let json = match payload.to_json() {
            Ok(json) => json,
            Err(e) => {
                self.log.record(&e);
                self.abandon("the payload could not be serialized");
                return self.finish(SuitePhase::Aborted);
            }
        };

        let delivered = self.deliver(suite, &json, publisher).await;

        if delivered {
            if let Some(cache) = self.cache.as_mut() {
                if let Err(e) = cache.flush().await {
                    self.log.record(&e);
                }
            }
        }

        if self.config.payload.save {
            match payload::save(&self.config, &json).await {
                Ok(_) => self.log.info("payload saved in workspace."),
                Err(e) => self.report(e),
            }
        }

        if self.config.payload.print {
            match payload.to_pretty_json() {
                Ok(pretty) => self
                    .log
                    .debug(format!("generated JSON payload:\n{}", pretty)),
                Err(e) => self.log.record(&e),
            }
        }

        if delivered {
            self.records.clear();
            self.finish(SuitePhase::Delivered)
        } else {
            self.abandon("the payload was not delivered");
            self.finish(SuitePhase::Aborted)
        }
    }

    async fn deliver(
        &mut self,
        suite: &str,
        json: &str,
        publisher: Option<&dyn Publisher>,
    ) -> bool {
        if !self.config.payload.publish {
            self.log.warning(
                "RESULTS WERE NOT SENT TO PROBE DOCK.\nThis is due to 'publish' parameters in config file or to PROBEDOCK_PUBLISH environment variable.",
            );
            return false;
        }

        let Some(publisher) = publisher else {
            self.log
                .error("RESULTS WERE NOT SENT TO PROBE DOCK.\nNo Probe Dock server connection is available.");
            return false;
        };

        match publisher.publish(json.to_string()).await {
            Ok(PublishOutcome::Accepted) => {
                self.payloads_sent += 1;
                let coverage = self.probe_tests as f64 / self.total_tests.max(1) as f64 * 100.0;
                self.log.info(format!(
                    "{} test results successfully sent (payload {}) out of {} ({:.0}%) tests in {}.",
                    self.probe_tests, self.payloads_sent, self.total_tests, coverage, suite
                ));
                info!(suite, results = self.records.len(), "payload delivered");
                true
            }
            Ok(PublishOutcome::Rejected { status, body }) => {
                self.log.error(format!(
                    "Probe Dock server ({}) returned an HTTP {} error:\n{}",
                    publisher.publish_url(),
                    status,
                    body
                ));
                false
            }
            Err(e) => {
                self.report(e);
                false
            }
        }
    }

    /// Drop undelivered records so they are never submitted twice.
    fn abandon(&mut self, reason: &str) {
        if !self.records.is_empty() {
            self.abandoned_results += self.records.len();
            self.log.warning(format!(
                "{} test results were discarded without being sent: {}.",
                self.records.len(),
                reason
            ));
            self.records.clear();
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.discard_pending();
        }
    }

    fn finish(&mut self, phase: SuitePhase) -> SuitePhase {
        self.current = None;
        self.phase = phase;
        phase
    }
}
