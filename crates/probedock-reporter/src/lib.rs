//! Probe Dock reporter for unit-test runs.
//!
//! This crate collects the outcome of annotated tests during a run and
//! publishes them to a Probe Dock server at the end of each suite:
//!
//! - Layered YAML configuration with environment overrides
//! - Test records built from per-test annotations
//! - Fingerprint cache so unchanged metadata is not re-sent
//! - HTTP client for the Probe Dock API with token auth
//! - Buffered report log, printed once after the runner's output
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use probedock_reporter::{
//!     AnnotationRegistry, ListenerOptions, ProbeDockListener, TestCase, TestFailure,
//! };
//!
//! # async fn example() -> probedock_reporter::ReporterResult<()> {
//! let annotations = AnnotationRegistry::from_yaml(
//!     "CartTest::testAddsItem:\n  key: t1\n  tags: cart\n",
//! )?;
//! let options = ListenerOptions::from_env().with_annotations(annotations);
//! let mut listener = ProbeDockListener::start(options).await;
//!
//! listener.on_suite_start("unit");
//! let test = TestCase::new("CartTest", "testAddsItem");
//! listener.on_test_start(&test);
//! listener.on_test_failure(&TestFailure::new("AssertionFailedError", "cart is empty"));
//! listener.on_test_end(&test, Duration::from_millis(42));
//! listener.on_suite_end("unit").await;
//!
//! print!("{}", listener.shutdown());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `PROBEDOCK_SERVER` | Name of the server to publish to |
//! | `PROBEDOCK_PUBLISH` | Publish results (default: true) |
//! | `PROBEDOCK_PRINT_PAYLOAD` | Print the payload in the report log |
//! | `PROBEDOCK_SAVE_PAYLOAD` | Save the payload in the workspace |
//! | `PROBEDOCK_CACHE_PAYLOAD` | Only send metadata that changed |
//! | `PROBEDOCK_WORKSPACE` | Directory for the run UID, payloads and cache |
//! | `PROBEDOCK_TEST_REPORT_UID` | Group several runs into one test report |

pub mod accumulator;
pub mod annotation;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod failure;
pub mod fingerprint;
mod io;
pub mod listener;
pub mod payload;
pub mod record;
pub mod report_log;

// Re-export main types
pub use accumulator::{RunAccumulator, RunState, SuitePhase, TestCase};
pub use annotation::{AnnotationRegistry, RawAnnotation, TestAnnotation};
pub use cache::TestKeyCache;
pub use client::{ClientConfig, PublishOutcome, Publisher, ReportingClient};
pub use config::{ConfigSources, EffectiveConfig, EnvOverrides, ServerTarget};
pub use error::{ReporterError, ReporterResult};
pub use failure::{StackFrame, TestFailure};
pub use listener::{ListenerOptions, ProbeDockListener, DEFAULT_CATEGORY};
pub use payload::RunPayload;
pub use record::TestRecord;
pub use report_log::{Level, ReportLog};
