//! Test runs: lifecycle of one test on one worker
//!
//! A [`TestRun`] coordinates the execution of a test:
//! - Spawning one virtual user task per configured virtual user
//! - Draining the shared bounded result channel into a [`ResultAccumulator`]
//! - Flushing summaries every flush interval and once more at the end
//! - Cancelling every virtual user when the test's length elapses
//!
//! # Example
//!
//! ```ignore
//! use hammer_core::orchestrator::TestRunBuilder;
//!
//! let summary = TestRunBuilder::new(test)
//!     .server_id(server_id)
//!     .client(client)
//!     .registry(registry)
//!     .build()?
//!     .run()
//!     .await?;
//! ```

pub mod aggregator;
mod builder;
mod executor;

pub use aggregator::{percentile_index, requests_per_second, ResultAccumulator};
pub use builder::TestRunBuilder;
pub use executor::{RunSummary, TestRun};
