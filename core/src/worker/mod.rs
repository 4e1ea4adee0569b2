//! Virtual users: the unit of synthetic load
//!
//! A run starts one [`VirtualUser`] per configured virtual user. Each one is a
//! tokio task looping over the test's targets:
//!
//! 1. Check its cancellation signal (non-blocking, once per pass)
//! 2. Issue one request per target through a [`TargetClient`](crate::traits::TargetClient)
//! 3. Send the observed [`TestResult`](crate::model::TestResult) to the run's aggregator
//! 4. Sleep the pacing interval
//!
//! # Example
//!
//! ```ignore
//! use hammer_core::worker::VirtualUserBuilder;
//!
//! let vu = VirtualUserBuilder::new(0)
//!     .client(client)
//!     .targets(targets)
//!     .results_tx(tx)
//!     .build()?;
//!
//! let stats = vu.run(cancel_rx).await;
//! println!("Requests: {}", stats.requests);
//! ```

mod builder;
mod executor;
mod stats;

pub use builder::VirtualUserBuilder;
pub use executor::VirtualUser;
pub use stats::VirtualUserStats;
