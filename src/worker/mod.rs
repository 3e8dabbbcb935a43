//! Bug fetch worker service
//!
//! [`Dispatcher`] receives package messages, gates each one on the GitHub
//! rate budget ([`RateBudget`]) and runs [`FetchWorker`] tasks with bounded
//! concurrency. Each task reads the package's cache token, issues a
//! conditional request and persists whatever came back.

pub mod dispatch;
pub mod fetch;
pub mod rate;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{Dispatcher, DispatcherConfig};
pub use fetch::{FetchError, FetchOutcome, FetchWorker};
pub use rate::{RateBudget, RateError};
