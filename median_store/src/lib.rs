//! Median Store - Core Library
//!
//! Key-partitioned numeric sample store with running medians and automatic
//! reclamation of idle keys.

pub mod cli;
pub mod error;
pub mod middleware;
pub mod reclaimer;
pub mod server;
pub mod settings;
pub mod store;
pub mod telemetry;

pub use error::{ErrorKind, StoreError};
pub use reclaimer::{Reclaimer, SweepReport};
pub use store::{KeyStore, SampleSequence};
