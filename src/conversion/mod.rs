//! Cached full-file conversion.
//!
//! - [`JobLedger`]: the durable job registry, one job per source URL
//! - [`ConversionExecutor`]: one offline engine pass per job
//! - [`ConversionManager`]: deduplicated requests and the background tasks
//!   that drive each job to `ready` or `failed`

mod executor;
mod ledger;
mod manager;

pub use executor::ConversionExecutor;
pub use ledger::{JobLedger, ORPHANED_REASON};
pub use manager::ConversionManager;
