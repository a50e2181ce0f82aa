//! Database query modules.
//!
//! - conversion_jobs: Job ledger operations (get-or-create, terminal transitions)

pub mod conversion_jobs;
