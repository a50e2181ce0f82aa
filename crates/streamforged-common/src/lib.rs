//! Streamforged-Common: Shared types and error handling.
//!
//! This crate provides functionality used across every streamforged crate:
//!
//! - **Typed IDs**: UUID wrappers for conversion jobs and streaming sessions
//! - **Core Types**: The conversion job status state machine
//! - **Error Handling**: The error taxonomy shared by the pipeline
//!
//! # Examples
//!
//! ```
//! use streamforged_common::{ConversionStatus, Error, JobId, Result};
//!
//! let job_id = JobId::new();
//! assert!(ConversionStatus::Pending.can_transition_to(ConversionStatus::Ready));
//!
//! fn lookup(id: JobId) -> Result<()> {
//!     Err(Error::not_found("conversion_job", id))
//! }
//! assert!(lookup(job_id).is_err());
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{truncate_diagnostic, Error, Result, MAX_DIAGNOSTIC_LEN};
pub use ids::*;
pub use types::*;
