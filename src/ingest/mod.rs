//! Ingestion of remote sources for push-fed engine runs.
//!
//! [`Feeder`] pulls a [`ChunkSource`] in fixed-size byte ranges and writes
//! the bytes into the engine's standard input, retrying according to a
//! [`RetryPolicy`].

pub mod feeder;
pub mod source;

pub use feeder::{FeedOutcome, Feeder, FeederState, RetryPolicy};
pub use source::{parse_source_url, ChunkSource, HttpChunkSource, RangeResponse};
