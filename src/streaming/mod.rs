//! Adaptive and progressive streaming.
//!
//! - [`sessions`]: the registry of running HLS sessions, one supervised engine
//!   per session, with idle expiry
//! - [`readiness`]: bounded waits for a session's first playable output
//! - [`artifacts`]: race-safe serving of manifests and segments
//! - [`progressive`]: passthrough fragmented MP4 on the engine's stdout

pub mod artifacts;
pub mod progressive;
pub mod readiness;
pub mod sessions;

pub use artifacts::{serve, Artifact, ArtifactBody, ArtifactKind};
pub use progressive::{open_progressive, ProgressiveStream};
pub use readiness::{await_ready, DirWatcher, Readiness, ReadinessRequirement};
pub use sessions::{
    start_cleanup_task, SessionManager, SessionProfile, StartedSession, StreamSession,
};
