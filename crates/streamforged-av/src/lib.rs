//! # streamforged-av
//!
//! Planning and launching the external transcoding engine.
//!
//! This crate provides:
//!
//! - **Engine resolution** ([`tools`]): configured path or `PATH` lookup,
//!   plus a version check for `check-tools`.
//! - **Invocation planning** ([`profile`]): a pure mapping from a
//!   [`TranscodeProfile`] to the engine's argument vector, stdio wiring and
//!   declared output locations.
//! - **Launching** ([`launcher`]): spawns the planned process, writing the
//!   master playlist first for ladder outputs.
//! - **One-shot commands** ([`command`]): captured output with a timeout.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use streamforged_av::{launch, resolve_engine, TranscodeProfile};
//! use streamforged_media::RenditionDescriptor;
//!
//! # async fn example() -> streamforged_common::Result<()> {
//! let engine = resolve_engine(None)?;
//! let profile = TranscodeProfile::fast_start(RenditionDescriptor::new("240p", 426, 240, 500));
//! let work_dir = Path::new("/tmp/s1");
//! let handle = launch(&engine, "https://example.com/movie.mkv", &profile, Some(work_dir)).await?;
//! println!("engine pid {:?}", handle.pid());
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod launcher;
pub mod profile;
pub mod tools;

pub use command::{ToolCommand, ToolOutput};
pub use launcher::{launch, EngineHandle};
pub use profile::{
    plan, DeclaredOutputs, EncoderSettings, EngineInvocation, IngestMode, OutputKind,
    TranscodeProfile,
};
pub use tools::{check_engine, resolve_engine, ToolInfo};
