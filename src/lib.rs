//! Streamforged - transcoding session orchestration
//!
//! Remote media is pulled over HTTP, fed to an ffmpeg engine and served back
//! as live HLS sessions, progressive MP4 streams, or cached full-file
//! conversions. This library crate exposes the pieces for the binary and for
//! integration testing.

pub mod config;
pub mod conversion;
pub mod ingest;
pub mod server;
pub mod streaming;
pub mod supervisor;
