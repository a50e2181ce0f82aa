//! Streamforged-Media: rendition ladders and HLS playlists.
//!
//! # Modules
//!
//! - `ladder` - Plans per-rendition encoder settings and the master playlist
//! - `hls` - Master playlist rendering, lenient media playlist parsing
//!
//! The engine writes media playlists and segments itself. This crate only
//! synthesizes the master playlist for adaptive sessions and reads media
//! playlists back to count the segments they reference.

pub mod hls;
pub mod ladder;

pub use hls::{MasterPlaylist, MediaPlaylist};
pub use ladder::{plan_ladder, LadderPlan, RenditionDescriptor, RenditionPlan};
