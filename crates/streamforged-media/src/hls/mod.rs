//! HLS playlist rendering and parsing.

mod playlist;

pub use playlist::{is_master_playlist, MasterPlaylist, MediaPlaylist, SegmentEntry, VariantStream};
