//! HLS playlist structures.
//!
//! Master playlists are rendered here from a rendition plan. Media playlists
//! are produced by the engine, so they are only parsed, leniently, to learn
//! which segment files they reference so far.

/// Master playlist listing one variant per rendition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterPlaylist {
    /// Stream variants, in presentation order.
    pub variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    /// Create an empty master playlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream variant.
    pub fn add_variant(mut self, variant: VariantStream) -> Self {
        self.variants.push(variant);
        self
    }

    /// Render to M3U8 text.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:3\n");

        for variant in &self.variants {
            out.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n",
                variant.bandwidth, variant.width, variant.height
            ));
            out.push_str(&format!("{}\n", variant.uri));
        }

        out
    }

    /// Parse a master playlist, returning `None` for media playlists.
    pub fn parse(text: &str) -> Option<Self> {
        if !is_master_playlist(text) {
            return None;
        }

        let mut variants = Vec::new();
        let mut pending: Option<(u64, u32, u32)> = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
                pending = Some(parse_stream_inf(attrs));
            } else if line.starts_with('#') {
                continue;
            } else if let Some((bandwidth, width, height)) = pending.take() {
                variants.push(VariantStream {
                    uri: line.to_string(),
                    bandwidth,
                    width,
                    height,
                });
            }
        }

        Some(Self { variants })
    }
}

fn parse_stream_inf(attrs: &str) -> (u64, u32, u32) {
    let mut bandwidth = 0;
    let mut width = 0;
    let mut height = 0;

    for attr in attrs.split(',') {
        match attr.split_once('=') {
            Some(("BANDWIDTH", value)) => bandwidth = value.parse().unwrap_or(0),
            Some(("RESOLUTION", value)) => {
                if let Some((w, h)) = value.split_once('x') {
                    width = w.parse().unwrap_or(0);
                    height = h.parse().unwrap_or(0);
                }
            }
            _ => {}
        }
    }

    (bandwidth, width, height)
}

/// Stream variant information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStream {
    /// Playlist URI, relative to the master playlist.
    pub uri: String,
    /// Declared bandwidth in bits per second.
    pub bandwidth: u64,
    /// Video width.
    pub width: u32,
    /// Video height.
    pub height: u32,
}

/// A segment entry in a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    /// Duration in seconds, from `#EXTINF`.
    pub duration: f64,
    /// Segment URI.
    pub uri: String,
}

/// Parsed view of an engine-written media playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPlaylist {
    /// Target duration in seconds.
    pub target_duration: Option<u32>,
    /// Media sequence number of the first listed segment.
    pub media_sequence: u64,
    /// Segment entries, in order.
    pub segments: Vec<SegmentEntry>,
    /// Whether `#EXT-X-ENDLIST` was present.
    pub ended: bool,
}

impl MediaPlaylist {
    /// Parse media playlist text.
    ///
    /// The engine may be mid-write, so malformed or truncated lines are
    /// skipped instead of rejected. A URI only counts once its `#EXTINF`
    /// line has been seen.
    pub fn parse(text: &str) -> Self {
        let mut playlist = Self::default();
        let mut pending_duration: Option<f64> = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(value) = line.strip_prefix("#EXTINF:") {
                let duration = value.split(',').next().unwrap_or("");
                pending_duration = duration.trim().parse().ok();
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = value.trim().parse().ok();
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = value.trim().parse().unwrap_or(0);
            } else if line == "#EXT-X-ENDLIST" {
                playlist.ended = true;
            } else if line.starts_with('#') {
                continue;
            } else if let Some(duration) = pending_duration.take() {
                playlist.segments.push(SegmentEntry {
                    duration,
                    uri: line.to_string(),
                });
            }
        }

        playlist
    }

    /// Number of segment entries listed.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

/// Whether playlist text is a master playlist rather than a media playlist.
pub fn is_master_playlist(text: &str) -> bool {
    text.contains("#EXT-X-STREAM-INF")
}
