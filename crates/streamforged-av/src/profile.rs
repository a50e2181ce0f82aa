//! Engine invocation planning.
//!
//! A [`TranscodeProfile`] describes what a session wants (output kind, ingest
//! mode, encoder settings). [`plan`] turns it into an [`EngineInvocation`]:
//! the exact argument vector, stdio wiring, and the output locations the
//! engine is expected to produce. Planning is pure so every profile can be
//! checked without spawning anything.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use streamforged_common::{Error, Result};
use streamforged_media::ladder::{
    plan_ladder, RenditionDescriptor, RenditionPlan, MASTER_PLAYLIST_NAME,
};

/// Name of the media playlist for single-rendition HLS outputs.
pub const SINGLE_PLAYLIST_NAME: &str = "index.m3u8";

/// Segment file pattern for single-rendition HLS outputs.
pub const SINGLE_SEGMENT_PATTERN: &str = "index_%05d.ts";

/// How the engine obtains its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// The engine fetches the source URL itself.
    #[default]
    Engine,
    /// The engine reads `pipe:0`; bytes are pushed by the ingestion feeder.
    Push,
}

/// Encoder knobs shared by every re-encoding output kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub preset: String,
    pub tune: Option<String>,
    /// H.264 profile (`baseline`, `main`, `high`).
    pub profile: String,
    pub level: Option<String>,
    pub pix_fmt: String,
    /// Keyframe interval in frames, used for both `-g` and `-keyint_min`.
    pub gop: u32,
    /// Constant rate factor, used by file output.
    pub crf: u32,
    pub audio_bitrate: String,
    pub audio_channels: u32,
    pub sample_rate: u32,
}

impl EncoderSettings {
    /// Settings tuned for the quickest possible first segment.
    pub fn low_latency() -> Self {
        Self {
            preset: "ultrafast".to_string(),
            tune: Some("zerolatency".to_string()),
            profile: "baseline".to_string(),
            level: Some("3.0".to_string()),
            pix_fmt: "yuv420p".to_string(),
            gop: 24,
            crf: 23,
            audio_bitrate: "64k".to_string(),
            audio_channels: 2,
            sample_rate: 44100,
        }
    }

    /// Settings for multi-rendition ladders.
    pub fn adaptive() -> Self {
        Self {
            preset: "veryfast".to_string(),
            tune: Some("zerolatency".to_string()),
            profile: "main".to_string(),
            level: None,
            pix_fmt: "yuv420p".to_string(),
            gop: 48,
            crf: 23,
            audio_bitrate: "128k".to_string(),
            audio_channels: 2,
            sample_rate: 48000,
        }
    }

    /// Settings for offline full-file conversion.
    pub fn archival() -> Self {
        Self {
            preset: "veryfast".to_string(),
            tune: None,
            profile: "high".to_string(),
            level: None,
            pix_fmt: "yuv420p".to_string(),
            gop: 48,
            crf: 23,
            audio_bitrate: "128k".to_string(),
            audio_channels: 2,
            sample_rate: 48000,
        }
    }
}

/// What the engine produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputKind {
    /// One rendition, short segments, sliding window with eviction.
    FastStart {
        rendition: RenditionDescriptor,
        segment_seconds: u32,
        window_segments: u32,
    },
    /// One rendition, every segment retained.
    FullRetention {
        rendition: RenditionDescriptor,
        segment_seconds: u32,
    },
    /// One HLS output per rendition plus a synthesized master playlist.
    Ladder {
        renditions: Vec<RenditionDescriptor>,
        segment_seconds: u32,
    },
    /// Video copied, audio re-encoded, fragmented MP4 on standard output.
    Passthrough,
    /// Offline conversion to a faststart MP4 at `path`.
    File { path: PathBuf },
}

/// Full description of one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeProfile {
    pub output: OutputKind,
    pub ingest: IngestMode,
    pub encoder: EncoderSettings,
}

impl TranscodeProfile {
    /// Low-latency single rendition: 1 s segments, 12 segment window.
    pub fn fast_start(rendition: RenditionDescriptor) -> Self {
        Self {
            output: OutputKind::FastStart {
                rendition,
                segment_seconds: 1,
                window_segments: 12,
            },
            ingest: IngestMode::Engine,
            encoder: EncoderSettings::low_latency(),
        }
    }

    /// Single rendition keeping every segment for full seekability.
    pub fn full_retention(rendition: RenditionDescriptor) -> Self {
        Self {
            output: OutputKind::FullRetention {
                rendition,
                segment_seconds: 4,
            },
            ingest: IngestMode::Engine,
            encoder: EncoderSettings::adaptive(),
        }
    }

    pub fn ladder(renditions: Vec<RenditionDescriptor>) -> Self {
        Self {
            output: OutputKind::Ladder {
                renditions,
                segment_seconds: 2,
            },
            ingest: IngestMode::Engine,
            encoder: EncoderSettings::adaptive(),
        }
    }

    pub fn passthrough() -> Self {
        Self {
            output: OutputKind::Passthrough,
            ingest: IngestMode::Engine,
            encoder: EncoderSettings::low_latency(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            output: OutputKind::File { path: path.into() },
            ingest: IngestMode::Engine,
            encoder: EncoderSettings::archival(),
        }
    }

    pub fn with_ingest(mut self, ingest: IngestMode) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderSettings) -> Self {
        self.encoder = encoder;
        self
    }

    /// Whether the output is a segmented HLS stream in a working directory.
    pub fn is_segmented(&self) -> bool {
        matches!(
            self.output,
            OutputKind::FastStart { .. }
                | OutputKind::FullRetention { .. }
                | OutputKind::Ladder { .. }
        )
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self.output {
            OutputKind::FastStart { .. } => "fast-start",
            OutputKind::FullRetention { .. } => "full-retention",
            OutputKind::Ladder { .. } => "ladder",
            OutputKind::Passthrough => "passthrough",
            OutputKind::File { .. } => "file",
        }
    }
}

/// Where the engine's results appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredOutputs {
    /// HLS playlists and segments in a working directory.
    Hls {
        dir: PathBuf,
        /// Manifest handed to clients: the master for ladders, otherwise the
        /// single media playlist.
        entry_manifest: PathBuf,
        media_playlists: Vec<PathBuf>,
        /// Segments each media playlist must reference before playback starts.
        min_segments: usize,
    },
    /// A continuous container stream on standard output.
    Stream,
    /// A single file written when the engine finishes.
    File(PathBuf),
}

/// Master playlist the launcher must write before returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterManifest {
    pub path: PathBuf,
    pub contents: String,
}

/// A fully planned engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Standard input is piped for push-fed ingestion.
    pub stdin_piped: bool,
    pub outputs: DeclaredOutputs,
    pub master: Option<MasterManifest>,
}

impl EngineInvocation {
    /// The command line as a single string, for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

struct Args(Vec<String>);

impl Args {
    fn push(&mut self, items: &[&str]) {
        self.0.extend(items.iter().map(|s| s.to_string()));
    }

    fn path(&mut self, path: &Path) {
        self.0.push(path.to_string_lossy().to_string());
    }
}

fn is_http(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn input_args(args: &mut Args, source: &str, profile: &TranscodeProfile) {
    if matches!(profile.output, OutputKind::FastStart { .. }) {
        args.push(&["-analyzeduration", "100000", "-probesize", "100000"]);
    }

    match profile.ingest {
        IngestMode::Push => args.push(&["-i", "pipe:0"]),
        IngestMode::Engine => {
            if is_http(source) {
                args.push(&[
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_delay_max",
                    "5",
                ]);
            }
            args.push(&["-i", source]);
        }
    }
}

fn video_args(args: &mut Args, enc: &EncoderSettings, rendition: &RenditionPlan) {
    args.push(&["-c:v", "libx264", "-preset", &enc.preset]);
    if let Some(tune) = &enc.tune {
        args.push(&["-tune", tune]);
    }
    args.push(&["-profile:v", &enc.profile]);
    if let Some(level) = &enc.level {
        args.push(&["-level:v", level]);
    }
    let gop = enc.gop.to_string();
    args.push(&[
        "-pix_fmt",
        &enc.pix_fmt,
        "-vf",
        &rendition.scale_filter,
        "-b:v",
        &rendition.video_bitrate,
        "-maxrate",
        &rendition.maxrate,
        "-bufsize",
        &rendition.bufsize,
        "-g",
        &gop,
        "-keyint_min",
        &gop,
        "-sc_threshold",
        "0",
    ]);
}

fn audio_args(args: &mut Args, enc: &EncoderSettings) {
    args.push(&[
        "-c:a",
        "aac",
        "-b:a",
        &enc.audio_bitrate,
        "-ac",
        &enc.audio_channels.to_string(),
        "-ar",
        &enc.sample_rate.to_string(),
    ]);
}

struct HlsOutput<'a> {
    segment_seconds: u32,
    list_size: u32,
    evict: bool,
    event: bool,
    segment_pattern: &'a str,
    playlist: &'a Path,
}

fn hls_args(args: &mut Args, dir: &Path, out: HlsOutput<'_>) {
    let flags = if out.evict {
        "independent_segments+temp_file+delete_segments"
    } else {
        "independent_segments+temp_file"
    };
    args.push(&[
        "-f",
        "hls",
        "-hls_time",
        &out.segment_seconds.to_string(),
        "-hls_list_size",
        &out.list_size.to_string(),
        "-start_number",
        "0",
        "-hls_flags",
        flags,
        "-hls_segment_type",
        "mpegts",
    ]);
    if out.event {
        args.push(&["-hls_playlist_type", "event"]);
    }
    args.push(&["-hls_segment_filename"]);
    args.path(&dir.join(out.segment_pattern));
    args.path(out.playlist);
}

fn single_plan(rendition: &RenditionDescriptor) -> Result<RenditionPlan> {
    let mut plan = plan_ladder(std::slice::from_ref(rendition))?;
    Ok(plan.renditions.remove(0))
}

fn require_dir(work_dir: Option<&Path>, profile: &TranscodeProfile) -> Result<PathBuf> {
    work_dir.map(Path::to_path_buf).ok_or_else(|| {
        Error::invalid_input(format!(
            "{} output needs a working directory",
            profile.label()
        ))
    })
}

/// Plan an engine run for `source`.
///
/// `work_dir` receives playlists and segments for segmented outputs and is
/// ignored otherwise.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an invalid ladder or rendition, or a
/// segmented output without a working directory.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use streamforged_av::profile::{plan, IngestMode, TranscodeProfile};
///
/// let profile = TranscodeProfile::passthrough().with_ingest(IngestMode::Push);
/// let source = "https://example.com/a.mkv";
/// let invocation = plan(Path::new("ffmpeg"), source, &profile, None).unwrap();
/// assert!(invocation.stdin_piped);
/// assert_eq!(invocation.args.last().map(String::as_str), Some("pipe:1"));
/// ```
pub fn plan(
    engine: &Path,
    source: &str,
    profile: &TranscodeProfile,
    work_dir: Option<&Path>,
) -> Result<EngineInvocation> {
    let mut args = Args(Vec::new());
    args.push(&["-hide_banner", "-loglevel", "warning", "-y"]);
    input_args(&mut args, source, profile);

    let enc = &profile.encoder;
    let mut master = None;

    let outputs = match &profile.output {
        OutputKind::FastStart {
            rendition,
            segment_seconds,
            window_segments,
        } => {
            let dir = require_dir(work_dir, profile)?;
            let playlist = dir.join(SINGLE_PLAYLIST_NAME);
            let plan = single_plan(rendition)?;
            video_args(&mut args, enc, &plan);
            audio_args(&mut args, enc);
            args.push(&[
                "-reset_timestamps",
                "1",
                "-avoid_negative_ts",
                "make_zero",
                "-fflags",
                "+genpts",
            ]);
            hls_args(
                &mut args,
                &dir,
                HlsOutput {
                    segment_seconds: *segment_seconds,
                    list_size: *window_segments,
                    evict: true,
                    event: false,
                    segment_pattern: SINGLE_SEGMENT_PATTERN,
                    playlist: &playlist,
                },
            );
            DeclaredOutputs::Hls {
                entry_manifest: playlist.clone(),
                media_playlists: vec![playlist],
                min_segments: 1,
                dir,
            }
        }
        OutputKind::FullRetention {
            rendition,
            segment_seconds,
        } => {
            let dir = require_dir(work_dir, profile)?;
            let playlist = dir.join(SINGLE_PLAYLIST_NAME);
            let plan = single_plan(rendition)?;
            video_args(&mut args, enc, &plan);
            audio_args(&mut args, enc);
            hls_args(
                &mut args,
                &dir,
                HlsOutput {
                    segment_seconds: *segment_seconds,
                    list_size: 0,
                    evict: false,
                    event: true,
                    segment_pattern: SINGLE_SEGMENT_PATTERN,
                    playlist: &playlist,
                },
            );
            DeclaredOutputs::Hls {
                entry_manifest: playlist.clone(),
                media_playlists: vec![playlist],
                min_segments: 1,
                dir,
            }
        }
        OutputKind::Ladder {
            renditions,
            segment_seconds,
        } => {
            let dir = require_dir(work_dir, profile)?;
            let ladder = plan_ladder(renditions)?;
            let mut media_playlists = Vec::with_capacity(ladder.renditions.len());

            for rendition in &ladder.renditions {
                let playlist = dir.join(&rendition.playlist_name);
                args.push(&["-map", "0:v:0", "-map", "0:a:0?"]);
                video_args(&mut args, enc, rendition);
                audio_args(&mut args, enc);
                hls_args(
                    &mut args,
                    &dir,
                    HlsOutput {
                        segment_seconds: *segment_seconds,
                        list_size: 0,
                        evict: false,
                        event: true,
                        segment_pattern: &rendition.segment_pattern,
                        playlist: &playlist,
                    },
                );
                media_playlists.push(playlist);
            }

            let entry_manifest = dir.join(MASTER_PLAYLIST_NAME);
            master = Some(MasterManifest {
                path: entry_manifest.clone(),
                contents: ladder.master_playlist,
            });
            DeclaredOutputs::Hls {
                dir,
                entry_manifest,
                media_playlists,
                min_segments: 2,
            }
        }
        OutputKind::Passthrough => {
            args.push(&["-map", "0:v:0", "-map", "0:a:0?", "-c:v", "copy"]);
            audio_args(&mut args, enc);
            args.push(&[
                "-f",
                "mp4",
                "-movflags",
                "frag_keyframe+empty_moov+default_base_moof",
                "pipe:1",
            ]);
            DeclaredOutputs::Stream
        }
        OutputKind::File { path } => {
            args.push(&["-map", "0:v:0", "-map", "0:a:0?"]);
            args.push(&["-c:v", "libx264", "-preset", &enc.preset]);
            if let Some(tune) = &enc.tune {
                args.push(&["-tune", tune]);
            }
            args.push(&[
                "-profile:v",
                &enc.profile,
                "-pix_fmt",
                &enc.pix_fmt,
                "-crf",
                &enc.crf.to_string(),
            ]);
            audio_args(&mut args, enc);
            args.push(&["-movflags", "+faststart", "-f", "mp4"]);
            args.path(path);
            DeclaredOutputs::File(path.clone())
        }
    };

    Ok(EngineInvocation {
        program: engine.to_path_buf(),
        args: args.0,
        stdin_piped: profile.ingest == IngestMode::Push,
        outputs,
        master,
    })
}
