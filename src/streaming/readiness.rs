//! Bounded waits for engine output.
//!
//! Waiters wake on filesystem notifications for the session directory and on
//! a fallback interval, so a missed or unsupported notification only costs
//! latency. Each session directory has one [`DirWatcher`] however many
//! requests are waiting on it.

use notify::{Config as WatchConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use streamforged_av::DeclaredOutputs;
use streamforged_common::{Error, Result};
use streamforged_media::MediaPlaylist;
use tokio::sync::futures::Notified;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::supervisor::EngineExit;

/// What must exist on disk before playback can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessRequirement {
    pub dir: PathBuf,
    pub entry_manifest: PathBuf,
    pub media_playlists: Vec<PathBuf>,
    /// Existing segments each media playlist must reference.
    pub min_segments: usize,
}

impl ReadinessRequirement {
    /// `None` for outputs that are not segmented.
    pub fn from_outputs(outputs: &DeclaredOutputs) -> Option<Self> {
        match outputs {
            DeclaredOutputs::Hls {
                dir,
                entry_manifest,
                media_playlists,
                min_segments,
            } => Some(Self {
                dir: dir.clone(),
                entry_manifest: entry_manifest.clone(),
                media_playlists: media_playlists.clone(),
                min_segments: *min_segments,
            }),
            DeclaredOutputs::Stream | DeclaredOutputs::File(_) => None,
        }
    }

    pub async fn is_met(&self) -> bool {
        if !tokio::fs::try_exists(&self.entry_manifest).await.unwrap_or(false) {
            return false;
        }
        for playlist in &self.media_playlists {
            if existing_segments(playlist).await < self.min_segments {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Every media playlist references enough segments.
    Ready(PathBuf),
    /// The ceiling passed but the entry manifest exists, so playback can
    /// start and the player will poll for more.
    SoftReady(PathBuf),
    /// The ceiling passed and not even the entry manifest exists.
    NotReady,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }
}

/// Wait until `requirement` is met, the engine exits, or `ceiling` passes.
///
/// `wake` is the session directory's change signal, if one is available.
///
/// # Errors
///
/// Fails with the engine's error (usually [`Error::Transcode`] carrying the
/// stderr tail) when the engine exits before the requirement is met. A
/// successful exit that left an entry manifest counts as soft-ready.
pub async fn await_ready(
    requirement: &ReadinessRequirement,
    wake: Option<&Notify>,
    exit: watch::Receiver<Option<EngineExit>>,
    ceiling: Duration,
    poll_interval: Duration,
) -> Result<Readiness> {
    let outcome = wait_until(wake, exit, ceiling, poll_interval, || requirement.is_met()).await;

    let manifest = requirement.entry_manifest.clone();
    match outcome {
        WaitOutcome::Met => Ok(Readiness::Ready(manifest)),
        WaitOutcome::TimedOut => {
            if tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
                Ok(Readiness::SoftReady(manifest))
            } else {
                Ok(Readiness::NotReady)
            }
        }
        WaitOutcome::Exited(exit) => {
            exit.to_result()?;
            if tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
                Ok(Readiness::SoftReady(manifest))
            } else {
                Err(Error::transcode(format!(
                    "engine exited without producing {}",
                    manifest.display()
                )))
            }
        }
    }
}

/// Number of segments listed in a media playlist that exist on disk.
///
/// Segment URIs are resolved by file name against the playlist's directory.
pub async fn existing_segments(playlist: &Path) -> usize {
    let Ok(text) = tokio::fs::read_to_string(playlist).await else {
        return 0;
    };
    let Some(dir) = playlist.parent() else {
        return 0;
    };

    let mut count = 0;
    for segment in MediaPlaylist::parse(&text).segments {
        let Some(name) = Path::new(&segment.uri).file_name() else {
            continue;
        };
        if tokio::fs::try_exists(dir.join(name)).await.unwrap_or(false) {
            count += 1;
        }
    }
    count
}

pub(crate) enum WaitOutcome {
    Met,
    Exited(EngineExit),
    TimedOut,
}

/// Re-evaluate `check` on every `wake` signal and every `poll_interval`
/// until it holds, the engine exits or `ceiling` passes.
pub(crate) async fn wait_until<F, Fut>(
    wake: Option<&Notify>,
    mut exit: watch::Receiver<Option<EngineExit>>,
    ceiling: Duration,
    poll_interval: Duration,
    mut check: F,
) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + ceiling;
    let mut exit_open = true;

    loop {
        // Registered before the check so a change in between is not lost.
        let notified = wake.map(Notify::notified);
        tokio::pin!(notified);
        if let Some(n) = notified.as_mut().as_pin_mut() {
            n.enable();
        }

        if check().await {
            return WaitOutcome::Met;
        }

        let exited = exit.borrow().clone();
        if let Some(exited) = exited {
            // Output may have landed between the last check and the exit.
            if check().await {
                return WaitOutcome::Met;
            }
            return WaitOutcome::Exited(exited);
        }

        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        let nap = poll_interval.min(deadline - now);

        tokio::select! {
            _ = changed(notified.as_mut()) => {}
            _ = tokio::time::sleep(nap) => {}
            res = exit.changed(), if exit_open => {
                if res.is_err() {
                    exit_open = false;
                }
            }
        }
    }
}

async fn changed(notified: Pin<&mut Option<Notified<'_>>>) {
    match notified.as_pin_mut() {
        Some(n) => n.await,
        None => std::future::pending().await,
    }
}

/// Change notifications for one directory, shared by every waiter on it.
pub struct DirWatcher {
    _watcher: RecommendedWatcher,
    notify: Arc<Notify>,
}

impl DirWatcher {
    /// `None` when the platform watcher cannot be started; callers then rely
    /// on polling alone.
    pub fn new(dir: &Path) -> Option<Self> {
        let notify = Arc::new(Notify::new());
        let signal = notify.clone();
        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if res.is_ok() {
                    signal.notify_waiters();
                }
            },
            WatchConfig::default(),
        );

        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                tracing::debug!(error = %e, "File watcher unavailable, polling only");
                return None;
            }
        };
        if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            tracing::debug!(dir = ?dir, error = %e, "Cannot watch directory, polling only");
            return None;
        }

        Some(Self {
            _watcher: watcher,
            notify,
        })
    }

    pub fn notify(&self) -> &Notify {
        &self.notify
    }
}
