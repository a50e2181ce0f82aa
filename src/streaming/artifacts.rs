//! Serving manifests and segments out of a session's working directory.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use streamforged_common::{Error, Result, SessionId};
use streamforged_media::hls::is_master_playlist;
use streamforged_media::MediaPlaylist;

use super::readiness::{wait_until, WaitOutcome};
use super::sessions::SessionManager;

pub const MANIFEST_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";
pub const SEGMENT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Manifest,
    Segment,
}

impl ArtifactKind {
    pub fn cache_control(&self) -> &'static str {
        match self {
            ArtifactKind::Manifest => MANIFEST_CACHE_CONTROL,
            ArtifactKind::Segment => SEGMENT_CACHE_CONTROL,
        }
    }
}

/// Kind and media type for an artifact file name, by extension.
pub fn classify(name: &str) -> Option<(ArtifactKind, &'static str)> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "m3u8" => Some((ArtifactKind::Manifest, "application/vnd.apple.mpegurl")),
        "ts" => Some((ArtifactKind::Segment, "video/mp2t")),
        "m4s" => Some((ArtifactKind::Segment, "video/iso.segment")),
        "mp4" => Some((ArtifactKind::Segment, "video/mp4")),
        _ => None,
    }
}

/// A single plain file name: no separators, no parent references, not hidden.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// What goes in the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactBody {
    /// The exact manifest text that was checked. The engine rewrites
    /// playlists in place, so the file is not opened a second time.
    Manifest(Bytes),
    /// A finished segment, streamed from disk.
    Segment(PathBuf),
}

/// A file ready to be sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub content_type: &'static str,
    pub body: ArtifactBody,
}

impl Artifact {
    pub fn cache_control(&self) -> &'static str {
        self.kind.cache_control()
    }
}

/// Resolve `name` inside a session, waiting for the engine to produce it.
///
/// Manifests wait up to the manifest ceiling and segments up to the segment
/// ceiling; nothing waits once the engine has exited. A media playlist only
/// counts once it lists a segment.
///
/// # Errors
///
/// - [`Error::NotFound`] for an unknown session, an unsafe or unknown name,
///   or a file that never appeared.
/// - [`Error::NotReady`] for a manifest that exists but lists no segments.
pub async fn serve(
    sessions: &SessionManager,
    session_id: SessionId,
    name: &str,
) -> Result<Artifact> {
    let session = sessions.get_session(session_id)?;
    session.touch();

    if !is_safe_name(name) {
        tracing::debug!(session_id = %session_id, name, "Rejected artifact name");
        return Err(Error::not_found("artifact", name));
    }
    let (kind, content_type) = classify(name).ok_or_else(|| Error::not_found("artifact", name))?;

    let streaming = sessions.streaming();
    let ceiling = match kind {
        ArtifactKind::Manifest => streaming.manifest_wait(),
        ArtifactKind::Segment => streaming.segment_wait(),
    };
    let path = session.work_dir.join(name);

    let outcome = wait_until(
        session.wake(),
        session.exit_watch(),
        ceiling,
        streaming.poll_interval(),
        || is_available(&path, kind),
    )
    .await;

    if !matches!(outcome, WaitOutcome::Met)
        && !tokio::fs::try_exists(&path).await.unwrap_or(false)
    {
        return Err(Error::not_found("artifact", name));
    }

    let body = match kind {
        ArtifactKind::Manifest => ArtifactBody::Manifest(read_manifest(&path, name).await?),
        ArtifactKind::Segment => ArtifactBody::Segment(path),
    };

    Ok(Artifact {
        kind,
        content_type,
        body,
    })
}

/// Read a manifest once and hand back those bytes if they are playable.
async fn read_manifest(path: &Path, name: &str) -> Result<Bytes> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| Error::not_found("artifact", name))?;
    let playable = std::str::from_utf8(&bytes)
        .map(manifest_is_playable)
        .unwrap_or(false);
    if !playable {
        return Err(Error::not_ready(format!("{name} lists no segments yet")));
    }
    Ok(Bytes::from(bytes))
}

fn manifest_is_playable(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    is_master_playlist(text) || MediaPlaylist::parse(text).segment_count() > 0
}

async fn is_available(path: &Path, kind: ArtifactKind) -> bool {
    match kind {
        ArtifactKind::Segment => tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false),
        ArtifactKind::Manifest => match tokio::fs::read_to_string(path).await {
            Ok(text) => manifest_is_playable(&text),
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("index.m3u8"),
            Some((ArtifactKind::Manifest, "application/vnd.apple.mpegurl"))
        );
        assert_eq!(
            classify("index_00001.ts"),
            Some((ArtifactKind::Segment, "video/mp2t"))
        );
        assert_eq!(
            classify("seg.M4S"),
            Some((ArtifactKind::Segment, "video/iso.segment"))
        );
        assert_eq!(classify("init.mp4"), Some((ArtifactKind::Segment, "video/mp4")));
        assert_eq!(classify("notes.txt"), None);
        assert_eq!(classify("noext"), None);
    }

    #[test]
    fn test_cache_policy() {
        assert_eq!(
            ArtifactKind::Manifest.cache_control(),
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(
            ArtifactKind::Segment.cache_control(),
            "public, max-age=31536000, immutable"
        );
    }

    #[test]
    fn test_safe_names() {
        assert!(is_safe_name("index.m3u8"));
        assert!(is_safe_name("720p_00003.ts"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("../secret.ts"));
        assert!(!is_safe_name("a/b.ts"));
        assert!(!is_safe_name("a\\b.ts"));
        assert!(!is_safe_name("/etc/passwd"));
        assert!(!is_safe_name(".hidden.m3u8"));
    }

    #[tokio::test]
    async fn test_media_playlist_needs_a_segment() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.m3u8");

        assert!(!is_available(&path, ArtifactKind::Manifest).await);
        std::fs::write(&path, "#EXTM3U\n#EXT-X-TARGETDURATION:1\n").unwrap();
        assert!(!is_available(&path, ArtifactKind::Manifest).await);
        std::fs::write(&path, "#EXTM3U\n#EXTINF:1.0,\nindex_00000.ts\n").unwrap();
        assert!(is_available(&path, ArtifactKind::Manifest).await);
    }

    #[tokio::test]
    async fn test_master_available_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("master.m3u8");
        std::fs::write(
            &path,
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=400000,RESOLUTION=426x240\n240p.m3u8\n",
        )
        .unwrap();
        assert!(is_available(&path, ArtifactKind::Manifest).await);
    }

    #[tokio::test]
    async fn test_manifest_body_is_the_checked_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.m3u8");
        let first = "#EXTM3U\n#EXTINF:1.0,\nindex_00000.ts\n";
        std::fs::write(&path, first).unwrap();

        let body = read_manifest(&path, "index.m3u8").await.unwrap();

        // A rewrite after the read does not leak into the response.
        std::fs::write(&path, format!("{first}#EXTINF:1.0,\nindex_00001.ts\n")).unwrap();
        assert_eq!(&body[..], first.as_bytes());
    }

    #[tokio::test]
    async fn test_manifest_without_segments_is_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.m3u8");

        assert!(matches!(
            read_manifest(&path, "index.m3u8").await,
            Err(Error::NotFound { .. })
        ));
        std::fs::write(&path, "#EXTM3U\n#EXT-X-TARGETDURATION:1\n").unwrap();
        assert!(matches!(
            read_manifest(&path, "index.m3u8").await,
            Err(Error::NotReady(_))
        ));
    }
}
