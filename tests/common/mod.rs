//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates a temporary data directory, an
//! in-memory DB, a config pointing at a scripted fake engine, and a full
//! [`AppContext`]. The [`TestHarness::with_server`] constructor starts Axum on
//! a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use streamforged::config::Config;
use streamforged::server::{create_router, AppContext};
use streamforged_av::IngestMode;
use streamforged_db::pool::{init_memory_pool, DbPool};
use tempfile::TempDir;

/// Fake engine that behaves like the real one closely enough for the
/// orchestration layer. It looks at its last argument to decide what to do:
///
/// - `pipe:1`: copy standard input to standard output
/// - `*.m3u8`: read the whole input, write one segment and a playlist, then
///   keep running until killed
/// - anything else: copy standard input into that file
pub const WELL_BEHAVED_ENGINE: &str = r#"
for last; do :; done
case "$last" in
  pipe:1)
    exec cat
    ;;
  *.m3u8)
    dir=$(dirname "$last")
    cat > "$dir/source.bin"
    printf 'segment' > "$dir/index_00000.ts"
    printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:1\n#EXTINF:1.000,\nindex_00000.ts\n' > "$last"
    exec sleep 30
    ;;
  *)
    cat > "$last"
    ;;
esac
"#;

/// Fake engine that fails straight away the way ffmpeg does for a dead origin.
pub const FAILING_ENGINE: &str = r#"
echo "https://origin/a.mkv: Server returned 404 Not Found" >&2
exit 1
"#;

/// Fake engine that gets a session to ready and then crashes.
pub const CRASHING_ENGINE: &str = r#"
for last; do :; done
dir=$(dirname "$last")
printf 'segment' > "$dir/index_00000.ts"
printf '#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1.000,\nindex_00000.ts\n' > "$last"
sleep 1
echo "decoder crashed" >&2
exit 1
"#;

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub fn write_engine(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write fake engine");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to mark fake engine executable");
    path
}

/// Config with short waits and retries, rooted in `data_dir`.
pub fn fast_config(data_dir: &Path, engine: Option<PathBuf>) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config.engine.ffmpeg_path = engine;
    config.engine.conversion_timeout_secs = 20;
    config.streaming.fast_start_ceiling_secs = 5;
    config.streaming.manifest_wait_secs = 2;
    config.streaming.segment_wait_secs = 2;
    config.streaming.poll_interval_ms = 20;
    config.ingest.chunk_size = 16;
    config.ingest.request_timeout_secs = 5;
    config.ingest.max_attempts = 3;
    config.ingest.base_delay_ms = 10;
    config.ingest.max_delay_ms = 40;
    config.ingest.unbounded_delay_ms = 20;
    config.conversion.ingest = IngestMode::Push;
    config.streaming.ingest = IngestMode::Push;
    config
}

/// Test harness wrapping a fully-constructed [`AppContext`] backed by an
/// in-memory database.
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub config: Config,
    pub dir: TempDir,
}

impl TestHarness {
    /// Harness with the well-behaved fake engine.
    #[cfg(unix)]
    pub fn new() -> Self {
        Self::with_engine(WELL_BEHAVED_ENGINE)
    }

    /// Harness whose engine runs `script`.
    #[cfg(unix)]
    pub fn with_engine(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let engine = write_engine(dir.path(), script);
        let config = fast_config(&dir.path().join("data"), Some(engine));
        Self::with_config(dir, config)
    }

    /// Harness with a custom configuration. `dir` is kept alive with it.
    pub fn with_config(dir: TempDir, config: Config) -> Self {
        std::fs::create_dir_all(config.storage.converted_dir()).expect("failed to create dirs");
        std::fs::create_dir_all(config.storage.hls_dir()).expect("failed to create dirs");

        let db = init_memory_pool().expect("failed to create in-memory pool");
        let ctx = AppContext::new(config.clone(), db.clone()).expect("failed to build context");

        Self {
            ctx,
            db,
            config,
            dir,
        }
    }

    /// Start an Axum server for this harness on a random port.
    pub async fn serve(self) -> (Self, SocketAddr) {
        let app = create_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (self, addr)
    }

    /// Start a server with the well-behaved fake engine.
    #[cfg(unix)]
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::new().serve().await
    }
}
