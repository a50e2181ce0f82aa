//! Progressive fragmented-MP4 passthrough on the engine's standard output.

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use std::sync::Arc;
use streamforged_av::{launch, resolve_engine, IngestMode, TranscodeProfile};
use streamforged_common::{Error, Result};
use tokio::process::ChildStdout;
use tokio_util::io::ReaderStream;

use super::sessions::SessionManager;
use crate::ingest::{parse_source_url, HttpChunkSource, RetryPolicy};
use crate::supervisor::{EngineSupervisor, FeedSpec};

/// A passthrough engine run whose first bytes have already arrived.
///
/// The engine lives exactly as long as the stream: dropping it (for example
/// when the client disconnects) kills the engine and stops the feeder.
pub struct ProgressiveStream {
    first: Bytes,
    rest: ReaderStream<ChildStdout>,
    supervisor: EngineSupervisor,
}

impl ProgressiveStream {
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let Self {
            first,
            rest,
            supervisor,
        } = self;
        stream::once(async move { Ok(first) })
            .chain(rest)
            .map(move |chunk| {
                let _guard = &supervisor;
                chunk
            })
    }
}

/// Start a passthrough run for `url` and wait for its first output bytes.
///
/// # Errors
///
/// - [`Error::InvalidInput`] / [`Error::Configuration`] as for sessions.
/// - The engine's error when it exits without writing anything.
/// - [`Error::Upstream`] when nothing arrives within the segment wait. The
///   engine and its feeder are stopped.
pub async fn open_progressive(
    sessions: &SessionManager,
    url: &str,
    ingest: IngestMode,
) -> Result<ProgressiveStream> {
    let source = parse_source_url(url)?;
    let settings = sessions.settings();
    let engine = resolve_engine(settings.engine_path.as_deref())?;

    let feed = match ingest {
        IngestMode::Push => Some(FeedSpec {
            source: Arc::new(HttpChunkSource::new(
                settings.http.clone(),
                source.as_str(),
                settings.ingest.request_timeout(),
            )?),
            chunk_size: settings.ingest.chunk_size,
            policy: RetryPolicy::unbounded(&settings.ingest),
        }),
        IngestMode::Engine => None,
    };

    let profile = TranscodeProfile::passthrough().with_ingest(ingest);
    let handle = launch(&engine, source.as_str(), &profile, None).await?;
    let label = format!("progressive-{}", handle.pid().unwrap_or_default());
    let (supervisor, stdout) = EngineSupervisor::spawn(label, handle, feed, true);
    let stdout = stdout.ok_or_else(|| Error::internal("engine stdout was not captured"))?;

    let first_wait = settings.streaming.segment_wait();
    let mut rest = ReaderStream::new(stdout);
    let Ok(first) = tokio::time::timeout(first_wait, rest.next()).await else {
        tracing::warn!(
            session = supervisor.label(),
            wait_secs = first_wait.as_secs(),
            "No progressive output in time, stopping engine"
        );
        supervisor.shutdown().await;
        return Err(Error::upstream(format!(
            "no output from {} within {}s",
            source,
            first_wait.as_secs()
        )));
    };

    match first {
        Some(Ok(first)) => {
            tracing::info!(session = supervisor.label(), "Progressive stream started");
            Ok(ProgressiveStream {
                first,
                rest,
                supervisor,
            })
        }
        Some(Err(e)) => Err(Error::Io(e)),
        None => {
            let exit = supervisor.wait().await;
            exit.to_result()?;
            Err(Error::transcode("engine produced no output"))
        }
    }
}
