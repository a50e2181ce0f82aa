//! Engine process launching.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use streamforged_common::{Error, Result};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::profile::{plan, DeclaredOutputs, EngineInvocation, TranscodeProfile};

/// A running engine process and its standard streams.
///
/// Streams are taken out of the [`Child`] so they can be handed to separate
/// tasks. The process is killed if the handle's `child` is dropped.
#[derive(Debug)]
pub struct EngineHandle {
    pub child: Child,
    /// Present only for push-fed ingestion.
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    pub outputs: DeclaredOutputs,
}

impl EngineHandle {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Plan and start an engine run.
///
/// For segmented outputs the working directory is created first, and for
/// ladders the master playlist is written before the process starts, so it
/// exists on disk by the time this returns.
///
/// # Errors
///
/// - [`Error::Configuration`] when the engine binary cannot be executed.
/// - [`Error::InvalidInput`] when the profile cannot be planned.
/// - [`Error::Io`] when the working directory or master playlist cannot be
///   written.
pub async fn launch(
    engine: &Path,
    source: &str,
    profile: &TranscodeProfile,
    work_dir: Option<&Path>,
) -> Result<EngineHandle> {
    let invocation = plan(engine, source, profile, work_dir)?;
    spawn(invocation, profile).await
}

async fn spawn(invocation: EngineInvocation, profile: &TranscodeProfile) -> Result<EngineHandle> {
    if let DeclaredOutputs::Hls { dir, .. } = &invocation.outputs {
        tokio::fs::create_dir_all(dir).await?;
    }
    if let Some(master) = &invocation.master {
        tokio::fs::write(&master.path, master.contents.as_bytes()).await?;
    }

    tracing::debug!(command = %invocation.command_line(), "Spawning engine");

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(if invocation.stdin_piped {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => Error::configuration(format!(
                "cannot execute engine {}: {e}",
                invocation.program.display()
            )),
            _ => Error::Io(e),
        })?;

    tracing::info!(
        pid = child.id().unwrap_or_default(),
        profile = profile.label(),
        ingest = ?profile.ingest,
        "Engine started"
    );

    Ok(EngineHandle {
        stdin: child.stdin.take(),
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        outputs: invocation.outputs,
        child,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::profile::IngestMode;
    use std::os::unix::fs::PermissionsExt;
    use streamforged_media::ladder::default_ladder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("fake-engine.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_engine_is_configuration_error() {
        let result = launch(
            Path::new("/nonexistent/bin/ffmpeg"),
            "https://example.com/a.mkv",
            &TranscodeProfile::passthrough(),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_ladder_master_written_before_return() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = script(tmp.path(), "sleep 5");
        let work_dir = tmp.path().join("session");

        let mut handle = launch(
            &engine,
            "https://example.com/a.mkv",
            &TranscodeProfile::ladder(default_ladder()),
            Some(&work_dir),
        )
        .await
        .unwrap();

        let master = std::fs::read_to_string(work_dir.join("master.m3u8")).unwrap();
        assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 3);
        assert!(handle.stdin.is_none());

        handle.child.start_kill().unwrap();
        handle.child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_fed_engine_receives_stdin() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = script(tmp.path(), "cat");

        let mut handle = launch(
            &engine,
            "https://example.com/a.mkv",
            &TranscodeProfile::passthrough().with_ingest(IngestMode::Push),
            None,
        )
        .await
        .unwrap();

        let mut stdin = handle.stdin.take().unwrap();
        stdin.write_all(b"source bytes").await.unwrap();
        drop(stdin);

        let mut out = Vec::new();
        handle
            .stdout
            .take()
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"source bytes");
        assert!(handle.child.wait().await.unwrap().success());
    }
}
