mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;
use streamforged_media::plan_ladder;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./streamforged.toml",
        "~/.config/streamforged/config.toml",
        "/etc/streamforged/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if let Some(path) = &config.engine.ffmpeg_path {
        if path.components().count() > 1 && !path.exists() {
            tracing::warn!("Configured ffmpeg path does not exist: {:?}", path);
        }
    }

    if config.ingest.chunk_size == 0 {
        anyhow::bail!("Ingest chunk size cannot be 0");
    }
    if config.ingest.max_attempts == 0 {
        anyhow::bail!("Ingest max_attempts must be at least 1");
    }
    if config.ingest.base_delay_ms > config.ingest.max_delay_ms {
        anyhow::bail!(
            "Ingest base_delay_ms ({}) exceeds max_delay_ms ({})",
            config.ingest.base_delay_ms,
            config.ingest.max_delay_ms
        );
    }

    if config.streaming.poll_interval_ms == 0 {
        anyhow::bail!("Streaming poll interval cannot be 0");
    }
    if config.streaming.cleanup_interval_secs == 0 {
        anyhow::bail!("Session cleanup interval cannot be 0");
    }

    plan_ladder(std::slice::from_ref(&config.streaming.fast_start))
        .context("Invalid streaming.fast_start rendition")?;
    plan_ladder(&config.streaming.ladder).context("Invalid streaming.ladder")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        validate_config(&config).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ingest.chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.ingest.max_attempts, 8);
        assert_eq!(config.streaming.manifest_wait_secs, 5);
        assert_eq!(config.streaming.segment_wait_secs, 15);
        assert_eq!(config.streaming.ladder.len(), 3);
        assert_eq!(config.streaming.ingest, streamforged_av::IngestMode::Engine);
        assert_eq!(config.conversion.ingest, streamforged_av::IngestMode::Push);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000

[storage]
data_dir = "/var/lib/streamforged"

[conversion]
ingest = "engine"

[[streaming.ladder]]
name = "360p"
width = 640
height = 360
bitrate_kbps = 800
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(
            config.storage.hls_dir(),
            Path::new("/var/lib/streamforged/hls")
        );
        assert_eq!(config.conversion.ingest, streamforged_av::IngestMode::Engine);
        assert_eq!(config.streaming.ladder.len(), 1);
        assert_eq!(config.streaming.ladder[0].name, "360p");
    }

    #[test]
    fn test_port_zero_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_ladder_rejected() {
        let mut config = Config::default();
        config.streaming.ladder.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let mut config = Config::default();
        config.ingest.base_delay_ms = 10_000;
        config.ingest.max_delay_ms = 100;
        assert!(validate_config(&config).is_err());
    }
}
