//! Ranged byte sources for push-fed ingestion.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{header, StatusCode, Url};
use std::time::Duration;
use streamforged_common::{Error, Result};

/// What the origin answered to a ranged request.
pub enum RangeResponse {
    /// 206: the requested window, shorter than asked at the end of the source.
    Partial(Bytes),
    /// 200: the origin ignored the range and is sending the whole source.
    Full(BoxStream<'static, Result<Bytes>>),
    /// 416: the offset is at or past the end of the source.
    Unsatisfiable,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeResponse::Partial(b) => write!(f, "Partial({} bytes)", b.len()),
            RangeResponse::Full(_) => f.write_str("Full(..)"),
            RangeResponse::Unsatisfiable => f.write_str("Unsatisfiable"),
        }
    }
}

/// A remote source that can be read in byte ranges.
///
/// An `Err` is a transient failure (network error, non-2xx status) and is
/// subject to the feeder's retry policy.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn fetch(&self, offset: u64, len: u64) -> Result<RangeResponse>;
}

#[async_trait]
impl<T: ChunkSource + ?Sized> ChunkSource for std::sync::Arc<T> {
    async fn fetch(&self, offset: u64, len: u64) -> Result<RangeResponse> {
        (**self).fetch(offset, len).await
    }
}

/// [`ChunkSource`] over HTTP `Range` requests.
#[derive(Debug, Clone)]
pub struct HttpChunkSource {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl HttpChunkSource {
    /// Only `http` and `https` URLs are accepted.
    pub fn new(client: reqwest::Client, url: &str, timeout: Duration) -> Result<Self> {
        let url = parse_source_url(url)?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Parse and check a remote source URL.
pub fn parse_source_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url).map_err(|e| Error::invalid_input(format!("invalid URL {url:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(Error::invalid_input(format!(
            "unsupported URL scheme {other:?}, expected http or https"
        ))),
    }
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    async fn fetch(&self, offset: u64, len: u64) -> Result<RangeResponse> {
        let end = offset + len.max(1) - 1;
        let response = self
            .client
            .get(self.url.clone())
            .header(header::RANGE, format!("bytes={offset}-{end}"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("request for bytes {offset}-{end} failed: {e}")))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| {
                        Error::upstream(format!("reading bytes {offset}-{end} failed: {e}"))
                    })?;
                Ok(RangeResponse::Partial(body))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(RangeResponse::Unsatisfiable),
            status if status.is_success() => {
                let stream = response
                    .bytes_stream()
                    .map(|chunk| {
                        chunk.map_err(|e| Error::upstream(format!("body read failed: {e}")))
                    })
                    .boxed();
                Ok(RangeResponse::Full(stream))
            }
            status => Err(Error::upstream(format!("origin returned HTTP {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_url_scheme_checked() {
        assert!(parse_source_url("https://example.com/a.mkv").is_ok());
        assert!(parse_source_url("http://127.0.0.1:9000/a.mkv").is_ok());
        assert!(matches!(
            parse_source_url("file:///etc/passwd"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            parse_source_url("not a url"),
            Err(Error::InvalidInput(_))
        ));
    }
}
