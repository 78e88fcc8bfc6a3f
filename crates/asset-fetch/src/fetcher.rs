//! Streamed asset transfer.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reelsmith_common::config::FetchConfig;
use reelsmith_common::error::{ReelError, ReelResult};
use reelsmith_common::scratch::ScratchArea;
use reelsmith_job_model::{MediaSource, TrackKind};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::FetchError;

/// A fetched asset sitting in scratch storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    pub kind: TrackKind,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Brings remote or local assets into scratch storage.
#[derive(Debug, Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl AssetFetcher {
    pub fn new(config: FetchConfig) -> ReelResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ReelError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch one asset into `scratch`.
    ///
    /// Exactly one scratch file is created. On any failure it is deleted
    /// before returning.
    pub async fn fetch(
        &self,
        source: &MediaSource,
        kind: TrackKind,
        scratch: &dyn ScratchArea,
    ) -> Result<LocalAsset, FetchError> {
        let file_name = format!("{}.{}", kind.as_str(), extension_hint(source));
        let path = scratch.register(&file_name).map_err(|e| FetchError::Scratch {
            message: e.to_string(),
        })?;

        let started = std::time::Instant::now();
        let timeout = self.config.transfer_timeout();
        let transfer = async {
            match source {
                MediaSource::Remote(url) => self.download(url, &path).await,
                MediaSource::Local(src) => self.copy_local(src, &path).await,
            }
        };

        let outcome = match tokio::time::timeout(timeout, transfer).await {
            Ok(Ok(0)) => Err(FetchError::Empty),
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                secs: timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(bytes) => {
                tracing::info!(
                    %kind,
                    source = %source,
                    bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Asset fetched"
                );
                Ok(LocalAsset { kind, path, bytes })
            }
            Err(err) => {
                scratch.discard(&path);
                tracing::warn!(%kind, source = %source, error = %err, "Asset fetch failed");
                Err(err)
            }
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let limit = self.config.max_asset_bytes;
        let response = self.client.get(url).send().await?.error_for_status()?;

        if let Some(declared) = response.content_length() {
            if declared > limit {
                return Err(FetchError::Oversized { limit_bytes: limit });
            }
        }

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > limit {
                return Err(FetchError::Oversized { limit_bytes: limit });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(written)
    }

    async fn copy_local(&self, src: &Path, dest: &Path) -> Result<u64, FetchError> {
        let limit = self.config.max_asset_bytes;
        let mut input = File::open(src)
            .await
            .map_err(|e| FetchError::unreachable(format!("cannot open local source: {}", e.kind())))?;

        let metadata = input.metadata().await.map_err(read_error)?;
        if !metadata.is_file() {
            return Err(FetchError::unreachable("local source is not a regular file"));
        }
        if metadata.len() > limit {
            return Err(FetchError::Oversized { limit_bytes: limit });
        }

        let mut output = File::create(dest).await?;
        let mut buf = vec![0u8; self.config.chunk_size_bytes.max(1)];
        let mut written: u64 = 0;

        loop {
            let n = input.read(&mut buf).await.map_err(read_error)?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > limit {
                return Err(FetchError::Oversized { limit_bytes: limit });
            }
            output.write_all(&buf[..n]).await?;
        }
        output.flush().await?;

        Ok(written)
    }
}

/// Source-side I/O failures are the source's fault, not scratch storage's.
fn read_error(err: std::io::Error) -> FetchError {
    FetchError::unreachable(format!("cannot read local source: {}", err.kind()))
}

/// File extension to keep on the scratch copy so container probing has a hint.
fn extension_hint(source: &MediaSource) -> String {
    let candidate = match source {
        MediaSource::Remote(url) => reqwest::Url::parse(url).ok().and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
                .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_string()))
        }),
        MediaSource::Local(path) => path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned()),
    };

    candidate
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "media".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_hint() {
        assert_eq!(
            extension_hint(&MediaSource::Remote(
                "https://cdn.example.com/v/clip.MP4?sig=1".to_string()
            )),
            "mp4"
        );
        assert_eq!(
            extension_hint(&MediaSource::Local(PathBuf::from("/tmp/voice.mp3"))),
            "mp3"
        );
        assert_eq!(
            extension_hint(&MediaSource::Remote("https://cdn.example.com/stream".to_string())),
            "media"
        );
        assert_eq!(
            extension_hint(&MediaSource::Local(PathBuf::from("/tmp/x.../../weird"))),
            "media"
        );
    }
}
