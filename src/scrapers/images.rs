use crate::config::ScoutConfig;
use crate::scrapers::traits::{ByteFetcher, ByteStream, ImageStore};
use crate::scrapers::types::DownloadError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Destination slot for one image: `<root>/<listing id>/<ordinal>.jpg`.
///
/// Ordinals follow extraction order, not any source identifier, so a reorder
/// on the source side renames files across runs.
pub fn image_slot(image_root: &Path, listing_id: &str, ordinal: usize) -> PathBuf {
    image_root.join(listing_id).join(format!("{ordinal}.jpg"))
}

/// Delay before retry `attempt` (1-based): base doubled per attempt.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Direct byte retrieval over reqwest. The origin gates images on
/// User-Agent and Referer, hence the explicit header pass-through.
pub struct HttpByteFetcher {
    client: Client,
}

impl HttpByteFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ByteFetcher for HttpByteFetcher {
    async fn get_bytes(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<ByteStream, DownloadError> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::FetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DownloadError::FetchFailed(format!(
                "status {} for {}",
                response.status(),
                url
            )));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        Ok(Box::pin(stream))
    }
}

/// Filesystem store. Creates the listing directory on first write; distinct
/// slots never collide, so concurrent listings need no coordination.
pub struct FsImageStore;

#[async_trait]
impl ImageStore for FsImageStore {
    async fn write_stream(
        &self,
        dest: &Path,
        mut stream: ByteStream,
    ) -> Result<String, DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::WriteFailed(e.to_string()))?;
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| DownloadError::WriteFailed(e.to_string()))?;

        while let Some(chunk) = stream.next().await {
            // Mid-transfer errors come from the fetch side and stay
            // retry-eligible; local IO errors are terminal.
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(DownloadError::FetchFailed(e.to_string()));
                }
            };
            if let Err(e) = file.write_all(&bytes).await {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(DownloadError::WriteFailed(e.to_string()));
            }
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::WriteFailed(e.to_string()))?;

        Ok(dest.to_string_lossy().into_owned())
    }
}

/// Streams one image into its destination slot, retrying transient fetch
/// failures with exponential backoff.
pub struct ImageDownloader {
    fetcher: Arc<dyn ByteFetcher>,
    store: Arc<dyn ImageStore>,
    headers: Vec<(String, String)>,
    fetch_timeout: Duration,
    retry_base: Duration,
    retry_attempts: u32,
}

impl ImageDownloader {
    pub fn new(fetcher: Arc<dyn ByteFetcher>, store: Arc<dyn ImageStore>, config: &ScoutConfig) -> Self {
        Self {
            fetcher,
            store,
            headers: vec![
                ("User-Agent".to_string(), config.user_agent.clone()),
                ("Referer".to_string(), config.referer.clone()),
            ],
            fetch_timeout: config.fetch_timeout,
            retry_base: config.retry_base,
            retry_attempts: config.retry_attempts.max(1),
        }
    }

    /// Fetch `url` into `dest`. `FetchFailed` retries up to the configured
    /// attempt count; `WriteFailed` surfaces immediately.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<String, DownloadError> {
        let mut attempt = 1;
        loop {
            let result = match self
                .fetcher
                .get_bytes(url, &self.headers, self.fetch_timeout)
                .await
            {
                Ok(stream) => self.store.write_stream(dest, stream).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(storage_ref) => {
                    debug!("Stored {} -> {}", url, storage_ref);
                    return Ok(storage_ref);
                }
                Err(DownloadError::WriteFailed(e)) => {
                    return Err(DownloadError::WriteFailed(e));
                }
                Err(DownloadError::FetchFailed(e)) => {
                    if attempt >= self.retry_attempts {
                        return Err(DownloadError::FetchFailed(e));
                    }
                    let delay = backoff_delay(self.retry_base, attempt);
                    warn!(
                        "Fetch attempt {}/{} for {} failed ({}), retrying in {:?}",
                        attempt, self.retry_attempts, url, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn one_chunk_stream(data: &'static [u8]) -> ByteStream {
        Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(data))]))
    }

    struct FlakyFetcher {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl ByteFetcher for FlakyFetcher {
        async fn get_bytes(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _timeout: Duration,
        ) -> Result<ByteStream, DownloadError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Err(DownloadError::FetchFailed(format!("blocked on call {call}")))
            } else {
                Ok(one_chunk_stream(b"jpeg-bytes"))
            }
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ImageStore for FailingStore {
        async fn write_stream(
            &self,
            _dest: &Path,
            _stream: ByteStream,
        ) -> Result<String, DownloadError> {
            Err(DownloadError::WriteFailed("disk full".to_string()))
        }
    }

    fn test_config() -> ScoutConfig {
        ScoutConfig {
            retry_base: Duration::from_millis(1),
            ..ScoutConfig::default()
        }
    }

    #[test]
    fn backoff_delays_are_non_decreasing() {
        let base = Duration::from_millis(500);
        let delays: Vec<Duration> = (1..=4).map(|a| backoff_delay(base, a)).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[1], Duration::from_millis(1000));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn slot_paths_are_scoped_by_listing_id() {
        let slot = image_slot(Path::new("car_images"), "1234567", 2);
        assert_eq!(slot, PathBuf::from("car_images/1234567/2.jpg"));
    }

    #[tokio::test]
    async fn two_failures_then_success_resolves_on_the_third_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FlakyFetcher {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let downloader = ImageDownloader::new(fetcher.clone(), Arc::new(FsImageStore), &test_config());

        let dest = image_slot(dir.path(), "99", 1);
        let storage_ref = downloader
            .download("https://example.test/img.jpg", &dest)
            .await
            .unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(storage_ref, dest.to_string_lossy());
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn retries_exhaust_after_the_configured_attempt_count() {
        let fetcher = Arc::new(FlakyFetcher {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let downloader = ImageDownloader::new(fetcher.clone(), Arc::new(FsImageStore), &test_config());

        let err = downloader
            .download("https://example.test/img.jpg", Path::new("/tmp/never.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::FetchFailed(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn write_failures_are_not_retried() {
        let fetcher = Arc::new(FlakyFetcher {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let downloader = ImageDownloader::new(fetcher.clone(), Arc::new(FailingStore), &test_config());

        let err = downloader
            .download("https://example.test/img.jpg", Path::new("/tmp/never.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::WriteFailed(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
