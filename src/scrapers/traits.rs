use crate::scrapers::types::{DownloadError, FetchError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

/// Byte chunks flowing from a fetcher into a store.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Renders a URL to hydrated HTML, waiting up to `timeout` for
/// `ready_selector` to appear. Session state behind the renderer (cookies,
/// navigation history) is opaque to callers.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(
        &self,
        url: &str,
        ready_selector: &str,
        timeout: Duration,
    ) -> Result<String, FetchError>;
}

/// Direct byte-stream retrieval, distinct from the rendering fetch. The
/// origin checks User-Agent and Referer, so headers are part of the contract.
#[async_trait]
pub trait ByteFetcher: Send + Sync {
    async fn get_bytes(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<ByteStream, DownloadError>;
}

/// Writes a byte stream to a destination slot, creating intermediate
/// directories as needed. Returns the storage reference for the slot.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn write_stream(&self, dest: &Path, stream: ByteStream) -> Result<String, DownloadError>;
}
