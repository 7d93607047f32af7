use std::time::Duration;
use thiserror::Error;

/// How a page fetch can fail. `RenderIncomplete` is the soft case: the page
/// loaded but its readiness marker never appeared, and the caller decides
/// whether that means empty-page or retry.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("navigation timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("page not found: {0}")]
    NotFound(String),
    #[error("readiness marker never appeared")]
    RenderIncomplete,
}

impl FetchError {
    /// Soft failures degrade to an empty/sentinel result instead of being
    /// reported as errors.
    pub fn is_soft(&self) -> bool {
        matches!(self, FetchError::RenderIncomplete | FetchError::Timeout(_))
    }
}

/// Classify a CDP navigation error by its message. The client surfaces
/// timeouts and HTTP-level failures as strings only.
pub fn classify_nav_error(message: &str, waited: Duration) -> FetchError {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        FetchError::Timeout(waited)
    } else if lower.contains("404") || lower.contains("not found") {
        FetchError::NotFound(message.to_string())
    } else {
        FetchError::Transport(message.to_string())
    }
}

/// How an image download can fail. Only `FetchFailed` is retry-eligible;
/// a storage write error is terminal for that one image.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nav_errors_classify_by_message() {
        let waited = Duration::from_secs(10);
        assert!(matches!(
            classify_nav_error("Navigation timed out", waited),
            FetchError::Timeout(_)
        ));
        assert!(matches!(
            classify_nav_error("server returned 404", waited),
            FetchError::NotFound(_)
        ));
        assert!(matches!(
            classify_nav_error("connection reset", waited),
            FetchError::Transport(_)
        ));
    }

    #[test]
    fn render_incomplete_and_timeout_are_soft() {
        assert!(FetchError::RenderIncomplete.is_soft());
        assert!(FetchError::Timeout(Duration::from_secs(10)).is_soft());
        assert!(!FetchError::Transport("reset".into()).is_soft());
    }
}
