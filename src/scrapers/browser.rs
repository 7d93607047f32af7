use crate::config::ScoutConfig;
use crate::scrapers::traits::PageRenderer;
use crate::scrapers::types::{classify_nav_error, FetchError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Pool of headless Chrome sessions.
///
/// The CDP client is synchronous, so each render hops to a blocking thread.
/// Pool size bounds how many renders run at once; sessions are handed out
/// round-robin and reused across the whole run.
pub struct BrowserPool {
    browsers: Vec<Arc<Browser>>,
    slots: Semaphore,
    next: AtomicUsize,
}

impl BrowserPool {
    /// Launch `size` browser sessions up front. Failing to launch is one of
    /// the few run-fatal conditions, so it surfaces before any page work.
    pub fn launch(size: usize, config: &ScoutConfig) -> Result<Self> {
        info!("Launching {} headless Chrome session(s)...", size);

        let mut browsers = Vec::with_capacity(size);
        for _ in 0..size.max(1) {
            let options = LaunchOptions::default_builder()
                .headless(config.headless)
                .sandbox(config.sandbox)
                .build()
                .context("Failed to build launch options")?;

            let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
            browsers.push(Arc::new(browser));
        }

        Ok(Self {
            slots: Semaphore::new(browsers.len()),
            next: AtomicUsize::new(0),
            browsers,
        })
    }
}

#[async_trait]
impl PageRenderer for BrowserPool {
    async fn render(
        &self,
        url: &str,
        ready_selector: &str,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| FetchError::Transport("browser pool closed".to_string()))?;

        let browser = {
            let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.browsers.len();
            Arc::clone(&self.browsers[idx])
        };
        let url = url.to_string();
        let ready = ready_selector.to_string();

        debug!("Rendering {}", url);
        tokio::task::spawn_blocking(move || render_blocking(&browser, &url, &ready, timeout))
            .await
            .map_err(|e| FetchError::Transport(format!("render task failed: {e}")))?
    }
}

fn render_blocking(
    browser: &Browser,
    url: &str,
    ready_selector: &str,
    timeout: Duration,
) -> Result<String, FetchError> {
    let tab = browser
        .new_tab()
        .map_err(|e| FetchError::Transport(format!("could not open tab: {e}")))?;

    let result = render_on_tab(&tab, url, ready_selector, timeout);
    let _ = tab.close(true);
    result
}

fn render_on_tab(
    tab: &headless_chrome::Tab,
    url: &str,
    ready_selector: &str,
    timeout: Duration,
) -> Result<String, FetchError> {
    tab.navigate_to(url)
        .map_err(|e| classify_nav_error(&e.to_string(), timeout))?;
    tab.wait_until_navigated()
        .map_err(|e| classify_nav_error(&e.to_string(), timeout))?;

    // The readiness marker gates parsing: content rendered before it appears
    // is not trustworthy. Its absence is the soft failure case.
    if tab
        .wait_for_element_with_custom_timeout(ready_selector, timeout)
        .is_err()
    {
        warn!("Readiness marker '{}' never appeared on {}", ready_selector, url);
        return Err(FetchError::RenderIncomplete);
    }

    let html_result = tab
        .evaluate("document.documentElement.outerHTML", false)
        .map_err(|e| FetchError::Transport(format!("could not capture HTML: {e}")))?;

    match html_result.value.as_ref().and_then(|v| v.as_str()) {
        Some(html) if !html.is_empty() => Ok(html.to_string()),
        _ => {
            warn!("Empty document captured from {}", url);
            Err(FetchError::RenderIncomplete)
        }
    }
}
