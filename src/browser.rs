//! Browser automation seam.
//!
//! The extractor only needs a handful of page operations, so it talks to
//! [`BrowserSession`] rather than to a concrete CDP client. [`ChromiumLauncher`]
//! is the production backend; tests substitute scripted sessions.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::errors::BrowserError;

/// Desktop Chrome user agent presented to the portal.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const HANDLER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One isolated browser with a single open page.
#[async_trait]
pub trait BrowserSession: Send {
    /// Loads `url` and waits for the page to finish loading.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Waits for an in-flight navigation to complete.
    async fn wait_for_navigation(&mut self, timeout: Duration) -> Result<(), BrowserError>;

    /// Waits until `selector` matches a visible element.
    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    /// Returns whether `selector` currently matches anything.
    async fn exists(&mut self, selector: &str) -> Result<bool, BrowserError>;

    /// Clicks the first element matching `selector`.
    async fn click(&mut self, selector: &str) -> Result<(), BrowserError>;

    /// Types `text` into the first element matching `selector`, one key at a
    /// time with `key_delay` between keystrokes.
    async fn type_text(
        &mut self,
        selector: &str,
        text: &str,
        key_delay: Duration,
    ) -> Result<(), BrowserError>;

    /// Current document HTML.
    async fn content(&mut self) -> Result<String, BrowserError>;

    /// Tears the browser down. Must be called on every exit path.
    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Starts a fresh browser with no state shared with other sessions.
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// Launches one headless Chromium process per session via CDP.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    headless: bool,
    executable: Option<PathBuf>,
    request_timeout: Duration,
}

static PROFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

impl ChromiumLauncher {
    pub fn new(headless: bool, executable: Option<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            headless,
            executable,
            request_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.browser_headless,
            config.chrome_executable.as_ref().map(PathBuf::from),
            config.navigation_timeout(),
        )
    }

    /// A throwaway profile directory so cookies and storage never leak
    /// between sessions.
    fn fresh_profile_dir() -> PathBuf {
        let n = PROFILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "sunat-ruc-api-{}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis(),
            n
        ))
    }

    fn browser_config(&self, profile_dir: &Path) -> Result<BrowserConfig, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={}", USER_AGENT))
            .user_data_dir(profile_dir)
            .request_timeout(self.request_timeout);

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(BrowserError::Launch)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let profile_dir = Self::fresh_profile_dir();
        let config = self.browser_config(&profile_dir)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                return Err(BrowserError::Launch(format!("failed to open page: {}", e)));
            }
        };

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
            profile_dir,
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    profile_dir: PathBuf,
}

impl ChromiumSession {
    async fn is_visible(&self, selector: &str) -> Result<bool, BrowserError> {
        let quoted = serde_json::to_string(selector)
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             const style = window.getComputedStyle(el); \
             return style.display !== 'none' && style.visibility !== 'hidden' && el.getClientRects().length > 0; }})()",
            quoted
        );
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        result
            .into_value::<bool>()
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation(format!("{}: {}", url, e))),
            Err(_) => Err(BrowserError::Timeout {
                what: format!("page load of {}", url),
                after: timeout,
            }),
        }
    }

    async fn wait_for_navigation(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        match tokio::time::timeout(timeout, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation(e.to_string())),
            Err(_) => Err(BrowserError::Timeout {
                what: "navigation".to_string(),
                after: timeout,
            }),
        }
    }

    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Evaluation errors during a page transition are expected; keep polling.
            if let Ok(true) = self.is_visible(selector).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: format!("element {}", selector),
                    after: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, BrowserError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        Ok(!elements.is_empty())
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{} ({})", selector, e)))?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        Ok(())
    }

    async fn type_text(
        &mut self,
        selector: &str,
        text: &str,
        key_delay: Duration,
    ) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{} ({})", selector, e)))?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;

        for ch in text.chars() {
            element
                .type_str(ch.to_string())
                .await
                .map_err(|e| BrowserError::Protocol(e.to_string()))?;
            tokio::time::sleep(key_delay).await;
        }
        Ok(())
    }

    async fn content(&mut self) -> Result<String, BrowserError> {
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        let ChromiumSession {
            mut browser,
            page,
            handler_task,
            profile_dir,
        } = *self;
        drop(page);

        let closed = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Protocol(format!("close failed: {}", e)));
        if closed.is_err() {
            if let Some(Err(e)) = browser.kill().await {
                tracing::warn!("Failed to kill browser process: {}", e);
            }
        }
        let _ = browser.wait().await;

        let abort = handler_task.abort_handle();
        if tokio::time::timeout(HANDLER_SHUTDOWN_GRACE, handler_task)
            .await
            .is_err()
        {
            tracing::warn!("Browser event handler did not stop in time");
            abort.abort();
        }
        if let Err(e) = tokio::fs::remove_dir_all(&profile_dir).await {
            tracing::debug!("Could not remove profile dir {:?}: {}", profile_dir, e);
        }

        closed
    }
}
