//! Headless browser management using `chromiumoxide`.
//!
//! * Finding a Chrome or Chromium executable.
//! * `BrowserPool`: one shared browser instance, a fresh tab per search.
//! * `CdpTabHost` / `CdpTab`: background tabs exposed as DOM hosts.

pub mod tab;

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use tab::{CdpTab, CdpTabHost};

/// Chromium builds the admin pages are known to work in, most preferred first.
const BROWSER_BINARIES: [&str; 4] = ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"];

/// Install locations outside PATH.
const BROWSER_PATHS: [&str; 2] = [
    "/opt/google/chrome/chrome",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

/// `CHROME_EXECUTABLE` if it points at a file, else the first known browser
/// on PATH or at a known install location.
pub fn find_chrome_executable() -> Option<String> {
    let explicit = std::env::var("CHROME_EXECUTABLE")
        .ok()
        .filter(|p| Path::new(p).exists());
    if explicit.is_some() {
        return explicit;
    }
    BROWSER_BINARIES
        .iter()
        .find_map(|exe| which::which(exe).ok())
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| {
            BROWSER_PATHS
                .iter()
                .find(|p| Path::new(p).exists())
                .map(|p| p.to_string())
        })
}

/// Build a `BrowserConfig` for headless background tabs.
///
/// `user_data_dir` lets the tabs reuse a signed-in profile; the internal
/// pages the searches open need one.
pub fn build_headless_config(exe: &str, user_data_dir: Option<&Path>, width: u32, height: u32) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio");

    if let Some(dir) = user_data_dir {
        builder = builder.user_data_dir(dir);
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

// ── Browser Pool ─────────────────────────────────────────────────────────────

/// A shared, long-lived browser instance that opens one tab per search.
///
/// If the browser crashes, the next `acquire()` restarts it.
pub struct BrowserPool {
    exe: String,
    user_data_dir: Option<std::path::PathBuf>,
    inner: Mutex<Option<Browser>>,
}

impl std::fmt::Debug for BrowserPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserPool").field("exe", &self.exe).finish()
    }
}

impl BrowserPool {
    /// Pool for the given executable. The browser starts on first use.
    pub fn new(exe: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            exe: exe.into(),
            user_data_dir: std::env::var_os("DOM_SENTINEL_PROFILE_DIR").map(Into::into),
            inner: Mutex::new(None),
        })
    }

    /// `None` if no browser is installed on this machine.
    pub fn new_auto() -> Option<Arc<Self>> {
        find_chrome_executable().map(Self::new)
    }

    /// Acquire a blank tab from the persistent browser, launching or
    /// relaunching it when needed. Close the returned `Page` when done.
    pub async fn acquire(&self) -> Result<Page> {
        let mut guard = self.inner.lock().await;

        let alive = match guard.as_mut() {
            Some(b) => b.version().await.is_ok(),
            None => false,
        };

        if !alive {
            if let Some(mut old) = guard.take() {
                warn!("browser pool: instance dead, restarting");
                let _ = old.close().await;
            }
            info!("browser pool: launching {}", self.exe);
            let config = build_headless_config(&self.exe, self.user_data_dir.as_deref(), 1280, 900)?;
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| anyhow!("Pool: failed to launch ({}): {}", self.exe, e))?;
            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        warn!("Pool CDP handler error: {}", e);
                    }
                }
            });
            *guard = Some(browser);
        }

        let browser = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Pool: browser missing after launch"))?;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Pool: failed to open tab: {}", e))
    }

    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut b) = guard.take() {
            let _ = b.close().await;
            info!("browser pool shut down");
        }
    }
}

impl Drop for BrowserPool {
    fn drop(&mut self) {
        // Drop cannot await: hand the close to the runtime if there is one.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if let Ok(mut guard) = self.inner.try_lock() {
            if let Some(mut browser) = guard.take() {
                handle.spawn(async move {
                    let _ = browser.close().await;
                });
            }
        }
    }
}
