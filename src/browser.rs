//! Chromium session bootstrap.
//!
//! A [`BrowserSession`] owns the launched browser, the task that drives
//! its CDP event handler, and one working page. Sessions authenticate by
//! replaying a cookie file captured with `jh session save`; the file uses
//! the common browser-automation cookie layout so existing exports load
//! unchanged.

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::{Handler, Page};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;

/// One cookie as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Seconds since the epoch; negative for session cookies.
    #[serde(default = "default_expires")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}
fn default_expires() -> f64 {
    -1.0
}

impl StoredCookie {
    pub fn to_param(&self) -> Result<CookieParam> {
        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone())
            .domain(self.domain.clone())
            .path(self.path.clone())
            .http_only(self.http_only)
            .secure(self.secure);
        if self.expires >= 0.0 {
            builder = builder.expires(TimeSinceEpoch::new(self.expires));
        }
        if let Some(same_site) = self.same_site.as_deref().and_then(parse_same_site) {
            builder = builder.same_site(same_site);
        }
        builder
            .build()
            .map_err(|e| anyhow!("invalid cookie '{}': {}", self.name, e))
    }
}

impl From<&Cookie> for StoredCookie {
    fn from(c: &Cookie) -> Self {
        Self {
            name: c.name.clone(),
            value: c.value.clone(),
            domain: c.domain.clone(),
            path: c.path.clone(),
            expires: if c.session { -1.0 } else { c.expires },
            http_only: c.http_only,
            secure: c.secure,
            same_site: c.same_site.as_ref().map(|s| same_site_label(s).to_string()),
        }
    }
}

fn parse_same_site(raw: &str) -> Option<CookieSameSite> {
    match raw.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => None,
    }
}

fn same_site_label(s: &CookieSameSite) -> &'static str {
    match s {
        CookieSameSite::Strict => "Strict",
        CookieSameSite::Lax => "Lax",
        CookieSameSite::None => "None",
    }
}

/// Read a cookie file. A missing file yields `Ok(None)`.
pub fn read_cookie_file(path: &Path) -> Result<Option<Vec<StoredCookie>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read cookie file: {}", path.display()))
        }
    };
    let cookies: Vec<StoredCookie> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse cookie file: {}", path.display()))?;
    Ok(Some(cookies))
}

/// Read and convert a cookie file for replay. A missing file yields
/// `Ok(None)` with a warning.
pub fn load_cookie_params(path: &Path) -> Result<Option<Vec<CookieParam>>> {
    match read_cookie_file(path)? {
        Some(cookies) => {
            let params = cookies
                .iter()
                .map(StoredCookie::to_param)
                .collect::<Result<Vec<_>>>()?;
            Ok(Some(params))
        }
        None => {
            warn!(file = %path.display(), "cookie file not found; proceeding without cookies");
            Ok(None)
        }
    }
}

pub fn write_cookie_file(path: &Path, cookies: &[StoredCookie]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(cookies)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write cookie file: {}", path.display()))
}

/// A launched browser with one working page.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl BrowserSession {
    /// Launch Chromium per `cfg`, replay the cookie file if one exists and
    /// open a blank working page.
    pub async fn launch(cfg: &BrowserConfig) -> Result<Self> {
        Self::launch_with(cfg, true).await
    }

    /// Launch without replaying cookies (used when capturing a new login).
    pub async fn launch_fresh(cfg: &BrowserConfig) -> Result<Self> {
        Self::launch_with(cfg, false).await
    }

    async fn launch_with(cfg: &BrowserConfig, replay_cookies: bool) -> Result<Self> {
        // Cookie errors surface before a browser process exists.
        let cookies = if replay_cookies {
            load_cookie_params(&cfg.cookie_file)?
        } else {
            None
        };

        let config = cdp_config(cfg)?;
        info!(headless = cfg.headless, "launching browser");
        let (mut browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser: {}", e))?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                return Err(anyhow!("Failed to open page: {}", e));
            }
        };

        let session = Self {
            browser,
            page,
            handler_task,
            closed,
        };

        if let Some(params) = cookies {
            let n = params.len();
            let replayed = session.set_cookie_params(params).await;
            if let Err(e) = replayed {
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "browser did not close cleanly");
                }
                return Err(e);
            }
            info!(count = n, file = %cfg.cookie_file.display(), "loaded cookies");
        }
        Ok(session)
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Navigate the working page and wait for the load to finish.
    pub async fn goto(&self, url: &str) -> Result<()> {
        debug!(%url, "navigating");
        self.page
            .goto(url)
            .await
            .map_err(|e| anyhow!("Navigation to {} failed: {}", url, e))?;
        Ok(())
    }

    /// Open `url` in a new tab of the same browser.
    pub async fn new_tab(&self, url: &str) -> Result<Page> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| anyhow!("Failed to open tab for {}: {}", url, e))?;
        Ok(page)
    }

    pub async fn title(&self) -> Result<Option<String>> {
        self.page
            .get_title()
            .await
            .map_err(|e| anyhow!("Failed to read page title: {}", e))
    }

    pub async fn set_cookies(&self, cookies: &[StoredCookie]) -> Result<usize> {
        let params = cookies
            .iter()
            .map(StoredCookie::to_param)
            .collect::<Result<Vec<_>>>()?;
        let n = params.len();
        self.set_cookie_params(params).await?;
        Ok(n)
    }

    async fn set_cookie_params(&self, params: Vec<CookieParam>) -> Result<()> {
        self.page
            .set_cookies(params)
            .await
            .map_err(|e| anyhow!("Failed to set cookies: {}", e))?;
        Ok(())
    }

    pub async fn cookies(&self) -> Result<Vec<StoredCookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| anyhow!("Failed to read cookies: {}", e))?;
        Ok(cookies.iter().map(StoredCookie::from).collect())
    }

    /// Shut the browser down and stop the handler task.
    pub async fn close(mut self) -> Result<()> {
        info!("closing browser session");
        let result = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        result.map_err(|e| anyhow!("Failed to close browser: {}", e))?;
        Ok(())
    }
}

fn cdp_config(cfg: &BrowserConfig) -> Result<CdpBrowserConfig> {
    let mut builder = CdpBrowserConfig::builder()
        .window_size(cfg.window_width, cfg.window_height)
        .viewport(None)
        .launch_timeout(Duration::from_secs(cfg.launch_timeout_secs))
        .args(vec![
            "--no-sandbox",
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-blink-features=AutomationControlled",
        ]);

    if !cfg.headless {
        builder = builder.with_head();
    }
    if let Some(dir) = &cfg.profile_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create profile dir: {}", dir.display()))?;
        builder = builder.user_data_dir(dir.clone());
    }
    if let Some(exe) = &cfg.executable {
        builder = builder.chrome_executable(exe.clone());
    }

    builder
        .build()
        .map_err(|e| anyhow!("browser config error: {}", e))
}

fn spawn_handler_task(mut handler: Handler, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!(error = %e, "cdp handler event error");
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}

/// `jh session save`: open the login page, give the operator `wait` to log
/// in by hand, then write the session cookies to the cookie file.
pub async fn save_session(cfg: &BrowserConfig, login_url: &str, wait: Duration) -> Result<usize> {
    let mut headed = cfg.clone();
    headed.headless = false;
    let session = BrowserSession::launch_fresh(&headed).await?;

    let outcome = async {
        session.goto(login_url).await?;
        println!("Log in manually. You have {} seconds.", wait.as_secs());
        tokio::time::sleep(wait).await;
        let cookies = session.cookies().await?;
        write_cookie_file(&cfg.cookie_file, &cookies)?;
        Ok::<usize, anyhow::Error>(cookies.len())
    }
    .await;

    session.close().await?;
    let n = outcome?;
    println!("Cookies saved to {} ({} cookies)", cfg.cookie_file.display(), n);
    Ok(n)
}

/// `jh session check`: load the search page with stored cookies and print
/// its title.
pub async fn check_session(cfg: &BrowserConfig, search_url: &str) -> Result<String> {
    let session = BrowserSession::launch(cfg).await?;
    let outcome = async {
        session.goto(search_url).await?;
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok::<String, anyhow::Error>(session.title().await?.unwrap_or_default())
    }
    .await;
    session.close().await?;
    let title = outcome?;
    println!("Page title: {}", title);
    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EXPORTED: &str = r#"[
        {"name": "li_at", "value": "AQE", "domain": ".linkedin.com", "path": "/",
         "expires": 1781000000.5, "httpOnly": true, "secure": true, "sameSite": "None"},
        {"name": "lang", "value": "v=2&lang=en-us", "domain": ".linkedin.com", "path": "/",
         "expires": -1, "httpOnly": false, "secure": true, "sameSite": "Lax"}
    ]"#;

    #[test]
    fn exported_cookie_file_parses() {
        let cookies: Vec<StoredCookie> = serde_json::from_str(EXPORTED).unwrap();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].http_only);
        assert_eq!(cookies[1].expires, -1.0);
        assert_eq!(cookies[1].same_site.as_deref(), Some("Lax"));
    }

    #[test]
    fn minimal_cookie_gets_defaults() {
        let c: StoredCookie =
            serde_json::from_str(r#"{"name":"a","value":"b","domain":"x.test"}"#).unwrap();
        assert_eq!(c.path, "/");
        assert!(c.expires < 0.0);
        assert!(c.same_site.is_none());
    }

    #[test]
    fn cookies_convert_to_params() {
        let cookies: Vec<StoredCookie> = serde_json::from_str(EXPORTED).unwrap();
        let p = cookies[0].to_param().unwrap();
        assert_eq!(p.name, "li_at");
        assert_eq!(p.same_site, Some(CookieSameSite::None));
        assert!(p.expires.is_some());

        let session = cookies[1].to_param().unwrap();
        assert!(session.expires.is_none());
    }

    #[test]
    fn same_site_parsing_is_case_insensitive() {
        assert_eq!(parse_same_site("strict"), Some(CookieSameSite::Strict));
        assert_eq!(parse_same_site("LAX"), Some(CookieSameSite::Lax));
        assert_eq!(parse_same_site("bogus"), None);
    }

    #[test]
    fn cookie_file_round_trip_and_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/cookies.json");
        assert!(read_cookie_file(&path).unwrap().is_none());

        let cookies: Vec<StoredCookie> = serde_json::from_str(EXPORTED).unwrap();
        write_cookie_file(&path, &cookies).unwrap();
        assert_eq!(read_cookie_file(&path).unwrap().unwrap(), cookies);
    }

    #[test]
    fn malformed_cookie_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cookies.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_cookie_file(&path).is_err());
    }

    #[test]
    fn cookie_params_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cookies.json");
        assert!(load_cookie_params(&path).unwrap().is_none());

        std::fs::write(&path, EXPORTED).unwrap();
        let params = load_cookie_params(&path).unwrap().unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "li_at");
    }

    #[tokio::test]
    async fn malformed_cookie_file_fails_before_launch() {
        let tmp = TempDir::new().unwrap();
        let cookie_file = tmp.path().join("cookies.json");
        std::fs::write(&cookie_file, "{not json").unwrap();
        let cfg = BrowserConfig {
            headless: true,
            cookie_file,
            executable: Some(tmp.path().join("no-such-chromium")),
            ..BrowserConfig::default()
        };

        let err = match BrowserSession::launch(&cfg).await {
            Ok(_) => panic!("launch should fail"),
            Err(e) => format!("{:#}", e),
        };
        assert!(err.contains("Failed to parse cookie file"), "err={}", err);
        assert!(!err.contains("Failed to launch browser"), "err={}", err);
    }
}
