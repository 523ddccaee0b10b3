//! Browser automation seam.
//!
//! A [`BrowserDriver`] launches a [`BrowserSession`] for one attempt; the
//! session lives on the execution context until `BROWSERACTION CLOSE` or
//! context teardown.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use sieve_types::{BrowserSettings, Result, SieveError};

use crate::cookies::Cookie;
use crate::proxy::ProxyEntry;

/// A response observed by the page while waiting for a URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResponse {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&mut self, url: &str) -> Result<()>;
    async fn click(&mut self, selector: &str) -> Result<()>;
    async fn type_text(&mut self, selector: &str, text: &str, key_delay: Duration) -> Result<()>;
    async fn press_key(&mut self, key: &str) -> Result<()>;
    async fn reload(&mut self) -> Result<()>;

    /// Evaluate a script expression and return its result as text.
    async fn evaluate(&mut self, expression: &str) -> Result<String>;
    async fn content(&mut self) -> Result<String>;
    async fn address(&mut self) -> Result<String>;

    /// Read `attribute` of the first element matching `selector`. The names
    /// `innerHTML`, `innerText` and `textContent` read the element itself.
    async fn attribute(&mut self, selector: &str, attribute: &str) -> Result<String>;

    async fn wait_for_selector(&mut self, selector: &str) -> Result<()>;
    async fn wait_for_response(&mut self, url: &str) -> Result<PageResponse>;
    async fn set_extra_headers(&mut self, headers: &[(String, String)]) -> Result<()>;

    async fn cookies(&mut self) -> Result<Vec<Cookie>>;
    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<()>;
    async fn clear_cookies(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    pub slow_mo: Duration,
    pub timeout: Duration,
    pub executable: Option<PathBuf>,
    /// `scheme://host:port` of the proxy to route through.
    pub proxy: Option<String>,
}

impl LaunchOptions {
    pub fn from_settings(settings: &BrowserSettings, proxy: Option<&ProxyEntry>) -> Self {
        Self {
            headless: settings.headless,
            width: settings.width,
            height: settings.height,
            slow_mo: Duration::from_millis(settings.slow_mo_ms),
            timeout: Duration::from_millis(settings.timeout_ms),
            executable: settings.executable.as_ref().map(PathBuf::from),
            proxy: proxy.filter(|p| !p.is_direct()).map(ProxyEntry::url),
        }
    }
}

/// Driver used when no browser backend is compiled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDriver;

#[async_trait]
impl BrowserDriver for UnavailableDriver {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn BrowserSession>> {
        Err(SieveError::Browser {
            action: "open".into(),
            message: "no browser backend available (build with the `chromium` feature)".into(),
        })
    }
}


/// Recording browser used by unit tests of the page and browser actions.
#[cfg(test)]
pub(crate) mod fake {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default, Clone)]
    pub struct FakeBrowser {
        pub log: Arc<Mutex<Vec<String>>>,
        pub launches: Arc<Mutex<Vec<LaunchOptions>>>,
        pub cookies: Arc<Mutex<Vec<Cookie>>>,
    }

    impl FakeBrowser {
        pub fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        pub fn session(&self) -> Box<dyn BrowserSession> {
            Box::new(self.clone())
        }

        fn record(&self, call: String) {
            self.log.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl BrowserDriver for FakeBrowser {
        async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>> {
            self.launches.lock().unwrap().push(options.clone());
            Ok(self.session())
        }
    }

    #[async_trait]
    impl BrowserSession for FakeBrowser {
        async fn goto(&mut self, url: &str) -> Result<()> {
            self.record(format!("goto {}", url));
            Ok(())
        }
        async fn click(&mut self, selector: &str) -> Result<()> {
            self.record(format!("click {}", selector));
            Ok(())
        }
        async fn type_text(&mut self, selector: &str, text: &str, key_delay: Duration) -> Result<()> {
            self.record(format!("type {} {} {}", selector, text, key_delay.as_millis()));
            Ok(())
        }
        async fn press_key(&mut self, key: &str) -> Result<()> {
            self.record(format!("press {}", key));
            Ok(())
        }
        async fn reload(&mut self) -> Result<()> {
            self.record("reload".into());
            Ok(())
        }
        async fn evaluate(&mut self, expression: &str) -> Result<String> {
            self.record(format!("evaluate {}", expression));
            Ok(if expression.contains("null") { String::new() } else { "42".into() })
        }
        async fn content(&mut self) -> Result<String> {
            Ok("<html>fake</html>".into())
        }
        async fn address(&mut self) -> Result<String> {
            Ok("https://fake.test/home".into())
        }
        async fn attribute(&mut self, selector: &str, attribute: &str) -> Result<String> {
            Ok(format!("{}@{}", selector, attribute))
        }
        async fn wait_for_selector(&mut self, selector: &str) -> Result<()> {
            self.record(format!("wait {}", selector));
            Ok(())
        }
        async fn wait_for_response(&mut self, url: &str) -> Result<PageResponse> {
            Ok(PageResponse {
                url: format!("https://fake.test{}", url),
                status: 201,
                headers: vec![("content-type".into(), "application/json".into())],
                body: "{\"ok\":true}".into(),
            })
        }
        async fn set_extra_headers(&mut self, headers: &[(String, String)]) -> Result<()> {
            for (name, value) in headers {
                self.record(format!("header {}={}", name, value));
            }
            Ok(())
        }
        async fn cookies(&mut self) -> Result<Vec<Cookie>> {
            Ok(self.cookies.lock().unwrap().clone())
        }
        async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<()> {
            self.cookies.lock().unwrap().extend_from_slice(cookies);
            Ok(())
        }
        async fn clear_cookies(&mut self) -> Result<()> {
            self.cookies.lock().unwrap().clear();
            Ok(())
        }
        async fn close(&mut self) -> Result<()> {
            self.record("close".into());
            Ok(())
        }
    }
}
