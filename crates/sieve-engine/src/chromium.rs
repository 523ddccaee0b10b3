//! Chromium backend for [`BrowserDriver`] over the DevTools protocol.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventResponseReceived, GetResponseBodyParams, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use sieve_types::{Result, SieveError};
use tokio::task::JoinHandle;

use crate::browser::{BrowserDriver, BrowserSession, LaunchOptions, PageResponse};
use crate::cookies::Cookie;

const SELECTOR_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumDriver;

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.width, options.height)
            .request_timeout(options.timeout)
            .no_sandbox();
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &options.executable {
            builder = builder.chrome_executable(executable);
        }
        if let Some(proxy) = &options.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        let config = builder.build().map_err(|e| SieveError::Browser {
            action: "open".into(),
            message: e,
        })?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| cdp_error("open", options.timeout, e))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| cdp_error("open", options.timeout, e))?;
        tracing::debug!(proxy = ?options.proxy, headless = options.headless, "Browser launched");

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler,
            timeout: options.timeout,
            slow_mo: options.slow_mo,
        }))
    }
}

fn cdp_error(action: &str, timeout: Duration, error: CdpError) -> SieveError {
    match error {
        CdpError::Timeout | CdpError::LaunchTimeout(_) => SieveError::BrowserTimeout {
            action: action.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        },
        other => SieveError::Browser {
            action: action.to_string(),
            message: other.to_string(),
        },
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    timeout: Duration,
    slow_mo: Duration,
}

impl ChromiumSession {
    fn err(&self, action: &str) -> impl Fn(CdpError) -> SieveError + '_ {
        let action = action.to_string();
        move |e| cdp_error(&action, self.timeout, e)
    }

    async fn pace(&self) {
        if !self.slow_mo.is_zero() {
            tokio::time::sleep(self.slow_mo).await;
        }
    }

    async fn element(&self, action: &str, selector: &str) -> Result<Element> {
        self.pace().await;
        self.page.find_element(selector).await.map_err(self.err(action))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        self.pace().await;
        self.page.goto(url).await.map_err(self.err("goTo"))?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let element = self.element("click", selector).await?;
        element.click().await.map_err(self.err("click"))?;
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str, key_delay: Duration) -> Result<()> {
        let element = self.element("sendKey", selector).await?;
        element.focus().await.map_err(self.err("sendKey"))?;
        if key_delay.is_zero() {
            element.type_str(text).await.map_err(self.err("sendKey"))?;
            return Ok(());
        }
        let mut buf = [0u8; 4];
        for c in text.chars() {
            element
                .type_str(c.encode_utf8(&mut buf))
                .await
                .map_err(self.err("sendKey"))?;
            tokio::time::sleep(key_delay).await;
        }
        Ok(())
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        self.pace().await;
        let target = match self.page.find_element(":focus").await {
            Ok(element) => element,
            Err(_) => self.page.find_element("body").await.map_err(self.err("pressKey"))?,
        };
        target.press_key(key).await.map_err(self.err("pressKey"))?;
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        self.pace().await;
        self.page.reload().await.map_err(self.err("reload"))?;
        Ok(())
    }

    async fn evaluate(&mut self, expression: &str) -> Result<String> {
        self.pace().await;
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(self.err("evaluate"))?;
        Ok(match result.value() {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        })
    }

    async fn content(&mut self) -> Result<String> {
        self.page.content().await.map_err(self.err("getContent"))
    }

    async fn address(&mut self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(self.err("getAddress"))?
            .unwrap_or_default())
    }

    async fn attribute(&mut self, selector: &str, attribute: &str) -> Result<String> {
        let element = self.element("getAttribute", selector).await?;
        let value = match attribute.to_ascii_lowercase().as_str() {
            "innerhtml" => element.inner_html().await,
            "innertext" => element.inner_text().await,
            "textcontent" => element.string_property("textContent").await,
            _ => element.attribute(attribute).await,
        };
        Ok(value.map_err(self.err("getAttribute"))?.unwrap_or_default())
    }

    async fn wait_for_selector(&mut self, selector: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SieveError::BrowserTimeout {
                    action: "waitForSelector".into(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    async fn wait_for_response(&mut self, url: &str) -> Result<PageResponse> {
        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(self.err("waitForResponse"))?;

        let wait = async {
            while let Some(event) = events.next().await {
                if event.response.url == url || event.response.url.contains(url) {
                    return Some(event);
                }
            }
            None
        };
        let event = tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| SieveError::BrowserTimeout {
                action: "waitForResponse".into(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .ok_or_else(|| SieveError::Browser {
                action: "waitForResponse".into(),
                message: "page closed before a matching response arrived".into(),
            })?;

        let body = self
            .page
            .execute(GetResponseBodyParams::new(event.request_id.clone()))
            .await
            .map(|r| r.result.body.clone())
            .unwrap_or_default();
        let headers = event
            .response
            .headers
            .inner()
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(PageResponse {
            url: event.response.url.clone(),
            status: u16::try_from(event.response.status).unwrap_or_default(),
            headers,
            body,
        })
    }

    async fn set_extra_headers(&mut self, headers: &[(String, String)]) -> Result<()> {
        let map: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(map)))
            .await
            .map_err(self.err("setHeaders"))?;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<Cookie>> {
        let cookies = self.browser.get_cookies().await.map_err(self.err("getCookies"))?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain.trim_start_matches('.').to_ascii_lowercase(),
                path: c.path,
            })
            .collect())
    }

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<()> {
        let params = cookies
            .iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name.clone(), c.value.clone());
                param.domain = Some(c.domain.clone());
                param.path = Some(c.path.clone());
                param
            })
            .collect();
        self.browser
            .set_cookies(params)
            .await
            .map_err(self.err("setCookies"))?;
        Ok(())
    }

    async fn clear_cookies(&mut self) -> Result<()> {
        self.browser.clear_cookies().await.map_err(self.err("clearCookies"))
    }

    async fn close(&mut self) -> Result<()> {
        let closed = self.browser.close().await.map(|_| ());
        let _ = self.browser.wait().await;
        self.handler.abort();
        closed.map_err(self.err("close"))
    }
}
