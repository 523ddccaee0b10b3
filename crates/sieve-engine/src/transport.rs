//! HTTP transport seam and the reqwest-backed default.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sieve_types::{Result, SieveError};
use url::Url;

use crate::proxy::ProxyEntry;

#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Text { content: String, content_type: String },
    /// `multipart/form-data` text fields, in order.
    Multipart(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub cookie_header: Option<String>,
    pub body: Option<HttpBody>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Address after redirects.
    pub final_url: String,
    pub headers: Vec<(String, String)>,
    /// Empty when the body was not read.
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request`, routed through `proxy` when one is given.
    ///
    /// Timeouts map to [`SieveError::TransportTimeout`], failures to
    /// connect to [`SieveError::ProxyUnreachable`], everything else to
    /// [`SieveError::Transport`].
    async fn send(
        &self,
        request: HttpRequest,
        proxy: Option<&ProxyEntry>,
        read_body: bool,
    ) -> Result<HttpResponse>;
}

// ---------------------------------------------------------------------------
// ReqwestTransport
// ---------------------------------------------------------------------------

/// Keeps one direct client and one client per proxy, created on first use.
pub struct ReqwestTransport {
    timeout: Duration,
    direct: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let direct = Self::builder(timeout)
            .build()
            .map_err(|e| SieveError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            timeout,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn builder(timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
    }

    fn client_for(&self, proxy: Option<&ProxyEntry>) -> Result<reqwest::Client> {
        let Some(proxy) = proxy.filter(|p| !p.is_direct()) else {
            return Ok(self.direct.clone());
        };

        let key = proxy_key(proxy);
        let mut clients = self.proxied.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut route = reqwest::Proxy::all(proxy.url()).map_err(|e| SieveError::ProxyUnreachable {
            proxy: proxy.to_string(),
            message: e.to_string(),
        })?;
        if let Some((user, pass)) = proxy.credentials() {
            route = route.basic_auth(user, pass);
        }
        let client = Self::builder(self.timeout)
            .proxy(route)
            .build()
            .map_err(|e| SieveError::ProxyUnreachable {
                proxy: proxy.to_string(),
                message: e.to_string(),
            })?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn classify(&self, error: reqwest::Error, url: &Url, proxy: Option<&ProxyEntry>) -> SieveError {
        if error.is_timeout() {
            SieveError::TransportTimeout {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if error.is_connect() {
            SieveError::ProxyUnreachable {
                proxy: proxy.map(ToString::to_string).unwrap_or_else(|| "direct".into()),
                message: error.to_string(),
            }
        } else {
            SieveError::Transport {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

fn proxy_key(proxy: &ProxyEntry) -> String {
    match proxy.credentials() {
        Some((user, _)) => format!("{}@{}", user, proxy.url()),
        None => proxy.url(),
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        proxy: Option<&ProxyEntry>,
        read_body: bool,
    ) -> Result<HttpResponse> {
        let client = self.client_for(proxy)?;
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| SieveError::Transport {
                url: request.url.to_string(),
                message: format!("invalid method '{}': {}", request.method, e),
            })?;

        let mut builder = client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = &request.cookie_header {
            builder = builder.header(reqwest::header::COOKIE, cookie.as_str());
        }
        builder = match request.body {
            Some(HttpBody::Text {
                content,
                content_type,
            }) => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(content),
            Some(HttpBody::Multipart(fields)) => {
                let form = fields
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, (name, value)| {
                        form.text(name, value)
                    });
                builder.multipart(form)
            }
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| self.classify(e, &request.url, proxy))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = if read_body {
            response
                .text()
                .await
                .map_err(|e| self.classify(e, &request.url, proxy))?
        } else {
            String::new()
        };

        tracing::trace!(status, url = %final_url, "Response received");
        Ok(HttpResponse {
            status,
            final_url,
            headers,
            body,
        })
    }
}
