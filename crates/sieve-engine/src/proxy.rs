//! Proxy pool with per-entry health flags and a self-healing monitor.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sieve_types::{Result, SieveError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    #[default]
    Http,
    Socks4,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks5 => "socks5",
        }
    }
}

impl FromStr for ProxyScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(ProxyScheme::Http),
            "socks4" => Ok(ProxyScheme::Socks4),
            "socks5" => Ok(ProxyScheme::Socks5),
            other => Err(format!("unknown proxy type '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// ProxyEntry
// ---------------------------------------------------------------------------

/// One egress route. The health flag is the only mutable state and is shared
/// by every worker that picked this entry.
#[derive(Debug)]
pub struct ProxyEntry {
    host: String,
    port: u16,
    scheme: ProxyScheme,
    credentials: Option<(String, String)>,
    healthy: AtomicBool,
    direct: bool,
}

impl ProxyEntry {
    pub fn new(host: impl Into<String>, port: u16, scheme: ProxyScheme) -> Self {
        Self {
            host: host.into(),
            port,
            scheme,
            credentials: None,
            healthy: AtomicBool::new(true),
            direct: false,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// The "no proxy" entry used when no proxies are configured.
    pub fn direct() -> Self {
        Self {
            host: String::new(),
            port: 0,
            scheme: ProxyScheme::Http,
            credentials: None,
            healthy: AtomicBool::new(true),
            direct: true,
        }
    }

    /// Parse `host:port` or `host:port:user:pass`.
    pub fn parse(line: &str, scheme: ProxyScheme) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = line.trim().split(':').collect();
        let (host, port) = match parts.as_slice() {
            [host, port] | [host, port, _, _] => (*host, *port),
            _ => return Err(format!("expected host:port[:user:pass], got '{}'", line.trim())),
        };
        if host.is_empty() {
            return Err("empty host".into());
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port '{}'", port))?;
        let entry = ProxyEntry::new(host, port, scheme);
        Ok(match parts.as_slice() {
            [_, _, user, pass] => entry.with_credentials(*user, *pass),
            _ => entry,
        })
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// `scheme://host:port`, without credentials.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Flag this entry as unhealthy. The direct entry is always healthy.
    pub fn mark_unhealthy(&self) {
        if !self.direct {
            self.healthy.store(false, Ordering::Release);
        }
    }

    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::Release);
    }
}

impl fmt::Display for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.direct {
            f.write_str("direct")
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ---------------------------------------------------------------------------
// ProxyPool
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ProxyPool {
    entries: Vec<Arc<ProxyEntry>>,
    has_proxies: bool,
}

impl ProxyPool {
    /// Build a pool; an empty list yields a single direct entry.
    pub fn new(entries: Vec<ProxyEntry>) -> Self {
        if entries.is_empty() {
            return Self::direct();
        }
        Self {
            entries: entries.into_iter().map(Arc::new).collect(),
            has_proxies: true,
        }
    }

    pub fn direct() -> Self {
        Self {
            entries: vec![Arc::new(ProxyEntry::direct())],
            has_proxies: false,
        }
    }

    /// Parse a proxy list, one entry per non-blank line.
    pub fn parse_list(text: &str, scheme: ProxyScheme) -> Result<Self> {
        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = ProxyEntry::parse(line, scheme).map_err(|message| SieveError::InvalidProxy {
                line: i + 1,
                message,
            })?;
            entries.push(entry);
        }
        Ok(Self::new(entries))
    }

    /// Whether real proxies were configured (as opposed to the direct entry).
    pub fn has_proxies(&self) -> bool {
        self.has_proxies
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_healthy()).count()
    }

    pub fn entries(&self) -> &[Arc<ProxyEntry>] {
        &self.entries
    }

    /// Pick a random healthy entry, or a random entry of any health when none
    /// are healthy. Never blocks.
    pub fn next(&self) -> Arc<ProxyEntry> {
        let mut rng = rand::thread_rng();
        let healthy: Vec<&Arc<ProxyEntry>> = self.entries.iter().filter(|e| e.is_healthy()).collect();
        healthy
            .choose(&mut rng)
            .map(|e| Arc::clone(e))
            .or_else(|| self.entries.choose(&mut rng).cloned())
            .unwrap_or_else(|| Arc::new(ProxyEntry::direct()))
    }

    /// Reset every entry to healthy if none is. Returns whether a reset happened.
    pub fn reset_if_exhausted(&self) -> bool {
        if self.entries.iter().any(|e| e.is_healthy()) {
            return false;
        }
        for entry in &self.entries {
            entry.mark_healthy();
        }
        true
    }

    /// Run [`reset_if_exhausted`](Self::reset_if_exhausted) every `interval`
    /// until `cancel` fires.
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if pool.reset_if_exhausted() {
                            tracing::info!(proxies = pool.len(), "All proxies unhealthy, resetting health");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(n: u16) -> ProxyPool {
        ProxyPool::new(
            (0..n)
                .map(|i| ProxyEntry::new("10.0.0.1", 8000 + i, ProxyScheme::Http))
                .collect(),
        )
    }

    #[test]
    fn parse_entries() {
        let plain = ProxyEntry::parse("1.2.3.4:8080", ProxyScheme::Socks5).unwrap();
        assert_eq!(plain.host(), "1.2.3.4");
        assert_eq!(plain.port(), 8080);
        assert_eq!(plain.url(), "socks5://1.2.3.4:8080");
        assert!(plain.credentials().is_none());

        let auth = ProxyEntry::parse("proxy.local:3128:bob:secret", ProxyScheme::Http).unwrap();
        assert_eq!(auth.credentials(), Some(("bob", "secret")));
        assert_eq!(auth.to_string(), "proxy.local:3128");
    }

    #[test]
    fn parse_rejects_bad_lines() {
        assert!(ProxyEntry::parse("1.2.3.4", ProxyScheme::Http).is_err());
        assert!(ProxyEntry::parse("1.2.3.4:notaport", ProxyScheme::Http).is_err());
        assert!(ProxyEntry::parse("a:1:b", ProxyScheme::Http).is_err());
    }

    #[test]
    fn parse_list_reports_line_number() {
        let err = ProxyPool::parse_list("1.1.1.1:80\n\nbroken\n", ProxyScheme::Http).unwrap_err();
        assert!(matches!(err, SieveError::InvalidProxy { line: 3, .. }));
    }

    #[test]
    fn empty_pool_has_single_direct_entry() {
        let pool = ProxyPool::parse_list("\n\n", ProxyScheme::Http).unwrap();
        assert!(!pool.has_proxies());
        assert_eq!(pool.len(), 1);
        let entry = pool.next();
        assert!(entry.is_direct());
        entry.mark_unhealthy();
        assert!(entry.is_healthy());
    }

    #[test]
    fn next_prefers_healthy_entries() {
        let pool = pool_of(4);
        for entry in &pool.entries()[1..] {
            entry.mark_unhealthy();
        }
        for _ in 0..50 {
            assert_eq!(pool.next().port(), 8000);
        }
    }

    #[test]
    fn next_with_all_unhealthy_still_returns_entry() {
        let pool = pool_of(3);
        for entry in pool.entries() {
            entry.mark_unhealthy();
        }
        assert_eq!(pool.healthy_count(), 0);
        let entry = pool.next();
        assert!(!entry.is_healthy());
    }

    #[test]
    fn reset_only_when_exhausted() {
        let pool = pool_of(3);
        pool.entries()[0].mark_unhealthy();
        assert!(!pool.reset_if_exhausted());
        assert_eq!(pool.healthy_count(), 2);

        for entry in pool.entries() {
            entry.mark_unhealthy();
        }
        assert!(pool.reset_if_exhausted());
        assert_eq!(pool.healthy_count(), 3);
        assert!(pool.next().is_healthy());
    }

    #[tokio::test]
    async fn health_monitor_heals_pool() {
        let pool = Arc::new(pool_of(2));
        let cancel = CancellationToken::new();
        let handle = pool.spawn_health_monitor(Duration::from_millis(5), cancel.clone());

        for entry in pool.entries() {
            entry.mark_unhealthy();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.healthy_count(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn scheme_from_str() {
        assert_eq!("SOCKS5".parse::<ProxyScheme>().unwrap(), ProxyScheme::Socks5);
        assert_eq!("http".parse::<ProxyScheme>().unwrap(), ProxyScheme::Http);
        assert!("ftp".parse::<ProxyScheme>().is_err());
    }
}
