//! Per-attempt execution state threaded through a script run.

use std::collections::HashMap;
use std::sync::Arc;

use sieve_script::OutputTarget;
use sieve_types::{BotStatus, CustomInput};

use crate::browser::BrowserSession;
use crate::cookies::CookieJar;
use crate::proxy::ProxyEntry;

/// Variable name that reads and writes the record status.
pub const STATUS_VARIABLE: &str = "botStatus";

/// One input record, split into credentials on the first `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotInput {
    pub raw: String,
    pub username: String,
    pub password: String,
}

impl BotInput {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let (username, password) = raw
            .split_once(':')
            .map(|(u, p)| (u.to_string(), p.to_string()))
            .unwrap_or_default();
        Self {
            raw,
            username,
            password,
        }
    }
}

pub struct ExecutionContext {
    input: BotInput,
    variables: HashMap<String, String>,
    captures: Vec<(String, String)>,
    status: BotStatus,
    proxy: Arc<ProxyEntry>,
    /// Headers of the last response, in arrival order.
    pub headers: Vec<(String, String)>,
    pub cookies: CookieJar,
    pub browser: Option<Box<dyn BrowserSession>>,
    pub use_proxy: bool,
}

impl ExecutionContext {
    pub fn new(
        input: BotInput,
        proxy: Arc<ProxyEntry>,
        use_proxy: bool,
        custom_inputs: &[CustomInput],
    ) -> Self {
        let mut ctx = Self {
            input,
            variables: HashMap::new(),
            captures: Vec::new(),
            status: BotStatus::None,
            proxy,
            headers: Vec::new(),
            cookies: CookieJar::new(),
            browser: None,
            use_proxy,
        };

        let input = ctx.input.clone();
        ctx.set_variable("input", input.raw);
        ctx.set_variable("input.user", input.username.clone());
        ctx.set_variable("input.username", input.username);
        ctx.set_variable("input.pass", input.password.clone());
        ctx.set_variable("input.password", input.password);
        let proxy = if ctx.proxy.is_direct() {
            String::new()
        } else {
            ctx.proxy.to_string()
        };
        ctx.set_variable("data.proxy", proxy);
        for custom in custom_inputs {
            ctx.set_variable(&custom.name, custom.value.clone());
        }
        ctx
    }

    pub fn input(&self) -> &BotInput {
        &self.input
    }

    pub fn proxy(&self) -> &Arc<ProxyEntry> {
        &self.proxy
    }

    pub fn status(&self) -> &BotStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: BotStatus) {
        self.status = status;
    }

    /// Case-insensitive variable lookup. `botStatus` reads the status.
    pub fn variable(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case(STATUS_VARIABLE) {
            return Some(self.status.as_str());
        }
        self.variables
            .get(&name.to_lowercase())
            .map(String::as_str)
    }

    /// Set a variable. Writing `botStatus` changes the status.
    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if name.eq_ignore_ascii_case(STATUS_VARIABLE) {
            self.status = BotStatus::parse(&value);
            return;
        }
        self.variables.insert(name.to_lowercase(), value);
    }

    pub fn captures(&self) -> &[(String, String)] {
        &self.captures
    }

    /// Set a capture. An existing capture with the same name (ignoring case)
    /// keeps its position.
    pub fn set_capture(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .captures
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, slot)) => *slot = value,
            None => self.captures.push((name.to_string(), value)),
        }
    }

    /// Store an operation result: always as a variable, and as a capture too
    /// when the target asks for it.
    pub fn store_output(&mut self, target: &OutputTarget, value: impl Into<String>) {
        let value = value.into();
        if target.capture {
            self.set_capture(&target.name, value.clone());
        }
        self.set_variable(&target.name, value);
    }

    /// Close the browser session, if one is open.
    pub async fn release(&mut self) {
        if let Some(mut session) = self.browser.take() {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "Browser close failed during release");
            }
        }
    }

    pub fn into_captures(self) -> Vec<(String, String)> {
        self.captures
    }
}
