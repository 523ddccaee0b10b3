use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::Md5;
use rand::seq::SliceRandom;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use sieve_script::{FunctionAction, FunctionOp, HashAlgorithm};
use sieve_types::{Result, SieveError};

use super::{store_non_empty, Environment};
use crate::context::ExecutionContext;
use crate::template::resolve;

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const SYMBOLS: &str = "\\!\"£$%&/()=?^'{}[]@#,;.:-_*+";
const HEX: &str = "0123456789abcdef";

pub(super) async fn run(op: &FunctionOp, ctx: &mut ExecutionContext, env: &Environment) -> Result<()> {
    let value = match &op.action {
        FunctionAction::Base64Decode(input) => {
            let bytes = BASE64
                .decode(resolve(input, ctx).trim())
                .map_err(|e| SieveError::operation("BASE64DECODE", e))?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        FunctionAction::Base64Encode(input) => BASE64.encode(resolve(input, ctx)),
        FunctionAction::ClearCookies => {
            ctx.cookies.clear();
            return Ok(());
        }
        FunctionAction::Constant(input) => resolve(input, ctx),
        FunctionAction::CurrentUnixTime => chrono::Utc::now().timestamp().to_string(),
        FunctionAction::Delay(millis) => {
            let millis = resolve(millis, ctx);
            let millis: u64 = millis
                .trim()
                .parse()
                .map_err(|_| SieveError::operation("DELAY", format!("'{}' is not a number of milliseconds", millis)))?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            return Ok(());
        }
        FunctionAction::RandomUserAgent(kind) => env.user_agents.pick(&resolve(kind, ctx))?,
        FunctionAction::Hash { algorithm, input } => hash(*algorithm, &resolve(input, ctx)),
        FunctionAction::HtmlDecode(input) => {
            html_escape::decode_html_entities(&resolve(input, ctx)).into_owned()
        }
        FunctionAction::HtmlEncode(input) => {
            html_escape::encode_quoted_attribute(&resolve(input, ctx)).into_owned()
        }
        FunctionAction::UrlDecode(input) => {
            let input = resolve(input, ctx).replace('+', " ");
            urlencoding::decode(&input)
                .map_err(|e| SieveError::operation("URLDECODE", e))?
                .into_owned()
        }
        FunctionAction::UrlEncode(input) => {
            urlencoding::encode(&resolve(input, ctx)).replace("%20", "+")
        }
        FunctionAction::Length(input) => resolve(input, ctx).chars().count().to_string(),
        FunctionAction::RandomString(mask) => random_string(&resolve(mask, ctx)),
        FunctionAction::ToLowercase(input) => resolve(input, ctx).to_lowercase(),
        FunctionAction::ToUppercase(input) => resolve(input, ctx).to_uppercase(),
    };

    store_non_empty(ctx, op.output.as_ref(), value);
    Ok(())
}

/// Hex digest of `input`. MD5 is upper-case, the SHA family lower-case.
fn hash(algorithm: HashAlgorithm, input: &str) -> String {
    let bytes = input.as_bytes();
    match algorithm {
        HashAlgorithm::Md5 => hex::encode_upper(Md5::digest(bytes)),
        HashAlgorithm::Sha1 => hex::encode(Sha1::digest(bytes)),
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        HashAlgorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
    }
}

fn charset(mask: char) -> Option<String> {
    let set = match mask {
        'l' => LOWERCASE.to_string(),
        'u' => UPPERCASE.to_string(),
        'd' => DIGITS.to_string(),
        's' => SYMBOLS.to_string(),
        'h' => HEX.to_string(),
        'a' => [LOWERCASE, UPPERCASE, DIGITS, SYMBOLS].concat(),
        'm' => [UPPERCASE, DIGITS].concat(),
        'n' => [LOWERCASE, DIGITS].concat(),
        'i' => [LOWERCASE, UPPERCASE, DIGITS].concat(),
        'f' => [LOWERCASE, UPPERCASE].concat(),
        _ => return None,
    };
    Some(set)
}

/// Expand `?l ?u ?d ?s ?h ?a ?m ?n ?i ?f` masks into random characters.
/// Everything else is copied through.
pub fn random_string(mask: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(mask.len());
    let mut chars = mask.chars().peekable();
    while let Some(c) = chars.next() {
        let set = match (c, chars.peek()) {
            ('?', Some(&next)) => charset(next),
            _ => None,
        };
        match set {
            Some(set) => {
                chars.next();
                let pool: Vec<char> = set.chars().collect();
                out.push(pool[rng.gen_range(0..pool.len())]);
            }
            None => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// User agents
// ---------------------------------------------------------------------------

/// User-agent strings grouped by kind, one `<kind>.txt` file per kind.
#[derive(Debug, Clone, Default)]
pub struct UserAgents {
    by_kind: HashMap<String, Vec<String>>,
}

impl UserAgents {
    /// Load every `*.txt` file in `dir`. A missing directory yields an empty
    /// set.
    pub async fn load(dir: &Path) -> Result<Self> {
        let mut agents = Self::default();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %dir.display(), "No user agent directory");
                return Ok(agents);
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(kind) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = tokio::fs::read_to_string(&path).await?;
            let lines = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
            agents = agents.with_kind(kind, lines);
        }
        tracing::debug!(path = %dir.display(), kinds = agents.by_kind.len(), "User agents loaded");
        Ok(agents)
    }

    pub fn with_kind(mut self, kind: &str, agents: Vec<String>) -> Self {
        self.by_kind.insert(kind.to_lowercase(), agents);
        self
    }

    /// A random agent of `kind`, or of any kind when `kind` is empty.
    pub fn pick(&self, kind: &str) -> Result<String> {
        let mut rng = rand::thread_rng();
        let kind = kind.trim();
        let chosen = if kind.is_empty() {
            let all: Vec<&String> = self.by_kind.values().flatten().collect();
            all.choose(&mut rng).map(|s| s.to_string())
        } else {
            let list = self.by_kind.get(&kind.to_lowercase()).ok_or_else(|| {
                SieveError::operation("GETRANDOMUA", format!("unknown user agent kind '{}'", kind))
            })?;
            list.choose(&mut rng).cloned()
        };
        chosen.ok_or_else(|| SieveError::operation("GETRANDOMUA", "no user agents loaded"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::UnavailableDriver;
    use crate::context::BotInput;
    use crate::proxy::ProxyEntry;
    use crate::transport::{HttpRequest, HttpResponse, Transport};
    use async_trait::async_trait;
    use regex::Regex;
    use sieve_script::OutputTarget;
    use sieve_types::RunSettings;
    use std::sync::Arc;
    use url::Url;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn send(&self, _: HttpRequest, _: Option<&ProxyEntry>, _: bool) -> Result<HttpResponse> {
            unreachable!("functions never send")
        }
    }

    fn env(user_agents: UserAgents) -> Environment {
        Environment {
            transport: Arc::new(NoTransport),
            browser: Arc::new(UnavailableDriver),
            settings: Arc::new(RunSettings::default()),
            user_agents: Arc::new(user_agents),
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(BotInput::new("user:Secret Pass"), Arc::new(ProxyEntry::direct()), false, &[])
    }

    async fn eval(action: FunctionAction) -> Option<String> {
        let mut c = ctx();
        let op = FunctionOp {
            action,
            output: Some(OutputTarget {
                name: "out".into(),
                capture: false,
            }),
        };
        run(&op, &mut c, &env(UserAgents::default())).await.unwrap();
        c.variable("out").map(String::from)
    }

    #[tokio::test]
    async fn hashes_follow_case_conventions() {
        let md5 = eval(FunctionAction::Hash {
            algorithm: HashAlgorithm::Md5,
            input: "abc".into(),
        })
        .await;
        assert_eq!(md5.as_deref(), Some("900150983CD24FB0D6963F7D28E17F72"));

        let sha1 = eval(FunctionAction::Hash {
            algorithm: HashAlgorithm::Sha1,
            input: "abc".into(),
        })
        .await;
        assert_eq!(sha1.as_deref(), Some("a9993e364706816aba3e25717850c26c9cd0d89d"));

        let sha256 = eval(FunctionAction::Hash {
            algorithm: HashAlgorithm::Sha256,
            input: "abc".into(),
        })
        .await;
        assert_eq!(
            sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[tokio::test]
    async fn encodings() {
        assert_eq!(
            eval(FunctionAction::Base64Encode("<input.user>".into())).await.as_deref(),
            Some("dXNlcg==")
        );
        assert_eq!(
            eval(FunctionAction::Base64Decode("dXNlcg==".into())).await.as_deref(),
            Some("user")
        );
        assert_eq!(
            eval(FunctionAction::UrlEncode("<input.pass>&x".into())).await.as_deref(),
            Some("Secret+Pass%26x")
        );
        assert_eq!(
            eval(FunctionAction::UrlDecode("a+b%21".into())).await.as_deref(),
            Some("a b!")
        );
        assert_eq!(
            eval(FunctionAction::HtmlEncode("<a href='x'>".into())).await.as_deref(),
            Some("&lt;a href=&#x27;x&#x27;&gt;")
        );
        assert_eq!(
            eval(FunctionAction::HtmlDecode("&lt;b&gt; &amp; &quot;".into())).await.as_deref(),
            Some("<b> & \"")
        );
    }

    #[tokio::test]
    async fn text_transforms() {
        assert_eq!(eval(FunctionAction::Length("héllo".into())).await.as_deref(), Some("5"));
        assert_eq!(
            eval(FunctionAction::ToUppercase("<input.pass>".into())).await.as_deref(),
            Some("SECRET PASS")
        );
        assert_eq!(
            eval(FunctionAction::ToLowercase("MiXeD".into())).await.as_deref(),
            Some("mixed")
        );
        assert_eq!(
            eval(FunctionAction::Constant("<input.user>-1".into())).await.as_deref(),
            Some("user-1")
        );
    }

    #[tokio::test]
    async fn empty_result_is_not_stored() {
        assert_eq!(eval(FunctionAction::Constant("<missing>".into())).await, None);
    }

    #[tokio::test]
    async fn unix_time_is_seconds() {
        let now = eval(FunctionAction::CurrentUnixTime).await.unwrap();
        let secs: i64 = now.parse().unwrap();
        assert!((secs - chrono::Utc::now().timestamp()).abs() < 5);
    }

    #[tokio::test]
    async fn clear_cookies_empties_jar() {
        let mut c = ctx();
        let url = Url::parse("http://example.com/").unwrap();
        c.cookies.insert_pair(&url, "a=1");
        let op = FunctionOp {
            action: FunctionAction::ClearCookies,
            output: None,
        };
        run(&op, &mut c, &env(UserAgents::default())).await.unwrap();
        assert!(c.cookies.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_sleeps_and_rejects_garbage() {
        let mut c = ctx();
        let op = FunctionOp {
            action: FunctionAction::Delay("250".into()),
            output: None,
        };
        let started = tokio::time::Instant::now();
        run(&op, &mut c, &env(UserAgents::default())).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));

        let bad = FunctionOp {
            action: FunctionAction::Delay("soon".into()),
            output: None,
        };
        assert!(run(&bad, &mut c, &env(UserAgents::default())).await.is_err());
    }

    #[test]
    fn random_string_masks() {
        let re = Regex::new("^[a-z][a-z][0-9]$").unwrap();
        for _ in 0..50 {
            assert!(re.is_match(&random_string("?l?l?d")));
        }
        let hex = Regex::new("^id-[0-9a-f]{4}[A-Z0-9]$").unwrap();
        assert!(hex.is_match(&random_string("id-?h?h?h?h?m")));
        assert_eq!(random_string("?z?"), "?z?");
    }

    #[tokio::test]
    async fn user_agents_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("Chrome.txt"), "ua-chrome-1\n\nua-chrome-2\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.md"), "ignored").await.unwrap();

        let agents = UserAgents::load(dir.path()).await.unwrap();
        assert!(agents.pick("chrome").unwrap().starts_with("ua-chrome-"));
        assert!(agents.pick("").unwrap().starts_with("ua-chrome-"));
        assert!(agents.pick("firefox").is_err());
    }

    #[tokio::test]
    async fn missing_user_agent_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let agents = UserAgents::load(&dir.path().join("nope")).await.unwrap();
        assert!(agents.pick("").is_err());
    }

    #[tokio::test]
    async fn random_user_agent_stores_value() {
        let mut c = ctx();
        let op = FunctionOp {
            action: FunctionAction::RandomUserAgent("mobile".into()),
            output: Some(OutputTarget {
                name: "ua".into(),
                capture: false,
            }),
        };
        let agents = UserAgents::default().with_kind("Mobile", vec!["ua-m".into()]);
        run(&op, &mut c, &env(agents)).await.unwrap();
        assert_eq!(c.variable("ua"), Some("ua-m"));
    }
}
